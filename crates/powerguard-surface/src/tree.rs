//! Bounded keyword scan over an accessibility node tree.
//!
//! Nodes are owned handles to OS resources. Each handle is released when it
//! is dropped, so the scan keeps a local stack of handles and drops every
//! node as soon as it has been inspected and its children acquired.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum TreeScanError {
    #[error("Node is no longer valid: {0}")]
    StaleNode(String),

    #[error("Platform error: {0}")]
    Platform(String),
}

/// An owned handle to one node of the on-screen tree.
///
/// Implementations release the underlying OS resource in `Drop`.
pub trait AccessibilityNode {
    fn text(&self) -> Option<String>;

    fn content_description(&self) -> Option<String>;

    fn child_count(&self) -> usize;

    /// Acquire the child at `index`. `Ok(None)` means the child vanished.
    fn child(&self, index: usize) -> Result<Option<Box<dyn AccessibilityNode>>, TreeScanError>;

    /// Stable identity of the node, when the platform provides one.
    fn node_id(&self) -> Option<u64> {
        None
    }
}

/// Caps on a single scan. The scan runs on the event-delivery thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeScanLimits {
    /// Deepest level inspected (the root is depth 0).
    pub max_depth: usize,
    /// Maximum number of node handles acquired, root included.
    pub max_nodes: usize,
}

impl Default for TreeScanLimits {
    fn default() -> Self {
        Self {
            max_depth: 12,
            max_nodes: 256,
        }
    }
}

/// Outcome of a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeScan {
    pub matched: bool,
    pub nodes_visited: usize,
    /// A cap stopped the scan before the whole tree was seen.
    pub truncated: bool,
}

/// Search the tree under `root` for a node whose text or content description
/// contains one of `keywords` (expected lower-case).
pub fn scan_tree(
    root: Box<dyn AccessibilityNode>,
    keywords: &[String],
    limits: &TreeScanLimits,
) -> Result<TreeScan, TreeScanError> {
    let mut scan = TreeScan::default();
    let mut seen = HashSet::new();
    let mut acquired = 1usize;
    let mut stack: Vec<(Box<dyn AccessibilityNode>, usize)> = vec![(root, 0)];

    while let Some((node, depth)) = stack.pop() {
        if let Some(id) = node.node_id() {
            if !seen.insert(id) {
                continue;
            }
        }
        scan.nodes_visited += 1;

        if node_matches(node.as_ref(), keywords) {
            scan.matched = true;
            return Ok(scan);
        }

        let children = node.child_count();
        if children == 0 {
            continue;
        }
        if depth >= limits.max_depth {
            scan.truncated = true;
            continue;
        }

        // Reverse push keeps document order on pop.
        let mut batch = Vec::with_capacity(children);
        for index in 0..children {
            if acquired >= limits.max_nodes {
                scan.truncated = true;
                break;
            }
            if let Some(child) = node.child(index)? {
                acquired += 1;
                batch.push((child, depth + 1));
            }
        }
        drop(node);
        stack.extend(batch.into_iter().rev());
    }

    Ok(scan)
}

fn node_matches(node: &dyn AccessibilityNode, keywords: &[String]) -> bool {
    let text = node.text().unwrap_or_default().to_lowercase();
    let description = node.content_description().unwrap_or_default().to_lowercase();
    if text.is_empty() && description.is_empty() {
        return false;
    }
    keywords
        .iter()
        .any(|k| text.contains(k.as_str()) || description.contains(k.as_str()))
}

/// In-memory node tree, used for trace replay and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotNode {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub content_description: Option<String>,
    #[serde(default)]
    pub children: Vec<SnapshotNode>,
}

impl SnapshotNode {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }

    pub fn described(description: &str) -> Self {
        Self {
            content_description: Some(description.to_string()),
            ..Self::default()
        }
    }

    pub fn with_child(mut self, child: SnapshotNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn into_handle(self) -> Box<dyn AccessibilityNode> {
        Box::new(self)
    }
}

impl AccessibilityNode for SnapshotNode {
    fn text(&self) -> Option<String> {
        self.text.clone()
    }

    fn content_description(&self) -> Option<String> {
        self.content_description.clone()
    }

    fn child_count(&self) -> usize {
        self.children.len()
    }

    fn child(&self, index: usize) -> Result<Option<Box<dyn AccessibilityNode>>, TreeScanError> {
        Ok(self.children.get(index).cloned().map(SnapshotNode::into_handle))
    }
}
