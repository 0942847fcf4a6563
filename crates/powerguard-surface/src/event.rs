//! Surface-change notifications and classification results.
//!
//! Events are produced by the OS, consumed once by the classifier and never
//! persisted. They deserialize from JSON so recorded traces can be replayed.

use serde::{Deserialize, Serialize};

/// Kind of surface change reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A new top-level window or dialog came to the foreground.
    StateChanged,
    /// Content inside an existing window changed.
    ContentChanged,
}

/// A single UI surface-change notification.
///
/// An empty `source_class_name` or `source_package` means the OS did not
/// report that field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceEvent {
    #[serde(default)]
    pub source_class_name: String,
    #[serde(default)]
    pub source_package: String,
    pub kind: EventKind,
    /// Text snapshot of the source, in reading order.
    #[serde(default)]
    pub text: Vec<String>,
    #[serde(default)]
    pub timestamp_ms: u64,
}

impl SurfaceEvent {
    pub fn new(kind: EventKind, class_name: &str, package: &str) -> Self {
        Self {
            source_class_name: class_name.to_string(),
            source_package: package.to_string(),
            kind,
            text: Vec::new(),
            timestamp_ms: 0,
        }
    }

    pub fn state_changed(class_name: &str, package: &str) -> Self {
        Self::new(EventKind::StateChanged, class_name, package)
    }

    pub fn content_changed(class_name: &str, package: &str) -> Self {
        Self::new(EventKind::ContentChanged, class_name, package)
    }

    /// Append one text fragment to the snapshot.
    pub fn with_text(mut self, text: &str) -> Self {
        self.text.push(text.to_string());
        self
    }

    pub fn at(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    /// Both the class name and the package were reported.
    pub fn is_complete(&self) -> bool {
        !self.source_class_name.is_empty() && !self.source_package.is_empty()
    }

    /// Text snapshot joined with spaces and lower-cased.
    pub fn joined_text(&self) -> String {
        self.text
            .iter()
            .filter(|t| !t.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

/// Which piece of evidence identified the power menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchReason {
    ClassMatch,
    KeywordTextMatch,
    KeywordTreeMatch,
    None,
}

/// Classifier verdict for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub is_power_menu: bool,
    pub reason: MatchReason,
}

impl ClassificationResult {
    pub const NO_MATCH: Self = Self {
        is_power_menu: false,
        reason: MatchReason::None,
    };

    pub fn matched(reason: MatchReason) -> Self {
        Self {
            is_power_menu: reason != MatchReason::None,
            reason,
        }
    }
}
