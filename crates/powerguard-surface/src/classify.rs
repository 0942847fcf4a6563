//! Power-menu classification of surface events.
//!
//! Evidence, strongest first:
//!
//! 1. the source class name contains a known power-menu container class and
//!    the event comes from the system UI package;
//! 2. the source class name contains `globalactions` (unknown OEM variants);
//! 3. the system UI package reports text containing a power keyword;
//! 4. a content change in the system UI package exposes a keyword somewhere
//!    in its node tree (only while no menu is tracked as visible).
//!
//! Only `globalactions` classes are trusted from any package. Generic
//! containers such as `android.app.AlertDialog` and all keyword evidence are
//! only accepted from the system UI package, so a third-party app's own
//! dialogs never match.

use serde::{Deserialize, Serialize};

use crate::event::{ClassificationResult, EventKind, MatchReason, SurfaceEvent};
use crate::tree::{scan_tree, AccessibilityNode, TreeScanLimits};

pub const SYSTEM_UI_PACKAGE: &str = "com.android.systemui";

const GLOBAL_ACTIONS_MARKER: &str = "globalactions";

const POWER_MENU_CLASSES: &[&str] = &[
    "com.android.systemui.globalactions.GlobalActionsDialog",
    "com.android.systemui.globalactions.GlobalActionsDialogLite",
    "com.android.systemui.globalactions.GlobalActionsColumnLayout",
    "com.android.systemui.globalactions.GlobalActionsGridLayout",
    "com.android.systemui.power.PowerNotificationWarnings",
    "android.app.AlertDialog",
    "com.android.internal.globalactions.GlobalActionsDialog",
];

const POWER_KEYWORDS: &[&str] = &[
    "power off",
    "shutdown",
    "turn off",
    "restart",
    "reboot",
    "tắt nguồn",
    "khởi động lại",
    "tắt máy",
    "khởi động",
    "power",
    "nguồn",
    "emergency",
    "khẩn cấp",
];

/// Lists the classifier matches against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Known power-menu container class names (matched case-insensitively).
    pub power_menu_classes: Vec<String>,
    /// Power, shutdown and restart terms in every supported language.
    pub keywords: Vec<String>,
    /// Package of the system UI process.
    pub system_package: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            power_menu_classes: POWER_MENU_CLASSES.iter().map(|s| s.to_string()).collect(),
            keywords: POWER_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            system_package: SYSTEM_UI_PACKAGE.to_string(),
        }
    }
}

/// Stateless classifier. Lists are lower-cased once at construction.
#[derive(Debug, Clone)]
pub struct Classifier {
    classes: Vec<String>,
    keywords: Vec<String>,
    system_package: String,
}

impl Classifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        let lower = |items: &[String]| -> Vec<String> {
            items
                .iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        };
        Self {
            classes: lower(&config.power_menu_classes),
            keywords: lower(&config.keywords),
            system_package: config.system_package.clone(),
        }
    }

    /// Classify one event from its own fields (evidence 1-3).
    pub fn classify(&self, event: &SurfaceEvent) -> ClassificationResult {
        if !event.is_complete() {
            return ClassificationResult::NO_MATCH;
        }
        if self.matches_class(&event.source_class_name, &event.source_package) {
            return ClassificationResult::matched(MatchReason::ClassMatch);
        }
        if self.is_system_package(&event.source_package) && self.text_matches(&event.joined_text())
        {
            return ClassificationResult::matched(MatchReason::KeywordTextMatch);
        }
        ClassificationResult::NO_MATCH
    }

    /// Classify one event, falling back to a bounded scan of its source tree
    /// for content changes in the system UI (evidence 4).
    ///
    /// A failing scan is treated as no match. `source` is released before
    /// this returns.
    pub fn classify_with_tree(
        &self,
        event: &SurfaceEvent,
        source: Option<Box<dyn AccessibilityNode>>,
        menu_visible: bool,
        limits: &TreeScanLimits,
    ) -> ClassificationResult {
        let result = self.classify(event);
        if result.is_power_menu || !self.should_scan_tree(event, menu_visible) {
            return result;
        }
        let Some(root) = source else {
            return result;
        };

        match scan_tree(root, &self.keywords, limits) {
            Ok(scan) if scan.matched => {
                tracing::debug!(nodes = scan.nodes_visited, "power keywords found in system UI tree");
                ClassificationResult::matched(MatchReason::KeywordTreeMatch)
            }
            Ok(scan) => {
                if scan.truncated {
                    tracing::debug!(nodes = scan.nodes_visited, "tree scan stopped at its cap");
                }
                ClassificationResult::NO_MATCH
            }
            Err(e) => {
                tracing::debug!(error = %e, "tree scan failed, treating event as non-match");
                ClassificationResult::NO_MATCH
            }
        }
    }

    /// A `globalactions` class matches from any package; any other listed
    /// class only when `package` is the system UI.
    pub fn matches_class(&self, class_name: &str, package: &str) -> bool {
        let class_name = class_name.to_lowercase();
        if class_name.contains(GLOBAL_ACTIONS_MARKER) {
            return true;
        }
        self.is_system_package(package)
            && self.classes.iter().any(|c| class_name.contains(c.as_str()))
    }

    /// `text` must already be lower-case.
    pub fn text_matches(&self, text: &str) -> bool {
        !text.is_empty() && self.keywords.iter().any(|k| text.contains(k.as_str()))
    }

    pub fn is_system_package(&self, package: &str) -> bool {
        package == self.system_package
    }

    pub fn should_scan_tree(&self, event: &SurfaceEvent, menu_visible: bool) -> bool {
        event.kind == EventKind::ContentChanged
            && !menu_visible
            && self.is_system_package(&event.source_package)
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}
