//! Surface-change events and the power-menu classifier.
//!
//! - [`event`]: the event and classification data model
//! - [`classify`]: class-name and keyword classification of a single event
//! - [`tree`]: bounded keyword scan over an accessibility node tree

pub mod classify;
pub mod event;
pub mod tree;

pub use classify::{Classifier, ClassifierConfig, SYSTEM_UI_PACKAGE};
pub use event::{ClassificationResult, EventKind, MatchReason, SurfaceEvent};
pub use tree::{scan_tree, AccessibilityNode, SnapshotNode, TreeScan, TreeScanError, TreeScanLimits};
