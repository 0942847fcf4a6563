//! Detection and gating of the power menu.
//!
//! A [`session::GuardSession`] classifies incoming surface events, debounces
//! them into menu transitions, dismisses the menu, shows the authentication
//! gate and optionally asks the privileged helper to veto power actions
//! until the gate is passed.

pub mod config;
pub mod detector;
pub mod gate;
pub mod platform;
pub mod privilege;
pub mod session;
pub mod testing;

pub use config::{ConfigError, GuardConfig};
pub use detector::{DetectionConfig, DetectionState, Detector, Phase, Transition};
pub use gate::{AuthGate, GateConfig, GateOutcome, GateTicket, OverlayError, OverlaySurface, SubmitFeedback};
pub use platform::{GlobalAction, OsActions};
pub use privilege::{
    BindRequest, Escalation, HelperBinder, HelperConnection, HelperStatus, Intent, PendingCall,
    PermissionProbe, PrivilegeClient, PrivilegeConfig, PrivilegeError, ProcessBinder,
};
pub use session::{GuardSession, SessionParts};
