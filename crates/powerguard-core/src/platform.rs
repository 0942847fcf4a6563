//! OS action surface.

/// Global navigation actions the session can ask the OS to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalAction {
    Back,
    Home,
}

/// Performs global navigation actions on behalf of the session.
///
/// Calls may come from timer tasks as well as the delivery context.
pub trait OsActions: Send + Sync {
    /// Returns `false` when the OS refused the action.
    fn perform(&self, action: GlobalAction) -> bool;
}
