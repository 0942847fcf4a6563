//! Authentication gate overlay.
//!
//! The gate blocks interaction until the stored credential is entered or
//! the user cancels. Each showing hands out a [`GateTicket`] that resolves
//! exactly once: `Verified`, `Cancelled`, or `Aborted` when the gate is
//! dismissed or dropped first.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use powerguard_vault::CredentialStore;

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("Overlay permission not granted")]
    PermissionDenied,

    #[error("Overlay could not be created: {0}")]
    Platform(String),
}

/// Platform window that renders the gate.
pub trait OverlaySurface: Send {
    /// Create and show the modal.
    fn render(&mut self) -> Result<(), OverlayError>;

    fn show_error(&mut self, message: &str);

    fn clear_error(&mut self) {}

    fn clear_input(&mut self);

    fn pulse_haptic(&mut self, duration: Duration);

    /// Remove the modal and release its resources. Must tolerate being
    /// called on a surface that is already torn down.
    fn tear_down(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub haptic_ms: u64,
    pub error_message: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            haptic_ms: 200,
            error_message: "Incorrect password".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Verified,
    Cancelled,
    /// The gate went away without a decision.
    Aborted,
}

/// Immediate answer to a submitted credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitFeedback {
    /// Correct; the gate is gone and the ticket resolved `Verified`.
    Accepted,
    /// Wrong; the gate stays up for another attempt.
    Rejected,
    /// Nothing is showing.
    NotShown,
}

/// Completion handle for one showing of the gate.
#[derive(Debug)]
pub struct GateTicket {
    generation: u64,
    rx: oneshot::Receiver<GateOutcome>,
}

impl GateTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Non-blocking check. `None` while the gate is still up.
    pub fn try_outcome(&mut self) -> Option<GateOutcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(GateOutcome::Aborted),
        }
    }

    pub async fn outcome(self) -> GateOutcome {
        self.rx.await.unwrap_or(GateOutcome::Aborted)
    }
}

struct Showing {
    generation: u64,
    tx: oneshot::Sender<GateOutcome>,
}

pub struct AuthGate {
    overlay: Box<dyn OverlaySurface>,
    store: Arc<dyn CredentialStore>,
    config: GateConfig,
    generation: u64,
    showing: Option<Showing>,
}

impl AuthGate {
    pub fn new(
        overlay: Box<dyn OverlaySurface>,
        store: Arc<dyn CredentialStore>,
        config: GateConfig,
    ) -> Self {
        Self {
            overlay,
            store,
            config,
            generation: 0,
            showing: None,
        }
    }

    pub fn is_showing(&self) -> bool {
        self.showing.is_some()
    }

    /// Show the gate. `Ok(None)` when it is already up.
    pub fn show(&mut self) -> Result<Option<GateTicket>, OverlayError> {
        if self.showing.is_some() {
            return Ok(None);
        }
        if let Err(e) = self.overlay.render() {
            self.overlay.tear_down();
            return Err(e);
        }

        self.generation += 1;
        let (tx, rx) = oneshot::channel();
        self.showing = Some(Showing {
            generation: self.generation,
            tx,
        });
        tracing::debug!(generation = self.generation, "gate shown");
        Ok(Some(GateTicket {
            generation: self.generation,
            rx,
        }))
    }

    /// Check `candidate` against the stored credential. Retries are
    /// unlimited.
    pub fn submit(&mut self, candidate: &str) -> SubmitFeedback {
        if self.showing.is_none() {
            return SubmitFeedback::NotShown;
        }

        if self.store.verify(candidate) {
            self.overlay.clear_error();
            self.resolve(GateOutcome::Verified);
            return SubmitFeedback::Accepted;
        }

        tracing::debug!(generation = self.generation, "credential rejected");
        self.overlay.show_error(&self.config.error_message);
        self.overlay.clear_input();
        self.overlay
            .pulse_haptic(Duration::from_millis(self.config.haptic_ms));
        SubmitFeedback::Rejected
    }

    /// Returns `false` when nothing was showing.
    pub fn cancel(&mut self) -> bool {
        if self.showing.is_none() {
            return false;
        }
        self.resolve(GateOutcome::Cancelled);
        true
    }

    /// Take the gate down without a decision. No-op when not shown.
    pub fn dismiss(&mut self) {
        if self.showing.is_some() {
            self.resolve(GateOutcome::Aborted);
        }
    }

    fn resolve(&mut self, outcome: GateOutcome) {
        self.overlay.tear_down();
        if let Some(showing) = self.showing.take() {
            tracing::debug!(generation = showing.generation, ?outcome, "gate resolved");
            // The ticket may already be gone.
            let _ = showing.tx.send(outcome);
        }
    }
}

impl Drop for AuthGate {
    fn drop(&mut self) {
        self.dismiss();
    }
}
