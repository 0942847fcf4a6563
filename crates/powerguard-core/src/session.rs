//! Monitoring session.
//!
//! A session owns one detector, one gate and one privilege client. Surface
//! events are fed in from the delivery context through
//! [`GuardSession::on_surface_event`]; everything that may block (helper
//! IPC, the delayed second "back") runs on the tokio runtime.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

use powerguard_surface::{AccessibilityNode, Classifier, SurfaceEvent, TreeScanLimits};
use powerguard_vault::{CredentialStore, Flag};

use crate::config::GuardConfig;
use crate::detector::{DetectionState, Detector, Phase, Transition};
use crate::gate::{AuthGate, GateOutcome, GateTicket, OverlaySurface, SubmitFeedback};
use crate::platform::{GlobalAction, OsActions};
use crate::privilege::{
    shutdown_signalled, Escalation, HelperBinder, PermissionProbe, PrivilegeClient,
};

/// Collaborators a session is built from.
pub struct SessionParts {
    pub config: GuardConfig,
    pub store: Arc<dyn CredentialStore>,
    pub overlay: Box<dyn OverlaySurface>,
    pub actions: Arc<dyn OsActions>,
    pub probe: Arc<dyn PermissionProbe>,
    pub binder: Arc<dyn HelperBinder>,
}

#[derive(Debug, Clone, Copy)]
enum PrivilegeCommand {
    Prebind,
    Block,
    Allow,
}

pub struct GuardSession {
    classifier: Classifier,
    tree_limits: TreeScanLimits,
    second_back_delay: Duration,
    detector: Detector,
    gate: AuthGate,
    ticket: Option<GateTicket>,
    store: Arc<dyn CredentialStore>,
    actions: Arc<dyn OsActions>,
    privilege: PrivilegeClient,
    commands: Option<mpsc::UnboundedSender<PrivilegeCommand>>,
    runtime: Handle,
    shutdown: watch::Sender<bool>,
    block_requested: bool,
    degraded: bool,
}

impl GuardSession {
    pub fn new(parts: SessionParts, runtime: Handle) -> Self {
        let SessionParts {
            config,
            store,
            overlay,
            actions,
            probe,
            binder,
        } = parts;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let privilege = PrivilegeClient::new(&config.privilege, probe, binder, shutdown_rx);
        let (commands, command_rx) = mpsc::unbounded_channel();
        runtime.spawn(run_privilege_worker(privilege.clone(), command_rx));

        let host = privilege.status();
        if store.get_flag(Flag::PrivilegedHelperEnabled) && host.permitted {
            // Bind early so the first detection finds the helper ready.
            let _ = commands.send(PrivilegeCommand::Prebind);
        }

        tracing::info!(
            protection = store.get_flag(Flag::ProtectionEnabled),
            helper = store.get_flag(Flag::PrivilegedHelperEnabled),
            host_installed = host.installed,
            host_running = host.running,
            host_permitted = host.permitted,
            host_version = ?host.host_version,
            "guard session started"
        );

        Self {
            classifier: Classifier::new(&config.classifier),
            tree_limits: config.tree_scan,
            second_back_delay: Duration::from_millis(config.detection.second_back_delay_ms),
            detector: Detector::new(&config.detection),
            gate: AuthGate::new(overlay, Arc::clone(&store), config.gate),
            ticket: None,
            store,
            actions,
            privilege,
            commands: Some(commands),
            runtime,
            shutdown,
            block_requested: false,
            degraded: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.detector.phase()
    }

    pub fn detection_state(&self) -> DetectionState {
        self.detector.state()
    }

    /// The gate overlay failed at least once; the session only dismisses
    /// the menu.
    pub fn degraded(&self) -> bool {
        self.degraded
    }

    pub fn gate_showing(&self) -> bool {
        self.gate.is_showing()
    }

    pub fn privilege(&self) -> &PrivilegeClient {
        &self.privilege
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Protection is on and a secret is set.
    pub fn is_armed(&self) -> bool {
        self.store.get_flag(Flag::ProtectionEnabled) && self.store.has_secret()
    }

    /// Handle one surface event. `source` is the event's node tree, if the
    /// OS provided one; it is released before this returns.
    pub fn on_surface_event(
        &mut self,
        event: &SurfaceEvent,
        source: Option<Box<dyn AccessibilityNode>>,
    ) -> Option<Transition> {
        if self.is_closed() {
            return None;
        }
        self.poll_gate();
        if !self.is_armed() {
            return None;
        }

        let result = self.classifier.classify_with_tree(
            event,
            source,
            self.detector.is_visible(),
            &self.tree_limits,
        );
        let transition = self.detector.observe(event, &result, event.timestamp_ms)?;
        if transition == Transition::MenuAppeared {
            tracing::info!(
                class = %event.source_class_name,
                package = %event.source_package,
                reason = ?result.reason,
                "power menu detected"
            );
            self.on_menu_appeared();
        }
        Some(transition)
    }

    pub fn submit_credential(&mut self, candidate: &str) -> SubmitFeedback {
        let feedback = self.gate.submit(candidate);
        self.poll_gate();
        feedback
    }

    pub fn cancel_gate(&mut self) -> bool {
        let cancelled = self.gate.cancel();
        self.poll_gate();
        cancelled
    }

    /// Apply the gate's outcome if it has resolved since the last poll.
    pub fn poll_gate(&mut self) -> Option<GateOutcome> {
        let outcome = self.ticket.as_mut()?.try_outcome()?;
        self.ticket = None;
        self.on_gate_outcome(outcome);
        Some(outcome)
    }

    /// Take the gate down now and release the helper in the background.
    /// Idempotent.
    pub fn shutdown(&mut self) {
        if self.is_closed() {
            return;
        }
        self.shutdown.send_replace(true);
        self.ticket = None;
        self.gate.dismiss();
        // Dropping the sender lets the worker drain and unbind.
        self.commands = None;
        tracing::info!("guard session stopped");
    }

    fn on_menu_appeared(&mut self) {
        if self.store.get_flag(Flag::PrivilegedHelperEnabled) {
            self.block_requested = true;
            self.send(PrivilegeCommand::Block);
        }

        self.actions.perform(GlobalAction::Back);
        self.schedule_second_back();

        match self.gate.show() {
            Ok(Some(ticket)) => self.ticket = Some(ticket),
            Ok(None) => {}
            Err(e) if !self.degraded => {
                tracing::warn!(error = %e, "gate overlay unavailable, dismissing menu only");
                self.degraded = true;
            }
            Err(e) => tracing::debug!(error = %e, "gate overlay still unavailable"),
        }
    }

    fn on_gate_outcome(&mut self, outcome: GateOutcome) {
        match outcome {
            GateOutcome::Verified => {
                self.detector.on_gate_resolved();
                if std::mem::take(&mut self.block_requested) {
                    self.send(PrivilegeCommand::Allow);
                }
                tracing::info!("credential verified, power action allowed");
            }
            GateOutcome::Cancelled => {
                self.actions.perform(GlobalAction::Back);
                self.actions.perform(GlobalAction::Home);
                self.detector.on_gate_resolved();
                tracing::info!("gate cancelled, power action stays blocked");
            }
            GateOutcome::Aborted => tracing::debug!("gate aborted"),
        }
    }

    fn schedule_second_back(&self) {
        let actions = Arc::clone(&self.actions);
        let delay = self.second_back_delay;
        let shutdown = self.shutdown.subscribe();
        self.runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    actions.perform(GlobalAction::Back);
                }
                _ = shutdown_signalled(shutdown) => {}
            }
        });
    }

    fn send(&self, command: PrivilegeCommand) {
        let Some(commands) = &self.commands else {
            return;
        };
        if commands.send(command).is_err() {
            tracing::debug!(?command, "privilege worker already stopped");
        }
    }
}

impl Drop for GuardSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs helper calls one at a time, in the order the session issued them.
async fn run_privilege_worker(
    client: PrivilegeClient,
    mut commands: mpsc::UnboundedReceiver<PrivilegeCommand>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            PrivilegeCommand::Prebind => {
                client.prebind().await;
            }
            PrivilegeCommand::Block => report("block", client.block().await),
            PrivilegeCommand::Allow => report("allow", client.allow().await),
        }
    }
    client.unbind().await;
}

fn report(op: &'static str, escalation: Escalation) {
    match escalation {
        Escalation::Confirmed(ok) => tracing::debug!(op, ok, "helper answered"),
        Escalation::Pending(pending) => {
            tokio::spawn(async move {
                let ok = pending.confirmed().await;
                tracing::debug!(op, ok, "deferred helper call finished");
            });
        }
        Escalation::Denied => tracing::debug!(op, "helper permission not granted"),
        Escalation::Failed(reason) => tracing::warn!(op, %reason, "helper call failed"),
    }
}
