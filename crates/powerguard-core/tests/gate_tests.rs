use std::sync::Arc;
use std::time::Duration;

use powerguard_core::testing::{OverlayCall, RecordingOverlay};
use powerguard_core::{AuthGate, GateConfig, GateOutcome, OverlayError, SubmitFeedback};
use powerguard_vault::{CredentialStore, MemoryStore, Secret};

fn gate_with(overlay: &RecordingOverlay, store: Arc<MemoryStore>) -> AuthGate {
    AuthGate::new(overlay.boxed(), store, GateConfig::default())
}

fn armed() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::armed("1234"))
}

#[tokio::test]
async fn test_correct_credential_verifies_once() {
    let overlay = RecordingOverlay::new();
    let mut gate = gate_with(&overlay, armed());

    let ticket = gate.show().unwrap().unwrap();
    assert!(overlay.is_visible());

    assert_eq!(gate.submit("1234"), SubmitFeedback::Accepted);
    assert!(!gate.is_showing());
    assert!(!overlay.is_visible());
    assert_eq!(ticket.outcome().await, GateOutcome::Verified);

    assert_eq!(gate.submit("1234"), SubmitFeedback::NotShown);
    assert!(!gate.cancel());
}

#[tokio::test]
async fn test_wrong_credential_keeps_gate_up() {
    let overlay = RecordingOverlay::new();
    let mut gate = gate_with(&overlay, armed());
    let mut ticket = gate.show().unwrap().unwrap();

    for attempt in ["0000", "", "12345"] {
        assert_eq!(gate.submit(attempt), SubmitFeedback::Rejected);
        assert!(gate.is_showing());
        assert_eq!(ticket.try_outcome(), None);
    }

    assert_eq!(
        overlay.count(&OverlayCall::ShowError("Incorrect password".to_string())),
        3
    );
    assert_eq!(overlay.count(&OverlayCall::ClearInput), 3);
    assert_eq!(
        overlay.count(&OverlayCall::Haptic(Duration::from_millis(200))),
        3
    );
    assert!(overlay.is_visible());

    assert_eq!(gate.submit("1234"), SubmitFeedback::Accepted);
    assert_eq!(ticket.try_outcome(), Some(GateOutcome::Verified));
}

#[tokio::test]
async fn test_cancel_resolves_cancelled() {
    let overlay = RecordingOverlay::new();
    let mut gate = gate_with(&overlay, armed());
    let ticket = gate.show().unwrap().unwrap();

    assert!(gate.cancel());
    assert!(!overlay.is_visible());
    assert_eq!(ticket.outcome().await, GateOutcome::Cancelled);
}

#[test]
fn test_second_show_is_idempotent() {
    let overlay = RecordingOverlay::new();
    let mut gate = gate_with(&overlay, armed());

    let mut first = gate.show().unwrap().unwrap();
    assert!(gate.show().unwrap().is_none());
    assert_eq!(overlay.count(&OverlayCall::Render), 1);

    gate.submit("1234");
    assert_eq!(first.try_outcome(), Some(GateOutcome::Verified));
}

#[test]
fn test_new_showing_gets_new_generation() {
    let overlay = RecordingOverlay::new();
    let mut gate = gate_with(&overlay, armed());

    let mut first = gate.show().unwrap().unwrap();
    gate.cancel();
    let mut second = gate.show().unwrap().unwrap();
    assert!(second.generation() > first.generation());

    gate.submit("1234");
    assert_eq!(first.try_outcome(), Some(GateOutcome::Cancelled));
    assert_eq!(second.try_outcome(), Some(GateOutcome::Verified));
}

#[tokio::test]
async fn test_dismiss_aborts_ticket() {
    let overlay = RecordingOverlay::new();
    let mut gate = gate_with(&overlay, armed());
    let ticket = gate.show().unwrap().unwrap();

    gate.dismiss();
    assert!(!overlay.is_visible());
    assert_eq!(ticket.outcome().await, GateOutcome::Aborted);

    // Not shown: nothing to release.
    gate.dismiss();
    assert_eq!(overlay.count(&OverlayCall::TearDown), 1);
}

#[tokio::test]
async fn test_drop_releases_overlay_and_aborts() {
    let overlay = RecordingOverlay::new();
    let mut gate = gate_with(&overlay, armed());
    let ticket = gate.show().unwrap().unwrap();

    drop(gate);
    assert!(!overlay.is_visible());
    assert_eq!(ticket.outcome().await, GateOutcome::Aborted);
}

#[test]
fn test_render_failure_surfaces_error() {
    let overlay = RecordingOverlay::failing();
    let mut gate = gate_with(&overlay, armed());

    assert!(matches!(gate.show(), Err(OverlayError::PermissionDenied)));
    assert!(!gate.is_showing());
    assert_eq!(gate.submit("1234"), SubmitFeedback::NotShown);
}

#[test]
fn test_changed_secret_applies_to_open_gate() {
    let overlay = RecordingOverlay::new();
    let store = armed();
    let mut gate = gate_with(&overlay, Arc::clone(&store));
    gate.show().unwrap();

    store.set(&Secret::from("5678")).unwrap();
    assert_eq!(gate.submit("1234"), SubmitFeedback::Rejected);
    assert_eq!(gate.submit("5678"), SubmitFeedback::Accepted);
}

#[test]
fn test_custom_error_message_and_haptic() {
    let overlay = RecordingOverlay::new();
    let config = GateConfig {
        haptic_ms: 50,
        error_message: "Sai mật khẩu".to_string(),
    };
    let mut gate = AuthGate::new(overlay.boxed(), armed(), config);
    gate.show().unwrap();
    gate.submit("0000");

    assert_eq!(
        overlay.calls()[1..],
        [
            OverlayCall::ShowError("Sai mật khẩu".to_string()),
            OverlayCall::ClearInput,
            OverlayCall::Haptic(Duration::from_millis(50)),
        ]
    );
}
