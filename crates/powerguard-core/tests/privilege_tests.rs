use std::sync::Arc;
use std::time::Duration;

use powerguard_core::testing::{DuplexBinder, StaticPermission};
use powerguard_core::{
    BindRequest, Escalation, HelperBinder, HelperStatus, PrivilegeClient, PrivilegeConfig,
    PrivilegeError, ProcessBinder,
};
use powerguard_helper::{HelperService, HELPER_VERSION};
use tokio::sync::watch;

fn config() -> PrivilegeConfig {
    PrivilegeConfig::default()
}

fn client_with(
    probe: StaticPermission,
    binder: &Arc<DuplexBinder>,
) -> (PrivilegeClient, watch::Sender<bool>) {
    let (tx, rx) = watch::channel(false);
    let binder: Arc<dyn HelperBinder> = Arc::<DuplexBinder>::clone(binder);
    let client = PrivilegeClient::new(&config(), Arc::new(probe), binder, rx);
    (client, tx)
}

fn binder() -> Arc<DuplexBinder> {
    Arc::new(DuplexBinder::new(&config().component))
}

#[tokio::test(start_paused = true)]
async fn test_without_permission_nothing_binds() {
    let binder = binder();
    let (client, _shutdown) = client_with(StaticPermission::denied(), &binder);

    let escalation = client.block().await;
    assert!(matches!(escalation, Escalation::Denied));
    assert!(!escalation.accepted());
    assert!(!client.allow().await.accepted());
    assert!(!client.prebind().await);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(binder.bind_count(), 0);
    assert!(!client.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_not_running_counts_as_denied() {
    let binder = binder();
    let probe = StaticPermission {
        running: false,
        ..StaticPermission::granted()
    };
    let (client, _shutdown) = client_with(probe, &binder);
    assert!(matches!(client.block().await, Escalation::Denied));
    assert_eq!(binder.bind_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cold_block_is_pending_then_confirmed() {
    let binder = binder();
    let (client, _shutdown) = client_with(StaticPermission::granted(), &binder);

    let escalation = client.block().await;
    assert!(escalation.accepted());
    let Escalation::Pending(pending) = escalation else {
        panic!("expected a pending call");
    };

    assert!(pending.confirmed().await);
    assert!(client.is_active());
    assert!(binder.veto().is_blocked());
    assert_eq!(binder.bind_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_bound_calls_round_trip() {
    let binder = binder();
    let (client, _shutdown) = client_with(StaticPermission::granted(), &binder);
    assert!(client.prebind().await);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(client.is_active());

    assert!(matches!(client.block().await, Escalation::Confirmed(true)));
    assert!(binder.veto().is_blocked());
    assert!(matches!(client.allow().await, Escalation::Confirmed(true)));
    assert!(!binder.veto().is_blocked());

    let counts = binder.requests_served();
    assert_eq!((counts.block, counts.allow), (1, 1));
    assert_eq!(binder.bind_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_allow_while_binding_wins() {
    let binder = Arc::new(
        DuplexBinder::new(&config().component).with_bind_delay(Duration::from_millis(100)),
    );
    let (client, _shutdown) = client_with(StaticPermission::granted(), &binder);

    let Escalation::Pending(blocked) = client.block().await else {
        panic!("expected pending block");
    };
    let Escalation::Pending(allowed) = client.allow().await else {
        panic!("expected pending allow");
    };

    assert!(blocked.confirmed().await);
    assert!(allowed.confirmed().await);
    assert!(!binder.veto().is_blocked());
    assert_eq!(binder.requests_served().block, 0);
}

#[tokio::test(start_paused = true)]
async fn test_allow_when_unbound_does_not_bind() {
    let binder = binder();
    let (client, _shutdown) = client_with(StaticPermission::granted(), &binder);

    let escalation = client.allow().await;
    assert!(matches!(escalation, Escalation::Failed(_)));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(binder.bind_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_skipped_when_bind_is_slow() {
    let binder = Arc::new(
        DuplexBinder::new(&config().component).with_bind_delay(Duration::from_millis(800)),
    );
    let (client, _shutdown) = client_with(StaticPermission::granted(), &binder);

    let Escalation::Pending(pending) = client.block().await else {
        panic!("expected pending block");
    };
    assert!(!pending.confirmed().await);
    assert!(!binder.veto().is_blocked());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(client.is_active());
    assert!(matches!(client.block().await, Escalation::Confirmed(true)));
}

#[tokio::test(start_paused = true)]
async fn test_failed_bind_rebinds_on_next_block() {
    let binder = binder();
    binder.fail_binds(true);
    let (client, _shutdown) = client_with(StaticPermission::granted(), &binder);

    let Escalation::Pending(pending) = client.block().await else {
        panic!("expected pending block");
    };
    assert!(!pending.confirmed().await);
    assert!(!client.is_active());

    binder.fail_binds(false);
    let Escalation::Pending(pending) = client.block().await else {
        panic!("expected a fresh bind");
    };
    assert!(pending.confirmed().await);
    assert_eq!(binder.bind_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_version_mismatch_never_binds() {
    let service = HelperService::with_version(config().component, HELPER_VERSION + 1);
    let binder = Arc::new(DuplexBinder::from_service(service));
    let (client, _shutdown) = client_with(StaticPermission::granted(), &binder);

    let Escalation::Pending(pending) = client.block().await else {
        panic!("expected pending block");
    };
    assert!(!pending.confirmed().await);
    assert!(!client.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_retry() {
    let binder = binder();
    let (client, shutdown) = client_with(StaticPermission::granted(), &binder);

    let Escalation::Pending(pending) = client.block().await else {
        panic!("expected pending block");
    };
    shutdown.send_replace(true);

    assert!(!pending.confirmed().await);
    assert!(!binder.veto().is_blocked());
    assert!(matches!(client.block().await, Escalation::Failed(_)));
}

#[tokio::test(start_paused = true)]
async fn test_unbind_releases_helper() {
    let binder = binder();
    let (client, _shutdown) = client_with(StaticPermission::granted(), &binder);
    client.prebind().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    client.block().await;
    assert!(binder.veto().is_blocked());

    client.unbind().await;
    assert!(!client.is_active());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!binder.veto().is_blocked());

    // A later block binds again.
    assert!(client.block().await.is_pending());
}

#[tokio::test(start_paused = true)]
async fn test_unbind_cancels_pending_retry() {
    let binder = binder();
    let (client, _shutdown) = client_with(StaticPermission::granted(), &binder);

    let Escalation::Pending(pending) = client.block().await else {
        panic!("expected pending block");
    };
    client.unbind().await;
    assert!(!pending.confirmed().await);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!client.is_active());
    assert!(!binder.veto().is_blocked());
}

#[tokio::test(start_paused = true)]
async fn test_status_reports_host_state() {
    let binder = binder();
    let (client, _shutdown) = client_with(StaticPermission::granted(), &binder);
    assert_eq!(
        client.status(),
        HelperStatus {
            installed: true,
            running: true,
            permitted: true,
            host_version: Some(13),
        }
    );

    let (client, _shutdown) = client_with(StaticPermission::not_installed(), &binder);
    assert_eq!(
        client.status(),
        HelperStatus {
            installed: false,
            running: false,
            permitted: false,
            host_version: None,
        }
    );
}

#[tokio::test]
async fn test_process_binder_reports_missing_program() {
    let config = PrivilegeConfig {
        helper_program: "/nonexistent/powerguard-helper".into(),
        ..config()
    };
    let result = ProcessBinder::from_config(&config)
        .bind(&BindRequest::from_config(&config))
        .await;
    assert!(matches!(result, Err(PrivilegeError::Spawn(_))));
}
