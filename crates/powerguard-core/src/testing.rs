//! In-memory stand-ins for the platform seams.
//!
//! Used by this crate's tests and by hosts that want to drive a session from
//! recorded traces.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{split, BufReader};

use powerguard_helper::{HelperService, PowerActionVeto, RequestCounts};

use crate::gate::{OverlayError, OverlaySurface};
use crate::platform::{GlobalAction, OsActions};
use crate::privilege::{BindFuture, BindRequest, HelperBinder, HelperConnection, PermissionProbe, PrivilegeError};

/// One call made on a [`RecordingOverlay`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayCall {
    Render,
    ShowError(String),
    ClearError,
    ClearInput,
    Haptic(Duration),
    TearDown,
}

/// Overlay that records every call. Clones share one log.
#[derive(Debug, Clone, Default)]
pub struct RecordingOverlay {
    calls: Arc<Mutex<Vec<OverlayCall>>>,
    fail_render: Arc<AtomicBool>,
}

impl RecordingOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// An overlay whose `render` always fails.
    pub fn failing() -> Self {
        let overlay = Self::default();
        overlay.fail_render.store(true, Ordering::SeqCst);
        overlay
    }

    pub fn calls(&self) -> Vec<OverlayCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, call: &OverlayCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    /// Rendered and not torn down since.
    pub fn is_visible(&self) -> bool {
        let calls = self.calls();
        let rendered = calls.iter().rposition(|c| *c == OverlayCall::Render);
        let torn = calls.iter().rposition(|c| *c == OverlayCall::TearDown);
        match (rendered, torn) {
            (Some(r), Some(t)) => r > t,
            (Some(_), None) => true,
            _ => false,
        }
    }

    pub fn boxed(&self) -> Box<dyn OverlaySurface> {
        Box::new(self.clone())
    }

    fn record(&self, call: OverlayCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

impl OverlaySurface for RecordingOverlay {
    fn render(&mut self) -> Result<(), OverlayError> {
        if self.fail_render.load(Ordering::SeqCst) {
            return Err(OverlayError::PermissionDenied);
        }
        self.record(OverlayCall::Render);
        Ok(())
    }

    fn show_error(&mut self, message: &str) {
        self.record(OverlayCall::ShowError(message.to_string()));
    }

    fn clear_error(&mut self) {
        self.record(OverlayCall::ClearError);
    }

    fn clear_input(&mut self) {
        self.record(OverlayCall::ClearInput);
    }

    fn pulse_haptic(&mut self, duration: Duration) {
        self.record(OverlayCall::Haptic(duration));
    }

    fn tear_down(&mut self) {
        self.record(OverlayCall::TearDown);
    }
}

/// Records global actions. Clones share one log.
#[derive(Debug, Clone, Default)]
pub struct RecordingActions {
    performed: Arc<Mutex<Vec<GlobalAction>>>,
}

impl RecordingActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn performed(&self) -> Vec<GlobalAction> {
        self.performed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, action: GlobalAction) -> usize {
        self.performed().iter().filter(|a| **a == action).count()
    }
}

impl OsActions for RecordingActions {
    fn perform(&self, action: GlobalAction) -> bool {
        self.performed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action);
        true
    }
}

/// Fixed answers for the permission checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticPermission {
    pub installed: bool,
    pub running: bool,
    pub permission: bool,
    pub version: Option<u32>,
}

impl StaticPermission {
    pub fn granted() -> Self {
        Self {
            installed: true,
            running: true,
            permission: true,
            version: Some(13),
        }
    }

    /// Installed and running, but the user never granted permission.
    pub fn denied() -> Self {
        Self {
            permission: false,
            ..Self::granted()
        }
    }

    pub fn not_installed() -> Self {
        Self {
            installed: false,
            running: false,
            permission: false,
            version: None,
        }
    }
}

impl PermissionProbe for StaticPermission {
    fn is_installed(&self) -> bool {
        self.installed
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn has_permission(&self) -> bool {
        self.running && self.permission
    }

    fn host_version(&self) -> Option<u32> {
        self.version
    }
}

/// Serves every bind with an in-process [`HelperService`] over
/// `tokio::io::duplex`.
pub struct DuplexBinder {
    service: Arc<HelperService>,
    binds: AtomicUsize,
    fail_binds: AtomicBool,
    bind_delay: Duration,
}

impl DuplexBinder {
    pub fn new(component: &str) -> Self {
        Self::from_service(HelperService::new(component))
    }

    pub fn from_service(service: HelperService) -> Self {
        Self {
            service: Arc::new(service),
            binds: AtomicUsize::new(0),
            fail_binds: AtomicBool::new(false),
            bind_delay: Duration::ZERO,
        }
    }

    /// Binds take `delay` to complete.
    pub fn with_bind_delay(mut self, delay: Duration) -> Self {
        self.bind_delay = delay;
        self
    }

    pub fn fail_binds(&self, fail: bool) {
        self.fail_binds.store(fail, Ordering::SeqCst);
    }

    pub fn bind_count(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }

    pub fn veto(&self) -> Arc<PowerActionVeto> {
        self.service.veto()
    }

    pub fn requests_served(&self) -> RequestCounts {
        self.service.requests_served()
    }
}

impl HelperBinder for DuplexBinder {
    fn bind(&self, request: &BindRequest) -> BindFuture {
        self.binds.fetch_add(1, Ordering::SeqCst);
        let service = Arc::clone(&self.service);
        let request = request.clone();
        let fail = self.fail_binds.load(Ordering::SeqCst);
        let delay = self.bind_delay;

        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if fail {
                return Err(PrivilegeError::Spawn(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "helper unavailable",
                )));
            }

            let (client_end, helper_end) = tokio::io::duplex(4096);
            let (helper_read, helper_write) = split(helper_end);
            tokio::spawn(async move {
                if let Err(e) = service.serve(BufReader::new(helper_read), helper_write).await {
                    tracing::debug!(error = %e, "in-process helper stopped");
                }
            });

            let (read, write) = split(client_end);
            let mut connection = HelperConnection::new(BufReader::new(read), write);
            connection.handshake(&request).await?;
            Ok(connection)
        })
    }
}
