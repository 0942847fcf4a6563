//! Client side of the privileged helper.
//!
//! The helper is bound lazily. The first `block()` on an unbound client
//! starts the bind in the background and schedules a deferred retry of the
//! call; the caller gets [`Escalation::Pending`] back immediately. Once
//! bound, calls are plain request/response round trips.
//!
//! A transport error drops the connection, so the next `block()` binds a
//! fresh helper.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch, Mutex};

use powerguard_helper::{
    read_message, write_message, HelperRequest, HelperResponse, ProtocolError, DEFAULT_COMPONENT,
    HELPER_VERSION,
};

const EXIT_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum PrivilegeError {
    #[error("Helper could not be started: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Helper protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Helper rejected the request: {0}")]
    Rejected(String),

    #[error("Helper did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Unexpected helper response: {0}")]
    Unexpected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivilegeConfig {
    /// Component identifier sent in the handshake.
    pub component: String,
    /// Protocol version sent in the handshake.
    pub version: u32,
    /// Delay between starting a bind and retrying the call that started it.
    pub retry_delay_ms: u64,
    /// Helper executable spawned by [`ProcessBinder`].
    pub helper_program: PathBuf,
    /// Upper bound on a bind or a single call.
    pub call_timeout_ms: u64,
}

impl Default for PrivilegeConfig {
    fn default() -> Self {
        Self {
            component: DEFAULT_COMPONENT.to_string(),
            version: HELPER_VERSION,
            retry_delay_ms: 500,
            helper_program: PathBuf::from("powerguard-helper"),
            call_timeout_ms: 2000,
        }
    }
}

/// Reports whether the privileged host is usable at all.
pub trait PermissionProbe: Send + Sync {
    fn is_installed(&self) -> bool;

    fn is_running(&self) -> bool;

    /// Permission to bind the helper was granted.
    fn has_permission(&self) -> bool;

    /// `None` when the host is not reachable.
    fn host_version(&self) -> Option<u32>;
}

/// Snapshot of the privileged host as reported by a [`PermissionProbe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelperStatus {
    pub installed: bool,
    pub running: bool,
    pub permitted: bool,
    pub host_version: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindRequest {
    pub component: String,
    pub version: u32,
}

impl BindRequest {
    pub fn from_config(config: &PrivilegeConfig) -> Self {
        Self {
            component: config.component.clone(),
            version: config.version,
        }
    }
}

pub type BindFuture = Pin<Box<dyn Future<Output = Result<HelperConnection, PrivilegeError>> + Send>>;

/// Starts a helper and returns a connection that has completed the
/// handshake.
pub trait HelperBinder: Send + Sync {
    fn bind(&self, request: &BindRequest) -> BindFuture;
}

/// A bound helper.
pub struct HelperConnection {
    reader: Box<dyn AsyncBufRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    child: Option<Child>,
    version: u32,
}

impl HelperConnection {
    pub fn new(
        reader: impl AsyncBufRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
            version: 0,
        }
    }

    /// Tie the helper process to this connection.
    pub fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }

    /// Version the helper announced, 0 before the handshake.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub async fn handshake(&mut self, request: &BindRequest) -> Result<(), PrivilegeError> {
        let hello = HelperRequest::Hello {
            component: request.component.clone(),
            version: request.version,
        };
        write_message(&mut self.writer, &hello).await?;
        match self.receive().await? {
            HelperResponse::Ready { version } => {
                self.version = version;
                Ok(())
            }
            HelperResponse::Rejected { reason } => Err(PrivilegeError::Rejected(reason)),
            other => Err(PrivilegeError::Unexpected(format!("{other:?}"))),
        }
    }

    pub async fn call(&mut self, request: HelperRequest) -> Result<bool, PrivilegeError> {
        write_message(&mut self.writer, &request).await?;
        match self.receive().await? {
            HelperResponse::Result { ok } => Ok(ok),
            HelperResponse::Rejected { reason } => Err(PrivilegeError::Rejected(reason)),
            other => Err(PrivilegeError::Unexpected(format!("{other:?}"))),
        }
    }

    /// Ask the helper to exit and wait briefly for its process.
    pub async fn close(mut self) {
        match write_message(&mut self.writer, &HelperRequest::Exit).await {
            Ok(()) => match self.receive().await {
                Ok(HelperResponse::Bye) => {}
                Ok(other) => tracing::debug!(?other, "unexpected reply to exit"),
                Err(e) => tracing::debug!(error = %e, "helper gone before exit reply"),
            },
            Err(e) => tracing::debug!(error = %e, "could not send exit to helper"),
        }

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => tracing::debug!(%status, "helper exited"),
                Ok(Err(e)) => tracing::warn!(error = %e, "could not reap helper"),
                Err(_) => {
                    tracing::warn!("helper ignored exit, killing it");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(error = %e, "could not kill helper");
                    }
                }
            }
        }
    }

    async fn receive(&mut self) -> Result<HelperResponse, PrivilegeError> {
        read_message(&mut self.reader)
            .await?
            .ok_or(PrivilegeError::Protocol(ProtocolError::Closed))
    }
}

/// Spawns the `powerguard-helper` executable and talks to it over stdio.
pub struct ProcessBinder {
    program: PathBuf,
}

impl ProcessBinder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_config(config: &PrivilegeConfig) -> Self {
        Self::new(config.helper_program.clone())
    }
}

impl HelperBinder for ProcessBinder {
    fn bind(&self, request: &BindRequest) -> BindFuture {
        let program = self.program.clone();
        let request = request.clone();
        Box::pin(async move {
            let mut child = Command::new(&program)
                .arg("--component")
                .arg(&request.component)
                .arg("--protocol-version")
                .arg(request.version.to_string())
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .spawn()
                .map_err(PrivilegeError::Spawn)?;

            let pid = child.id();
            let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
                return Err(PrivilegeError::Unexpected(
                    "helper stdio was not captured".to_string(),
                ));
            };

            let mut connection =
                HelperConnection::new(BufReader::new(stdout), stdin).with_child(child);
            connection.handshake(&request).await?;
            tracing::info!(program = %program.display(), ?pid, "helper process bound");
            Ok(connection)
        })
    }
}

/// What the helper should be doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Block,
    Allow,
}

impl Intent {
    fn request(self) -> HelperRequest {
        match self {
            Intent::Block => HelperRequest::BlockPowerAction,
            Intent::Allow => HelperRequest::AllowPowerAction,
        }
    }
}

/// Result of a block/allow call.
#[derive(Debug)]
pub enum Escalation {
    /// No permission; nothing was attempted.
    Denied,
    /// A bind is in progress and the call will be retried once.
    Pending(PendingCall),
    /// The helper answered.
    Confirmed(bool),
    Failed(String),
}

impl Escalation {
    /// Boolean view of the outcome. A pending call counts as accepted.
    pub fn accepted(&self) -> bool {
        match self {
            Escalation::Pending(_) => true,
            Escalation::Confirmed(ok) => *ok,
            Escalation::Denied | Escalation::Failed(_) => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Escalation::Pending(_))
    }
}

/// The deferred retry of a call made while the helper was binding.
#[derive(Debug)]
pub struct PendingCall {
    rx: oneshot::Receiver<bool>,
}

impl PendingCall {
    /// The helper's answer to the retried call. `false` when the retry was
    /// skipped because the bind had not completed or the client was torn
    /// down.
    pub async fn confirmed(self) -> bool {
        self.rx.await.unwrap_or(false)
    }
}

enum Link {
    Unbound,
    Binding,
    Bound(HelperConnection),
}

struct LinkState {
    link: Link,
    /// Latest requested intent; deferred retries send this, not the intent
    /// that scheduled them.
    intent: Option<Intent>,
}

struct Inner {
    request: BindRequest,
    retry_delay: Duration,
    call_timeout: Duration,
    probe: Arc<dyn PermissionProbe>,
    binder: Arc<dyn HelperBinder>,
    state: Mutex<LinkState>,
    active: AtomicBool,
    epoch: AtomicU64,
    shutdown: watch::Receiver<bool>,
}

/// Asks the privileged helper to veto or release power actions.
///
/// Cheap to clone; clones share one connection. Must be used from within a
/// tokio runtime.
#[derive(Clone)]
pub struct PrivilegeClient {
    inner: Arc<Inner>,
}

impl PrivilegeClient {
    /// `shutdown` flipping to `true` (or its sender going away) cancels
    /// pending retries and late binds.
    pub fn new(
        config: &PrivilegeConfig,
        probe: Arc<dyn PermissionProbe>,
        binder: Arc<dyn HelperBinder>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                request: BindRequest::from_config(config),
                retry_delay: Duration::from_millis(config.retry_delay_ms),
                call_timeout: Duration::from_millis(config.call_timeout_ms),
                probe,
                binder,
                state: Mutex::new(LinkState {
                    link: Link::Unbound,
                    intent: None,
                }),
                active: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                shutdown,
            }),
        }
    }

    /// A helper connection is established.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn is_permitted(&self) -> bool {
        let probe = &self.inner.probe;
        probe.is_running() && probe.has_permission()
    }

    pub fn status(&self) -> HelperStatus {
        let probe = &self.inner.probe;
        HelperStatus {
            installed: probe.is_installed(),
            running: probe.is_running(),
            permitted: self.is_permitted(),
            host_version: probe.host_version(),
        }
    }

    pub async fn block(&self) -> Escalation {
        self.request(Intent::Block).await
    }

    /// Never starts a bind; an unbound client reports `Failed`.
    pub async fn allow(&self) -> Escalation {
        self.request(Intent::Allow).await
    }

    /// Start binding ahead of the first call. Returns `false` without
    /// permission.
    pub async fn prebind(&self) -> bool {
        if self.is_shut_down() || !self.is_permitted() {
            return false;
        }
        let mut state = self.inner.state.lock().await;
        if matches!(state.link, Link::Unbound) {
            state.link = Link::Binding;
            self.spawn_bind();
        }
        true
    }

    /// Cancel pending retries and release the helper, asking it to exit.
    pub async fn unbind(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        let link = {
            let mut state = self.inner.state.lock().await;
            state.intent = None;
            self.inner.active.store(false, Ordering::SeqCst);
            std::mem::replace(&mut state.link, Link::Unbound)
        };
        if let Link::Bound(connection) = link {
            connection.close().await;
            tracing::info!("helper unbound");
        }
    }

    async fn request(&self, intent: Intent) -> Escalation {
        if self.is_shut_down() {
            return Escalation::Failed("client shut down".to_string());
        }
        if !self.is_permitted() {
            tracing::warn!(?intent, "helper permission not granted");
            return Escalation::Denied;
        }

        let mut state = self.inner.state.lock().await;
        state.intent = Some(intent);

        let answered = match &mut state.link {
            Link::Bound(connection) => Some(self.call(connection, intent).await),
            Link::Unbound | Link::Binding => None,
        };
        match answered {
            Some(Ok(ok)) => {
                tracing::debug!(?intent, ok, "helper call");
                return Escalation::Confirmed(ok);
            }
            Some(Err(e)) => {
                tracing::warn!(?intent, error = %e, "helper call failed, dropping connection");
                self.reset(&mut state);
                return Escalation::Failed(e.to_string());
            }
            None => {}
        }

        if matches!(state.link, Link::Unbound) {
            if intent == Intent::Allow {
                return Escalation::Failed("helper not bound".to_string());
            }
            state.link = Link::Binding;
            self.spawn_bind();
        }
        drop(state);
        Escalation::Pending(self.schedule_retry())
    }

    async fn call(
        &self,
        connection: &mut HelperConnection,
        intent: Intent,
    ) -> Result<bool, PrivilegeError> {
        let timeout = self.inner.call_timeout;
        tokio::time::timeout(timeout, connection.call(intent.request()))
            .await
            .map_err(|_| PrivilegeError::Timeout(timeout))?
    }

    fn reset(&self, state: &mut LinkState) {
        state.link = Link::Unbound;
        self.inner.active.store(false, Ordering::SeqCst);
    }

    fn is_shut_down(&self) -> bool {
        let shutdown = &self.inner.shutdown;
        *shutdown.borrow() || shutdown.has_changed().is_err()
    }

    fn is_current(&self, epoch: u64) -> bool {
        !self.is_shut_down() && self.inner.epoch.load(Ordering::SeqCst) == epoch
    }

    fn spawn_bind(&self) {
        let client = self.clone();
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        tokio::spawn(async move { client.finish_bind(epoch).await });
    }

    async fn finish_bind(&self, epoch: u64) {
        tracing::info!(component = %self.inner.request.component, "binding privileged helper");
        let timeout = self.inner.call_timeout;
        let result = tokio::time::timeout(timeout, self.inner.binder.bind(&self.inner.request))
            .await
            .unwrap_or(Err(PrivilegeError::Timeout(timeout)));

        let mut state = self.inner.state.lock().await;
        let current = self.is_current(epoch);
        match result {
            Ok(connection) if current => {
                tracing::info!(version = connection.version(), "privileged helper bound");
                state.link = Link::Bound(connection);
                self.inner.active.store(true, Ordering::SeqCst);
            }
            Ok(connection) => {
                drop(state);
                tracing::debug!("bind finished after unbind, releasing helper");
                connection.close().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "helper bind failed");
                if current {
                    self.reset(&mut state);
                }
            }
        }
    }

    fn schedule_retry(&self) -> PendingCall {
        let (tx, rx) = oneshot::channel();
        let client = self.clone();
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        tokio::spawn(async move {
            if let Some(ok) = client.retry(epoch).await {
                let _ = tx.send(ok);
            }
        });
        PendingCall { rx }
    }

    async fn retry(&self, epoch: u64) -> Option<bool> {
        tokio::select! {
            _ = tokio::time::sleep(self.inner.retry_delay) => {}
            _ = shutdown_signalled(self.inner.shutdown.clone()) => return None,
        }
        if !self.is_current(epoch) {
            tracing::debug!("deferred helper call cancelled");
            return None;
        }

        let mut state = self.inner.state.lock().await;
        let intent = state.intent?;
        let Link::Bound(connection) = &mut state.link else {
            tracing::debug!(?intent, "helper still not bound, deferred call skipped");
            return None;
        };
        match self.call(connection, intent).await {
            Ok(ok) => {
                tracing::debug!(?intent, ok, "deferred helper call");
                Some(ok)
            }
            Err(e) => {
                tracing::warn!(?intent, error = %e, "deferred helper call failed");
                self.reset(&mut state);
                None
            }
        }
    }
}

/// Resolves once `shutdown` reads `true` or its sender is dropped.
pub(crate) async fn shutdown_signalled(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
