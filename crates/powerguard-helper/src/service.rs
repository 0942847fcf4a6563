use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::protocol::{
    read_message, write_message, HelperRequest, HelperResponse, ProtocolError, HELPER_VERSION,
};

/// Process-wide "power actions are vetoed" flag.
#[derive(Debug, Default)]
pub struct PowerActionVeto {
    blocked: AtomicBool,
}

impl PowerActionVeto {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self) -> bool {
        self.blocked.store(true, Ordering::SeqCst);
        true
    }

    pub fn allow(&self) -> bool {
        self.blocked.store(false, Ordering::SeqCst);
        true
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.blocked.store(false, Ordering::SeqCst);
    }
}

/// How a serve loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeExit {
    /// The client sent `Exit` or `Destroy`.
    Requested,
    /// The client went away without saying goodbye.
    PeerClosed,
    /// The handshake failed.
    Rejected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCounts {
    pub block: u64,
    pub allow: u64,
}

/// Serves block/allow requests for one bound client.
pub struct HelperService {
    component: String,
    version: u32,
    veto: Arc<PowerActionVeto>,
    blocks: AtomicU64,
    allows: AtomicU64,
}

impl HelperService {
    pub fn new(component: impl Into<String>) -> Self {
        Self::with_version(component, HELPER_VERSION)
    }

    pub fn with_version(component: impl Into<String>, version: u32) -> Self {
        Self {
            component: component.into(),
            version,
            veto: Arc::new(PowerActionVeto::new()),
            blocks: AtomicU64::new(0),
            allows: AtomicU64::new(0),
        }
    }

    pub fn veto(&self) -> Arc<PowerActionVeto> {
        Arc::clone(&self.veto)
    }

    pub fn requests_served(&self) -> RequestCounts {
        RequestCounts {
            block: self.blocks.load(Ordering::Relaxed),
            allow: self.allows.load(Ordering::Relaxed),
        }
    }

    /// Run the handshake and then answer requests until the client asks the
    /// helper to exit or closes the stream. The veto is cleared on every way
    /// out.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> Result<ServeExit, ProtocolError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let result = self.serve_inner(&mut reader, &mut writer).await;
        self.veto.reset();
        result
    }

    async fn serve_inner<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<ServeExit, ProtocolError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let Some(first) = read_message::<_, HelperRequest>(reader).await? else {
            tracing::debug!("client closed before handshake");
            return Ok(ServeExit::PeerClosed);
        };

        if let Some(reason) = self.check_hello(&first) {
            tracing::warn!(%reason, "handshake rejected");
            write_message(writer, &HelperResponse::rejected(reason)).await?;
            return Ok(ServeExit::Rejected);
        }
        write_message(writer, &HelperResponse::Ready { version: self.version }).await?;
        tracing::info!(component = %self.component, version = self.version, "client bound");

        loop {
            let Some(request) = read_message::<_, HelperRequest>(reader).await? else {
                tracing::info!("client disconnected");
                return Ok(ServeExit::PeerClosed);
            };

            let response = match request {
                HelperRequest::BlockPowerAction => {
                    self.blocks.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("blocking power action");
                    HelperResponse::result(self.veto.block())
                }
                HelperRequest::AllowPowerAction => {
                    self.allows.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("allowing power action");
                    HelperResponse::result(self.veto.allow())
                }
                HelperRequest::Exit | HelperRequest::Destroy => {
                    self.veto.reset();
                    write_message(writer, &HelperResponse::Bye).await?;
                    tracing::info!(?request, "helper exiting");
                    return Ok(ServeExit::Requested);
                }
                HelperRequest::Hello { .. } => HelperResponse::rejected("already bound"),
            };
            write_message(writer, &response).await?;
        }
    }

    fn check_hello(&self, request: &HelperRequest) -> Option<String> {
        match request {
            HelperRequest::Hello { component, version } => {
                if *version != self.version {
                    Some(format!(
                        "version mismatch: client {version}, helper {}",
                        self.version
                    ))
                } else if *component != self.component {
                    Some(format!("unknown component {component}"))
                } else {
                    None
                }
            }
            other => Some(format!("expected hello, got {other:?}")),
        }
    }
}
