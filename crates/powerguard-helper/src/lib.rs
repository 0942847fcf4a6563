//! Out-of-process privileged helper.
//!
//! The helper holds the power-action veto. A client binds to it with a
//! component identifier and protocol version, then toggles the veto with
//! block/allow requests over newline-delimited JSON.

pub mod protocol;
pub mod service;

pub use protocol::{
    read_message, write_message, HelperRequest, HelperResponse, ProtocolError, DEFAULT_COMPONENT,
    HELPER_VERSION,
};
pub use service::{HelperService, PowerActionVeto, RequestCounts, ServeExit};
