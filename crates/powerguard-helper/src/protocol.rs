use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version spoken by this build. A client binding with any other
/// version is turned away during the handshake.
pub const HELPER_VERSION: u32 = 1;

/// Component identifier the helper answers to unless told otherwise.
pub const DEFAULT_COMPONENT: &str = "com.powerguard/.PrivilegedService";

/// Longest line accepted from a peer.
const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Peer closed the connection")]
    Closed,

    #[error("Message exceeds {MAX_LINE_BYTES} bytes")]
    Oversized,

    #[error("Unexpected message: {0}")]
    Unexpected(String),
}

/// Client to helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HelperRequest {
    /// Must be the first message on a connection.
    Hello { component: String, version: u32 },
    BlockPowerAction,
    AllowPowerAction,
    Exit,
    Destroy,
}

/// Helper to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HelperResponse {
    Ready { version: u32 },
    Result { ok: bool },
    Rejected { reason: String },
    Bye,
}

impl HelperResponse {
    pub fn result(ok: bool) -> Self {
        HelperResponse::Result { ok }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        HelperResponse::Rejected {
            reason: reason.into(),
        }
    }
}

/// Write one message as a single JSON line and flush it.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next message. Blank lines are skipped; `Ok(None)` means the peer
/// closed the stream cleanly.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        if read_line_bounded(reader, &mut line).await? == 0 {
            return Ok(None);
        }
        let text = String::from_utf8_lossy(&line);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        return Ok(Some(serde_json::from_str(trimmed)?));
    }
}

/// Append one line, newline included, to `line`. Fails as soon as the line
/// grows past `MAX_LINE_BYTES`, without buffering the rest of it.
async fn read_line_bounded<R>(reader: &mut R, line: &mut Vec<u8>) -> Result<usize, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(line.len());
        }
        let (chunk, complete) = match available.iter().position(|b| *b == b'\n') {
            Some(end) => (&available[..=end], true),
            None => (available, false),
        };
        if line.len() + chunk.len() > MAX_LINE_BYTES {
            return Err(ProtocolError::Oversized);
        }
        line.extend_from_slice(chunk);
        let used = chunk.len();
        reader.consume(used);
        if complete {
            return Ok(line.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let hello = HelperRequest::Hello {
            component: "c".into(),
            version: 1,
        };
        assert_eq!(
            serde_json::to_string(&hello).unwrap(),
            r#"{"op":"hello","component":"c","version":1}"#
        );
        assert_eq!(
            serde_json::to_string(&HelperRequest::BlockPowerAction).unwrap(),
            r#"{"op":"block_power_action"}"#
        );
    }

    #[test]
    fn test_response_wire_format() {
        assert_eq!(
            serde_json::to_string(&HelperResponse::result(true)).unwrap(),
            r#"{"status":"result","ok":true}"#
        );
        let parsed: HelperResponse = serde_json::from_str(r#"{"status":"bye"}"#).unwrap();
        assert_eq!(parsed, HelperResponse::Bye);
    }

    #[tokio::test]
    async fn test_read_skips_blank_lines_and_reports_eof() {
        let input: &[u8] = b"\n  \n{\"op\":\"exit\"}\n";
        let mut reader = tokio::io::BufReader::new(input);

        let first: Option<HelperRequest> = read_message(&mut reader).await.unwrap();
        assert_eq!(first, Some(HelperRequest::Exit));

        let second: Option<HelperRequest> = read_message(&mut reader).await.unwrap();
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn test_read_stops_at_line_limit() {
        let mut endless = tokio::io::BufReader::new(tokio::io::repeat(b'x'));
        let result: Result<Option<HelperRequest>, _> = read_message(&mut endless).await;
        assert!(matches!(result, Err(ProtocolError::Oversized)));

        let mut line = vec![b' '; MAX_LINE_BYTES];
        line.extend_from_slice(b"{}\n");
        let mut reader = tokio::io::BufReader::new(&line[..]);
        let result: Result<Option<HelperRequest>, _> = read_message(&mut reader).await;
        assert!(matches!(result, Err(ProtocolError::Oversized)));
    }

    #[tokio::test]
    async fn test_read_line_at_limit_is_accepted() {
        let message = b"{\"op\":\"exit\"}\n";
        let mut line = vec![b' '; MAX_LINE_BYTES - message.len()];
        line.extend_from_slice(message);
        let mut reader = tokio::io::BufReader::new(&line[..]);
        let parsed: Option<HelperRequest> = read_message(&mut reader).await.unwrap();
        assert_eq!(parsed, Some(HelperRequest::Exit));
    }

    #[tokio::test]
    async fn test_read_rejects_unknown_op() {
        let input: &[u8] = b"{\"op\":\"reboot_now\"}\n";
        let mut reader = tokio::io::BufReader::new(input);
        let result: Result<Option<HelperRequest>, _> = read_message(&mut reader).await;
        assert!(matches!(result, Err(ProtocolError::Json(_))));
    }
}
