//! Outbound request records.
//!
//! Every turn starts with exactly one `user` record written to the agent's
//! stdin:
//!
//! ```json
//! {"type":"user","message":{"role":"user","content":"…"},"session_id":"…","parent_tool_use_id":null}
//! ```
//!
//! Each record is serialised compactly and terminated by a single `\n`.

use serde_json::{json, Value};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{AppError, Result};

/// Build the `user` request record carrying `prompt` under `correlation_id`.
#[must_use]
pub fn user_message(prompt: &str, correlation_id: &str) -> Value {
    json!({
        "type": "user",
        "message": { "role": "user", "content": prompt },
        "session_id": correlation_id,
        "parent_tool_use_id": null,
    })
}

/// Serialise `value` to one NDJSON line, including the trailing `\n`.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if serialisation fails.
pub fn encode_line(value: &Value) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(value)
        .map_err(|e| AppError::Protocol(format!("failed to serialise outbound message: {e}")))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Write `value` as one NDJSON line to `sink` and flush it.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if serialisation or the write fails (for
/// example because the agent process has exited).
pub async fn write_message<W>(sink: &mut W, value: &Value) -> Result<usize>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let bytes = encode_line(value)?;
    sink.write_all(&bytes)
        .await
        .map_err(|e| AppError::Protocol(format!("write failed: {e}")))?;
    sink.flush()
        .await
        .map_err(|e| AppError::Protocol(format!("flush failed: {e}")))?;
    Ok(bytes.len())
}
