//! Envelope codec and line framing.
//!
//! Defines the wire format shared by every transport: one UTF-8 JSON object
//! per line, terminated by `\n`.
//!
//! ```text
//! {"eventName":"Ping","payload":"Pong"}\n
//! ```
//!
//! JSON string escaping keeps raw line terminators out of the frame body, so
//! names and payloads may themselves contain `\n` or `\r`.

use crate::{Result, WireError};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A named message exchanged between two peers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    event_name: String,
    #[serde(default)]
    payload: String,
}

impl Message {
    /// Create a new message.
    pub fn new(event_name: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            payload: payload.into(),
        }
    }

    /// The event name used for dispatch.
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// The message payload.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Split into `(event_name, payload)`.
    pub fn into_parts(self) -> (String, String) {
        (self.event_name, self.payload)
    }
}

/// Encode a message into one newline-terminated frame.
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decode one frame (line terminator already stripped) into a message.
///
/// Anything other than a JSON object is rejected. Missing fields decode as
/// empty strings and unknown fields are ignored.
pub fn decode(line: &str) -> Result<Message> {
    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(line)?;
    Ok(serde_json::from_value(serde_json::Value::Object(object))?)
}

/// Read one line-terminated frame from an async reader.
///
/// Strips the `\n` terminator and an optional preceding `\r`. Returns `None`
/// on clean EOF. An unterminated line at EOF is returned as a final frame.
/// `buf` is scratch space reused across calls.
pub async fn read_frame<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_frame_bytes: usize,
) -> Result<Option<String>> {
    buf.clear();

    // Room for the frame plus "\r\n"; anything longer trips the size check.
    let limit = max_frame_bytes.saturating_add(2) as u64;
    let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(None);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }

    if buf.len() > max_frame_bytes {
        return Err(WireError::FrameTooLarge {
            len: buf.len(),
            max: max_frame_bytes,
        });
    }

    let line = std::str::from_utf8(buf).map_err(|e| WireError::MalformedEnvelope {
        message: format!("Invalid UTF-8 in frame: {}", e),
        source: None,
    })?;

    Ok(Some(line.to_owned()))
}

/// Write an encoded frame and flush it.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}
