//! Framing: preamble marker + JSON envelope. The datagram boundary is the only length delimiter.

use crate::protocol::Message;

/// Encode a message as `<preamble><json>`. Keys are always written as `id, from, event, data`.
pub fn encode(msg: &Message, preamble: &str) -> Vec<u8> {
    // Serializing a struct of strings into a Vec cannot fail.
    let json = serde_json::to_vec(msg).unwrap_or_default();
    let mut out = Vec::with_capacity(preamble.len() + json.len());
    out.extend_from_slice(preamble.as_bytes());
    out.extend_from_slice(&json);
    out
}

/// Decode one datagram payload.
///
/// Returns `Ok(None)` when the payload does not start with `preamble` (someone else's traffic
/// on the same port), `Err` when it does but the envelope is unusable.
pub fn decode(bytes: &[u8], preamble: &str) -> Result<Option<Message>, DecodeError> {
    let Some(body) = bytes.strip_prefix(preamble.as_bytes()) else {
        return Ok(None);
    };
    let body = std::str::from_utf8(body)?;
    let msg: Message = serde_json::from_str(body)?;
    Ok(Some(msg))
}

/// Error decoding an envelope that carried the preamble.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("envelope is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
}
