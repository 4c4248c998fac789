//! Minimal Engine.IO/Socket.IO framing used by the vendor chat service.
//!
//! Only the subset this integration needs is recognized; everything
//! else decodes to [`Frame::Unrecognized`] and is dropped upstream.
//! Decode failures are typed and never tear down the connection.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Engine.IO pong, written in response to a `"2"` ping.
pub const PONG: &str = "3";

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `"0"` / `"0{...}"` — transport open; the peer expects the auth
    /// frame next.
    Open,
    /// `"40"` / `"40{...}"` — namespace connect acknowledged; auth
    /// accepted.
    ConnectAck,
    /// `"44..."` — namespace connect rejected; carries the detail text.
    ConnectError(String),
    /// `"2"` — heartbeat ping.
    Ping,
    /// `"42[...]"` — application event.
    Event { name: String, payload: Value },
    /// Anything this integration does not understand.
    Unrecognized,
}

/// Typed decode failure.
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("malformed event json: {0}")]
    MalformedJson(String),

    #[error("event array has {0} elements, expected at least 2")]
    BadArity(usize),

    #[error("event name is not a string")]
    BadEventName,
}

/// Payload carried by `reply`/`thought` events, nested under a
/// `payload` envelope on the wire. Every field is optional upstream.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct EventPayload {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub content: String,
    /// False on echo frames of the caller's own input.
    #[serde(default)]
    pub can_rating: bool,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub thought: String,
}

#[derive(Default, Deserialize)]
struct EventEnvelope {
    #[serde(default)]
    payload: EventPayload,
}

/// Decode one inbound frame. Total: any input maps to a frame kind or
/// a typed decode error. Most-specific prefix wins.
pub fn decode(raw: &str) -> Result<Frame, DecodeError> {
    if raw == "0" || raw.starts_with("0{") {
        return Ok(Frame::Open);
    }
    if raw == "40" || raw.starts_with("40{") {
        return Ok(Frame::ConnectAck);
    }
    if let Some(detail) = raw.strip_prefix("44") {
        return Ok(Frame::ConnectError(detail.to_string()));
    }
    if raw == "2" {
        return Ok(Frame::Ping);
    }
    if let Some(rest) = raw.strip_prefix("42") {
        return decode_event(rest);
    }
    Ok(Frame::Unrecognized)
}

fn decode_event(rest: &str) -> Result<Frame, DecodeError> {
    // An optional packet-id digit run may precede the array.
    let rest = match rest.find('[') {
        Some(index) if index > 0 => &rest[index..],
        _ => rest,
    };

    let mut items: Vec<Value> =
        serde_json::from_str(rest).map_err(|e| DecodeError::MalformedJson(e.to_string()))?;
    if items.len() < 2 {
        return Err(DecodeError::BadArity(items.len()));
    }

    let payload = items.remove(1);
    let name = match items.remove(0) {
        Value::String(name) => name,
        _ => return Err(DecodeError::BadEventName),
    };
    Ok(Frame::Event { name, payload })
}

/// Decode the typed event payload out of an event frame's JSON value.
pub fn decode_payload(value: Value) -> Result<EventPayload, DecodeError> {
    serde_json::from_value::<EventEnvelope>(value)
        .map(|envelope| envelope.payload)
        .map_err(|e| DecodeError::MalformedJson(e.to_string()))
}

/// Encode the namespace auth frame: `40{"token":...}`.
pub fn encode_auth(token: &str) -> String {
    format!("40{}", serde_json::json!({ "token": token }))
}

/// Encode an application event frame: `42[name, payload]`.
///
/// Compact serialization only; the payload structure is passed through
/// untouched because the vendor parser is exact-match on structure.
pub fn encode_event(name: &str, payload: &Value) -> String {
    format!(
        "42{}",
        Value::Array(vec![Value::String(name.to_string()), payload.clone()])
    )
}
