//! Wire model and JSON codec for the agent bridge protocol.
//!
//! This crate owns the text-frame representation shared by the client core,
//! the CLI, and the perf harness. Payloads stay flexible (`serde_json::Value`)
//! because the core never interprets the result of a remote command.
//!
//! SHAPES
//! ======
//! - Request:  `{"id": 1, "cmd": "ping", "args": {}, "token": "..."}`
//! - Response: `{"id": 1, "result": ...}` or `{"id": 1, "error": "..."}`
//! - Event:    `{"id": 1, "type": "progress", "data": {...}}`
//!
//! A frame carrying a `type` key is an event; every other frame with an `id`
//! is a response, even when both `result` and `error` are absent.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Frame key that marks an inbound message as an event.
pub const EVENT_DISCRIMINATOR: &str = "type";

/// Flat argument/payload map. Alias to reduce noise in signatures.
pub type Args = Map<String, Value>;

/// Error returned by [`encode_request`] and [`decode_inbound`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text was not valid JSON, or a request could not be serialized.
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),
    /// The frame parsed as JSON but is not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// The frame has no integer `id` usable for correlation.
    #[error("frame has no integer `id`")]
    MissingId,
    /// A known field has a shape the protocol does not allow.
    #[error("invalid `{0}` field")]
    InvalidField(&'static str),
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// A command invocation sent to the bridge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Connection-scoped request identifier, starting at 1.
    pub id: u64,
    /// Name of the remote command.
    pub cmd: String,
    /// Command arguments. Always an object on the wire.
    #[serde(default)]
    pub args: Args,
    /// Opaque credential attached when the client is configured with one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Request {
    #[must_use]
    pub fn new(id: u64, cmd: impl Into<String>, args: Args) -> Self {
        Self {
            id,
            cmd: cmd.into(),
            args,
            token: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }
}

/// Encode a request into a text frame.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if serialization fails.
pub fn encode_request(request: &Request) -> Result<String, CodecError> {
    Ok(serde_json::to_string(request)?)
}

// =============================================================================
// INBOUND
// =============================================================================

/// Terminal message for a request id.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub id: u64,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl Response {
    /// Successful response carrying `result`.
    #[must_use]
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Failed response carrying `error`.
    #[must_use]
    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Collapse into the caller-visible outcome.
    ///
    /// A non-empty `error` wins. Otherwise the result is passed through, with
    /// a missing result surfacing as `null`.
    ///
    /// # Errors
    ///
    /// Returns the server's error string verbatim.
    pub fn into_result(self) -> Result<Value, String> {
        match self.error {
            Some(error) if !error.is_empty() => Err(error),
            _ => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Kind of an out-of-band event. The set is open.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Progress,
    Log,
    Status,
    Other(String),
}

impl EventKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Progress => "progress",
            Self::Log => "log",
            Self::Status => "status",
            Self::Other(kind) => kind,
        }
    }
}

impl From<&str> for EventKind {
    fn from(value: &str) -> Self {
        match value {
            "progress" => Self::Progress,
            "log" => Self::Log,
            "status" => Self::Status,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pre-terminal progress/log/status message for an in-flight request.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub id: u64,
    pub kind: EventKind,
    pub data: Args,
}

impl Event {
    #[must_use]
    pub fn new(id: u64, kind: impl Into<EventKind>, data: Args) -> Self {
        Self {
            id,
            kind: kind.into(),
            data,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// Progress fraction (0.0-1.0), only for progress events.
    #[must_use]
    pub fn progress(&self) -> Option<f64> {
        if self.kind != EventKind::Progress {
            return None;
        }
        self.data.get("progress").and_then(Value::as_f64)
    }

    /// Human-readable message carried by progress and log events.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.data.get("message").and_then(Value::as_str)
    }

    /// Log level, only for log events.
    #[must_use]
    pub fn level(&self) -> Option<&str> {
        if self.kind != EventKind::Log {
            return None;
        }
        self.data.get("level").and_then(Value::as_str)
    }

    /// Status label, only for status events.
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        if self.kind != EventKind::Status {
            return None;
        }
        self.data.get("status").and_then(Value::as_str)
    }
}

/// A decoded inbound frame, classified by shape.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    Event(Event),
    Response(Response),
}

impl Inbound {
    /// Request id this message correlates to.
    #[must_use]
    pub fn id(&self) -> u64 {
        match self {
            Self::Event(event) => event.id,
            Self::Response(response) => response.id,
        }
    }
}

/// Decode and classify an inbound text frame.
///
/// # Errors
///
/// Returns [`CodecError::Json`] for malformed text, [`CodecError::NotAnObject`]
/// for non-object frames, [`CodecError::MissingId`] when `id` is absent or not
/// an unsigned integer, and [`CodecError::InvalidField`] for a non-object event
/// payload.
pub fn decode_inbound(text: &str) -> Result<Inbound, CodecError> {
    let Value::Object(mut map) = serde_json::from_str::<Value>(text)? else {
        return Err(CodecError::NotAnObject);
    };

    let id = map
        .get("id")
        .and_then(Value::as_u64)
        .ok_or(CodecError::MissingId)?;

    if let Some(kind) = map.remove(EVENT_DISCRIMINATOR) {
        let kind = match kind {
            Value::String(kind) => EventKind::from(kind.as_str()),
            other => EventKind::Other(other.to_string()),
        };
        let data = match map.remove("data") {
            None | Some(Value::Null) => Args::new(),
            Some(Value::Object(data)) => data,
            Some(_) => return Err(CodecError::InvalidField("data")),
        };
        return Ok(Inbound::Event(Event { id, kind, data }));
    }

    let result = map.remove("result");
    let error = match map.remove("error") {
        None | Some(Value::Null) => None,
        Some(Value::String(error)) => Some(error),
        Some(other) => Some(other.to_string()),
    };
    Ok(Inbound::Response(Response { id, result, error }))
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
