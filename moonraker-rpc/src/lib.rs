//! Private JSON-RPC codec for printer control daemon communication
//!
//! This crate provides the envelope encoding used on the control daemon's
//! websocket: correlated calls carry an integer `id`, fire-and-forget
//! notifications carry none. Frames are line-delimited JSON objects.

mod error;

pub use error::{CodecError, RpcErrorObject};

use serde::Serialize;
use serde_json::{Map, Value};

/// Protocol version stamped on every outbound envelope
pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
}

/// Encode a correlated call
///
/// Produces `{"jsonrpc":"2.0","method":..,"params":..,"id":..}`. `params` is
/// omitted entirely when `None`.
pub fn encode_call(id: u64, method: &str, params: Option<&Value>) -> Result<String, CodecError> {
    let envelope = OutboundEnvelope {
        jsonrpc: JSONRPC_VERSION,
        method,
        params,
        id: Some(id),
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Encode a fire-and-forget notification (no `id`)
pub fn encode_notification(method: &str, params: Option<&Value>) -> Result<String, CodecError> {
    let envelope = OutboundEnvelope {
        jsonrpc: JSONRPC_VERSION,
        method,
        params,
        id: None,
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Reply to one of our calls
    Response {
        /// Correlation id of the originating call
        id: u64,
        /// Result value or server-reported error
        outcome: Result<Value, RpcErrorObject>,
    },
    /// Server push without an id
    Notification {
        /// Event name, e.g. `notify_status_update`
        method: String,
        /// Positional parameters
        params: Vec<Value>,
    },
}

impl Incoming {
    /// Event name for notifications, `None` for responses
    pub fn method(&self) -> Option<&str> {
        match self {
            Incoming::Notification { method, .. } => Some(method),
            Incoming::Response { .. } => None,
        }
    }
}

/// Decode a single envelope
pub fn decode(frame: &str) -> Result<Incoming, CodecError> {
    let value: Value = serde_json::from_str(frame)?;
    let Value::Object(mut object) = value else {
        return Err(CodecError::InvalidEnvelope("frame is not an object".to_string()));
    };

    match object.get("jsonrpc") {
        Some(Value::String(version)) if version == JSONRPC_VERSION => {}
        _ => {
            return Err(CodecError::InvalidEnvelope(
                "missing or unsupported jsonrpc version".to_string(),
            ))
        }
    }

    match object.remove("id") {
        None | Some(Value::Null) => decode_notification(object),
        Some(id) => {
            let id = id.as_u64().ok_or_else(|| {
                CodecError::InvalidEnvelope(format!("id is not a non-negative integer: {id}"))
            })?;
            decode_response(id, object)
        }
    }
}

/// Decode every non-blank line of a frame
///
/// A transport message may carry several newline separated envelopes; each is
/// decoded independently so one bad line does not hide the others.
pub fn decode_frames(text: &str) -> Vec<Result<Incoming, CodecError>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(decode)
        .collect()
}

fn decode_response(id: u64, mut object: Map<String, Value>) -> Result<Incoming, CodecError> {
    if let Some(method) = object.get("method") {
        return Err(CodecError::UnsupportedRequest(
            method.as_str().unwrap_or_default().to_string(),
        ));
    }

    if let Some(error) = object.remove("error") {
        let error: RpcErrorObject = serde_json::from_value(error)
            .map_err(|e| CodecError::InvalidEnvelope(format!("malformed error object: {e}")))?;
        return Ok(Incoming::Response {
            id,
            outcome: Err(error),
        });
    }

    match object.remove("result") {
        Some(result) => Ok(Incoming::Response {
            id,
            outcome: Ok(result),
        }),
        None => Err(CodecError::InvalidEnvelope(
            "response carries neither result nor error".to_string(),
        )),
    }
}

fn decode_notification(mut object: Map<String, Value>) -> Result<Incoming, CodecError> {
    let method = match object.remove("method") {
        Some(Value::String(method)) => method,
        _ => {
            return Err(CodecError::InvalidEnvelope(
                "notification without method".to_string(),
            ))
        }
    };

    let params = match object.remove("params") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(params)) => params,
        Some(other) => vec![other],
    };

    Ok(Incoming::Notification { method, params })
}
