//! Error types for the JSON-RPC codec

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while encoding or decoding envelopes
#[derive(Debug, Error)]
pub enum CodecError {
    /// Frame text is not valid JSON
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is JSON but does not follow the envelope convention
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// The server sent a request that expects a reply from us
    #[error("Unsupported server request: {0}")]
    UnsupportedRequest(String),
}

/// Error object reported by the server in a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    /// Numeric error code
    pub code: i64,
    /// Human readable message
    pub message: String,
}

impl std::fmt::Display for RpcErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}
