//! Error types for the protocol layer.
//!
//! These describe local problems turning messages into bytes and back, or
//! reading a [`Value`](crate::Value) as the wrong type. Failures that must
//! reach a remote caller are [`InvocationFailure`](crate::InvocationFailure)
//! instead.

use crate::ValueKind;

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed input, missing fields, or an
    /// unknown message type.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A value was read as a kind it is not.
    #[error("expected {expected} value, found {found}")]
    TypeMismatch { expected: ValueKind, found: ValueKind },

    /// The message decoded but breaks a protocol rule.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
