//! Failures that travel back to a caller.
//!
//! Unlike [`ProtocolError`](crate::ProtocolError), these are data: they are
//! encoded into result messages and decoded on the caller's node, so the
//! caller sees the same failure the far side produced.

use serde::{Deserialize, Serialize};

use courier_transport::NodeId;

use crate::{EndpointName, Value};

/// An error raised by application code inside an implementor.
///
/// It is carried to the caller as-is. `code` is a short machine-readable
/// tag chosen by the implementor, `detail` anything extra it wants to send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ImplementorError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub detail: Option<Value>,
}

impl ImplementorError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<Value>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Why an invocation produced no value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type")]
pub enum InvocationFailure {
    /// Nobody reachable implements the endpoint.
    #[error("no implementor reachable for {endpoint}")]
    RemoteNotFound { endpoint: EndpointName },

    /// The node the call depended on went away before answering.
    #[error("connection to {node} lost before the call completed")]
    ConnectionLost { node: NodeId },

    /// The implementor ran and raised an error.
    #[error(transparent)]
    Implementor(ImplementorError),

    /// The messaging layer itself found something inconsistent.
    #[error("internal messaging error: {message}")]
    Internal { message: String },
}

impl InvocationFailure {
    pub fn internal(message: impl Into<String>) -> Self {
        InvocationFailure::Internal {
            message: message.into(),
        }
    }
}

impl From<ImplementorError> for InvocationFailure {
    fn from(e: ImplementorError) -> Self {
        InvocationFailure::Implementor(e)
    }
}

/// What a single-target invocation hands back.
pub type InvocationResult = Result<Value, InvocationFailure>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InterfaceShape;

    #[test]
    fn test_implementor_error_display() {
        let e = ImplementorError::new("overflow", "number too large");
        assert_eq!(e.to_string(), "overflow: number too large");
    }

    #[test]
    fn test_implementor_failure_keeps_payload_through_json() {
        let failure = InvocationFailure::Implementor(
            ImplementorError::new("bad_input", "negative").with_detail(-3),
        );
        let json = serde_json::to_string(&failure).unwrap();
        let back: InvocationFailure = serde_json::from_str(&json).unwrap();

        assert_eq!(back, failure);
        // Transparent: the caller sees the implementor's own message.
        assert_eq!(back.to_string(), "bad_input: negative");
    }

    #[test]
    fn test_remote_not_found_json_shape() {
        let endpoint = EndpointName::new("echo", &InterfaceShape::new("Echo"));
        let failure = InvocationFailure::RemoteNotFound { endpoint };
        let json = serde_json::to_value(&failure).unwrap();

        assert_eq!(json["type"], "RemoteNotFound");
        assert_eq!(json["endpoint"]["name"], "echo");
    }

    #[test]
    fn test_invocation_result_err_round_trip() {
        let result: InvocationResult = Err(InvocationFailure::ConnectionLost {
            node: NodeId::new(4),
        });
        let json = serde_json::to_string(&result).unwrap();
        let back: InvocationResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
