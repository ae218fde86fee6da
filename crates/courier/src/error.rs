//! Unified error type for the courier runtime.

use courier_endpoint::EndpointError;
use courier_hub::HubError;
use courier_protocol::{ImplementorError, InvocationFailure, ProtocolError};
use courier_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `courier` crate you deal with this single error type
/// instead of importing errors from each layer. The `#[from]` attribute
/// on each variant generates the `From` impls, so `?` converts layer
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum CourierError {
    /// A transport-level error (connection, send, handshake).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A registration or dispatch error on this node (method not found,
    /// duplicate implementor, shape mismatch).
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    /// The local hub refused a message.
    #[error(transparent)]
    Hub(#[from] HubError),

    /// The invocation ran to completion without producing a value.
    #[error(transparent)]
    Invocation(#[from] InvocationFailure),
}

impl CourierError {
    /// Returns `true` if nobody reachable implements the endpoint.
    pub fn is_remote_not_found(&self) -> bool {
        matches!(
            self,
            CourierError::Invocation(InvocationFailure::RemoteNotFound { .. })
        )
    }

    /// Returns `true` if the node the call depended on went away.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            CourierError::Invocation(InvocationFailure::ConnectionLost { .. })
        )
    }

    /// The error the implementor raised, exactly as it raised it.
    pub fn implementor_error(&self) -> Option<&ImplementorError> {
        match self {
            CourierError::Invocation(InvocationFailure::Implementor(e)) => Some(e),
            _ => None,
        }
    }
}
