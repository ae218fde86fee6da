//! Error types for the endpoint layer.

use courier_protocol::{EndpointName, ValueKind};

/// Errors raised while registering implementors or dispatching to them.
///
/// None of these are implementor failures: an implementor that returns an
/// error or panics produces an outcome, not an `EndpointError`.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// Nothing is registered locally under this name.
    #[error("no local endpoint {0}")]
    UnknownEndpoint(EndpointName),

    /// The call names a method the endpoint's interface does not have,
    /// or the arguments fit none of its overloads. A programming error.
    #[error("{endpoint} has no method {method} accepting {signature:?}")]
    MethodNotFound {
        endpoint: EndpointName,
        method: String,
        signature: Vec<ValueKind>,
    },

    /// The endpoint exists with a different interface or ordering mode.
    #[error("{endpoint} is already registered with a different shape or ordering")]
    ShapeMismatch { endpoint: EndpointName },

    /// A single-target endpoint already has its one implementor.
    #[error("{0} already has an implementor")]
    AlreadyImplemented(EndpointName),

    /// The implementor being removed was never registered here.
    #[error("implementor is not registered under {0}")]
    NotRegistered(EndpointName),

    /// The worker pool stopped before the call could run.
    #[error("worker pool unavailable: {0}")]
    WorkerPool(String),
}
