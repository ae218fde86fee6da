//! Error types for the hub layer.

use courier_protocol::{CorrelationId, NodeId};

/// Messages the hub refuses to act on.
///
/// None of these change hub state; the runtime logs them and moves on.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// A result arrived for a call the hub is not tracking: a duplicate,
    /// a reply after the node was purged, or a made-up id.
    #[error("no invocation record for {0}")]
    UnknownCorrelation(CorrelationId),

    /// A result arrived from a node other than the one the call went to.
    #[error("result for {correlation_id} came from {actual}, expected {expected}")]
    UnexpectedSender {
        correlation_id: CorrelationId,
        expected: NodeId,
        actual: NodeId,
    },

    /// A call that needs a result came without a correlation id, so the
    /// answer could never be matched up.
    #[error("invocation from {0} needs a result but has no correlation id")]
    MissingCorrelation(NodeId),

    /// The hub only handles hub-bound messages.
    #[error("hub does not accept {kind} messages")]
    UnexpectedMessage { kind: &'static str },
}
