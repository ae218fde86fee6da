//! Messages exchanged between nodes.
//!
//! Directions are fixed: "hub" variants travel toward the hub, "spoke"
//! variants travel from the hub to one spoke. A hub that also runs
//! endpoints sends spoke variants to itself in-process.
//!
//! ```text
//!  caller ──HubInvoke──▶ hub ──SpokeInvoke──▶ implementor
//!  caller ◀──SpokeInvocationResult── hub ◀──HubInvocationResult── implementor
//! ```

use serde::{Deserialize, Serialize};

use courier_transport::NodeId;

use crate::{CallDescriptor, CorrelationId, EndpointName, InvocationResult};

/// Every message a Courier node sends or receives.
///
/// Internally tagged, like the rest of the wire format:
/// `{"type":"ImplementorGained","endpoint":{...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    // -- Directory updates, spoke → hub --
    /// This node now has at least one implementor for `endpoint`.
    ImplementorGained { endpoint: EndpointName },

    /// This node no longer has any implementor for `endpoint`.
    ImplementorLost { endpoint: EndpointName },

    // -- Invocation --
    /// Caller → hub. `correlation_id` is the caller's own id and is
    /// present exactly when `needs_result` is set.
    HubInvoke {
        correlation_id: Option<CorrelationId>,
        needs_result: bool,
        call: CallDescriptor,
    },

    /// Hub → implementing node. `correlation_id` is the hub's id for its
    /// invocation record; `invoker` is the node that made the call.
    SpokeInvoke {
        correlation_id: Option<CorrelationId>,
        needs_result: bool,
        call: CallDescriptor,
        invoker: NodeId,
    },

    /// Implementing node → hub, answering a `SpokeInvoke`.
    HubInvocationResult {
        correlation_id: CorrelationId,
        result: InvocationResult,
    },

    /// Hub → caller, answering a `HubInvoke`.
    SpokeInvocationResult {
        correlation_id: CorrelationId,
        result: InvocationResult,
    },

    // -- Directory replication --
    /// Spoke → hub: "send me every endpoint you know."
    DirectoryRequest,

    /// Hub → spoke: every endpoint with at least one implementing node.
    DirectorySnapshot { endpoints: Vec<EndpointName> },

    /// Hub → all spokes: `endpoint` gained its first implementing node.
    EndpointAnnounced { endpoint: EndpointName },

    /// Hub → all spokes: `endpoint` lost its last implementing node.
    EndpointWithdrawn { endpoint: EndpointName },
}

impl WireMessage {
    /// Variant name, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::ImplementorGained { .. } => "ImplementorGained",
            WireMessage::ImplementorLost { .. } => "ImplementorLost",
            WireMessage::HubInvoke { .. } => "HubInvoke",
            WireMessage::SpokeInvoke { .. } => "SpokeInvoke",
            WireMessage::HubInvocationResult { .. } => "HubInvocationResult",
            WireMessage::SpokeInvocationResult { .. } => "SpokeInvocationResult",
            WireMessage::DirectoryRequest => "DirectoryRequest",
            WireMessage::DirectorySnapshot { .. } => "DirectorySnapshot",
            WireMessage::EndpointAnnounced { .. } => "EndpointAnnounced",
            WireMessage::EndpointWithdrawn { .. } => "EndpointWithdrawn",
        }
    }
}
