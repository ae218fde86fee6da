use crate::NodeId;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The peer did not complete the node-id handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// No node with this id is reachable from here.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// Spokes can only talk to the hub.
    #[error("{from} cannot send to {to}: spokes only reach the hub")]
    NotRoutable { from: NodeId, to: NodeId },

    /// A network can only have one hub.
    #[error("network already has a hub")]
    HubAlreadyPresent,

    /// Spokes need a hub to join.
    #[error("network has no hub")]
    NoHub,
}
