//! Transport abstraction layer for Courier.
//!
//! Courier does not own sockets. It consumes a [`Messenger`]: something
//! that knows which node it is, which node is the hub, and can push raw
//! frames to a node (or to everyone). Incoming frames and connection
//! changes arrive as [`TransportEvent`]s on an unbounded channel handed out
//! when the messenger is created.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryNetwork`] — an in-process star network, used by tests and by
//!   single-process setups.
//! - `websocket` (default feature) — a hub that accepts WebSocket spokes.
//!
//! # Topology
//!
//! ```text
//!   spoke ──┐
//!   spoke ──┼── hub
//!   spoke ──┘
//! ```
//!
//! Spokes only ever talk to the hub. The hub can reach every spoke.

mod error;
mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use memory::{MemoryMessenger, MemoryNetwork};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketHub, WebSocketSpoke};

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Identity of one node in the network.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// The id both shipped transports give their hub.
    pub const HUB: NodeId = NodeId(0);

    /// Creates a new `NodeId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Something the transport wants the node to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A frame arrived from `from`.
    Message { from: NodeId, data: Vec<u8> },

    /// A spoke joined. Only delivered to the hub.
    NodeConnected(NodeId),

    /// A spoke went away. Only delivered to the hub.
    NodeDisconnected(NodeId),

    /// This node's link to the network is gone. Nothing sent from here
    /// will be answered any more.
    ConnectionLost,
}

/// Receiving half of a messenger's event stream.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Point-to-point send and broadcast over some network.
///
/// Frames sent from one node to another arrive in the order they were
/// sent. Nothing else is promised.
pub trait Messenger: Send + Sync + 'static {
    /// The node this messenger speaks for.
    fn local_node(&self) -> NodeId;

    /// The node holding the endpoint directory.
    fn hub_node(&self) -> NodeId;

    /// Returns `true` if this node is the hub.
    fn is_hub(&self) -> bool {
        self.local_node() == self.hub_node()
    }

    /// Sends one frame to `to`.
    fn send(
        &self,
        to: NodeId,
        data: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Sends one frame to every other node this node can reach.
    ///
    /// For a spoke that is only the hub.
    fn broadcast(
        &self,
        data: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
