//! The Courier messenger hub.
//!
//! Exactly one node in a Courier network is the hub. Besides running
//! endpoints like any other node, it keeps the directory of which nodes
//! implement which endpoints and routes every call through it:
//!
//! ```text
//!  caller ── HubInvoke ──▶ MessengerHub ── SpokeInvoke ──▶ implementor
//!                            │    ▲
//!                            │    └── HubInvocationResult
//!  caller ◀── SpokeInvocationResult
//! ```
//!
//! [`MessengerHub`] does no I/O. Every handler returns a list of
//! [`Outbound`] messages for the node runtime to deliver.

mod directory;
mod error;
mod hub;

pub use error::HubError;
pub use hub::MessengerHub;

use courier_protocol::{NodeId, WireMessage};

/// Who should receive an outbound hub message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// One node. May be the hub itself.
    Node(NodeId),

    /// Every spoke (the hub keeps its own directory, so it is not included).
    AllSpokes,
}

/// A message the hub wants delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: Recipient,
    pub message: WireMessage,
}

impl Outbound {
    pub fn node(node: NodeId, message: WireMessage) -> Self {
        Self {
            to: Recipient::Node(node),
            message,
        }
    }

    pub fn all_spokes(message: WireMessage) -> Self {
        Self {
            to: Recipient::AllSpokes,
            message,
        }
    }
}
