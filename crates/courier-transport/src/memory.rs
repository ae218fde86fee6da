//! In-process star network.
//!
//! Every node gets an unbounded event channel. Sending a frame is a push
//! onto the receiver's channel, so per-pair ordering is exactly channel
//! order. [`MemoryNetwork::disconnect`] simulates a node vanishing: the hub
//! hears `NodeDisconnected`, and if the hub itself vanishes every spoke
//! hears `ConnectionLost`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::{EventReceiver, Messenger, NodeId, TransportError, TransportEvent};

struct NetworkState {
    hub: Option<NodeId>,
    next_id: u64,
    nodes: HashMap<NodeId, mpsc::UnboundedSender<TransportEvent>>,
}

/// A star network that lives inside one process.
///
/// Cheap to clone; all clones share the same nodes.
#[derive(Clone)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    /// Creates an empty network. The first node to join must be the hub.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(NetworkState {
                hub: None,
                next_id: NodeId::HUB.into_inner() + 1,
                nodes: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Joins as the hub. The hub is always [`NodeId::HUB`].
    pub fn join_hub(
        &self,
    ) -> Result<(MemoryMessenger, EventReceiver), TransportError> {
        let mut state = self.lock();
        if state.hub.is_some() || state.nodes.contains_key(&NodeId::HUB) {
            return Err(TransportError::HubAlreadyPresent);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.nodes.insert(NodeId::HUB, tx);
        state.hub = Some(NodeId::HUB);
        tracing::debug!(node = %NodeId::HUB, "hub joined memory network");

        Ok((self.messenger(NodeId::HUB), rx))
    }

    /// Joins as a spoke and tells the hub about it.
    pub fn join_spoke(
        &self,
    ) -> Result<(MemoryMessenger, EventReceiver), TransportError> {
        let mut state = self.lock();
        let hub = state.hub.ok_or(TransportError::NoHub)?;

        let id = NodeId::new(state.next_id);
        state.next_id += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        state.nodes.insert(id, tx);
        if let Some(hub_tx) = state.nodes.get(&hub) {
            let _ = hub_tx.send(TransportEvent::NodeConnected(id));
        }
        tracing::debug!(node = %id, "spoke joined memory network");

        Ok((self.messenger(id), rx))
    }

    /// Removes `node` from the network as if its process died.
    ///
    /// The node itself receives `ConnectionLost`. If it was a spoke, the
    /// hub receives `NodeDisconnected`; if it was the hub, every spoke
    /// receives `ConnectionLost`.
    pub fn disconnect(&self, node: NodeId) {
        let mut state = self.lock();
        let Some(tx) = state.nodes.remove(&node) else {
            return;
        };
        let _ = tx.send(TransportEvent::ConnectionLost);

        if state.hub == Some(node) {
            state.hub = None;
            for spoke in state.nodes.values() {
                let _ = spoke.send(TransportEvent::ConnectionLost);
            }
        } else if let Some(hub_tx) = state.hub.and_then(|h| state.nodes.get(&h)) {
            let _ = hub_tx.send(TransportEvent::NodeDisconnected(node));
        }
        tracing::debug!(%node, "node removed from memory network");
    }

    /// Lists every node currently attached, hub included.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.lock().nodes.keys().copied().collect();
        nodes.sort();
        nodes
    }

    fn messenger(&self, local: NodeId) -> MemoryMessenger {
        MemoryMessenger {
            network: self.clone(),
            local,
            hub: NodeId::HUB,
        }
    }

    fn deliver(
        &self,
        from: NodeId,
        to: NodeId,
        data: Vec<u8>,
    ) -> Result<(), TransportError> {
        let state = self.lock();
        if !state.nodes.contains_key(&from) {
            return Err(TransportError::ConnectionClosed(format!(
                "{from} is no longer attached"
            )));
        }
        if state.hub != Some(from) && state.hub != Some(to) {
            return Err(TransportError::NotRoutable { from, to });
        }
        let tx = state.nodes.get(&to).ok_or(TransportError::UnknownNode(to))?;
        tx.send(TransportEvent::Message { from, data })
            .map_err(|_| TransportError::ConnectionClosed(format!("{to} stopped listening")))
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// A [`Messenger`] attached to a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryMessenger {
    network: MemoryNetwork,
    local: NodeId,
    hub: NodeId,
}

impl Messenger for MemoryMessenger {
    fn local_node(&self) -> NodeId {
        self.local
    }

    fn hub_node(&self) -> NodeId {
        self.hub
    }

    async fn send(&self, to: NodeId, data: Vec<u8>) -> Result<(), TransportError> {
        self.network.deliver(self.local, to, data)
    }

    async fn broadcast(&self, data: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_hub() {
            return self.network.deliver(self.local, self.hub, data);
        }
        let targets: Vec<NodeId> = self
            .network
            .nodes()
            .into_iter()
            .filter(|node| *node != self.local)
            .collect();
        for node in targets {
            // A spoke vanishing mid-broadcast is not the broadcaster's problem.
            if let Err(e) = self.network.deliver(self.local, node, data.clone()) {
                tracing::debug!(%node, error = %e, "broadcast skipped node");
            }
        }
        Ok(())
    }
}
