//! The messenger hub: directory, router, and result relay.
//!
//! `MessengerHub` is a plain state machine. Each `on_*` method takes one
//! event and returns the messages to send because of it; the node runtime
//! does the sending, so every routing rule can be tested without a
//! network.

use std::collections::HashMap;

use courier_protocol::{
    CallDescriptor, CorrelationId, EndpointName, InvocationFailure, InvocationResult, NodeId,
    WireMessage,
};

use crate::directory::Directory;
use crate::{HubError, Outbound, Recipient};

/// A forwarded call whose answer the hub still owes someone.
#[derive(Debug, Clone)]
struct InvocationRecord {
    /// The caller's own correlation id, used in the reply.
    caller_correlation: CorrelationId,
    caller: NodeId,
    waiting_on: NodeId,
    call: CallDescriptor,
}

/// Directory of implementing nodes plus in-flight call records.
#[derive(Debug)]
pub struct MessengerHub {
    hub_node: NodeId,
    directory: Directory,
    records: HashMap<CorrelationId, InvocationRecord>,
}

impl MessengerHub {
    pub fn new(hub_node: NodeId) -> Self {
        Self {
            hub_node,
            directory: Directory::default(),
            records: HashMap::new(),
        }
    }

    pub fn hub_node(&self) -> NodeId {
        self.hub_node
    }

    /// Dispatches one hub-bound message from `from`.
    ///
    /// # Errors
    /// See [`HubError`]. Spoke-bound messages are
    /// [`HubError::UnexpectedMessage`].
    pub fn handle(&mut self, from: NodeId, message: WireMessage) -> Result<Vec<Outbound>, HubError> {
        match message {
            WireMessage::ImplementorGained { endpoint } => {
                Ok(self.on_implementor_gained(&endpoint, from))
            }
            WireMessage::ImplementorLost { endpoint } => {
                Ok(self.on_implementor_lost(&endpoint, from))
            }
            WireMessage::HubInvoke {
                correlation_id,
                needs_result,
                call,
            } => self.on_invoke(correlation_id, needs_result, call, from),
            WireMessage::HubInvocationResult {
                correlation_id,
                result,
            } => self.on_invocation_result(correlation_id, result, from),
            WireMessage::DirectoryRequest => Ok(self.on_directory_request(from)),
            other => Err(HubError::UnexpectedMessage { kind: other.kind() }),
        }
    }

    // -----------------------------------------------------------------------
    // Directory
    // -----------------------------------------------------------------------

    /// `node` now has an implementor for `endpoint`.
    ///
    /// If it is the first node to have one, every spoke is told the
    /// endpoint exists.
    pub fn on_implementor_gained(&mut self, endpoint: &EndpointName, node: NodeId) -> Vec<Outbound> {
        if !self.directory.add(endpoint, node) {
            tracing::debug!(%endpoint, %node, "additional implementing node");
            return Vec::new();
        }
        tracing::info!(%endpoint, %node, "endpoint available");
        vec![Outbound::all_spokes(WireMessage::EndpointAnnounced {
            endpoint: endpoint.clone(),
        })]
    }

    /// `node` no longer has any implementor for `endpoint`.
    pub fn on_implementor_lost(&mut self, endpoint: &EndpointName, node: NodeId) -> Vec<Outbound> {
        if !self.directory.remove(endpoint, node) {
            tracing::debug!(%endpoint, %node, "implementing node removed");
            return Vec::new();
        }
        tracing::info!(%endpoint, %node, "endpoint withdrawn");
        vec![Outbound::all_spokes(WireMessage::EndpointWithdrawn {
            endpoint: endpoint.clone(),
        })]
    }

    /// Answers a spoke's request for the whole directory.
    pub fn on_directory_request(&self, from: NodeId) -> Vec<Outbound> {
        let endpoints = self.directory.endpoints();
        tracing::debug!(%from, endpoints = endpoints.len(), "sending directory snapshot");
        vec![Outbound::node(from, WireMessage::DirectorySnapshot { endpoints })]
    }

    // -----------------------------------------------------------------------
    // Invocation routing
    // -----------------------------------------------------------------------

    /// Routes a call from `from`.
    ///
    /// - Needs a result: exactly one node must implement the endpoint. The
    ///   call is forwarded there under a fresh correlation id and the hub
    ///   remembers whom to answer. No implementor means an immediate
    ///   `RemoteNotFound`; more than one means an `Internal` failure.
    /// - No result: forwarded to every implementing node except `from`,
    ///   which has already run its own implementors. Nobody implementing
    ///   it is not an error.
    ///
    /// # Errors
    /// [`HubError::MissingCorrelation`] if a result is needed but the
    /// caller sent no correlation id.
    pub fn on_invoke(
        &mut self,
        correlation_id: Option<CorrelationId>,
        needs_result: bool,
        call: CallDescriptor,
        from: NodeId,
    ) -> Result<Vec<Outbound>, HubError> {
        let nodes = self.directory.nodes(call.endpoint());

        if !needs_result {
            let out: Vec<Outbound> = nodes
                .into_iter()
                .filter(|node| *node != from)
                .map(|node| {
                    Outbound::node(
                        node,
                        WireMessage::SpokeInvoke {
                            correlation_id: None,
                            needs_result: false,
                            call: call.clone(),
                            invoker: from,
                        },
                    )
                })
                .collect();
            tracing::trace!(%call, %from, targets = out.len(), "broadcast routed");
            return Ok(out);
        }

        let caller_correlation = correlation_id.ok_or(HubError::MissingCorrelation(from))?;

        let target = match nodes.as_slice() {
            [] => {
                tracing::debug!(%call, %from, "no implementing node");
                return Ok(vec![reply(
                    from,
                    caller_correlation,
                    Err(InvocationFailure::RemoteNotFound {
                        endpoint: call.endpoint().clone(),
                    }),
                )]);
            }
            [only] => *only,
            many => {
                tracing::error!(
                    %call,
                    nodes = ?many,
                    "single-target call but several nodes implement the endpoint"
                );
                return Ok(vec![reply(
                    from,
                    caller_correlation,
                    Err(InvocationFailure::internal(format!(
                        "{} is implemented on {} nodes, expected exactly one",
                        call.endpoint(),
                        many.len()
                    ))),
                )]);
            }
        };

        let correlation_id = self.fresh_correlation();
        tracing::trace!(%call, %from, %target, %correlation_id, "forwarding call");
        self.records.insert(
            correlation_id,
            InvocationRecord {
                caller_correlation,
                caller: from,
                waiting_on: target,
                call: call.clone(),
            },
        );

        Ok(vec![Outbound::node(
            target,
            WireMessage::SpokeInvoke {
                correlation_id: Some(correlation_id),
                needs_result: true,
                call,
                invoker: from,
            },
        )])
    }

    /// Relays a result from `from` back to whoever made the call.
    ///
    /// # Errors
    /// - [`HubError::UnknownCorrelation`] if no record matches.
    /// - [`HubError::UnexpectedSender`] if `from` is not the node the call
    ///   was forwarded to. The record is kept; the right node may still
    ///   answer.
    pub fn on_invocation_result(
        &mut self,
        correlation_id: CorrelationId,
        result: InvocationResult,
        from: NodeId,
    ) -> Result<Vec<Outbound>, HubError> {
        let record = self
            .records
            .get(&correlation_id)
            .ok_or(HubError::UnknownCorrelation(correlation_id))?;

        if record.waiting_on != from {
            return Err(HubError::UnexpectedSender {
                correlation_id,
                expected: record.waiting_on,
                actual: from,
            });
        }

        let Some(record) = self.records.remove(&correlation_id) else {
            return Err(HubError::UnknownCorrelation(correlation_id));
        };
        tracing::trace!(call = %record.call, caller = %record.caller, "relaying result");
        Ok(vec![reply(record.caller, record.caller_correlation, result)])
    }

    // -----------------------------------------------------------------------
    // Disconnects
    // -----------------------------------------------------------------------

    /// Forgets `node` entirely.
    ///
    /// Its directory entries go (spokes hear about endpoints that vanish),
    /// calls waiting on it are answered with `ConnectionLost`, and calls it
    /// made are dropped since nobody is left to answer.
    pub fn on_node_disconnected(&mut self, node: NodeId) -> Vec<Outbound> {
        let mut out: Vec<Outbound> = self
            .directory
            .purge(node)
            .into_iter()
            .map(|endpoint| {
                tracing::info!(%endpoint, %node, "endpoint withdrawn with its node");
                Outbound::all_spokes(WireMessage::EndpointWithdrawn { endpoint })
            })
            .collect();

        let mut failed = Vec::new();
        self.records.retain(|_, record| {
            if record.caller == node {
                return false;
            }
            if record.waiting_on == node {
                failed.push((record.caller, record.caller_correlation));
                return false;
            }
            true
        });
        for (caller, caller_correlation) in &failed {
            out.push(reply(
                *caller,
                *caller_correlation,
                Err(InvocationFailure::ConnectionLost { node }),
            ));
        }

        tracing::info!(%node, failed_calls = failed.len(), "node disconnected");
        out
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Nodes currently known to implement `endpoint`, ascending.
    pub fn implementing_nodes(&self, endpoint: &EndpointName) -> Vec<NodeId> {
        self.directory.nodes(endpoint)
    }

    /// Every endpoint with at least one implementing node.
    pub fn known_endpoints(&self) -> Vec<EndpointName> {
        self.directory.endpoints()
    }

    /// Forwarded calls still waiting for an answer.
    pub fn pending_invocations(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if any directory entry or record mentions `node`.
    pub fn references(&self, node: NodeId) -> bool {
        self.directory.references(node)
            || self
                .records
                .values()
                .any(|r| r.caller == node || r.waiting_on == node)
    }

    fn fresh_correlation(&self) -> CorrelationId {
        loop {
            let id = CorrelationId::random();
            if !self.records.contains_key(&id) {
                return id;
            }
        }
    }
}

fn reply(to: NodeId, correlation_id: CorrelationId, result: InvocationResult) -> Outbound {
    Outbound::node(
        to,
        WireMessage::SpokeInvocationResult {
            correlation_id,
            result,
        },
    )
}
