//! The receipt loop: one task per node reading what arrives, in order.
//!
//! The loop reads two queues: transport events, and the outbox of the
//! in-process hub. Draining the outbox here keeps hub output in the order
//! the hub produced it. Hub bookkeeping and directory updates happen
//! inline. Invocation bodies never do: the loop takes the call's ticket,
//! so arrival order is fixed, and hands the rest to a spawned task.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use courier_hub::{Outbound, Recipient};
use courier_protocol::{
    CallDescriptor, Codec, CorrelationId, InvocationFailure, InvocationResult, NodeId,
    WireMessage,
};
use courier_transport::{EventReceiver, Messenger, TransportEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::unified::{Inner, lock, log_failures, single_result};

enum Incoming {
    Outbox(Outbound),
    Event(TransportEvent),
}

/// Spawns the loop. It stops once the node's state is gone or both
/// queues are closed.
pub(crate) fn spawn_receipt_loop<M: Messenger>(
    inner: &Arc<Inner<M>>,
    mut events: EventReceiver,
    mut outbox: mpsc::UnboundedReceiver<Outbound>,
) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);
    let local = inner.local_node();

    tokio::spawn(async move {
        loop {
            let incoming = tokio::select! {
                biased;
                Some(outbound) = outbox.recv() => Incoming::Outbox(outbound),
                Some(event) = events.recv() => Incoming::Event(event),
                else => break,
            };
            let Some(inner) = weak.upgrade() else {
                break;
            };
            match incoming {
                Incoming::Outbox(outbound) => inner.dispatch(outbound).await,
                Incoming::Event(event) => inner.handle_event(event),
            }
        }
        tracing::debug!(node = %local, "receipt loop stopped");
    })
}

impl<M: Messenger> Inner<M> {
    /// Delivers one piece of hub output. Messages for this node are
    /// handled right here.
    async fn dispatch(self: &Arc<Self>, Outbound { to, message }: Outbound) {
        if to == Recipient::Node(self.local_node()) {
            self.handle_message(self.local_node(), message);
            return;
        }
        if let Err(e) = self.deliver(to, &message).await {
            tracing::warn!(?to, kind = message.kind(), error = %e, "hub delivery failed");
        }
    }

    fn handle_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Message { from, data } => {
                match self.codec.decode::<WireMessage>(&data) {
                    Ok(message) => self.handle_message(from, message),
                    Err(e) => tracing::warn!(%from, error = %e, "dropping undecodable frame"),
                }
            }
            TransportEvent::NodeConnected(node) => {
                tracing::info!(%node, "node connected");
            }
            TransportEvent::NodeDisconnected(node) => {
                tracing::info!(%node, "node disconnected");
                if let Some(hub) = &self.hub {
                    let mut hub = lock(hub);
                    let outbound = hub.on_node_disconnected(node);
                    self.queue(outbound);
                }
            }
            TransportEvent::ConnectionLost => self.on_connection_lost(),
        }
    }

    fn handle_message(self: &Arc<Self>, from: NodeId, message: WireMessage) {
        let spoke_bound = matches!(
            message,
            WireMessage::SpokeInvoke { .. }
                | WireMessage::SpokeInvocationResult { .. }
                | WireMessage::DirectorySnapshot { .. }
                | WireMessage::EndpointAnnounced { .. }
                | WireMessage::EndpointWithdrawn { .. }
        );
        if spoke_bound && from != self.hub_node() {
            tracing::warn!(%from, kind = message.kind(), "ignoring message not sent by the hub");
            return;
        }
        tracing::trace!(%from, kind = message.kind(), "message received");

        match message {
            WireMessage::SpokeInvoke {
                correlation_id,
                needs_result,
                call,
                invoker,
            } => self.on_spoke_invoke(correlation_id.filter(|_| needs_result), call, invoker),
            WireMessage::SpokeInvocationResult {
                correlation_id,
                result,
            } => self.complete_pending(correlation_id, result),
            WireMessage::DirectorySnapshot { endpoints } => {
                tracing::debug!(endpoints = endpoints.len(), "directory snapshot received");
                // Hub output arrives in the order it was produced, so every
                // announcement after this one is newer than the snapshot.
                *lock(&self.known) = endpoints.into_iter().collect();
                self.synced.send_replace(true);
            }
            WireMessage::EndpointAnnounced { endpoint } => {
                tracing::debug!(%endpoint, "endpoint announced");
                lock(&self.known).insert(endpoint);
            }
            WireMessage::EndpointWithdrawn { endpoint } => {
                tracing::debug!(%endpoint, "endpoint withdrawn");
                lock(&self.known).remove(&endpoint);
            }
            hub_bound => {
                let Some(hub) = &self.hub else {
                    tracing::warn!(%from, kind = hub_bound.kind(), "hub message sent to a spoke");
                    return;
                };
                if let Err(e) = self.hub_handle(hub, from, hub_bound) {
                    tracing::warn!(%from, error = %e, "hub rejected message");
                }
            }
        }
    }

    /// Runs a call the hub forwarded here. `reply_to` is set when the
    /// caller is waiting for the answer.
    fn on_spoke_invoke(
        self: &Arc<Self>,
        reply_to: Option<CorrelationId>,
        call: CallDescriptor,
        invoker: NodeId,
    ) {
        let ticket = match self.registry.take_ticket(call.endpoint()) {
            Ok(ticket) => ticket,
            Err(_) => {
                tracing::debug!(%call, "endpoint no longer implemented here");
                if let Some(correlation_id) = reply_to {
                    let inner = Arc::clone(self);
                    let result = Err(InvocationFailure::RemoteNotFound {
                        endpoint: call.endpoint().clone(),
                    });
                    tokio::spawn(async move { inner.reply(correlation_id, result).await });
                }
                return;
            }
        };

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let outcomes = inner.registry.invoke_local(&call, ticket, invoker).await;
            match (reply_to, outcomes) {
                (Some(correlation_id), Ok(outcomes)) => {
                    let result = single_result(call.endpoint(), outcomes);
                    inner.reply(correlation_id, result).await;
                }
                (Some(correlation_id), Err(e)) => {
                    let result = Err(InvocationFailure::internal(e.to_string()));
                    inner.reply(correlation_id, result).await;
                }
                (None, Ok(outcomes)) => log_failures(&call, &outcomes),
                (None, Err(e)) => tracing::warn!(%call, error = %e, "broadcast not run"),
            }
        });
    }

    async fn reply(&self, correlation_id: CorrelationId, result: InvocationResult) {
        tracing::trace!(%correlation_id, ok = result.is_ok(), "replying to hub");
        self.notify_hub(WireMessage::HubInvocationResult {
            correlation_id,
            result,
        })
        .await;
    }

    fn complete_pending(&self, correlation_id: CorrelationId, result: InvocationResult) {
        let waiter = lock(&self.pending).remove(&correlation_id);
        match waiter {
            Some(waiter) => {
                if waiter.send(result).is_err() {
                    tracing::debug!(%correlation_id, "caller left before its result arrived");
                }
            }
            None => tracing::error!(%correlation_id, "result for unknown correlation id"),
        }
    }

    /// Fails every waiting call. Nothing sent from here will be answered.
    fn on_connection_lost(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let waiters: Vec<_> = lock(&self.pending).drain().collect();
        tracing::warn!(
            node = %self.local_node(),
            pending = waiters.len(),
            "connection to network lost"
        );

        let node = self.hub_node();
        for (_, waiter) in waiters {
            let _ = waiter.send(Err(InvocationFailure::ConnectionLost { node }));
        }
        if self.hub.is_none() {
            lock(&self.known).clear();
        }
        self.synced.send_replace(true);
    }
}
