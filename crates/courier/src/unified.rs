//! The per-node messaging runtime.
//!
//! Every node runs one [`UnifiedMessenger`]. It owns the node's
//! [`LocalEndpointRegistry`], the table of calls waiting for an answer,
//! the node's copy of the endpoint directory and, on the hub node, the
//! [`MessengerHub`] itself.
//!
//! Everything addressed to the hub goes through [`Inner::send_to_hub`]. On
//! a spoke that encodes the message and sends it; on the hub node the
//! local hub handles it in-process. Whatever the hub produces goes into
//! the outbox while the hub is still locked, and the receipt loop drains
//! the outbox in order. Spokes therefore see hub output in the order the
//! hub made it, and messages the hub addresses to its own node take the
//! same path as everything else.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use courier_endpoint::{Implementor, LocalEndpointRegistry, Outcome};
use courier_hub::{HubError, MessengerHub, Outbound, Recipient};
use courier_protocol::{
    CallDescriptor, Codec, CorrelationId, EndpointName, InterfaceShape, InvocationFailure,
    InvocationResult, JsonCodec, NodeId, Value, WireMessage,
};
use courier_transport::{EventReceiver, Messenger};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::handler::spawn_receipt_loop;
use crate::{CourierError, MessengerConfig};

type PendingTable = HashMap<CorrelationId, oneshot::Sender<InvocationResult>>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Inner
// ---------------------------------------------------------------------------

/// Shared node state. The receipt loop holds it weakly, every handle and
/// every running invocation holds it strongly.
pub(crate) struct Inner<M: Messenger> {
    pub(crate) messenger: M,
    pub(crate) codec: JsonCodec,
    pub(crate) config: MessengerConfig,
    pub(crate) registry: LocalEndpointRegistry,
    /// Present only on the hub node.
    pub(crate) hub: Option<Mutex<MessengerHub>>,
    pub(crate) pending: Mutex<PendingTable>,
    /// Endpoints the hub has told us about.
    pub(crate) known: Mutex<BTreeSet<EndpointName>>,
    pub(crate) connected: AtomicBool,
    /// Flips to `true` once the first directory snapshot arrived.
    pub(crate) synced: watch::Sender<bool>,
    /// Hub output waiting for the receipt loop to deliver it.
    pub(crate) outbox: mpsc::UnboundedSender<Outbound>,
    receipt_loop: OnceLock<JoinHandle<()>>,
}

impl<M: Messenger> Inner<M> {
    pub(crate) fn local_node(&self) -> NodeId {
        self.messenger.local_node()
    }

    pub(crate) fn hub_node(&self) -> NodeId {
        self.messenger.hub_node()
    }

    // -----------------------------------------------------------------------
    // Talking to the hub
    // -----------------------------------------------------------------------

    /// Hands `message` to the hub, wherever it lives.
    pub(crate) async fn send_to_hub(&self, message: WireMessage) -> Result<(), CourierError> {
        let Some(hub) = &self.hub else {
            let data = self.codec.encode(&message)?;
            self.messenger.send(self.hub_node(), data).await?;
            return Ok(());
        };
        self.hub_handle(hub, self.local_node(), message)?;
        Ok(())
    }

    /// Feeds `message` to the local hub and queues its output.
    pub(crate) fn hub_handle(
        &self,
        hub: &Mutex<MessengerHub>,
        from: NodeId,
        message: WireMessage,
    ) -> Result<(), HubError> {
        let mut hub = lock(hub);
        let outbound = hub.handle(from, message)?;
        self.queue(outbound);
        Ok(())
    }

    /// Queues hub output. Callers hold the hub lock.
    pub(crate) fn queue(&self, outbound: Vec<Outbound>) {
        for message in outbound {
            // Only fails while this node is being torn down.
            let _ = self.outbox.send(message);
        }
    }

    /// Like [`send_to_hub`](Self::send_to_hub), for messages nobody waits on.
    pub(crate) async fn notify_hub(&self, message: WireMessage) {
        let kind = message.kind();
        if let Err(e) = self.send_to_hub(message).await {
            tracing::warn!(node = %self.local_node(), kind, error = %e, "hub not notified");
        }
    }

    /// Sends one piece of hub output to other nodes.
    pub(crate) async fn deliver(&self, to: Recipient, message: &WireMessage) -> Result<(), CourierError> {
        let data = self.codec.encode(message)?;
        match to {
            Recipient::Node(node) => self.messenger.send(node, data).await?,
            Recipient::AllSpokes => self.messenger.broadcast(data).await?,
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Invocation
    // -----------------------------------------------------------------------

    pub(crate) async fn invoke_waiting(&self, call: CallDescriptor) -> Result<Value, CourierError> {
        if let Ok(ticket) = self.registry.take_ticket(call.endpoint()) {
            tracing::trace!(%call, "invoking local remote");
            let outcomes = self
                .registry
                .invoke_local(&call, ticket, self.local_node())
                .await?;
            return Ok(single_result(call.endpoint(), outcomes)?);
        }
        self.invoke_through_hub(call).await
    }

    async fn invoke_through_hub(&self, call: CallDescriptor) -> Result<Value, CourierError> {
        let correlation_id = CorrelationId::random();
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(correlation_id, tx);
        let _pending = PendingCall {
            table: &self.pending,
            correlation_id,
        };

        // Checked after the insert: a connection loss either sees this
        // entry and fails it, or has already cleared the flag.
        if !self.connected.load(Ordering::SeqCst) {
            return Err(InvocationFailure::ConnectionLost {
                node: self.hub_node(),
            }
            .into());
        }

        tracing::trace!(%correlation_id, %call, "invoking through hub");
        self.send_to_hub(WireMessage::HubInvoke {
            correlation_id: Some(correlation_id),
            needs_result: true,
            call,
        })
        .await?;

        match rx.await {
            Ok(result) => Ok(result?),
            Err(_) => Err(InvocationFailure::ConnectionLost {
                node: self.hub_node(),
            }
            .into()),
        }
    }

    pub(crate) async fn invoke_fire_and_forget(&self, call: CallDescriptor) -> Result<(), CourierError> {
        // Ticket first, so local runs keep the order calls were made in.
        let ticket = self.registry.take_ticket(call.endpoint()).ok();

        self.notify_hub(WireMessage::HubInvoke {
            correlation_id: None,
            needs_result: false,
            call: call.clone(),
        })
        .await;

        if let Some(ticket) = ticket {
            let outcomes = self
                .registry
                .invoke_local(&call, ticket, self.local_node())
                .await?;
            log_failures(&call, &outcomes);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Registers `implementor`. If the hub cannot be told about a new
    /// endpoint the registration is undone.
    pub(crate) async fn add_implementor(
        &self,
        endpoint: &EndpointName,
        shape: &InterfaceShape,
        implementor: Arc<dyn Implementor>,
        ordered: bool,
        sole: bool,
    ) -> Result<(), CourierError> {
        let registered = Arc::clone(&implementor);
        let first = if sole {
            self.registry
                .register_sole(endpoint, shape, implementor, ordered)?
        } else {
            self.registry.register(endpoint, shape, implementor, ordered)?
        };
        if !first {
            return Ok(());
        }

        tracing::info!(%endpoint, node = %self.local_node(), "implementor gained");
        let announced = self
            .send_to_hub(WireMessage::ImplementorGained {
                endpoint: endpoint.clone(),
            })
            .await;
        if let Err(e) = announced {
            tracing::warn!(%endpoint, error = %e, "hub not told about implementor, registration undone");
            let _ = self.registry.unregister(endpoint, &registered);
            return Err(e);
        }
        Ok(())
    }

    pub(crate) async fn remove_implementor(
        &self,
        endpoint: &EndpointName,
        implementor: &Arc<dyn Implementor>,
    ) -> Result<(), CourierError> {
        if self.registry.unregister(endpoint, implementor)? {
            self.implementor_lost(endpoint).await?;
        }
        Ok(())
    }

    pub(crate) async fn remove_all_implementors(&self, endpoint: &EndpointName) -> Result<usize, CourierError> {
        let removed = self.registry.unregister_all(endpoint);
        if removed > 0 {
            self.implementor_lost(endpoint).await?;
        }
        Ok(removed)
    }

    /// The implementors are already gone locally; an error here means the
    /// hub may still route to this node until it notices the node is gone.
    async fn implementor_lost(&self, endpoint: &EndpointName) -> Result<(), CourierError> {
        tracing::info!(%endpoint, node = %self.local_node(), "implementor lost");
        self.send_to_hub(WireMessage::ImplementorLost {
            endpoint: endpoint.clone(),
        })
        .await
        .inspect_err(|e| tracing::warn!(%endpoint, error = %e, "hub not told about lost implementor"))
    }

    // -----------------------------------------------------------------------
    // Directory view
    // -----------------------------------------------------------------------

    pub(crate) fn is_aware_of(&self, endpoint: &EndpointName) -> bool {
        if self.registry.has_endpoint(endpoint) {
            return true;
        }
        match &self.hub {
            Some(hub) => !lock(hub).implementing_nodes(endpoint).is_empty(),
            None => lock(&self.known).contains(endpoint),
        }
    }

    pub(crate) fn known_endpoints(&self) -> Vec<EndpointName> {
        match &self.hub {
            Some(hub) => lock(hub).known_endpoints(),
            None => lock(&self.known).iter().cloned().collect(),
        }
    }

    pub(crate) async fn wait_until_aware(&self, endpoint: &EndpointName, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_aware_of(endpoint) {
                return true;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(self.config.wait_poll_interval.min(deadline - now)).await;
        }
    }
}

impl<M: Messenger> Drop for Inner<M> {
    fn drop(&mut self) {
        if let Some(task) = self.receipt_loop.get() {
            task.abort();
        }
    }
}

/// Removes a waiting call from the table however the caller leaves.
struct PendingCall<'a> {
    table: &'a Mutex<PendingTable>,
    correlation_id: CorrelationId,
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        lock(self.table).remove(&self.correlation_id);
    }
}

/// Collapses the outcomes of a single-target call into its one result.
pub(crate) fn single_result(endpoint: &EndpointName, outcomes: Vec<Outcome>) -> InvocationResult {
    match <[Outcome; 1]>::try_from(outcomes) {
        Ok([outcome]) => outcome.map_err(InvocationFailure::from),
        Err(outcomes) if outcomes.is_empty() => Err(InvocationFailure::RemoteNotFound {
            endpoint: endpoint.clone(),
        }),
        Err(outcomes) => {
            tracing::error!(
                %endpoint,
                implementors = outcomes.len(),
                "single-target endpoint has more than one implementor"
            );
            Err(InvocationFailure::internal(format!(
                "{endpoint} has {} implementors, expected exactly one",
                outcomes.len()
            )))
        }
    }
}

/// Broadcast failures are never returned to anyone; this is where they end.
pub(crate) fn log_failures(call: &CallDescriptor, outcomes: &[Outcome]) {
    for error in outcomes.iter().filter_map(|o| o.as_ref().err()) {
        tracing::warn!(%call, code = %error.code, error = %error, "channel implementor failed");
    }
}

// ---------------------------------------------------------------------------
// UnifiedMessenger
// ---------------------------------------------------------------------------

/// One node's entry point for invoking and exposing endpoints.
///
/// Cheap to clone; all clones share the same node. The node keeps running
/// until the last clone (and every [`Messengers`](crate::Messengers),
/// proxy and broadcaster built from it) is dropped.
pub struct UnifiedMessenger<M: Messenger> {
    inner: Arc<Inner<M>>,
}

impl<M: Messenger> Clone for UnifiedMessenger<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: Messenger> UnifiedMessenger<M> {
    /// Starts the node: spawns its receipt loop and, on a spoke, fetches
    /// the hub's directory.
    ///
    /// # Errors
    /// Returns a transport error if a spoke cannot reach the hub.
    pub async fn start(
        messenger: M,
        events: EventReceiver,
        config: MessengerConfig,
    ) -> Result<Self, CourierError> {
        let local = messenger.local_node();
        let is_hub = messenger.is_hub();
        let (outbox, outbox_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            registry: LocalEndpointRegistry::new(local, config.worker_pool_size),
            hub: is_hub.then(|| Mutex::new(MessengerHub::new(local))),
            pending: Mutex::default(),
            known: Mutex::default(),
            connected: AtomicBool::new(true),
            synced: watch::Sender::new(is_hub),
            outbox,
            receipt_loop: OnceLock::new(),
            codec: JsonCodec,
            config,
            messenger,
        });
        let task = spawn_receipt_loop(&inner, events, outbox_rx);
        let _ = inner.receipt_loop.set(task);
        tracing::info!(node = %local, hub = is_hub, "messenger started");

        let unified = Self { inner };
        if !is_hub {
            unified.sync_directory().await?;
        }
        Ok(unified)
    }

    async fn sync_directory(&self) -> Result<(), CourierError> {
        self.inner.send_to_hub(WireMessage::DirectoryRequest).await?;

        let timeout = self.inner.config.directory_sync_timeout;
        if timeout.is_zero() {
            return Ok(());
        }
        let mut synced = self.inner.synced.subscribe();
        let in_time = tokio::time::timeout(timeout, synced.wait_for(|done| *done))
            .await
            .is_ok();
        if !in_time {
            tracing::warn!(node = %self.local_node(), ?timeout, "no directory snapshot from hub");
        }
        Ok(())
    }

    pub fn local_node(&self) -> NodeId {
        self.inner.local_node()
    }

    pub fn hub_node(&self) -> NodeId {
        self.inner.hub_node()
    }

    pub fn is_hub(&self) -> bool {
        self.inner.hub.is_some()
    }

    /// `false` once the transport reported this node cut off.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// The transport this node sends through.
    pub fn messenger(&self) -> &M {
        &self.inner.messenger
    }

    pub fn config(&self) -> &MessengerConfig {
        &self.inner.config
    }

    /// Calls a single-target endpoint and waits for its answer.
    ///
    /// A local implementor is called directly; otherwise the call goes
    /// through the hub to the one node implementing the endpoint. There is
    /// no timeout: the call ends with a result, or with `ConnectionLost`
    /// when the node it depends on goes away.
    ///
    /// # Errors
    /// - [`CourierError::Invocation`] with `RemoteNotFound`,
    ///   `ConnectionLost`, the implementor's own error, or `Internal`.
    /// - [`CourierError::Endpoint`] if the call does not fit a local
    ///   endpoint's interface.
    /// - [`CourierError::Transport`] if the hub could not be reached.
    pub async fn invoke_waiting(&self, call: CallDescriptor) -> Result<Value, CourierError> {
        self.inner.invoke_waiting(call).await
    }

    /// Calls every implementor of an endpoint, here and on other nodes,
    /// without waiting for anything but the local ones.
    ///
    /// Implementor failures are logged, never returned.
    ///
    /// # Errors
    /// [`CourierError::Endpoint`] if the call does not fit a local
    /// endpoint's interface.
    pub async fn invoke_fire_and_forget(&self, call: CallDescriptor) -> Result<(), CourierError> {
        self.inner.invoke_fire_and_forget(call).await
    }

    /// Adds an implementor. The hub hears about it if it is the first one
    /// on this node.
    ///
    /// # Errors
    /// - [`CourierError::Endpoint`] if the registry refuses it.
    /// - [`CourierError::Transport`] if the hub could not be told. The
    ///   implementor is not registered then.
    pub async fn add_implementor(
        &self,
        endpoint: &EndpointName,
        shape: &InterfaceShape,
        implementor: Arc<dyn Implementor>,
        ordered: bool,
    ) -> Result<(), CourierError> {
        self.inner
            .add_implementor(endpoint, shape, implementor, ordered, false)
            .await
    }

    /// Like [`add_implementor`](Self::add_implementor), but refuses a
    /// second implementor for the same endpoint.
    pub async fn add_sole_implementor(
        &self,
        endpoint: &EndpointName,
        shape: &InterfaceShape,
        implementor: Arc<dyn Implementor>,
        ordered: bool,
    ) -> Result<(), CourierError> {
        self.inner
            .add_implementor(endpoint, shape, implementor, ordered, true)
            .await
    }

    /// Removes one implementor. If it was the last, the hub is told before
    /// this returns.
    ///
    /// # Errors
    /// [`CourierError::Transport`] if the hub could not be told. The
    /// implementor is removed locally regardless.
    pub async fn remove_implementor(
        &self,
        endpoint: &EndpointName,
        implementor: &Arc<dyn Implementor>,
    ) -> Result<(), CourierError> {
        self.inner.remove_implementor(endpoint, implementor).await
    }

    /// Removes every local implementor of `endpoint`. Returns how many.
    ///
    /// # Errors
    /// As for [`remove_implementor`](Self::remove_implementor).
    pub async fn remove_all_implementors(&self, endpoint: &EndpointName) -> Result<usize, CourierError> {
        self.inner.remove_all_implementors(endpoint).await
    }

    pub fn local_implementor_count(&self, endpoint: &EndpointName) -> usize {
        self.inner.registry.implementor_count(endpoint)
    }

    /// Returns `true` if `endpoint` is implemented here or the hub says it
    /// is implemented somewhere.
    pub fn is_aware_of(&self, endpoint: &EndpointName) -> bool {
        self.inner.is_aware_of(endpoint)
    }

    /// Polls [`is_aware_of`](Self::is_aware_of) until it holds or
    /// `timeout` passes.
    pub async fn wait_until_aware(&self, endpoint: &EndpointName, timeout: Duration) -> bool {
        self.inner.wait_until_aware(endpoint, timeout).await
    }

    /// Every endpoint implemented somewhere, as far as this node knows.
    pub fn known_endpoints(&self) -> Vec<EndpointName> {
        self.inner.known_endpoints()
    }

    /// Calls made from this node still waiting for an answer.
    pub fn pending_calls(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Nodes implementing `endpoint`. `None` unless this is the hub.
    pub fn implementing_nodes(&self, endpoint: &EndpointName) -> Option<Vec<NodeId>> {
        self.inner
            .hub
            .as_ref()
            .map(|hub| lock(hub).implementing_nodes(endpoint))
    }

    /// Calls the hub is still relaying. `None` unless this is the hub.
    pub fn hub_pending_invocations(&self) -> Option<usize> {
        self.inner
            .hub
            .as_ref()
            .map(|hub| lock(hub).pending_invocations())
    }
}

impl<M: Messenger> std::fmt::Debug for UnifiedMessenger<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnifiedMessenger")
            .field("local_node", &self.local_node())
            .field("hub_node", &self.hub_node())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}
