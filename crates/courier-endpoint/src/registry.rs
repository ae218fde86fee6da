//! The local endpoint registry: every implementor this node hosts.
//!
//! The registry answers three questions for the node runtime:
//!
//! - Do we implement this endpoint here, and how many times?
//! - Where does an arriving call stand in line? ([`take_ticket`])
//! - What did each implementor say? ([`invoke_local`])
//!
//! [`take_ticket`]: LocalEndpointRegistry::take_ticket
//! [`invoke_local`]: LocalEndpointRegistry::invoke_local
//!
//! # Concurrency
//!
//! The endpoint table sits behind one `std::sync::Mutex` that is held only
//! while the table is read or changed, never while an implementor runs.
//! Invocation bodies run on Tokio's blocking pool, at most
//! `worker_pool_size` at a time.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use courier_protocol::{CallDescriptor, EndpointName, ImplementorError, InterfaceShape, NodeId, Value};
use tokio::sync::Semaphore;

use crate::sequencer::{Sequencer, Ticket};
use crate::{Args, CallContext, EndpointError, Implementor};

/// What one implementor produced for one call.
pub type Outcome = Result<Value, ImplementorError>;

/// Default bound on concurrently running invocation bodies.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 15;

struct Endpoint {
    shape: InterfaceShape,
    ordered: bool,
    sequencer: Option<Arc<Sequencer>>,
    implementors: Vec<Arc<dyn Implementor>>,
}

impl Endpoint {
    fn position(&self, implementor: &Arc<dyn Implementor>) -> Option<usize> {
        self.implementors
            .iter()
            .position(|existing| same_implementor(existing, implementor))
    }
}

/// Identity comparison on the data pointer only; vtable pointers for the
/// same object may differ between codegen units.
fn same_implementor(a: &Arc<dyn Implementor>, b: &Arc<dyn Implementor>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// All endpoints with at least one local implementor.
pub struct LocalEndpointRegistry {
    local_node: NodeId,
    endpoints: Mutex<HashMap<EndpointName, Endpoint>>,
    workers: Arc<Semaphore>,
}

impl LocalEndpointRegistry {
    /// Creates an empty registry for `local_node`, running at most
    /// `worker_pool_size` invocation bodies at once.
    pub fn new(local_node: NodeId, worker_pool_size: usize) -> Self {
        Self {
            local_node,
            endpoints: Mutex::new(HashMap::new()),
            workers: Arc::new(Semaphore::new(worker_pool_size.max(1))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EndpointName, Endpoint>> {
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn local_node(&self) -> NodeId {
        self.local_node
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Adds `implementor` under `endpoint`.
    ///
    /// `ordered` endpoints run calls one at a time in arrival order;
    /// unordered ones run them as workers allow.
    ///
    /// Returns `true` if this is the endpoint's first local implementor,
    /// meaning the rest of the network should be told.
    ///
    /// # Errors
    /// [`EndpointError::ShapeMismatch`] if the endpoint is already
    /// registered with a different shape or ordering.
    pub fn register(
        &self,
        endpoint: &EndpointName,
        shape: &InterfaceShape,
        implementor: Arc<dyn Implementor>,
        ordered: bool,
    ) -> Result<bool, EndpointError> {
        self.insert(endpoint, shape, implementor, ordered, false)
    }

    /// Like [`register`](Self::register), but the endpoint may only ever
    /// have one implementor on this node.
    ///
    /// # Errors
    /// [`EndpointError::AlreadyImplemented`] if it already has one.
    pub fn register_sole(
        &self,
        endpoint: &EndpointName,
        shape: &InterfaceShape,
        implementor: Arc<dyn Implementor>,
        ordered: bool,
    ) -> Result<bool, EndpointError> {
        self.insert(endpoint, shape, implementor, ordered, true)
    }

    fn insert(
        &self,
        endpoint: &EndpointName,
        shape: &InterfaceShape,
        implementor: Arc<dyn Implementor>,
        ordered: bool,
        sole: bool,
    ) -> Result<bool, EndpointError> {
        if endpoint.interface() != shape.name() {
            return Err(EndpointError::ShapeMismatch {
                endpoint: endpoint.clone(),
            });
        }

        let mut endpoints = self.lock();
        match endpoints.get_mut(endpoint) {
            Some(existing) => {
                if existing.shape != *shape || existing.ordered != ordered {
                    return Err(EndpointError::ShapeMismatch {
                        endpoint: endpoint.clone(),
                    });
                }
                if sole {
                    return Err(EndpointError::AlreadyImplemented(endpoint.clone()));
                }
                if existing.position(&implementor).is_none() {
                    existing.implementors.push(implementor);
                }
                tracing::debug!(
                    %endpoint,
                    implementors = existing.implementors.len(),
                    "implementor added"
                );
                Ok(false)
            }
            None => {
                endpoints.insert(
                    endpoint.clone(),
                    Endpoint {
                        shape: shape.clone(),
                        ordered,
                        sequencer: ordered.then(Sequencer::new),
                        implementors: vec![implementor],
                    },
                );
                tracing::debug!(%endpoint, ordered, "first local implementor");
                Ok(true)
            }
        }
    }

    /// Removes one implementor.
    ///
    /// Returns `true` if the endpoint has no local implementors left.
    ///
    /// # Errors
    /// [`EndpointError::NotRegistered`] if `implementor` was not
    /// registered under `endpoint`.
    pub fn unregister(
        &self,
        endpoint: &EndpointName,
        implementor: &Arc<dyn Implementor>,
    ) -> Result<bool, EndpointError> {
        let mut endpoints = self.lock();
        let entry = endpoints
            .get_mut(endpoint)
            .ok_or_else(|| EndpointError::NotRegistered(endpoint.clone()))?;
        let index = entry
            .position(implementor)
            .ok_or_else(|| EndpointError::NotRegistered(endpoint.clone()))?;
        entry.implementors.remove(index);

        let now_empty = entry.implementors.is_empty();
        if now_empty {
            endpoints.remove(endpoint);
            tracing::debug!(%endpoint, "last local implementor removed");
        }
        Ok(now_empty)
    }

    /// Removes every implementor of `endpoint`. Returns how many there were.
    pub fn unregister_all(&self, endpoint: &EndpointName) -> usize {
        let removed = self
            .lock()
            .remove(endpoint)
            .map_or(0, |entry| entry.implementors.len());
        if removed > 0 {
            tracing::debug!(%endpoint, removed, "all local implementors removed");
        }
        removed
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Number of local implementors of `endpoint`.
    pub fn implementor_count(&self, endpoint: &EndpointName) -> usize {
        self.lock()
            .get(endpoint)
            .map_or(0, |entry| entry.implementors.len())
    }

    /// Returns `true` if at least one local implementor serves `endpoint`.
    pub fn has_endpoint(&self, endpoint: &EndpointName) -> bool {
        self.lock().contains_key(endpoint)
    }

    /// Every locally implemented endpoint, sorted.
    pub fn endpoints(&self) -> Vec<EndpointName> {
        let mut names: Vec<EndpointName> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// The interface `endpoint` was registered with.
    pub fn shape(&self, endpoint: &EndpointName) -> Option<InterfaceShape> {
        self.lock().get(endpoint).map(|entry| entry.shape.clone())
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Takes the next place in `endpoint`'s queue.
    ///
    /// Call this at the moment a call arrives, in arrival order; the
    /// actual invocation may then happen on any task.
    ///
    /// # Errors
    /// [`EndpointError::UnknownEndpoint`] if nothing local implements it.
    pub fn take_ticket(&self, endpoint: &EndpointName) -> Result<Ticket, EndpointError> {
        let endpoints = self.lock();
        let entry = endpoints
            .get(endpoint)
            .ok_or_else(|| EndpointError::UnknownEndpoint(endpoint.clone()))?;
        Ok(match &entry.sequencer {
            Some(sequencer) => Ticket::ordered(sequencer),
            None => Ticket::unordered(),
        })
    }

    /// Runs `call` on every local implementor of its endpoint.
    ///
    /// For an ordered endpoint this first waits until `ticket` comes up.
    /// Implementors run one after another on a blocking worker; an error or
    /// panic from one is recorded and the rest still run. The outcomes come
    /// back in registration order. If the endpoint lost all its
    /// implementors since the ticket was taken, the list is empty.
    ///
    /// # Errors
    /// - [`EndpointError::MethodNotFound`] if the call does not fit the
    ///   endpoint's interface. Nothing runs.
    /// - [`EndpointError::WorkerPool`] if the worker pool is gone.
    pub async fn invoke_local(
        &self,
        call: &CallDescriptor,
        ticket: Ticket,
        sender: NodeId,
    ) -> Result<Vec<Outcome>, EndpointError> {
        let endpoint = call.endpoint();

        match self.shape(endpoint) {
            Some(shape) if shape.resolve(call.method(), call.args()).is_none() => {
                tracing::error!(
                    %endpoint,
                    method = call.method(),
                    signature = ?call.signature(),
                    "method not found"
                );
                return Err(EndpointError::MethodNotFound {
                    endpoint: endpoint.clone(),
                    method: call.method().to_owned(),
                    signature: call.signature(),
                });
            }
            Some(_) => {}
            None => return Ok(Vec::new()),
        }

        // Turn before permit: a worker must never sit waiting for its turn
        // while the ticket ahead of it waits for a worker.
        let turn = ticket.into_turn().await;
        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|e| EndpointError::WorkerPool(e.to_string()))?;

        let implementors = self
            .lock()
            .get(endpoint)
            .map(|entry| entry.implementors.clone())
            .unwrap_or_default();
        if implementors.is_empty() {
            return Ok(Vec::new());
        }

        let ctx = CallContext {
            sender,
            local_node: self.local_node,
            endpoint: endpoint.clone(),
        };
        let call = call.clone();
        tracing::trace!(%call, %sender, implementors = implementors.len(), "invoking locally");

        let outcomes = tokio::task::spawn_blocking(move || {
            let _turn = turn;
            let _permit = permit;
            implementors
                .iter()
                .map(|implementor| invoke_one(implementor.as_ref(), &ctx, &call))
                .collect::<Vec<Outcome>>()
        })
        .await
        .map_err(|e| EndpointError::WorkerPool(e.to_string()))?;

        Ok(outcomes)
    }
}

fn invoke_one(implementor: &dyn Implementor, ctx: &CallContext, call: &CallDescriptor) -> Outcome {
    let args = Args::new(call.args());
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        implementor.invoke(ctx, call.method(), args)
    }))
    .unwrap_or_else(|panic| {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "implementor panicked".to_owned());
        tracing::warn!(endpoint = %ctx.endpoint, method = call.method(), %message, "implementor panicked");
        Err(ImplementorError::new("panic", message))
    });

    if let Err(e) = &outcome {
        tracing::debug!(endpoint = %ctx.endpoint, method = call.method(), error = %e, "implementor failed");
    }
    outcome
}

impl std::fmt::Debug for LocalEndpointRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEndpointRegistry")
            .field("local_node", &self.local_node)
            .field("endpoints", &self.endpoints())
            .finish()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use courier_protocol::ValueKind;

    use crate::implementor_fn;

    fn echo_shape() -> InterfaceShape {
        InterfaceShape::new("Echo").method("double", [ValueKind::Int])
    }

    fn echo_name() -> EndpointName {
        EndpointName::new("echo", &echo_shape())
    }

    fn doubler() -> Arc<dyn Implementor> {
        implementor_fn(|_ctx, _method, args| Ok(Value::Int(args.get::<i64>(0)? * 2)))
    }

    fn double_call(x: i64) -> CallDescriptor {
        CallDescriptor::new(echo_name(), "double", vec![Value::Int(x)])
    }

    fn registry() -> LocalEndpointRegistry {
        LocalEndpointRegistry::new(NodeId::new(1), DEFAULT_WORKER_POOL_SIZE)
    }

    async fn invoke(reg: &LocalEndpointRegistry, call: &CallDescriptor) -> Vec<Outcome> {
        let ticket = reg.take_ticket(call.endpoint()).unwrap();
        reg.invoke_local(call, ticket, NodeId::new(7)).await.unwrap()
    }

    // =====================================================================
    // register / unregister
    // =====================================================================

    #[test]
    fn test_register_first_implementor_returns_true() {
        let reg = registry();
        assert!(reg.register(&echo_name(), &echo_shape(), doubler(), true).unwrap());
        assert!(!reg.register(&echo_name(), &echo_shape(), doubler(), true).unwrap());
        assert_eq!(reg.implementor_count(&echo_name()), 2);
    }

    #[test]
    fn test_register_same_object_twice_is_noop() {
        let reg = registry();
        let imp = doubler();
        reg.register(&echo_name(), &echo_shape(), Arc::clone(&imp), true).unwrap();
        reg.register(&echo_name(), &echo_shape(), imp, true).unwrap();
        assert_eq!(reg.implementor_count(&echo_name()), 1);
    }

    #[test]
    fn test_register_different_shape_is_rejected() {
        let reg = registry();
        reg.register(&echo_name(), &echo_shape(), doubler(), true).unwrap();

        let other = InterfaceShape::new("Echo").method("triple", [ValueKind::Int]);
        let result = reg.register(&echo_name(), &other, doubler(), true);
        assert!(matches!(result, Err(EndpointError::ShapeMismatch { .. })));

        let result = reg.register(&echo_name(), &echo_shape(), doubler(), false);
        assert!(matches!(result, Err(EndpointError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_register_name_for_other_interface_is_rejected() {
        let reg = registry();
        let other = InterfaceShape::new("Ticker");
        let result = reg.register(&echo_name(), &other, doubler(), true);
        assert!(matches!(result, Err(EndpointError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_register_sole_refuses_second() {
        let reg = registry();
        assert!(reg.register_sole(&echo_name(), &echo_shape(), doubler(), true).unwrap());
        let result = reg.register_sole(&echo_name(), &echo_shape(), doubler(), true);
        assert!(matches!(result, Err(EndpointError::AlreadyImplemented(_))));
    }

    #[test]
    fn test_unregister_last_returns_true_and_forgets_endpoint() {
        let reg = registry();
        let a = doubler();
        let b = doubler();
        reg.register(&echo_name(), &echo_shape(), Arc::clone(&a), true).unwrap();
        reg.register(&echo_name(), &echo_shape(), Arc::clone(&b), true).unwrap();

        assert!(!reg.unregister(&echo_name(), &a).unwrap());
        assert!(reg.unregister(&echo_name(), &b).unwrap());
        assert!(!reg.has_endpoint(&echo_name()));
        assert!(reg.endpoints().is_empty());
    }

    #[test]
    fn test_unregister_unknown_implementor_fails() {
        let reg = registry();
        reg.register(&echo_name(), &echo_shape(), doubler(), true).unwrap();
        let result = reg.unregister(&echo_name(), &doubler());
        assert!(matches!(result, Err(EndpointError::NotRegistered(_))));
    }

    #[test]
    fn test_unregister_all_counts_removed() {
        let reg = registry();
        reg.register(&echo_name(), &echo_shape(), doubler(), false).unwrap();
        reg.register(&echo_name(), &echo_shape(), doubler(), false).unwrap();
        assert_eq!(reg.unregister_all(&echo_name()), 2);
        assert_eq!(reg.unregister_all(&echo_name()), 0);
    }

    #[test]
    fn test_take_ticket_unknown_endpoint_fails() {
        let reg = registry();
        assert!(matches!(
            reg.take_ticket(&echo_name()),
            Err(EndpointError::UnknownEndpoint(_))
        ));
    }

    // =====================================================================
    // invoke_local
    // =====================================================================

    #[tokio::test]
    async fn test_invoke_local_returns_value() {
        let reg = registry();
        reg.register(&echo_name(), &echo_shape(), doubler(), true).unwrap();

        let outcomes = invoke(&reg, &double_call(21)).await;
        assert_eq!(outcomes, vec![Ok(Value::Int(42))]);
    }

    #[tokio::test]
    async fn test_invoke_local_passes_sender_in_context() {
        let reg = registry();
        let imp = implementor_fn(|ctx, _method, _args| {
            Ok(Value::from(vec![
                Value::Int(ctx.sender.into_inner() as i64),
                Value::Int(ctx.local_node.into_inner() as i64),
            ]))
        });
        reg.register(&echo_name(), &echo_shape(), imp, true).unwrap();

        let outcomes = invoke(&reg, &double_call(1)).await;
        assert_eq!(
            outcomes,
            vec![Ok(Value::List(vec![Value::Int(7), Value::Int(1)]))]
        );
    }

    #[tokio::test]
    async fn test_failing_implementor_does_not_stop_siblings() {
        let reg = registry();
        let ran = Arc::new(AtomicUsize::new(0));

        let failing = implementor_fn(|_ctx, _method, _args| {
            Err(ImplementorError::new("nope", "refused"))
        });
        let panicking: Arc<dyn Implementor> =
            implementor_fn(|_ctx, _method, _args| panic!("kaboom"));
        let counter = Arc::clone(&ran);
        let counting = implementor_fn(move |_ctx, _method, _args| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Unit)
        });

        for imp in [failing, panicking, counting] {
            reg.register(&echo_name(), &echo_shape(), imp, false).unwrap();
        }

        let outcomes = invoke(&reg, &double_call(1)).await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].as_ref().unwrap_err().code, "nope");
        let panic = outcomes[1].as_ref().unwrap_err();
        assert_eq!(panic.code, "panic");
        assert_eq!(panic.message, "kaboom");
        assert_eq!(outcomes[2], Ok(Value::Unit));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_method_not_found_is_an_error_not_an_outcome() {
        let reg = registry();
        reg.register(&echo_name(), &echo_shape(), doubler(), true).unwrap();

        let call = CallDescriptor::new(echo_name(), "double", vec![Value::from("21")]);
        let ticket = reg.take_ticket(&echo_name()).unwrap();
        let result = reg.invoke_local(&call, ticket, NodeId::new(1)).await;
        assert!(matches!(result, Err(EndpointError::MethodNotFound { .. })));

        // The abandoned ticket must not block the next call.
        let outcomes = tokio::time::timeout(Duration::from_secs(1), invoke(&reg, &double_call(2)))
            .await
            .expect("next call should not stall");
        assert_eq!(outcomes, vec![Ok(Value::Int(4))]);
    }

    #[tokio::test]
    async fn test_invoke_after_unregister_yields_no_outcomes() {
        let reg = registry();
        let imp = doubler();
        reg.register(&echo_name(), &echo_shape(), Arc::clone(&imp), true).unwrap();
        let ticket = reg.take_ticket(&echo_name()).unwrap();
        reg.unregister(&echo_name(), &imp).unwrap();

        let outcomes = reg
            .invoke_local(&double_call(1), ticket, NodeId::new(1))
            .await
            .unwrap();
        assert!(outcomes.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ordered_endpoint_runs_in_ticket_order() {
        let reg = Arc::new(registry());
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let imp = implementor_fn(move |_ctx, _method, args| {
            let n = args.get::<i64>(0)?;
            // Early tickets sleep longest, so any reordering would show.
            std::thread::sleep(Duration::from_millis((10 - n as u64) * 3));
            sink.lock().unwrap().push(n);
            Ok(Value::Unit)
        });
        reg.register(&echo_name(), &echo_shape(), imp, true).unwrap();

        let mut handles = Vec::new();
        for n in 0..10 {
            let ticket = reg.take_ticket(&echo_name()).unwrap();
            let reg = Arc::clone(&reg);
            handles.push(tokio::spawn(async move {
                reg.invoke_local(&double_call(n), ticket, NodeId::new(2))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*log.lock().unwrap(), (0..10).collect::<Vec<i64>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unordered_endpoint_runs_concurrently() {
        let reg = Arc::new(LocalEndpointRegistry::new(NodeId::new(1), 4));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
        let imp = implementor_fn(move |_ctx, _method, _args| {
            let now = r.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            r.fetch_sub(1, Ordering::SeqCst);
            Ok(Value::Unit)
        });
        reg.register(&echo_name(), &echo_shape(), imp, false).unwrap();

        let mut handles = Vec::new();
        for n in 0..4 {
            let ticket = reg.take_ticket(&echo_name()).unwrap();
            let reg = Arc::clone(&reg);
            handles.push(tokio::spawn(async move {
                reg.invoke_local(&double_call(n), ticket, NodeId::new(2)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) > 1, "calls should overlap");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_pool_bounds_concurrency() {
        let reg = Arc::new(LocalEndpointRegistry::new(NodeId::new(1), 2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
        let imp = implementor_fn(move |_ctx, _method, _args| {
            let now = r.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            r.fetch_sub(1, Ordering::SeqCst);
            Ok(Value::Unit)
        });
        reg.register(&echo_name(), &echo_shape(), imp, false).unwrap();

        let mut handles = Vec::new();
        for n in 0..8 {
            let ticket = reg.take_ticket(&echo_name()).unwrap();
            let reg = Arc::clone(&reg);
            handles.push(tokio::spawn(async move {
                reg.invoke_local(&double_call(n), ticket, NodeId::new(2)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
