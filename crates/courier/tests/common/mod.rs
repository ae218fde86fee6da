//! Shared fixtures for the multi-node tests.
//!
//! Every node runs on one in-process `MemoryNetwork`: node 0 is the hub,
//! spokes get 1, 2, ... in the order they join.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use courier::prelude::*;

pub type Node = Messengers<MemoryMessenger>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn start_hub(network: &MemoryNetwork) -> Node {
    init_tracing();
    let (messenger, events) = network.join_hub().expect("hub should join");
    MessengersBuilder::new()
        .start(messenger, events)
        .await
        .expect("hub should start")
}

pub async fn start_spoke(network: &MemoryNetwork) -> Node {
    let (messenger, events) = network.join_spoke().expect("spoke should join");
    MessengersBuilder::new()
        .wait_poll_interval(Duration::from_millis(10))
        .start(messenger, events)
        .await
        .expect("spoke should start")
}

/// Polls `check` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// =========================================================================
// Interfaces
// =========================================================================

pub fn echo_shape() -> InterfaceShape {
    InterfaceShape::new("Echo")
        .method("double", [ValueKind::Int])
        .method("whoami", [])
        .method("fail", [ValueKind::Str])
        .method("explode", [])
}

pub fn ticker_shape() -> InterfaceShape {
    InterfaceShape::new("Ticker").method("tick", [])
}

pub fn recorder_shape() -> InterfaceShape {
    InterfaceShape::new("Recorder").method("record", [ValueKind::Int])
}

// =========================================================================
// Implementors
// =========================================================================

/// `double(x)` is `2x`, `whoami()` is the caller's node id, `fail(code)`
/// raises an error with that code, `explode()` panics.
pub fn echo() -> Arc<dyn Implementor> {
    implementor_fn(|ctx, method, args| match method {
        "double" => Ok(Value::Int(args.get::<i64>(0)? * 2)),
        "whoami" => Ok(Value::Int(ctx.sender.into_inner() as i64)),
        "fail" => Err(
            ImplementorError::new(args.get::<String>(0)?, "asked to fail").with_detail(7),
        ),
        "explode" => panic!("echo exploded"),
        other => Err(ImplementorError::new("unsupported", other)),
    })
}

/// Counts `tick()` calls.
pub fn counter() -> (Arc<AtomicUsize>, Arc<dyn Implementor>) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    let implementor = implementor_fn(move |_ctx, _method, _args| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Unit)
    });
    (count, implementor)
}

/// Appends every `record(n)` argument, in the order calls run.
pub fn recorder() -> (Arc<Mutex<Vec<i64>>>, Arc<dyn Implementor>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let implementor = implementor_fn(move |_ctx, _method, args| {
        let n = args.get::<i64>(0)?;
        // Widen the window for overtaking.
        std::thread::sleep(Duration::from_millis((n % 3) as u64));
        sink.lock().unwrap().push(n);
        Ok(Value::Unit)
    });
    (log, implementor)
}

pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}
