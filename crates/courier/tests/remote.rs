//! Remotes across a hub and its spokes.

mod common;

use std::collections::BTreeSet;
use std::time::Duration;

use common::*;
use courier::prelude::*;

struct EchoClient(RemoteProxy<MemoryMessenger>);

impl EchoClient {
    fn new(node: &Node) -> Self {
        Self(node.remote().get_remote("echo", &echo_shape()))
    }

    async fn double(&self, x: i64) -> Result<i64, CourierError> {
        self.0.call_as("double", vec![x.into()]).await
    }

    async fn whoami(&self) -> Result<i64, CourierError> {
        self.0.call_as("whoami", vec![]).await
    }
}

// =========================================================================
// Basic calls
// =========================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_call_remote_on_hub_from_spoke() {
    let network = MemoryNetwork::new();
    let hub = start_hub(&network).await;
    hub.remote()
        .register_remote("echo", &echo_shape(), echo())
        .await
        .unwrap();

    let client = start_spoke(&network).await;
    assert_eq!(EchoClient::new(&client).double(21).await.unwrap(), 42);

    assert!(hub.remote().unregister_remote("echo", &echo_shape()).await.unwrap());
    let err = EchoClient::new(&client).double(21).await.unwrap_err();
    assert!(err.is_remote_not_found(), "got {err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_call_remote_between_spokes() {
    let network = MemoryNetwork::new();
    let _hub = start_hub(&network).await;
    let server = start_spoke(&network).await;
    let client = start_spoke(&network).await;

    server
        .remote()
        .register_remote("echo", &echo_shape(), echo())
        .await
        .unwrap();
    assert!(
        client
            .remote()
            .wait_for_remote("echo", &echo_shape(), Duration::from_secs(2))
            .await
    );

    assert_eq!(EchoClient::new(&client).double(-4).await.unwrap(), -8);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_call_remote_on_spoke_from_hub() {
    let network = MemoryNetwork::new();
    let hub = start_hub(&network).await;
    let server = start_spoke(&network).await;
    server
        .remote()
        .register_remote("echo", &echo_shape(), echo())
        .await
        .unwrap();
    eventually("hub to see echo", || {
        hub.remote().has_remote("echo", &echo_shape())
    })
    .await;

    assert_eq!(EchoClient::new(&hub).double(5).await.unwrap(), 10);
    assert_eq!(hub.unified().hub_pending_invocations(), Some(0));
    assert_eq!(hub.unified().pending_calls(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_call_local_remote_skips_hub() {
    let network = MemoryNetwork::new();
    let _hub = start_hub(&network).await;
    let node = start_spoke(&network).await;
    node.remote()
        .register_remote("echo", &echo_shape(), echo())
        .await
        .unwrap();

    let client = EchoClient::new(&node);
    assert_eq!(client.double(3).await.unwrap(), 6);
    assert_eq!(client.whoami().await.unwrap(), node.local_node().into_inner() as i64);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_call_unknown_remote_is_remote_not_found() {
    let network = MemoryNetwork::new();
    let _hub = start_hub(&network).await;
    let client = start_spoke(&network).await;

    let err = EchoClient::new(&client).double(1).await.unwrap_err();
    match err {
        CourierError::Invocation(InvocationFailure::RemoteNotFound { endpoint }) => {
            assert_eq!(endpoint.name(), "echo");
        }
        other => panic!("expected RemoteNotFound, got {other:?}"),
    }
    assert_eq!(client.unified().pending_calls(), 0);
}

// =========================================================================
// Caller context
// =========================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_implementor_sees_original_caller() {
    let network = MemoryNetwork::new();
    let hub = start_hub(&network).await;
    let server = start_spoke(&network).await;
    let client = start_spoke(&network).await;
    server
        .remote()
        .register_remote("echo", &echo_shape(), echo())
        .await
        .unwrap();
    client
        .remote()
        .wait_for_remote("echo", &echo_shape(), Duration::from_secs(2))
        .await;

    let sender = EchoClient::new(&client).whoami().await.unwrap();
    assert_eq!(sender, client.local_node().into_inner() as i64);

    let sender = EchoClient::new(&hub).whoami().await.unwrap();
    assert_eq!(sender, NodeId::HUB.into_inner() as i64);
}

// =========================================================================
// Failures
// =========================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_implementor_error_reaches_caller_unchanged() {
    let network = MemoryNetwork::new();
    let hub = start_hub(&network).await;
    hub.remote()
        .register_remote("echo", &echo_shape(), echo())
        .await
        .unwrap();
    let client = start_spoke(&network).await;

    let err = client
        .remote()
        .get_remote("echo", &echo_shape())
        .call("fail", vec![Value::from("overdrawn")])
        .await
        .unwrap_err();
    let raised = err.implementor_error().expect("implementor error");
    assert_eq!(raised.code, "overdrawn");
    assert_eq!(raised.message, "asked to fail");
    assert_eq!(raised.detail, Some(Value::Int(7)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_panicking_implementor_is_reported_and_node_survives() {
    let network = MemoryNetwork::new();
    let hub = start_hub(&network).await;
    hub.remote()
        .register_remote("echo", &echo_shape(), echo())
        .await
        .unwrap();
    let client = start_spoke(&network).await;
    let proxy = client.remote().get_remote("echo", &echo_shape());

    let err = proxy.call("explode", vec![]).await.unwrap_err();
    assert_eq!(err.implementor_error().map(|e| e.code.as_str()), Some("panic"));

    // Same endpoint, next call: still served.
    assert_eq!(EchoClient::new(&client).double(2).await.unwrap(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_method_fails_before_sending() {
    let network = MemoryNetwork::new();
    let hub = start_hub(&network).await;
    let client = start_spoke(&network).await;

    let proxy = client.remote().get_remote("echo", &echo_shape());
    let err = proxy.call("triple", vec![Value::Int(1)]).await.unwrap_err();
    assert!(matches!(
        err,
        CourierError::Endpoint(EndpointError::MethodNotFound { .. })
    ));

    let err = proxy.call("double", vec![Value::from("1")]).await.unwrap_err();
    assert!(matches!(
        err,
        CourierError::Endpoint(EndpointError::MethodNotFound { .. })
    ));
    assert_eq!(hub.unified().hub_pending_invocations(), Some(0));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_second_remote_on_same_node_is_rejected() {
    let network = MemoryNetwork::new();
    let hub = start_hub(&network).await;
    hub.remote()
        .register_remote("echo", &echo_shape(), echo())
        .await
        .unwrap();

    let err = hub
        .remote()
        .register_remote("echo", &echo_shape(), echo())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CourierError::Endpoint(EndpointError::AlreadyImplemented(_))
    ));
    assert_eq!(
        hub.unified()
            .local_implementor_count(&EndpointName::new("echo", &echo_shape())),
        1
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_on_two_nodes_is_internal_failure() {
    let network = MemoryNetwork::new();
    let hub = start_hub(&network).await;
    let a = start_spoke(&network).await;
    let b = start_spoke(&network).await;
    let client = start_spoke(&network).await;
    let endpoint = EndpointName::new("echo", &echo_shape());

    for node in [&a, &b] {
        node.remote()
            .register_remote("echo", &echo_shape(), echo())
            .await
            .unwrap();
    }
    eventually("both implementors at the hub", || {
        hub.unified().implementing_nodes(&endpoint).map(|n| n.len()) == Some(2)
    })
    .await;

    let err = EchoClient::new(&client).double(1).await.unwrap_err();
    assert!(
        matches!(err, CourierError::Invocation(InvocationFailure::Internal { .. })),
        "got {err:?}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_non_finite_floats_cross_nodes_both_ways() {
    let network = MemoryNetwork::new();
    let hub = start_hub(&network).await;
    let shape = InterfaceShape::new("Inverse").method("inv", [ValueKind::Float]);
    hub.remote()
        .register_remote(
            "inverse",
            &shape,
            implementor_fn(|_ctx, _method, args| Ok(Value::Float(1.0 / args.get::<f64>(0)?))),
        )
        .await
        .unwrap();
    let client = start_spoke(&network).await;
    let proxy = client.remote().get_remote("inverse", &shape);

    let call = |x: f64| {
        let proxy = proxy.clone();
        async move {
            tokio::time::timeout(Duration::from_secs(2), proxy.call_as::<f64>("inv", vec![x.into()]))
                .await
                .expect("call should not hang")
                .unwrap()
        }
    };

    // Non-finite results.
    assert_eq!(call(0.0).await, f64::INFINITY);
    assert_eq!(call(-0.0).await, f64::NEG_INFINITY);
    // Non-finite arguments.
    assert_eq!(call(f64::INFINITY).await, 0.0);
    assert!(call(f64::NAN).await.is_nan());
    assert_eq!(client.unified().pending_calls(), 0);
}

// =========================================================================
// Ordering
// =========================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_calls_from_one_node_run_in_order() {
    let network = MemoryNetwork::new();
    let _hub = start_hub(&network).await;
    let server = start_spoke(&network).await;
    let client = start_spoke(&network).await;

    let (log, recorder) = recorder();
    server
        .remote()
        .register_remote("recorder", &recorder_shape(), recorder)
        .await
        .unwrap();
    client
        .remote()
        .wait_for_remote("recorder", &recorder_shape(), Duration::from_secs(2))
        .await;

    // Concurrent callers on one node: each call takes its place when its
    // message reaches the server, so the log must be a permutation...
    let proxy = client.remote().get_remote("recorder", &recorder_shape());
    let calls: Vec<_> = (0..20)
        .map(|n| {
            let proxy = proxy.clone();
            tokio::spawn(async move { proxy.call("record", vec![Value::Int(n)]).await })
        })
        .collect();
    for call in calls {
        call.await.unwrap().unwrap();
    }
    let mut seen = log.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, (0..20).collect::<Vec<_>>());

    // ...and one caller awaiting each call sees strict order.
    log.lock().unwrap().clear();
    for n in 0..20 {
        proxy.call("record", vec![Value::Int(n)]).await.unwrap();
    }
    assert_eq!(*log.lock().unwrap(), (0..20).collect::<Vec<_>>());
}

// =========================================================================
// Discovery
// =========================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_spoke_knows_existing_remotes_on_start() {
    let network = MemoryNetwork::new();
    let hub = start_hub(&network).await;
    hub.remote()
        .register_remote("echo", &echo_shape(), echo())
        .await
        .unwrap();

    let client = start_spoke(&network).await;
    assert!(client.remote().has_remote("echo", &echo_shape()));
    assert_eq!(
        client.unified().known_endpoints(),
        vec![EndpointName::new("echo", &echo_shape())]
    );

    hub.remote().unregister_remote("echo", &echo_shape()).await.unwrap();
    eventually("withdrawal to reach the spoke", || {
        !client.remote().has_remote("echo", &echo_shape())
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_spokes_joining_during_registrations_see_every_endpoint() {
    let network = MemoryNetwork::new();
    let hub = start_hub(&network).await;

    let registering = hub.clone();
    let registrations = tokio::spawn(async move {
        for n in 0..40 {
            let (_count, subscriber) = counter();
            registering
                .channel()
                .register_channel_subscriber(&format!("feed-{n}"), &ticker_shape(), subscriber)
                .await
                .unwrap();
            tokio::task::yield_now().await;
        }
    });
    let mut spokes = Vec::new();
    for _ in 0..5 {
        spokes.push(start_spoke(&network).await);
    }
    registrations.await.unwrap();

    let expected: BTreeSet<_> = hub.unified().known_endpoints().into_iter().collect();
    assert_eq!(expected.len(), 40);
    for spoke in &spokes {
        eventually("spoke to know every feed", || {
            spoke.unified().known_endpoints().into_iter().collect::<BTreeSet<_>>() == expected
        })
        .await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wait_for_remote_sees_late_registration() {
    let network = MemoryNetwork::new();
    let _hub = start_hub(&network).await;
    let server = start_spoke(&network).await;
    let client = start_spoke(&network).await;

    let late = server.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        late.remote()
            .register_remote("echo", &echo_shape(), echo())
            .await
            .unwrap();
    });

    assert!(
        client
            .remote()
            .wait_for_remote("echo", &echo_shape(), Duration::from_secs(2))
            .await
    );
    assert_eq!(EchoClient::new(&client).double(50).await.unwrap(), 100);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wait_for_remote_times_out() {
    let network = MemoryNetwork::new();
    let _hub = start_hub(&network).await;
    let client = start_spoke(&network).await;

    let started = std::time::Instant::now();
    let found = client
        .remote()
        .wait_for_remote("nobody", &echo_shape(), Duration::from_millis(80))
        .await;
    assert!(!found);
    assert!(started.elapsed() >= Duration::from_millis(80));
}
