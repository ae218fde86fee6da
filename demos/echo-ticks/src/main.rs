use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use courier::prelude::*;

// ---------------------------------------------------------------------------
// Interfaces
// ---------------------------------------------------------------------------

fn echo_shape() -> InterfaceShape {
    InterfaceShape::new("Echo").method("double", [ValueKind::Int])
}

fn ticker_shape() -> InterfaceShape {
    InterfaceShape::new("Ticker").method("tick", [])
}

struct EchoClient<M: Messenger>(RemoteProxy<M>);

impl<M: Messenger> EchoClient<M> {
    async fn double(&self, x: i64) -> Result<i64, CourierError> {
        self.0.call_as("double", vec![x.into()]).await
    }
}

fn echo() -> Arc<dyn Implementor> {
    implementor_fn(|ctx, method, args| match method {
        "double" => {
            let x = args.get::<i64>(0)?;
            tracing::info!(caller = %ctx.sender, x, "doubling");
            Ok(Value::Int(x * 2))
        }
        other => Err(ImplementorError::new("unsupported", other)),
    })
}

fn ticker(name: &'static str, count: Arc<AtomicUsize>) -> Arc<dyn Implementor> {
    implementor_fn(move |_ctx, _method, _args| {
        let n = count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(subscriber = name, ticks = n, "tick");
        Ok(Value::Unit)
    })
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
struct Report {
    doubled: i64,
    not_found_after_unregister: bool,
    ticks: (usize, usize),
}

/// Echo on the hub called from the spoke, then two tick subscribers on the
/// spoke fed from the hub.
async fn scenario<H: Messenger, S: Messenger>(
    hub: &Messengers<H>,
    spoke: &Messengers<S>,
) -> Result<Report, CourierError> {
    hub.remote()
        .register_remote("echo", &echo_shape(), echo())
        .await?;
    spoke
        .remote()
        .wait_for_remote("echo", &echo_shape(), Duration::from_secs(2))
        .await;

    let client = EchoClient(spoke.remote().get_remote("echo", &echo_shape()));
    let doubled = client.double(21).await?;
    tracing::info!(doubled, "echo answered");

    hub.remote().unregister_remote("echo", &echo_shape()).await?;
    let not_found_after_unregister = match client.double(21).await {
        Err(e) if e.is_remote_not_found() => true,
        Err(e) => return Err(e),
        Ok(_) => false,
    };

    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let first_sub = ticker("first", Arc::clone(&first));
    let channel = spoke.channel();
    channel
        .register_channel_subscriber("ticks", &ticker_shape(), Arc::clone(&first_sub))
        .await?;
    channel
        .register_channel_subscriber("ticks", &ticker_shape(), ticker("second", Arc::clone(&second)))
        .await?;
    hub.channel()
        .wait_for_channel("ticks", &ticker_shape(), Duration::from_secs(2))
        .await;

    let ticks = hub.channel().get_channel_broadcaster("ticks", &ticker_shape());
    ticks.broadcast("tick", vec![]).await?;
    settle(|| second.load(Ordering::SeqCst) == 1).await;

    channel
        .unregister_channel_subscriber("ticks", &ticker_shape(), &first_sub)
        .await?;
    ticks.broadcast("tick", vec![]).await?;
    settle(|| second.load(Ordering::SeqCst) == 2).await;

    Ok(Report {
        doubled,
        not_found_after_unregister,
        ticks: (first.load(Ordering::SeqCst), second.load(Ordering::SeqCst)),
    })
}

/// Broadcasts are not awaited; give them a moment to land.
async fn settle(done: impl Fn() -> bool) {
    for _ in 0..100 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let bind = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1:0".to_string());
    let (messenger, events) = WebSocketHub::bind(&bind).await?;
    let url = format!("ws://{}", messenger.local_addr());
    tracing::info!(%url, "hub listening");
    let hub = MessengersBuilder::new().start(messenger, events).await?;

    let (messenger, events) = WebSocketSpoke::connect(&url).await?;
    let spoke = MessengersBuilder::new().start(messenger, events).await?;

    let report = scenario(&hub, &spoke).await?;
    tracing::info!(?report, "done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scenario_over_memory_network() {
        let network = MemoryNetwork::new();
        let (messenger, events) = network.join_hub().unwrap();
        let hub = MessengersBuilder::new().start(messenger, events).await.unwrap();
        let (messenger, events) = network.join_spoke().unwrap();
        let spoke = MessengersBuilder::new().start(messenger, events).await.unwrap();

        let report = scenario(&hub, &spoke).await.unwrap();
        assert_eq!(
            report,
            Report {
                doubled: 42,
                not_found_after_unregister: true,
                ticks: (1, 2),
            }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scenario_over_websocket() {
        let (messenger, events) = WebSocketHub::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", messenger.local_addr());
        let hub = MessengersBuilder::new().start(messenger, events).await.unwrap();
        let (messenger, events) = WebSocketSpoke::connect(&url).await.unwrap();
        let spoke = MessengersBuilder::new().start(messenger, events).await.unwrap();

        let report = scenario(&hub, &spoke).await.unwrap();
        assert_eq!(report.doubled, 42);
        assert!(report.not_found_after_unregister);
        assert_eq!(report.ticks, (1, 2));
    }
}
