//! # Courier
//!
//! Hub-and-spoke remote invocation.
//!
//! A courier network has one hub node and any number of spokes. Any node
//! can expose objects under a name and any node can call them:
//!
//! - a **remote** has exactly one implementor in the network; calling it
//!   waits for the answer or the implementor's error.
//! - a **channel** has any number of subscribers on any nodes; a
//!   broadcast runs on all of them and nobody waits.
//!
//! Calls from one node to one endpoint run in the order they were made.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use courier::prelude::*;
//!
//! # async fn run() -> Result<(), CourierError> {
//! let echo = InterfaceShape::new("Echo").method("double", [ValueKind::Int]);
//!
//! let network = MemoryNetwork::new();
//! let (messenger, events) = network.join_hub()?;
//! let hub = MessengersBuilder::new().start(messenger, events).await?;
//! hub.remote()
//!     .register_remote("echo", &echo, implementor_fn(|_ctx, _method, args| {
//!         Ok(Value::Int(args.get::<i64>(0)? * 2))
//!     }))
//!     .await?;
//!
//! let (messenger, events) = network.join_spoke()?;
//! let spoke = MessengersBuilder::new().start(messenger, events).await?;
//! let doubled: i64 = spoke
//!     .remote()
//!     .get_remote("echo", &echo)
//!     .call_as("double", vec![Value::Int(21)])
//!     .await?;
//! assert_eq!(doubled, 42);
//! # Ok(())
//! # }
//! ```

mod channel;
mod config;
mod error;
mod handler;
mod messengers;
mod remote;
mod unified;

pub use channel::{ChannelBroadcaster, ChannelMessenger};
pub use config::MessengerConfig;
pub use error::CourierError;
pub use messengers::{Messengers, MessengersBuilder};
pub use remote::{RemoteMessenger, RemoteProxy};
pub use unified::UnifiedMessenger;

pub use courier_endpoint as endpoint;
pub use courier_hub as hub;
pub use courier_protocol as protocol;
pub use courier_transport as transport;

/// Everything needed to run a node and serve or call endpoints.
pub mod prelude {
    pub use crate::{
        ChannelBroadcaster, ChannelMessenger, CourierError, MessengerConfig, Messengers,
        MessengersBuilder, RemoteMessenger, RemoteProxy, UnifiedMessenger,
    };
    pub use courier_endpoint::{Args, CallContext, EndpointError, Implementor, implementor_fn};
    pub use courier_protocol::{
        EndpointName, ImplementorError, InterfaceShape, InvocationFailure, Value, ValueKind,
    };
    #[cfg(feature = "websocket")]
    pub use courier_transport::{WebSocketHub, WebSocketSpoke};
    pub use courier_transport::{MemoryMessenger, MemoryNetwork, Messenger, NodeId};
}
