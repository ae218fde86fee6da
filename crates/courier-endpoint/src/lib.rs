//! Local endpoint registry for Courier.
//!
//! Every node keeps a [`LocalEndpointRegistry`] of the objects it hosts.
//! Calls for those objects, whether they arrive over the network or come
//! from this node, take a [`Ticket`] when they arrive and then run through
//! [`LocalEndpointRegistry::invoke_local`]:
//!
//! ```text
//! call arrives ──▶ take_ticket ──▶ wait for turn ──▶ worker ──▶ outcomes
//!                  (arrival order)   (ordered only)   (bounded)   (one per implementor)
//! ```
//!
//! Implementors are plain synchronous objects implementing [`Implementor`].

mod error;
mod implementor;
mod registry;
mod sequencer;

pub use error::EndpointError;
pub use implementor::{Args, CallContext, Implementor, implementor_fn};
pub use registry::{DEFAULT_WORKER_POOL_SIZE, LocalEndpointRegistry, Outcome};
pub use sequencer::Ticket;
