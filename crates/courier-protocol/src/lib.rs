//! Wire protocol for Courier.
//!
//! This crate defines what nodes say to each other:
//!
//! - **Values** ([`Value`], [`ValueKind`]): self-describing arguments and
//!   results.
//! - **Calls** ([`EndpointName`], [`InterfaceShape`], [`CallDescriptor`],
//!   [`CorrelationId`]): where a call goes and what it asks for.
//! - **Failures** ([`InvocationFailure`], [`ImplementorError`]): why a call
//!   produced no value, in a form that survives the trip back.
//! - **Messages** ([`WireMessage`]): the envelope for all of the above.
//! - **Codec** ([`Codec`], [`JsonCodec`]): bytes in, bytes out.
//!
//! ```text
//! Transport (bytes) → Protocol (WireMessage) → Endpoint registry / Hub
//! ```

mod codec;
mod error;
mod failure;
mod message;
mod types;
mod value;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use failure::{ImplementorError, InvocationFailure, InvocationResult};
pub use message::WireMessage;
pub use types::{CallDescriptor, CorrelationId, EndpointName, InterfaceShape, MethodSignature};
pub use value::{Value, ValueKind};

// Node ids appear in several protocol types.
pub use courier_transport::NodeId;
