//! The object side of an endpoint.
//!
//! Courier never inspects implementors. It hands each one the method name
//! and the arguments of a call that already matched the endpoint's
//! [`InterfaceShape`](courier_protocol::InterfaceShape), plus a
//! [`CallContext`] saying who is calling.
//!
//! Implementors run on a blocking worker thread, so they may do slow,
//! synchronous work without stalling the node's receipt loop.

use std::sync::Arc;

use courier_protocol::{EndpointName, ImplementorError, NodeId, Value};

/// Who is calling, passed to every invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    /// The node that made the call. For a remote call this is the original
    /// caller, not the hub that forwarded it.
    pub sender: NodeId,

    /// The node the implementor runs on.
    pub local_node: NodeId,

    /// The endpoint the call was made on.
    pub endpoint: EndpointName,
}

impl CallContext {
    /// Returns `true` if the call came from this node.
    pub fn is_local(&self) -> bool {
        self.sender == self.local_node
    }
}

/// The arguments of one call, with typed accessors.
///
/// Accessor errors are [`ImplementorError`]s with code `bad_argument`, so
/// an implementor can simply `?` them.
#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    values: &'a [Value],
}

impl<'a> Args<'a> {
    pub fn new(values: &'a [Value]) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &'a [Value] {
        self.values
    }

    /// The raw value at `index`.
    pub fn value(&self, index: usize) -> Result<&'a Value, ImplementorError> {
        self.values.get(index).ok_or_else(|| {
            ImplementorError::new(
                "bad_argument",
                format!("missing argument {index} (got {})", self.values.len()),
            )
        })
    }

    /// The value at `index`, converted to `T`.
    pub fn get<T>(&self, index: usize) -> Result<T, ImplementorError>
    where
        T: TryFrom<Value>,
        T::Error: std::fmt::Display,
    {
        let value = self.value(index)?.clone();
        T::try_from(value).map_err(|e| {
            ImplementorError::new("bad_argument", format!("argument {index}: {e}"))
        })
    }
}

/// An object that serves calls on an endpoint.
///
/// Any `Fn(&CallContext, &str, Args<'_>) -> Result<Value, ImplementorError>`
/// is an implementor too; [`implementor_fn`] boxes one up:
///
/// ```
/// use courier_endpoint::implementor_fn;
/// use courier_protocol::{ImplementorError, Value};
///
/// let echo = implementor_fn(|_ctx, method, args| match method {
///     "double" => Ok(Value::Int(args.get::<i64>(0)? * 2)),
///     other => Err(ImplementorError::new("unsupported", other)),
/// });
/// # let _ = echo;
/// ```
pub trait Implementor: Send + Sync + 'static {
    /// Runs `method` with `args`.
    ///
    /// Returning `Err` (or panicking) fails only this implementor's part
    /// of the call; other implementors of the same endpoint still run.
    fn invoke(
        &self,
        ctx: &CallContext,
        method: &str,
        args: Args<'_>,
    ) -> Result<Value, ImplementorError>;
}

impl<F> Implementor for F
where
    F: Fn(&CallContext, &str, Args<'_>) -> Result<Value, ImplementorError> + Send + Sync + 'static,
{
    fn invoke(
        &self,
        ctx: &CallContext,
        method: &str,
        args: Args<'_>,
    ) -> Result<Value, ImplementorError> {
        self(ctx, method, args)
    }
}

/// Wraps a closure as a shareable implementor.
pub fn implementor_fn<F>(f: F) -> Arc<dyn Implementor>
where
    F: Fn(&CallContext, &str, Args<'_>) -> Result<Value, ImplementorError> + Send + Sync + 'static,
{
    Arc::new(f)
}
