//! Single-target endpoints: one implementor, one answer.

use std::sync::Arc;
use std::time::Duration;

use courier_endpoint::{EndpointError, Implementor};
use courier_protocol::{CallDescriptor, EndpointName, InterfaceShape, ProtocolError, Value};
use courier_transport::Messenger;

use crate::{CourierError, UnifiedMessenger};

/// Builds a call, refusing methods the interface does not have.
pub(crate) fn describe(
    endpoint: &EndpointName,
    shape: &InterfaceShape,
    method: &str,
    args: Vec<Value>,
) -> Result<CallDescriptor, EndpointError> {
    let call = CallDescriptor::new(endpoint.clone(), method, args);
    if shape.resolve(call.method(), call.args()).is_none() {
        return Err(EndpointError::MethodNotFound {
            endpoint: endpoint.clone(),
            method: method.to_owned(),
            signature: call.signature(),
        });
    }
    Ok(call)
}

/// Registers, finds and calls remotes.
///
/// A remote has exactly one implementor in the whole network. Calls on a
/// remote run one at a time, in the order each caller made them.
pub struct RemoteMessenger<M: Messenger> {
    unified: UnifiedMessenger<M>,
}

impl<M: Messenger> Clone for RemoteMessenger<M> {
    fn clone(&self) -> Self {
        Self {
            unified: self.unified.clone(),
        }
    }
}

impl<M: Messenger> RemoteMessenger<M> {
    pub fn new(unified: UnifiedMessenger<M>) -> Self {
        Self { unified }
    }

    /// Serves `name` from this node with `implementor`.
    ///
    /// # Errors
    /// - [`EndpointError::AlreadyImplemented`] if this node already serves it.
    /// - [`EndpointError::ShapeMismatch`] if `shape` does not match the
    ///   endpoint's interface.
    /// - [`CourierError::Transport`] if the hub could not be told. Nothing
    ///   is registered then.
    pub async fn register_remote(
        &self,
        name: &str,
        shape: &InterfaceShape,
        implementor: Arc<dyn Implementor>,
    ) -> Result<EndpointName, CourierError> {
        let endpoint = EndpointName::new(name, shape);
        self.unified
            .add_sole_implementor(&endpoint, shape, implementor, true)
            .await?;
        Ok(endpoint)
    }

    /// Stops serving `name` from this node. Returns `false` if it was not
    /// served here.
    ///
    /// # Errors
    /// [`CourierError::Transport`] if the hub could not be told. The
    /// implementor is removed locally regardless.
    pub async fn unregister_remote(&self, name: &str, shape: &InterfaceShape) -> Result<bool, CourierError> {
        let endpoint = EndpointName::new(name, shape);
        Ok(self.unified.remove_all_implementors(&endpoint).await? > 0)
    }

    /// A proxy for `name`. Nothing is checked until the first call.
    pub fn get_remote(&self, name: &str, shape: &InterfaceShape) -> RemoteProxy<M> {
        RemoteProxy {
            unified: self.unified.clone(),
            endpoint: EndpointName::new(name, shape),
            shape: shape.clone(),
        }
    }

    /// Returns `true` if `name` is served here or known to be served
    /// elsewhere.
    pub fn has_remote(&self, name: &str, shape: &InterfaceShape) -> bool {
        self.unified.is_aware_of(&EndpointName::new(name, shape))
    }

    /// Waits up to `timeout` for `name` to become known. Returns whether
    /// it did.
    pub async fn wait_for_remote(&self, name: &str, shape: &InterfaceShape, timeout: Duration) -> bool {
        self.unified
            .wait_until_aware(&EndpointName::new(name, shape), timeout)
            .await
    }
}

/// A handle for calling one remote by method name.
///
/// Wrap it in a type with one async method per interface method to get
/// ordinary method-call syntax:
///
/// ```rust,ignore
/// struct EchoClient(RemoteProxy<MemoryMessenger>);
///
/// impl EchoClient {
///     async fn double(&self, x: i64) -> Result<i64, CourierError> {
///         self.0.call_as("double", vec![x.into()]).await
///     }
/// }
/// ```
pub struct RemoteProxy<M: Messenger> {
    unified: UnifiedMessenger<M>,
    endpoint: EndpointName,
    shape: InterfaceShape,
}

impl<M: Messenger> Clone for RemoteProxy<M> {
    fn clone(&self) -> Self {
        Self {
            unified: self.unified.clone(),
            endpoint: self.endpoint.clone(),
            shape: self.shape.clone(),
        }
    }
}

impl<M: Messenger> RemoteProxy<M> {
    pub fn endpoint(&self) -> &EndpointName {
        &self.endpoint
    }

    pub fn shape(&self) -> &InterfaceShape {
        &self.shape
    }

    /// Calls `method` and waits for its value.
    ///
    /// # Errors
    /// - [`CourierError::Endpoint`] with `MethodNotFound` if the interface
    ///   has no such method for these arguments. Nothing is sent.
    /// - [`CourierError::Invocation`] if the call ran but produced no
    ///   value; an implementor's own error comes back unchanged.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, CourierError> {
        let call = describe(&self.endpoint, &self.shape, method, args)?;
        self.unified.invoke_waiting(call).await
    }

    /// Like [`call`](Self::call), converting the value to `T`.
    pub async fn call_as<T>(&self, method: &str, args: Vec<Value>) -> Result<T, CourierError>
    where
        T: TryFrom<Value, Error = ProtocolError>,
    {
        let value = self.call(method, args).await?;
        Ok(T::try_from(value)?)
    }
}

impl<M: Messenger> std::fmt::Debug for RemoteProxy<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProxy")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}
