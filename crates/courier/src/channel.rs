//! Broadcast endpoints: any number of subscribers, no answers.

use std::sync::Arc;
use std::time::Duration;

use courier_endpoint::Implementor;
use courier_protocol::{EndpointName, InterfaceShape, Value};
use courier_transport::Messenger;

use crate::remote::describe;
use crate::{CourierError, UnifiedMessenger};

/// Registers subscribers and hands out broadcasters.
///
/// Every node may have several subscribers under one channel name. A
/// broadcast reaches all of them; a subscriber's failure is logged where
/// it ran and goes no further.
pub struct ChannelMessenger<M: Messenger> {
    unified: UnifiedMessenger<M>,
}

impl<M: Messenger> Clone for ChannelMessenger<M> {
    fn clone(&self) -> Self {
        Self {
            unified: self.unified.clone(),
        }
    }
}

impl<M: Messenger> ChannelMessenger<M> {
    pub fn new(unified: UnifiedMessenger<M>) -> Self {
        Self { unified }
    }

    /// Adds `subscriber` to channel `name` on this node.
    ///
    /// # Errors
    /// [`EndpointError::ShapeMismatch`](courier_endpoint::EndpointError::ShapeMismatch)
    /// if the channel already exists here with another interface.
    pub async fn register_channel_subscriber(
        &self,
        name: &str,
        shape: &InterfaceShape,
        subscriber: Arc<dyn Implementor>,
    ) -> Result<EndpointName, CourierError> {
        let endpoint = EndpointName::new(name, shape);
        self.unified
            .add_implementor(&endpoint, shape, subscriber, true)
            .await?;
        Ok(endpoint)
    }

    /// Removes one subscriber, identified by the `Arc` it was registered
    /// with.
    pub async fn unregister_channel_subscriber(
        &self,
        name: &str,
        shape: &InterfaceShape,
        subscriber: &Arc<dyn Implementor>,
    ) -> Result<(), CourierError> {
        self.unified
            .remove_implementor(&EndpointName::new(name, shape), subscriber)
            .await
    }

    /// Removes every subscriber this node has on `name`. Returns how many.
    ///
    /// # Errors
    /// [`CourierError::Transport`] if the hub could not be told that this
    /// node left the channel.
    pub async fn unregister_channel(&self, name: &str, shape: &InterfaceShape) -> Result<usize, CourierError> {
        self.unified
            .remove_all_implementors(&EndpointName::new(name, shape))
            .await
    }

    pub fn get_channel_broadcaster(&self, name: &str, shape: &InterfaceShape) -> ChannelBroadcaster<M> {
        ChannelBroadcaster {
            unified: self.unified.clone(),
            endpoint: EndpointName::new(name, shape),
            shape: shape.clone(),
        }
    }

    /// Subscribers on this node only.
    pub fn subscriber_count(&self, name: &str, shape: &InterfaceShape) -> usize {
        self.unified
            .local_implementor_count(&EndpointName::new(name, shape))
    }

    pub fn has_channel(&self, name: &str, shape: &InterfaceShape) -> bool {
        self.unified.is_aware_of(&EndpointName::new(name, shape))
    }

    pub async fn wait_for_channel(&self, name: &str, shape: &InterfaceShape, timeout: Duration) -> bool {
        self.unified
            .wait_until_aware(&EndpointName::new(name, shape), timeout)
            .await
    }
}

/// Sends calls to every subscriber of one channel.
pub struct ChannelBroadcaster<M: Messenger> {
    unified: UnifiedMessenger<M>,
    endpoint: EndpointName,
    shape: InterfaceShape,
}

impl<M: Messenger> Clone for ChannelBroadcaster<M> {
    fn clone(&self) -> Self {
        Self {
            unified: self.unified.clone(),
            endpoint: self.endpoint.clone(),
            shape: self.shape.clone(),
        }
    }
}

impl<M: Messenger> ChannelBroadcaster<M> {
    pub fn endpoint(&self) -> &EndpointName {
        &self.endpoint
    }

    /// Calls `method` on every subscriber.
    ///
    /// Returns once local subscribers have run and the call is on its way
    /// to the hub. Having no subscribers anywhere is fine.
    ///
    /// # Errors
    /// [`CourierError::Endpoint`] with `MethodNotFound` if the interface
    /// has no such method for these arguments.
    pub async fn broadcast(&self, method: &str, args: Vec<Value>) -> Result<(), CourierError> {
        let call = describe(&self.endpoint, &self.shape, method, args)?;
        self.unified.invoke_fire_and_forget(call).await
    }
}

impl<M: Messenger> std::fmt::Debug for ChannelBroadcaster<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelBroadcaster")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}
