//! `Messengers` builder and facade.
//!
//! This is the entry point for joining a node to a courier network. It
//! ties the layers together: transport → protocol → endpoint registry →
//! hub, behind one [`UnifiedMessenger`] and the two registrars built on it.

use std::time::Duration;

use courier_transport::{EventReceiver, Messenger, NodeId};

use crate::{ChannelMessenger, CourierError, MessengerConfig, RemoteMessenger, UnifiedMessenger};

/// Builder for configuring and starting a node.
///
/// # Example
///
/// ```rust,no_run
/// use courier::prelude::*;
///
/// # async fn run() -> Result<(), CourierError> {
/// let network = MemoryNetwork::new();
/// let (messenger, events) = network.join_hub()?;
/// let node = MessengersBuilder::new()
///     .worker_pool_size(4)
///     .start(messenger, events)
///     .await?;
/// # let _ = node;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessengersBuilder {
    config: MessengerConfig,
}

impl MessengersBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: MessengerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn worker_pool_size(mut self, size: usize) -> Self {
        self.config.worker_pool_size = size;
        self
    }

    pub fn wait_poll_interval(mut self, interval: Duration) -> Self {
        self.config.wait_poll_interval = interval;
        self
    }

    pub fn directory_sync_timeout(mut self, timeout: Duration) -> Self {
        self.config.directory_sync_timeout = timeout;
        self
    }

    /// Starts the node on `messenger`, reading its `events`.
    ///
    /// A spoke asks the hub for its directory before this returns, so
    /// endpoints registered elsewhere are already known.
    ///
    /// # Errors
    /// Returns a transport error if a spoke cannot reach the hub.
    pub async fn start<M: Messenger>(
        self,
        messenger: M,
        events: EventReceiver,
    ) -> Result<Messengers<M>, CourierError> {
        let unified = UnifiedMessenger::start(messenger, events, self.config).await?;
        Ok(Messengers::new(unified))
    }
}

/// A running node: the unified messenger plus the remote and channel
/// registrars.
pub struct Messengers<M: Messenger> {
    unified: UnifiedMessenger<M>,
    remote: RemoteMessenger<M>,
    channel: ChannelMessenger<M>,
}

impl<M: Messenger> Clone for Messengers<M> {
    fn clone(&self) -> Self {
        Self::new(self.unified.clone())
    }
}

impl<M: Messenger> Messengers<M> {
    fn new(unified: UnifiedMessenger<M>) -> Self {
        Self {
            remote: RemoteMessenger::new(unified.clone()),
            channel: ChannelMessenger::new(unified.clone()),
            unified,
        }
    }

    pub fn local_node(&self) -> NodeId {
        self.unified.local_node()
    }

    pub fn unified(&self) -> &UnifiedMessenger<M> {
        &self.unified
    }

    pub fn remote(&self) -> &RemoteMessenger<M> {
        &self.remote
    }

    pub fn channel(&self) -> &ChannelMessenger<M> {
        &self.channel
    }
}

impl<M: Messenger> std::fmt::Debug for Messengers<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Messengers")
            .field("unified", &self.unified)
            .finish_non_exhaustive()
    }
}
