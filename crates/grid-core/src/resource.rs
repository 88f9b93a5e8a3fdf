//! Resource modules that hand out connections.
//!
//! [`Grid`] holds the pub/sub client shared by every connection it creates.

use crate::connection::{Connection, ConnectionError};
use crate::descriptor::ChannelDescriptor;
use grid_transport::PubSubClient;
use std::fmt;
use std::sync::Arc;

/// Entry point for opening channel connections.
#[derive(Clone)]
pub struct Grid {
    client: Arc<dyn PubSubClient>,
}

impl Grid {
    /// Create a grid over a shared client.
    #[must_use]
    pub fn new(client: Arc<dyn PubSubClient>) -> Self {
        Self { client }
    }

    /// The shared client.
    #[must_use]
    pub fn client(&self) -> &Arc<dyn PubSubClient> {
        &self.client
    }

    /// The device resource module.
    #[must_use]
    pub fn devices(&self) -> Devices {
        Devices {
            client: Arc::clone(&self.client),
        }
    }

    /// Connect to any `endpoint/identifier` channel.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidArgument`] if either part is empty.
    pub fn connect(
        &self,
        endpoint: &str,
        identifier: impl fmt::Display,
    ) -> Result<Connection, ConnectionError> {
        Connection::new(
            ChannelDescriptor::new(endpoint, identifier),
            Arc::clone(&self.client),
        )
    }
}

/// Connections to individual devices.
pub struct Devices {
    client: Arc<dyn PubSubClient>,
}

impl Devices {
    /// Endpoint for device channels.
    pub const ENDPOINT: &'static str = "/devices";

    /// Connect to a device's channel.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidArgument`] if the identifier is empty.
    pub fn connect(&self, device_id: impl fmt::Display) -> Result<Connection, ConnectionError> {
        Connection::new(
            ChannelDescriptor::new(Self::ENDPOINT, device_id),
            Arc::clone(&self.client),
        )
    }
}
