//! Pub/sub client traits.
//!
//! These traits define everything a connection needs from the underlying
//! transport. Framing, handshakes and reconnection stay behind them.

use async_trait::async_trait;
use grid_protocol::Envelope;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Callback invoked by the transport for every message delivered on a
/// subscribed channel.
pub type MessageHandler = Arc<dyn Fn(Envelope) + Send + Sync>;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The transport refused the request.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The client or subscription is closed.
    #[error("Client closed")]
    Closed,

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] grid_protocol::ProtocolError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// A publish/subscribe client.
///
/// A single client is typically shared between many connections.
#[async_trait]
pub trait PubSubClient: Send + Sync {
    /// Subscribe to a channel.
    ///
    /// `on_message` is called for each envelope delivered on the channel,
    /// on whatever task or thread the client uses for delivery.
    async fn subscribe(
        &self,
        channel: &str,
        on_message: MessageHandler,
    ) -> Result<Arc<dyn Subscription>, ClientError>;

    /// Publish an envelope to a channel.
    ///
    /// Resolves to the transport's acknowledgement.
    async fn publish(&self, channel: &str, envelope: Envelope) -> Result<Value, ClientError>;
}

/// A live subscription returned by [`PubSubClient::subscribe`].
#[async_trait]
pub trait Subscription: Send + Sync {
    /// The channel this subscription is attached to.
    fn channel(&self) -> &str;

    /// The value the transport resolved the subscribe request with.
    fn response(&self) -> &Value;

    /// Whether this handle supports [`Subscription::cancel`].
    fn is_cancellable(&self) -> bool {
        true
    }

    /// Whether the transport has already torn this subscription down.
    fn is_closed(&self) -> bool {
        false
    }

    /// Cancel the subscription. No further messages are delivered once
    /// this resolves successfully.
    async fn cancel(&self) -> Result<(), ClientError>;
}
