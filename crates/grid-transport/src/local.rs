//! In-process pub/sub hub.
//!
//! `LocalHub` implements [`PubSubClient`] without any network. Each channel is
//! a `tokio::sync::broadcast` sender carrying codec-encoded envelopes; every
//! subscription owns a forwarding task that decodes and hands them to the
//! subscriber's handler.

use crate::traits::{ClientError, MessageHandler, PubSubClient, Subscription};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use grid_protocol::{codec, Envelope};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Metric names.
pub mod names {
    pub const MESSAGES_TOTAL: &str = "grid_messages_total";
    pub const SUBSCRIPTIONS_TOTAL: &str = "grid_subscriptions_total";
    pub const CHANNELS_ACTIVE: &str = "grid_channels_active";
    pub const ERRORS_TOTAL: &str = "grid_errors_total";
}

/// Hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Per-channel broadcast capacity.
    pub channel_capacity: usize,
    /// Maximum number of live channels.
    pub max_channels: usize,
    /// Whether to drop channels once their last subscriber leaves.
    pub auto_delete_empty_channels: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            max_channels: 10_000,
            auto_delete_empty_channels: true,
        }
    }
}

struct ChannelEntry {
    sender: broadcast::Sender<Bytes>,
    subscribers: usize,
}

impl ChannelEntry {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            subscribers: 0,
        }
    }
}

struct HubInner {
    channels: DashMap<String, ChannelEntry>,
    config: HubConfig,
}

impl HubInner {
    fn release(&self, channel: &str) {
        let remaining = match self.channels.get_mut(channel) {
            Some(mut entry) => {
                entry.subscribers = entry.subscribers.saturating_sub(1);
                entry.subscribers
            }
            None => return,
        };

        debug!(channel = %channel, subscribers = remaining, "Unsubscribed");

        if self.config.auto_delete_empty_channels
            && remaining == 0
            && self
                .channels
                .remove_if(channel, |_, entry| entry.subscribers == 0)
                .is_some()
        {
            debug!(channel = %channel, "Deleted empty channel");
            gauge!(names::CHANNELS_ACTIVE).set(self.channels.len() as f64);
        }
    }
}

/// An in-process [`PubSubClient`].
///
/// Cloning is cheap; clones share the same channels.
#[derive(Clone)]
pub struct LocalHub {
    inner: Arc<HubInner>,
}

impl LocalHub {
    /// Create a hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        info!("Creating local hub with config: {:?}", config);
        Self {
            inner: Arc::new(HubInner {
                channels: DashMap::new(),
                config,
            }),
        }
    }

    /// The hub configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Number of live channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.inner.channels.len()
    }

    /// Check if a channel exists.
    #[must_use]
    pub fn channel_exists(&self, channel: &str) -> bool {
        self.inner.channels.contains_key(channel)
    }

    /// Number of subscriptions on a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .get(channel)
            .map(|e| e.subscribers)
            .unwrap_or(0)
    }
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSubClient for LocalHub {
    async fn subscribe(
        &self,
        channel: &str,
        on_message: MessageHandler,
    ) -> Result<Arc<dyn Subscription>, ClientError> {
        if channel.is_empty() {
            return Err(ClientError::Rejected("Channel name cannot be empty".into()));
        }

        // len() locks every shard, so it must run before entry() takes one.
        let channels = &self.inner.channels;
        if !channels.contains_key(channel) && channels.len() >= self.inner.config.max_channels {
            warn!(channel = %channel, "Subscribe rejected: channel limit reached");
            return Err(ClientError::Rejected("Maximum channels reached".into()));
        }

        let (receiver, subscribers) = {
            let mut entry = channels.entry(channel.to_string()).or_insert_with(|| {
                debug!(channel = %channel, "Creating new channel");
                ChannelEntry::new(self.inner.config.channel_capacity)
            });
            entry.subscribers += 1;
            (entry.sender.subscribe(), entry.subscribers)
        };

        counter!(names::SUBSCRIPTIONS_TOTAL).increment(1);
        gauge!(names::CHANNELS_ACTIVE).set(channels.len() as f64);
        debug!(channel = %channel, subscribers, "Subscribed");

        let task = tokio::spawn(forward(channel.to_string(), receiver, on_message));

        Ok(Arc::new(LocalSubscription {
            channel: channel.to_string(),
            response: json!({ "channel": channel, "subscribers": subscribers }),
            task: Mutex::new(Some(task)),
            hub: Arc::clone(&self.inner),
        }))
    }

    async fn publish(&self, channel: &str, envelope: Envelope) -> Result<Value, ClientError> {
        let data = codec::encode(&envelope)?;
        let size = data.len();

        let recipients = match self.inner.channels.get(channel) {
            Some(entry) => entry.sender.send(data).unwrap_or(0),
            None => {
                trace!(channel = %channel, "Publish to channel without subscribers");
                0
            }
        };

        counter!(names::MESSAGES_TOTAL).increment(1);
        trace!(
            channel = %channel,
            event = %envelope.type_tag,
            bytes = size,
            recipients,
            "Published message"
        );

        Ok(json!({ "channel": channel, "recipients": recipients }))
    }
}

/// Pump envelopes from a channel into a subscriber's handler.
async fn forward(
    channel: String,
    mut receiver: broadcast::Receiver<Bytes>,
    handler: MessageHandler,
) {
    loop {
        match receiver.recv().await {
            Ok(data) => match codec::decode(&data) {
                Ok(envelope) => handler(envelope),
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Dropping undecodable message");
                    counter!(names::ERRORS_TOTAL, "type" => "decode").increment(1);
                }
            },
            Err(RecvError::Lagged(skipped)) => {
                warn!(channel = %channel, skipped, "Subscriber lagged, messages dropped");
                counter!(names::ERRORS_TOTAL, "type" => "lagged").increment(1);
            }
            Err(RecvError::Closed) => break,
        }
    }
    trace!(channel = %channel, "Forwarding task finished");
}

/// A subscription on a [`LocalHub`].
///
/// Dropping the handle cancels it.
pub struct LocalSubscription {
    channel: String,
    response: Value,
    task: Mutex<Option<JoinHandle<()>>>,
    hub: Arc<HubInner>,
}

impl LocalSubscription {
    /// Stop forwarding and release the channel. Returns `false` if this
    /// subscription was already shut down.
    fn shutdown(&self) -> bool {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match task {
            Some(task) => {
                task.abort();
                self.hub.release(&self.channel);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Subscription for LocalSubscription {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn response(&self) -> &Value {
        &self.response
    }

    fn is_closed(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(true, JoinHandle::is_finished)
    }

    async fn cancel(&self) -> Result<(), ClientError> {
        if self.shutdown() {
            Ok(())
        } else {
            Err(ClientError::Closed)
        }
    }
}

impl Drop for LocalSubscription {
    fn drop(&mut self) {
        self.shutdown();
    }
}
