//! # grid-transport
//!
//! The pub/sub client contract consumed by Grid connections, plus an
//! in-process implementation of it.
//!
//! Connections never talk to a wire protocol directly. They hold a shared
//! [`PubSubClient`] and rely only on its two operations:
//!
//! - `subscribe(channel, on_message)` resolving to a [`Subscription`] handle
//! - `publish(channel, envelope)` resolving to an opaque acknowledgement
//!
//! ```rust,ignore
//! use grid_transport::{LocalHub, PubSubClient};
//!
//! let hub = LocalHub::new();
//! let sub = hub.subscribe("/devices/15", handler).await?;
//! hub.publish("/devices/15", envelope).await?;
//! sub.cancel().await?;
//! ```

pub mod traits;

#[cfg(feature = "local")]
pub mod local;

pub use traits::{ClientError, MessageHandler, PubSubClient, Subscription};

#[cfg(feature = "local")]
pub use local::{HubConfig, LocalHub, LocalSubscription};
