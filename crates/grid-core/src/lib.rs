//! # grid-core
//!
//! Channel connections for the Grid realtime API.
//!
//! A [`Connection`] wraps a shared pub/sub client and exposes a small,
//! callback-oriented surface over one channel:
//!
//! - **listen / stop** - manage the channel subscription
//! - **send** - publish a typed message
//! - **on / off** - route incoming messages to listeners by type tag
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐
//! │    Grid     │────▶│ Connection  │────▶│ PubSubClient │
//! └─────────────┘     └─────────────┘     └──────────────┘
//!                            │                    │
//!                            ▼                    │ envelopes
//!                     ┌─────────────┐             │
//!                     │   Router    │◀────────────┘
//!                     └─────────────┘
//! ```

pub mod connection;
pub mod descriptor;
pub mod resource;
pub mod router;

pub use connection::{Callback, Connection, ConnectionError, ConnectionState};
pub use descriptor::ChannelDescriptor;
pub use resource::{Devices, Grid};
pub use router::{Listener, ListenerId, MessageRouter};
