//! # grid-protocol
//!
//! Message envelope and wire codec for Grid channels.
//!
//! Every message travelling over a channel is an [`Envelope`]: a type tag that
//! drives routing on the receiving side, plus an opaque JSON payload.
//!
//! ## JSON shape
//!
//! ```json
//! { "ext": { "type": "data" }, "data": { "foo": "bar" } }
//! ```
//!
//! ## Example
//!
//! ```rust
//! use grid_protocol::{codec, Envelope};
//! use serde_json::json;
//!
//! let envelope = Envelope::new("data", json!({ "foo": "bar" }));
//!
//! let encoded = codec::encode(&envelope).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(decoded.type_tag, "data");
//! ```

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, ProtocolError};
pub use envelope::Envelope;
