//! Message envelopes for Grid channels.
//!
//! An envelope pairs a type tag with an opaque payload. On the wire the tag
//! lives under `ext.type` and the payload under `data`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A typed message published to, or received from, a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireEnvelope", into = "WireEnvelope")]
pub struct Envelope {
    /// Classifies the message; receivers route on it.
    pub type_tag: String,
    /// Opaque structured data handed to listeners.
    pub payload: Value,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(type_tag: impl Into<String>, payload: Value) -> Self {
        Self {
            type_tag: type_tag.into(),
            payload,
        }
    }
}

/// Serialized form of an [`Envelope`].
#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    ext: Extension,
    #[serde(default)]
    data: Value,
}

#[derive(Serialize, Deserialize)]
struct Extension {
    #[serde(rename = "type")]
    kind: String,
}

impl From<WireEnvelope> for Envelope {
    fn from(wire: WireEnvelope) -> Self {
        Self {
            type_tag: wire.ext.kind,
            payload: wire.data,
        }
    }
}

impl From<Envelope> for WireEnvelope {
    fn from(envelope: Envelope) -> Self {
        Self {
            ext: Extension {
                kind: envelope.type_tag,
            },
            data: envelope.payload,
        }
    }
}
