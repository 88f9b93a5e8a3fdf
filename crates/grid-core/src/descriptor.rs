//! Channel descriptors.
//!
//! A descriptor names one subscribable resource: an endpoint identifying the
//! resource family (e.g. `/devices`) and an identifier within it.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Identifies a subscribable resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    /// Resource family, e.g. `/devices`.
    #[serde(default)]
    pub endpoint: String,
    /// Resource instance within the family.
    #[serde(default, deserialize_with = "identifier_from_value")]
    pub identifier: String,
}

impl ChannelDescriptor {
    /// Create a descriptor. The identifier is stored in its display form.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, identifier: impl fmt::Display) -> Self {
        Self {
            endpoint: endpoint.into(),
            identifier: identifier.to_string(),
        }
    }

    /// Build a descriptor from loosely-typed data.
    ///
    /// Missing fields come back empty and are caught by [`validate`](Self::validate).
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not an object, or a field has the
    /// wrong type.
    pub fn from_value(value: Value) -> Result<Self, &'static str> {
        if !value.is_object() {
            return Err("Channel descriptor must be an object");
        }
        serde_json::from_value(value).map_err(|_| "Malformed channel descriptor")
    }

    /// Check both fields are present.
    ///
    /// Any non-empty endpoint and identifier are accepted; channel naming
    /// rules, if any, belong to the transport.
    ///
    /// # Errors
    ///
    /// Returns an error message naming the missing field.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.endpoint.is_empty() {
            return Err("Channel descriptor is missing an endpoint");
        }
        if self.identifier.is_empty() {
            return Err("Channel descriptor is missing an identifier");
        }
        Ok(())
    }

    /// Derive the channel name, `endpoint/identifier`.
    #[must_use]
    pub fn channel_name(&self) -> String {
        format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            self.identifier
        )
    }
}

impl fmt::Display for ChannelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.channel_name())
    }
}

/// Accept identifiers as JSON strings or numbers.
fn identifier_from_value<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "identifier must be a string or number, got {other}"
        ))),
    }
}
