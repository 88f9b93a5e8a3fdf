//! Shared fixtures for the Grid benchmarks.

use grid_core::MessageRouter;
use grid_protocol::Envelope;
use serde_json::{json, Value};

/// A payload with `fields` numeric entries.
#[must_use]
pub fn payload(fields: usize) -> Value {
    let map: serde_json::Map<String, Value> = (0..fields)
        .map(|i| (format!("field_{i}"), json!(i)))
        .collect();
    Value::Object(map)
}

/// An envelope tagged `tag` carrying [`payload`].
#[must_use]
pub fn envelope(tag: &str, fields: usize) -> Envelope {
    Envelope::new(tag, payload(fields))
}

/// A router with `listeners` no-op listeners on each of `tags`.
#[must_use]
pub fn router_with(tags: &[&str], listeners: usize) -> MessageRouter {
    let router = MessageRouter::new();
    for tag in tags {
        for _ in 0..listeners {
            router.on(*tag, |payload| {
                std::hint::black_box(payload);
            });
        }
    }
    router
}
