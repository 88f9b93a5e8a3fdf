//! Type-tag message router.
//!
//! Listeners are registered per type tag and invoked in registration order
//! for every envelope carrying that tag.

use dashmap::DashMap;
use grid_protocol::Envelope;
use grid_transport::MessageHandler;
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// A message listener. Receives the envelope payload.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Source of listener identities, shared by all routers.
static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned by [`MessageRouter::on`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Routes envelopes to listeners by type tag.
#[derive(Default)]
pub struct MessageRouter {
    listeners: DashMap<String, Vec<(ListenerId, Listener)>>,
}

impl MessageRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for a type tag.
    pub fn on<F>(&self, type_tag: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        let type_tag = type_tag.into();
        trace!(event = %type_tag, listener = id.0, "Listener registered");
        self.listeners
            .entry(type_tag)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener.
    ///
    /// Returns `true` if the listener was registered under `type_tag`.
    pub fn off(&self, type_tag: &str, id: ListenerId) -> bool {
        let (removed, now_empty) = match self.listeners.get_mut(type_tag) {
            Some(mut entry) => {
                let before = entry.len();
                entry.retain(|(registered, _)| *registered != id);
                (entry.len() != before, entry.is_empty())
            }
            None => return false,
        };

        if now_empty {
            self.listeners
                .remove_if(type_tag, |_, listeners| listeners.is_empty());
        }
        if removed {
            trace!(event = %type_tag, listener = id.0, "Listener removed");
        }
        removed
    }

    /// Deliver an envelope to every listener registered for its tag.
    ///
    /// Listeners run on the calling thread, in registration order. A panic in
    /// one listener is contained and the rest still run. The shard lock is
    /// released before any listener runs, so listeners may call `on`/`off`.
    ///
    /// Returns the number of listeners that completed normally.
    pub fn dispatch(&self, envelope: &Envelope) -> usize {
        let listeners: Vec<Listener> = match self.listeners.get(&envelope.type_tag) {
            Some(entry) => entry.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => {
                trace!(event = %envelope.type_tag, "No listeners, dropping message");
                return 0;
            }
        };

        let mut delivered = 0;
        for listener in listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(&envelope.payload))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(event = %envelope.type_tag, "Listener panicked during dispatch"),
            }
        }
        delivered
    }

    /// Number of listeners registered for a tag.
    #[must_use]
    pub fn listener_count(&self, type_tag: &str) -> usize {
        self.listeners.get(type_tag).map_or(0, |l| l.len())
    }

    /// Tags with at least one listener.
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        self.listeners.iter().map(|e| e.key().clone()).collect()
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.listeners.clear();
    }

    /// A transport-facing handler that dispatches into this router.
    ///
    /// The handler holds a weak reference; once the router is dropped,
    /// deliveries are discarded.
    #[must_use]
    pub fn handler(router: &Arc<Self>) -> MessageHandler {
        let router = Arc::downgrade(router);
        Arc::new(move |envelope: Envelope| {
            if let Some(router) = router.upgrade() {
                router.dispatch(&envelope);
            }
        })
    }
}
