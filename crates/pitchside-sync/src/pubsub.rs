//! # Topic Registry
//!
//! Maps topic names to subscriber callbacks for one client session.
//!
//! ```text
//! topic "match_events" ─► [ (1, Weak<cb>), (4, Weak<cb>) ]
//! topic "live_stats"   ─► [ (2, Weak<cb>) ]
//!
//! subscribe()  → Subscription { owns Arc<cb> }   (registry keeps Weak)
//! drop(sub)    → entry removed, callback freed
//! dispatch()   → upgrade each Weak, run under catch_unwind
//! ```
//!
//! The registry never keeps a callback alive on its own. A panic in one
//! callback is logged and the remaining callbacks for the topic still run.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, error};

use crate::lock;
use crate::protocol::InboundMessage;

/// Subscriber callback.
pub type Callback = dyn Fn(&InboundMessage) + Send + Sync;

type Entry = (u64, Weak<Callback>);

#[derive(Default)]
struct RegistryInner {
    topics: Mutex<HashMap<String, Vec<Entry>>>,
    next_id: AtomicU64,
}

impl RegistryInner {
    fn remove(&self, topic: &str, id: u64) {
        let mut topics = lock(&self.topics);
        if let Some(entries) = topics.get_mut(topic) {
            entries.retain(|(entry_id, _)| *entry_id != id);
            if entries.is_empty() {
                topics.remove(topic);
            }
        }
    }
}

/// Topic → subscriber set.
#[derive(Clone, Default)]
pub struct TopicRegistry {
    inner: Arc<RegistryInner>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for `topic`. Keep the returned handle alive for as
    /// long as the callback should run.
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> Subscription
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        let callback: Arc<Callback> = Arc::new(callback);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        lock(&self.inner.topics)
            .entry(topic.to_string())
            .or_default()
            .push((id, Arc::downgrade(&callback)));

        debug!(topic, id, "Subscriber added");
        Subscription {
            id,
            topic: topic.to_string(),
            _callback: callback,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Runs every live subscriber of the message's topic. Returns how many ran
    /// without panicking.
    pub fn dispatch(&self, message: &InboundMessage) -> usize {
        let topic = message.topic();

        let live: Vec<(u64, Arc<Callback>)> = {
            let mut topics = lock(&self.inner.topics);
            let Some(entries) = topics.get_mut(topic) else {
                debug!(topic, "No subscribers for topic");
                return 0;
            };
            entries.retain(|(_, weak)| weak.strong_count() > 0);
            entries
                .iter()
                .filter_map(|(id, weak)| weak.upgrade().map(|cb| (*id, cb)))
                .collect()
        };

        let mut delivered = 0;
        for (id, callback) in live {
            match catch_unwind(AssertUnwindSafe(|| (*callback)(message))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic".to_string());
                    error!(topic, id, %reason, "Subscriber panicked");
                }
            }
        }
        delivered
    }

    /// Live subscribers for `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        lock(&self.inner.topics)
            .get(topic)
            .map(|entries| entries.iter().filter(|(_, w)| w.strong_count() > 0).count())
            .unwrap_or(0)
    }
}

/// Cancellation handle returned by `subscribe`. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    topic: String,
    _callback: Arc<Callback>,
    registry: Weak<RegistryInner>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Removes the subscriber now.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.topic, self.id);
            debug!(topic = %self.topic, id = self.id, "Subscriber removed");
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}
