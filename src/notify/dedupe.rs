//! First-fire memory for (recipient, message) pairs.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct DedupeCache {
    fired: Arc<DashMap<(String, String), Instant>>,
    ttl: Duration,
}

impl DedupeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            fired: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Record the pair and return true on the first call; false afterwards
    /// while the entry is still fresh.
    pub fn first_fire(&self, recipient: &str, message_id: &str) -> bool {
        self.first_fire_at(recipient, message_id, Instant::now())
    }

    fn first_fire_at(&self, recipient: &str, message_id: &str, now: Instant) -> bool {
        match self.fired.entry((recipient.to_string(), message_id.to_string())) {
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
            Entry::Occupied(mut entry) => {
                if now.duration_since(*entry.get()) >= self.ttl {
                    entry.insert(now);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let before = self.fired.len();
        self.fired.retain(|_, fired_at| now.duration_since(*fired_at) < self.ttl);
        before.saturating_sub(self.fired.len())
    }

    pub fn len(&self) -> usize {
        self.fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
    }
}

/// Periodically sweep expired entries until the runtime shuts down.
pub fn spawn_sweeper(cache: DedupeCache, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(every);
        timer.tick().await;
        loop {
            timer.tick().await;
            let removed = cache.sweep();
            if removed > 0 {
                tracing::debug!(removed, remaining = cache.len(), "Swept push dedupe cache");
            }
        }
    })
}
