//! Server-side presence tracking.
//!
//! In-memory connection counter keyed by user id. A user is online while at
//! least one of their sessions is connected; the entry is dropped at zero.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
pub struct PresenceRegistry {
    counts: Arc<DashMap<String, usize>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more live connection. Returns the new count.
    pub fn mark_connected(&self, user_id: &str) -> usize {
        let mut count = self.counts.entry(user_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Record a closed connection. Returns the remaining count.
    pub fn mark_disconnected(&self, user_id: &str) -> usize {
        match self.counts.entry(user_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let remaining = entry.get().saturating_sub(1);
                if remaining == 0 {
                    entry.remove();
                } else {
                    *entry.get_mut() = remaining;
                }
                remaining
            }
            Entry::Vacant(_) => 0,
        }
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.counts.get(user_id).map(|c| *c > 0).unwrap_or(false)
    }

    pub fn connection_count(&self, user_id: &str) -> usize {
        self.counts.get(user_id).map(|c| *c).unwrap_or(0)
    }

    /// Ids of every user with at least one live connection.
    pub fn online_users(&self) -> Vec<String> {
        self.counts.iter().map(|e| e.key().clone()).collect()
    }
}
