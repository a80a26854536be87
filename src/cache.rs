// In-memory conversation id store, keyed by normalized user identity.
//
// Nothing survives a restart. Two concurrent messages from the same user may
// both read the old id; the later write wins.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

const KEY_PREFIX: &str = "coze:cid:";

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Conversation ids with a per-entry expiry. Cheap to clone; clones share
/// the same map.
#[derive(Debug, Clone, Default)]
pub(crate) struct ConversationCache {
    entries: Arc<DashMap<String, Entry>>,
}

impl ConversationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache key for a user: trimmed and lowercased so `Alice@X.com ` and
    /// `alice@x.com` share one conversation.
    pub fn user_key(user: &str) -> String {
        format!("{KEY_PREFIX}{}", user.trim().to_lowercase())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.get_at(key, Instant::now())
    }

    pub fn set(&self, key: &str, value: &str, ttl: Duration) {
        self.set_at(key, value, ttl, Instant::now());
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        }
        None
    }

    fn set_at(&self, key: &str, value: &str, ttl: Duration, now: Instant) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}
