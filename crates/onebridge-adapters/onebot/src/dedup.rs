//! Redelivered event suppression.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::DedupConfig;
use crate::model::MessageEvent;

/// Fingerprint identifying one message delivery.
///
/// Built from the receiving account, the conversation and the message ID, so
/// two distinct messages never share a fingerprint.
pub fn fingerprint(event: &MessageEvent) -> String {
    format!(
        "{}:{}:{}:{}",
        event.self_id,
        event.message_type.as_str(),
        event.conversation_id(),
        event.message_id
    )
}

/// TTL-based seen-set.
///
/// Entries expire lazily on access. When full, the oldest entry is evicted,
/// which can only cause a missed duplicate, never a false one.
pub struct Deduplicator {
    seen: HashSet<String>,
    order: VecDeque<(Instant, String)>,
    ttl: Duration,
    max_entries: usize,
}

impl Deduplicator {
    /// Creates a deduplicator.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Builds a deduplicator from configuration.
    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(Duration::from_millis(config.ttl_ms), config.max_entries)
    }

    /// Returns true if `key` was already seen within the TTL; otherwise
    /// records it and returns false.
    pub fn check_and_insert(&mut self, key: &str) -> bool {
        let now = Instant::now();
        self.evict_expired(now);
        if self.seen.contains(key) {
            return true;
        }
        if self.seen.len() >= self.max_entries
            && let Some((_, oldest)) = self.order.pop_front()
        {
            self.seen.remove(&oldest);
        }
        self.seen.insert(key.to_string());
        self.order.push_back((now + self.ttl, key.to_string()));
        false
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether no entries are held.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn evict_expired(&mut self, now: Instant) {
        // Entries share one TTL, so insertion order is expiry order.
        while let Some((expiry, _)) = self.order.front() {
            if *expiry > now {
                break;
            }
            if let Some((_, key)) = self.order.pop_front() {
                self.seen.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_within_ttl_then_expiry() {
        let mut dedup = Deduplicator::new(Duration::from_secs(10), 100);
        assert!(!dedup.check_and_insert("a"));
        assert!(dedup.check_and_insert("a"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!dedup.check_and_insert("a"));
        assert_eq!(dedup.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oldest_evicted_when_full() {
        let mut dedup = Deduplicator::new(Duration::from_secs(60), 2);
        assert!(!dedup.check_and_insert("a"));
        assert!(!dedup.check_and_insert("b"));
        assert!(!dedup.check_and_insert("c"));
        assert_eq!(dedup.len(), 2);
        // "a" was evicted, so it is seen as new again.
        assert!(!dedup.check_and_insert("a"));
        assert!(dedup.check_and_insert("c"));
    }

    #[test]
    fn test_fingerprint_distinguishes_conversations() {
        let raw = serde_json::json!({
            "post_type": "message", "time": 1, "self_id": 9,
            "message_type": "group", "message_id": 5, "user_id": 1, "group_id": 2,
            "message": "x"
        });
        let event = match crate::model::GatewayEvent::from_value(raw).unwrap() {
            crate::model::GatewayEvent::Message(m) => m,
            _ => unreachable!(),
        };
        assert_eq!(fingerprint(&event), "9:group:2:5");
    }
}
