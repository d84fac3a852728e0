//! In-memory registry correlating payment fingerprints with the business
//! action pending on their settlement.

use dashmap::DashMap;
use log::debug;
use std::time::Duration;
use time::OffsetDateTime;

/// Default entry lifetime, matching the invoice expiry of 3 hours.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10_800);

#[derive(Debug, Clone)]
pub struct PendingPayment {
    pub id: u64,
    pub public_key: String,
    pub amount: u64,
    pub timestamp: i64,
}

/// Concurrent fingerprint -> pending payment map.
///
/// Entries are immutable after insert; they leave the map on terminal
/// settlement, failure restoration, or TTL eviction by the janitor.
#[derive(Debug)]
pub struct PaymentTracker {
    entries: DashMap<String, PendingPayment>,
    ttl_secs: i64,
}

impl PaymentTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl_secs: ttl.as_secs() as i64,
        }
    }

    /// Starts watching the fingerprint and returns the payment id the
    /// client correlates stream events with.
    ///
    /// Ids are random instead of serial to avoid leaking payment counts.
    pub fn track(&self, r_hash: &str, public_key: &str, amount: u64) -> u64 {
        let entry = PendingPayment {
            id: rand::random::<u64>(),
            public_key: public_key.to_string(),
            amount,
            timestamp: OffsetDateTime::now_utc().unix_timestamp(),
        };
        let id = entry.id;

        self.entries.insert(r_hash.to_string(), entry);
        id
    }

    /// Stops tracking the fingerprint, returning its entry.
    ///
    /// Concurrent consumers race through this removal; only the winner
    /// gets the entry and performs the pending action.
    pub fn remove(&self, r_hash: &str) -> Option<PendingPayment> {
        self.entries.remove(r_hash).map(|(_, entry)| entry)
    }

    pub fn contains(&self, r_hash: &str) -> bool {
        self.entries.contains_key(r_hash)
    }

    /// Drops entries older than the TTL.
    pub fn evict_expired(&self) {
        let min_timestamp = OffsetDateTime::now_utc().unix_timestamp() - self.ttl_secs;
        let before = self.entries.len();

        self.entries.retain(|_, entry| entry.timestamp >= min_timestamp);

        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!("evicted {} expired tracked payments", evicted);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn insert_at(&self, r_hash: &str, public_key: &str, amount: u64, timestamp: i64) {
        self.entries.insert(
            r_hash.to_string(),
            PendingPayment {
                id: rand::random::<u64>(),
                public_key: public_key.to_string(),
                amount,
                timestamp,
            },
        );
    }
}

impl Default for PaymentTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_and_remove() {
        let tracker = PaymentTracker::default();

        let id = tracker.track("hash1", "pk", 1000);
        assert!(tracker.contains("hash1"));

        let entry = tracker.remove("hash1").unwrap();
        assert_eq!(entry.id, id);
        assert_eq!(entry.public_key, "pk");
        assert_eq!(entry.amount, 1000);

        assert!(tracker.remove("hash1").is_none());
    }

    #[test]
    fn test_ids_are_not_serial() {
        let tracker = PaymentTracker::default();

        let first = tracker.track("hash1", "pk", 1);
        let second = tracker.track("hash2", "pk", 1);
        assert_ne!(first.wrapping_add(1), second);
    }

    #[test]
    fn test_evict_expired() {
        let tracker = PaymentTracker::default();
        let now = OffsetDateTime::now_utc().unix_timestamp();

        tracker.insert_at("stale", "pk", 1, now - 10_801);
        tracker.insert_at("fresh", "pk", 1, now);

        tracker.evict_expired();

        assert!(!tracker.contains("stale"));
        assert!(tracker.contains("fresh"));
        assert_eq!(tracker.len(), 1);
    }
}
