//! Per-link replay protection.
//!
//! Remembers the keys of the most recent `capacity` applied signals. When the
//! window is full the oldest key is evicted, so memory stays bounded for
//! long-lived sessions.

use super::message::DedupKey;
use std::collections::{HashSet, VecDeque};

/// Bounded FIFO set of applied dedup keys.
#[derive(Debug)]
pub struct SignalDeduplicator {
    capacity: usize,
    order: VecDeque<DedupKey>,
    seen: HashSet<DedupKey>,
}

impl SignalDeduplicator {
    /// Create a deduplicator remembering at most `capacity` keys (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Returns `false` if `key` was already recorded (recording nothing);
    /// otherwise records it and returns `true`.
    pub fn should_apply(&mut self, key: DedupKey) -> bool {
        if self.seen.contains(&key) {
            return false;
        }

        if self.order.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }

        self.order.push_back(key);
        self.seen.insert(key);
        true
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::signaling::message::{IceCandidate, SignalMessage, SignalPayload};
    use common::types::ParticipantId;

    fn key(sequence: u64) -> DedupKey {
        SignalMessage {
            from: ParticipantId::from("a"),
            to: ParticipantId::from("b"),
            sequence,
            payload: SignalPayload::IceCandidate(IceCandidate {
                candidate: "c".to_string(),
                sdp_mid: None,
                sdp_mline_index: None,
            }),
        }
        .dedup_key()
    }

    #[test]
    fn test_first_sighting_applies_replay_does_not() {
        let mut dedup = SignalDeduplicator::new(8);

        assert!(dedup.should_apply(key(1)));
        assert!(!dedup.should_apply(key(1)));
        assert!(!dedup.should_apply(key(1)));
        assert_eq!(dedup.len(), 1);

        assert!(dedup.should_apply(key(2)));
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut dedup = SignalDeduplicator::new(3);

        for seq in 1..=10 {
            assert!(dedup.should_apply(key(seq)));
        }
        assert_eq!(dedup.len(), 3);

        // Most recent keys are still remembered
        assert!(!dedup.should_apply(key(10)));
        assert!(!dedup.should_apply(key(8)));

        // Oldest keys were evicted
        assert!(dedup.should_apply(key(1)));
        assert_eq!(dedup.len(), 3);
    }

    #[test]
    fn test_clear_forgets_everything() {
        let mut dedup = SignalDeduplicator::new(4);
        dedup.should_apply(key(1));
        dedup.should_apply(key(2));

        dedup.clear();

        assert!(dedup.is_empty());
        assert!(dedup.should_apply(key(1)));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut dedup = SignalDeduplicator::new(0);
        assert!(dedup.should_apply(key(1)));
        assert!(!dedup.should_apply(key(1)));
        assert_eq!(dedup.len(), 1);
    }
}
