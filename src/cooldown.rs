//! Per-subject cooldown tracking shared by listeners and commands.
//!
//! Keys are `"{listener_or_command}:{subject}"` and values are the epoch millisecond
//! at which the subject may trigger again. The window is not sliding: attempts made
//! while cooling down do not push the ready-at time back.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Result of a cooldown check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownDecision {
    Allowed,
    Limited {
        /// Milliseconds until the subject may trigger again.
        retry_after_ms: i64,
    },
}

impl CooldownDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Build the cooldown key for a listener or command and a subject.
pub fn cooldown_key(id: &str, subject_id: u64) -> String {
    format!("{}:{}", id, subject_id)
}

/// Concurrent map of cooldown deadlines.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    ready_at: DashMap<String, i64>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one trigger for `key` at `now_ms`.
    ///
    /// The read-compare-write happens under the shard lock of the entry, so two
    /// racing triggers for the same key cannot both be allowed.
    pub fn try_consume(&self, key: &str, duration_ms: i64, now_ms: i64) -> CooldownDecision {
        match self.ready_at.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let ready_at = *entry.get();
                if ready_at > now_ms {
                    CooldownDecision::Limited {
                        retry_after_ms: ready_at - now_ms,
                    }
                } else {
                    entry.insert(now_ms + duration_ms);
                    CooldownDecision::Allowed
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now_ms + duration_ms);
                CooldownDecision::Allowed
            }
        }
    }

    /// Drop entries whose deadline has passed. Returns how many were removed.
    pub fn sweep_expired(&self, now_ms: i64) -> usize {
        let before = self.ready_at.len();
        self.ready_at.retain(|_, ready_at| *ready_at > now_ms);
        before.saturating_sub(self.ready_at.len())
    }

    pub fn len(&self) -> usize {
        self.ready_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready_at.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn first_trigger_is_allowed() {
        let tracker = CooldownTracker::new();
        assert_eq!(tracker.try_consume("ping:1", 2000, 0), CooldownDecision::Allowed);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn second_trigger_within_window_is_limited() {
        let tracker = CooldownTracker::new();
        tracker.try_consume("ping:1", 2000, 1_000);
        assert_eq!(
            tracker.try_consume("ping:1", 2000, 1_500),
            CooldownDecision::Limited {
                retry_after_ms: 1_500
            }
        );
    }

    #[test]
    fn limited_attempts_do_not_extend_window() {
        let tracker = CooldownTracker::new();
        tracker.try_consume("k", 1000, 0);
        assert!(!tracker.try_consume("k", 1000, 900).is_allowed());
        assert!(tracker.try_consume("k", 1000, 1000).is_allowed());
    }

    #[test]
    fn keys_are_independent() {
        let tracker = CooldownTracker::new();
        assert!(tracker.try_consume(&cooldown_key("ping", 1), 1000, 0).is_allowed());
        assert!(tracker.try_consume(&cooldown_key("ping", 2), 1000, 0).is_allowed());
        assert!(tracker.try_consume(&cooldown_key("docs", 1), 1000, 0).is_allowed());
    }

    #[test]
    fn sweep_removes_only_expired() {
        let tracker = CooldownTracker::new();
        tracker.try_consume("a", 100, 0);
        tracker.try_consume("b", 10_000, 0);
        assert_eq!(tracker.sweep_expired(500), 1);
        assert_eq!(tracker.len(), 1);
        assert!(!tracker.try_consume("b", 10_000, 600).is_allowed());
    }

    #[test]
    fn concurrent_triggers_allow_exactly_one() {
        let tracker = Arc::new(CooldownTracker::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || tracker.try_consume("race:1", 60_000, 5).is_allowed())
            })
            .collect();

        let allowed = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(allowed, 1);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// **Property: cooldown spacing**
        ///
        /// A second trigger strictly inside the window is suppressed; one at or after
        /// the window succeeds.
        #[test]
        fn prop_cooldown_spacing(
            start in 0i64..1_000_000,
            duration in 1i64..100_000,
            offset in 0i64..200_000,
        ) {
            let tracker = CooldownTracker::new();
            prop_assert!(tracker.try_consume("l:1", duration, start).is_allowed());

            let decision = tracker.try_consume("l:1", duration, start + offset);
            if offset < duration {
                prop_assert_eq!(
                    decision,
                    CooldownDecision::Limited { retry_after_ms: duration - offset }
                );
            } else {
                prop_assert!(decision.is_allowed());
            }
        }
    }
}
