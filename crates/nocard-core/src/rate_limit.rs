//! Fixed-window counters keyed by `(action, subject)`.
//!
//! A window opens on the first call and lasts `window_ms`; the counter is
//! replaced, not decremented, once `now` passes its end. Because windows are
//! fixed, a caller bursting at the end of one window and the start of the next
//! can be admitted up to twice `limit` times in quick succession. That is the
//! accepted behavior of this limiter.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitCounter {
    pub action: String,
    pub count: u32,
    #[serde(rename = "resetTime")]
    pub window_end: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Admitted; `count` is the counter value after this call.
    Admitted { count: u32 },
    /// Refused; nothing was mutated.
    Exceeded { count: u32, window_end: u64 },
}

/// Persisted key of a counter, `action:subject`.
///
/// `%` and `:` in the action are percent-escaped so that the first `:` always
/// ends the action and distinct pairs never share a key.
pub fn counter_key(action: &str, subject: &str) -> String {
    let action = action.replace('%', "%25").replace(':', "%3A");
    format!("{action}:{subject}")
}

/// Inverse of [`counter_key`].
pub fn split_counter_key(key: &str) -> Option<(String, String)> {
    let (action, subject) = key.split_once(':')?;
    let action = action.replace("%3A", ":").replace("%25", "%");
    Some((action, subject.to_string()))
}

#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    counters: BTreeMap<(String, String), RateLimitCounter>,
}

impl RateLimiter {
    /// Rebuilds the limiter from persisted counters. Keys that do not parse
    /// are dropped.
    pub fn from_counters(persisted: BTreeMap<String, RateLimitCounter>) -> Self {
        let mut counters = BTreeMap::new();
        for (key, counter) in persisted {
            match split_counter_key(&key) {
                Some(pair) => {
                    counters.insert(pair, counter);
                }
                None => warn!(key, "ignoring malformed rate limit key"),
            }
        }
        Self { counters }
    }

    /// Counters in their persisted form, keyed by [`counter_key`].
    pub fn persisted(&self) -> BTreeMap<String, RateLimitCounter> {
        self.counters
            .iter()
            .map(|((action, subject), counter)| (counter_key(action, subject), counter.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn counter(&self, action: &str, subject: &str) -> Option<&RateLimitCounter> {
        self.counters
            .get(&(action.to_string(), subject.to_string()))
    }

    pub fn consume(
        &mut self,
        action: &str,
        subject: &str,
        limit: u32,
        window_ms: u64,
        now: u64,
    ) -> RateDecision {
        let key = (action.to_string(), subject.to_string());
        if let Some(counter) = self.counters.get_mut(&key) {
            if now <= counter.window_end {
                if counter.count >= limit {
                    return RateDecision::Exceeded {
                        count: counter.count,
                        window_end: counter.window_end,
                    };
                }
                counter.count += 1;
                return RateDecision::Admitted {
                    count: counter.count,
                };
            }
        }

        self.counters.insert(
            key,
            RateLimitCounter {
                action: action.to_string(),
                count: 1,
                window_end: now.saturating_add(window_ms),
            },
        );
        RateDecision::Admitted { count: 1 }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{counter_key, split_counter_key, RateDecision, RateLimitCounter, RateLimiter};

    #[test]
    fn admits_up_to_limit_then_refuses() {
        let mut limiter = RateLimiter::default();
        for expected in 1..=3 {
            assert_eq!(
                limiter.consume("login", "ana", 3, 1_000, 100),
                RateDecision::Admitted { count: expected }
            );
        }
        assert_eq!(
            limiter.consume("login", "ana", 3, 1_000, 500),
            RateDecision::Exceeded {
                count: 3,
                window_end: 1_100
            }
        );
        assert_eq!(limiter.counter("login", "ana").map(|c| c.count), Some(3));
    }

    #[test]
    fn window_end_is_inclusive() {
        let mut limiter = RateLimiter::default();
        limiter.consume("pay", "ana", 1, 1_000, 0);
        assert!(matches!(
            limiter.consume("pay", "ana", 1, 1_000, 1_000),
            RateDecision::Exceeded { .. }
        ));
        assert_eq!(
            limiter.consume("pay", "ana", 1, 1_000, 1_001),
            RateDecision::Admitted { count: 1 }
        );
    }

    #[test]
    fn keys_are_independent() {
        let mut limiter = RateLimiter::default();
        limiter.consume("login", "ana", 1, 1_000, 0);
        assert_eq!(
            limiter.consume("login", "bia", 1, 1_000, 0),
            RateDecision::Admitted { count: 1 }
        );
        assert_eq!(
            limiter.consume("payment", "ana", 1, 1_000, 0),
            RateDecision::Admitted { count: 1 }
        );
        assert_eq!(limiter.len(), 3);
    }

    #[test]
    fn colons_cannot_merge_two_pairs() {
        let mut limiter = RateLimiter::default();
        assert_eq!(
            limiter.consume("login:ana", "x", 1, 1_000, 0),
            RateDecision::Admitted { count: 1 }
        );
        assert_eq!(
            limiter.consume("login", "ana:x", 1, 1_000, 0),
            RateDecision::Admitted { count: 1 }
        );

        let persisted = limiter.persisted();
        assert_eq!(persisted.len(), 2);
        assert!(persisted.contains_key("login:ana:x"));
        assert!(persisted.contains_key("login%3Aana:x"));

        let reloaded = RateLimiter::from_counters(persisted);
        assert_eq!(reloaded.counter("login:ana", "x").map(|c| c.count), Some(1));
        assert_eq!(reloaded.counter("login", "ana:x").map(|c| c.count), Some(1));
    }

    #[test]
    fn persisted_keys_round_trip_escapes() {
        for action in ["login", "a:b", "100%", "%3A", "%:%25"] {
            let key = counter_key(action, "ana:1");
            assert_eq!(
                split_counter_key(&key),
                Some((action.to_string(), "ana:1".to_string()))
            );
        }
        assert_eq!(split_counter_key("no-separator"), None);
    }

    #[test]
    fn malformed_persisted_keys_are_dropped() {
        let counter = RateLimitCounter {
            action: "login".to_string(),
            count: 2,
            window_end: 5_000,
        };
        let persisted = BTreeMap::from([
            ("login:ana".to_string(), counter.clone()),
            ("garbage".to_string(), counter),
        ]);
        let limiter = RateLimiter::from_counters(persisted);
        assert_eq!(limiter.len(), 1);
        assert_eq!(limiter.counter("login", "ana").map(|c| c.count), Some(2));
    }

    #[test]
    fn boundary_burst_admits_twice_the_limit() {
        let mut limiter = RateLimiter::default();
        let mut admitted = 0;
        for now in [0, 990, 995] {
            if let RateDecision::Admitted { .. } = limiter.consume("pay", "ana", 3, 1_000, now) {
                admitted += 1;
            }
        }
        for now in [1_001, 1_002, 1_003] {
            if let RateDecision::Admitted { .. } = limiter.consume("pay", "ana", 3, 1_000, now) {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 6);
    }
}
