use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Outcome of a single check-and-record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
}

impl RateDecision {
    pub fn denied() -> Self {
        Self { allowed: false, remaining: 0 }
    }
}

/// Window length and admission budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub window: Duration,
    pub max_calls: u32,
}

impl RateLimitPolicy {
    pub fn new(window: Duration, max_calls: u32) -> Self {
        Self { window, max_calls }
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(3600),
            max_calls: 20,
        }
    }
}

/// Storage backend for rate-limit state.
///
/// `record` must behave as one atomic read-filter-append-write per key: two
/// concurrent callers may never both take the last slot.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Admit or deny a call from `key` at `now_ms`, recording it only when admitted.
    async fn record(&self, key: &str, now_ms: i64) -> Result<RateDecision>;

    /// Number of client keys currently held, if the backend can tell.
    fn tracked_clients(&self) -> Option<usize> {
        None
    }
}

/// Process-local sliding-window limiter.
///
/// Each client key owns the timestamps (ms since epoch) of its admitted calls.
/// Expired entries are purged lazily on the next access for that key. Keys are
/// never dropped unless idle eviction runs, so memory grows with distinct clients.
pub struct InMemoryRateLimiter {
    policy: RateLimitPolicy,
    windows: Mutex<HashMap<String, VecDeque<i64>>>,
}

impl InMemoryRateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    // A panic while holding the lock cannot leave a half-written window behind,
    // so a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<i64>>> {
        self.windows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Synchronous check-and-record.
    pub fn check_and_record(&self, key: &str, now_ms: i64) -> RateDecision {
        let window_ms = self.policy.window_ms();
        let max_calls = self.policy.max_calls as usize;

        let mut windows = self.lock();

        // Purge in place; a denied call must not create an entry for an unseen key.
        if let Some(recent) = windows.get_mut(key) {
            purge_expired(recent, now_ms, window_ms);
            if recent.len() >= max_calls {
                return RateDecision::denied();
            }
            recent.push_back(now_ms);
            return RateDecision {
                allowed: true,
                remaining: (max_calls - recent.len()) as u32,
            };
        }

        if max_calls == 0 {
            return RateDecision::denied();
        }

        windows.insert(key.to_string(), VecDeque::from([now_ms]));
        RateDecision {
            allowed: true,
            remaining: (max_calls - 1) as u32,
        }
    }

    /// Calls from `key` still inside the window at `now_ms`, without recording anything.
    pub fn recent_calls(&self, key: &str, now_ms: i64) -> usize {
        let window_ms = self.policy.window_ms();
        self.lock()
            .get(key)
            .map(|recent| recent.iter().filter(|&&t| now_ms - t < window_ms).count())
            .unwrap_or(0)
    }

    /// Number of distinct client keys in the map
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop keys whose newest call is older than `idle_windows` windows.
    ///
    /// Returns how many keys were removed.
    pub fn evict_idle(&self, now_ms: i64, idle_windows: u32) -> usize {
        let idle_ms = self.policy.window_ms().saturating_mul(i64::from(idle_windows.max(1)));
        let mut windows = self.lock();
        let before = windows.len();

        windows.retain(|_, recent| match recent.back() {
            Some(&newest) => now_ms - newest < idle_ms,
            None => false,
        });

        before - windows.len()
    }
}

impl Default for InMemoryRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitPolicy::default())
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimiter {
    async fn record(&self, key: &str, now_ms: i64) -> Result<RateDecision> {
        Ok(self.check_and_record(key, now_ms))
    }

    fn tracked_clients(&self) -> Option<usize> {
        Some(self.len())
    }
}

/// Keep only timestamps inside `(now - window, now]`.
fn purge_expired(recent: &mut VecDeque<i64>, now_ms: i64, window_ms: i64) {
    recent.retain(|&t| now_ms - t < window_ms);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const HOUR_MS: i64 = 3_600_000;

    fn limiter() -> InMemoryRateLimiter {
        InMemoryRateLimiter::default()
    }

    #[test]
    fn test_first_call_leaves_nineteen() {
        let limiter = limiter();
        let decision = limiter.check_and_record("1.2.3.4", 1_000);
        assert_eq!(decision, RateDecision { allowed: true, remaining: 19 });
    }

    #[test]
    fn test_remaining_counts_down_to_zero() {
        let limiter = limiter();
        let now = 10_000;

        for i in 0..20u32 {
            let decision = limiter.check_and_record("client", now + i as i64);
            assert!(decision.allowed, "call {} should be admitted", i + 1);
            assert_eq!(decision.remaining, 19 - i);
        }

        let denied = limiter.check_and_record("client", now + 20);
        assert_eq!(denied, RateDecision::denied());
    }

    #[test]
    fn test_denied_call_is_not_recorded() {
        let limiter = limiter();
        for _ in 0..20 {
            limiter.check_and_record("client", 0);
        }
        for t in 1..5 {
            assert!(!limiter.check_and_record("client", t).allowed);
        }
        assert_eq!(limiter.recent_calls("client", 10), 20);

        // Once the original twenty age out a full budget is back.
        let decision = limiter.check_and_record("client", HOUR_MS);
        assert_eq!(decision, RateDecision { allowed: true, remaining: 19 });
    }

    #[test]
    fn test_entry_exactly_one_window_old_is_expired() {
        let limiter = InMemoryRateLimiter::new(RateLimitPolicy::new(Duration::from_secs(3600), 1));
        assert!(limiter.check_and_record("k", 5_000).allowed);
        assert!(!limiter.check_and_record("k", 5_000 + HOUR_MS - 1).allowed);

        let decision = limiter.check_and_record("k", 5_000 + HOUR_MS);
        assert_eq!(decision, RateDecision { allowed: true, remaining: 0 });
    }

    #[test]
    fn test_window_slides_per_entry() {
        let limiter = InMemoryRateLimiter::new(RateLimitPolicy::new(Duration::from_millis(100), 2));
        assert!(limiter.check_and_record("k", 0).allowed);
        assert!(limiter.check_and_record("k", 50).allowed);
        assert!(!limiter.check_and_record("k", 99).allowed);

        // Only the first entry has expired.
        assert_eq!(limiter.check_and_record("k", 100), RateDecision { allowed: true, remaining: 0 });
        assert!(!limiter.check_and_record("k", 149).allowed);
        assert!(limiter.check_and_record("k", 150).allowed);
    }

    #[test]
    fn test_keys_are_isolated() {
        let limiter = limiter();
        for _ in 0..20 {
            limiter.check_and_record("a", 0);
        }
        assert!(!limiter.check_and_record("a", 1).allowed);

        let decision = limiter.check_and_record("b", 1);
        assert_eq!(decision, RateDecision { allowed: true, remaining: 19 });
    }

    #[test]
    fn test_zero_budget_denies_without_tracking() {
        let limiter = InMemoryRateLimiter::new(RateLimitPolicy::new(Duration::from_secs(60), 0));
        assert_eq!(limiter.check_and_record("k", 0), RateDecision::denied());
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_evict_idle_keeps_active_keys() {
        let limiter = limiter();
        limiter.check_and_record("stale", 0);
        limiter.check_and_record("active", 2 * HOUR_MS);
        assert_eq!(limiter.len(), 2);

        let removed = limiter.evict_idle(2 * HOUR_MS + 1, 2);
        assert_eq!(removed, 1);
        assert_eq!(limiter.len(), 1);
        assert_eq!(limiter.recent_calls("active", 2 * HOUR_MS + 1), 1);
    }

    #[test]
    fn test_parallel_callers_never_exceed_budget() {
        let limiter = Arc::new(limiter());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    (0..10)
                        .filter(|_| limiter.check_and_record("shared", 1_000).allowed)
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 20);
    }

    #[tokio::test]
    async fn test_store_trait_reports_tracked_clients() {
        let store: Arc<dyn RateLimitStore> = Arc::new(limiter());
        store.record("a", 0).await.unwrap();
        store.record("b", 0).await.unwrap();
        assert_eq!(store.tracked_clients(), Some(2));
    }
}
