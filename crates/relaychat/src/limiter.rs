//! Fixed-window request limiting per client identity
//!
//! Each identity gets a counter that resets lazily on the first request
//! after its window ends. This is a fixed window, not a sliding one: a
//! client can fit up to twice the ceiling into a short span straddling a
//! window boundary.
//!
//! Records whose window has elapsed are removed by a periodic sweep so that
//! churned identities do not accumulate.

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::RateLimitConfig;
use crate::error::{RelayError, Result};

/// Per-identity counter state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateRecord {
    /// Requests admitted in the current window
    pub count: u32,
    /// When the current window ends
    pub window_reset_at: DateTime<Utc>,
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected {
        /// Whole seconds until the window resets, rounded up
        retry_after_secs: u64,
    },
}

/// Concurrent fixed-window rate limiter
///
/// The record table is a sharded map; each admission is a single
/// entry update, so concurrent requests for the same identity never lose
/// increments and no lock is held beyond the check itself.
#[derive(Debug)]
pub struct RateLimiter {
    records: DashMap<String, RateRecord>,
    max_requests: u32,
    window: TimeDelta,
}

impl RateLimiter {
    /// Create a limiter admitting `max_requests` per `window`
    pub fn new(max_requests: u32, window: Duration) -> Result<Self> {
        let window = TimeDelta::from_std(window)
            .map_err(|e| RelayError::Config(format!("Invalid rate limit window: {e}")))?;

        Ok(Self {
            records: DashMap::new(),
            max_requests,
            window,
        })
    }

    pub fn from_config(config: &RateLimitConfig) -> Result<Self> {
        Self::new(config.max_requests, config.window())
    }

    /// Check and count a request from `identity` at the current time
    pub fn admit(&self, identity: &str) -> Admission {
        self.admit_at(identity, Utc::now())
    }

    /// Check and count a request from `identity` at `now`
    pub fn admit_at(&self, identity: &str, now: DateTime<Utc>) -> Admission {
        match self.records.entry(identity.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(RateRecord {
                    count: 1,
                    window_reset_at: now + self.window,
                });
                Admission::Allowed
            }
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();

                if now >= record.window_reset_at {
                    record.count = 1;
                    record.window_reset_at = now + self.window;
                    Admission::Allowed
                } else if record.count < self.max_requests {
                    record.count += 1;
                    Admission::Allowed
                } else {
                    let remaining_ms = (record.window_reset_at - now).num_milliseconds();
                    Admission::Rejected {
                        retry_after_secs: (remaining_ms.max(0) as u64).div_ceil(1000),
                    }
                }
            }
        }
    }

    /// Remove records whose window has elapsed, returning how many were removed
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.records.retain(|_, record| {
            let live = record.window_reset_at > now;
            if !live {
                removed += 1;
            }
            live
        });
        removed
    }

    /// Run [`Self::sweep`] every `every` on its own task
    ///
    /// The first sweep happens one interval after the call. Abort the
    /// returned handle to stop sweeping.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        let every = every.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let removed = limiter.sweep();
                if removed > 0 {
                    tracing::debug!(
                        removed,
                        remaining = limiter.len(),
                        "Swept expired rate limit records"
                    );
                }
            }
        })
    }

    /// Snapshot of the record for `identity`
    pub fn record(&self, identity: &str) -> Option<RateRecord> {
        self.records.get(identity).map(|r| r.value().clone())
    }

    /// Number of tracked identities
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(10, Duration::from_secs(60)).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_first_request_creates_record() {
        let limiter = limiter();
        assert_eq!(limiter.admit_at("10.0.0.1", t0()), Admission::Allowed);

        let record = limiter.record("10.0.0.1").unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(record.window_reset_at, t0() + TimeDelta::seconds(60));
    }

    #[test]
    fn test_eleventh_request_is_rejected() {
        let limiter = limiter();
        for i in 0..10 {
            let now = t0() + TimeDelta::seconds(i);
            assert_eq!(limiter.admit_at("alice", now), Admission::Allowed, "request {i}");
        }

        match limiter.admit_at("alice", t0() + TimeDelta::seconds(15)) {
            Admission::Rejected { retry_after_secs } => {
                assert_eq!(retry_after_secs, 45);
                assert!(retry_after_secs <= 60);
            }
            Admission::Allowed => panic!("11th request should be rejected"),
        }
        assert_eq!(limiter.record("alice").unwrap().count, 10);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let limiter = limiter();
        for _ in 0..10 {
            limiter.admit_at("bob", t0());
        }

        let now = t0() + TimeDelta::milliseconds(59_001);
        assert_eq!(
            limiter.admit_at("bob", now),
            Admission::Rejected { retry_after_secs: 1 }
        );
    }

    #[test]
    fn test_window_elapsed_resets_count() {
        let limiter = limiter();
        for _ in 0..11 {
            limiter.admit_at("carol", t0());
        }

        let later = t0() + TimeDelta::seconds(60);
        assert_eq!(limiter.admit_at("carol", later), Admission::Allowed);

        let record = limiter.record("carol").unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(record.window_reset_at, later + TimeDelta::seconds(60));
    }

    #[test]
    fn test_boundary_burst_is_allowed() {
        // Fixed window: 10 at the end of one window plus 10 at the start of the next
        let limiter = limiter();
        let end_of_window = t0() + TimeDelta::seconds(59);
        limiter.admit_at("dave", t0());
        for _ in 0..9 {
            assert_eq!(limiter.admit_at("dave", end_of_window), Admission::Allowed);
        }

        let next_window = t0() + TimeDelta::seconds(60);
        for _ in 0..10 {
            assert_eq!(limiter.admit_at("dave", next_window), Admission::Allowed);
        }
    }

    #[test]
    fn test_identities_are_independent() {
        let limiter = limiter();
        for _ in 0..10 {
            limiter.admit_at("erin", t0());
        }

        assert!(matches!(
            limiter.admit_at("erin", t0()),
            Admission::Rejected { .. }
        ));
        assert_eq!(limiter.admit_at("frank", t0()), Admission::Allowed);
    }

    #[test]
    fn test_sweep_removes_only_expired_records() {
        let limiter = limiter();
        limiter.admit_at("old", t0());
        limiter.admit_at("fresh", t0() + TimeDelta::seconds(30));

        let removed = limiter.sweep_at(t0() + TimeDelta::seconds(61));

        assert_eq!(removed, 1);
        assert!(limiter.record("old").is_none());
        assert!(limiter.record("fresh").is_some());
    }

    #[test]
    fn test_invalid_window_is_rejected() {
        assert!(RateLimiter::new(10, Duration::MAX).is_err());
    }

    #[tokio::test]
    async fn test_concurrent_admissions_do_not_lose_updates() {
        let limiter = Arc::new(limiter());
        let now = Utc::now();

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.admit_at("shared", now) })
            })
            .collect();

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() == Admission::Allowed {
                allowed += 1;
            }
        }

        assert_eq!(allowed, 10);
        assert_eq!(limiter.record("shared").unwrap().count, 10);
    }

    #[tokio::test]
    async fn test_sweeper_task_purges_stale_records() {
        let limiter = Arc::new(limiter());
        limiter.admit_at("stale", Utc::now() - TimeDelta::minutes(5));
        assert_eq!(limiter.len(), 1);

        let handle = limiter.spawn_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(limiter.is_empty());
    }
}
