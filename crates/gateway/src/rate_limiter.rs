//! In-process sliding-window rate limiting, keyed by user.
//!
//! Each user maps to an ordered deque of monotonic arrival timestamps.
//! Admission evicts hour-aged entries, checks the hourly then the per-minute
//! window, and appends the arrival only when admitted. State is process-local:
//! a restart resets all counters.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use gateway_sql::Tier;

const HOUR: f64 = 3600.0;
const MINUTE: f64 = 60.0;

/// Requests admitted per minute and per hour for one tier.
#[derive(Debug, Copy, Clone)]
pub struct TierLimits {
    pub per_minute: usize,
    pub per_hour: usize,
}

/// The full limit table, one entry per tier.
#[derive(Debug, Copy, Clone)]
pub struct RateLimits {
    pub free: TierLimits,
    pub standard: TierLimits,
    pub premium: TierLimits,
}

impl RateLimits {
    pub fn for_tier(&self, tier: Tier) -> TierLimits {
        match tier {
            Tier::Free => self.free,
            Tier::Standard => self.standard,
            Tier::Premium => self.premium,
        }
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            free: TierLimits { per_minute: 10, per_hour: 100 },
            standard: TierLimits { per_minute: 30, per_hour: 300 },
            premium: TierLimits { per_minute: 100, per_hour: 1000 },
        }
    }
}

/// Which window tripped a rejection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Window {
    Minute,
    Hour,
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Window::Minute => f.write_str("minute"),
            Window::Hour => f.write_str("hour"),
        }
    }
}

/// An admission refusal: which limit tripped, and when to retry.
#[derive(Debug, Copy, Clone)]
pub struct Rejection {
    pub tier: Tier,
    pub window: Window,
    pub limit: usize,
    pub retry_after: u64,
}

/// Admissibility snapshot used for response headers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub minute_limit: usize,
    pub minute_remaining: usize,
    pub hour_limit: usize,
    pub hour_remaining: usize,
}

pub struct RateLimiter {
    started: Instant,
    limits: RateLimits,
    history: Mutex<HashMap<String, VecDeque<f64>>>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            started: Instant::now(),
            limits,
            history: Mutex::new(HashMap::new()),
        }
    }

    fn now(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Decide admission for one request of `user_id` at the current instant.
    /// On admission the arrival is recorded and the post-admission status is
    /// returned, computed under the same lock as the decision so the headers
    /// it feeds always agree with the decision they accompany.
    pub fn admit(&self, user_id: &str, tier: Tier) -> Result<RateLimitStatus, Rejection> {
        self.admit_at(self.now(), user_id, tier)
    }

    /// Report the current admissibility state without mutating it.
    pub fn status(&self, user_id: &str, tier: Tier) -> RateLimitStatus {
        self.status_at(self.now(), user_id, tier)
    }

    fn admit_at(&self, now: f64, user_id: &str, tier: Tier) -> Result<RateLimitStatus, Rejection> {
        let TierLimits { per_minute, per_hour } = self.limits.for_tier(tier);
        let mut history = self.history.lock().unwrap();
        let deque = history.entry(user_id.to_string()).or_default();

        // Evict entries older than the hour window before any check, so
        // hour-aged arrivals count toward neither window.
        let hour_ago = now - HOUR;
        while deque.front().is_some_and(|&t| t < hour_ago) {
            deque.pop_front();
        }

        if deque.len() >= per_hour {
            // Front is the oldest surviving arrival; it leaves the window
            // (3600 - (now - front)) seconds from now. An empty deque can
            // trip only under a zero limit, which never reopens.
            let retry_after = match deque.front() {
                Some(&front) => (HOUR - (now - front)).ceil() as u64,
                None => HOUR as u64,
            };
            return Err(Rejection {
                tier,
                window: Window::Hour,
                limit: per_hour,
                retry_after,
            });
        }

        let minute_ago = now - MINUTE;
        let in_minute = deque.iter().filter(|&&t| t >= minute_ago).count();
        if in_minute >= per_minute {
            let retry_after = match deque.iter().copied().find(|&t| t >= minute_ago) {
                Some(oldest_in_window) => (MINUTE - (now - oldest_in_window)).floor() as u64 + 1,
                None => MINUTE as u64,
            };
            return Err(Rejection {
                tier,
                window: Window::Minute,
                limit: per_minute,
                retry_after,
            });
        }

        deque.push_back(now);
        Ok(RateLimitStatus {
            minute_limit: per_minute,
            minute_remaining: per_minute.saturating_sub(in_minute + 1),
            hour_limit: per_hour,
            hour_remaining: per_hour.saturating_sub(deque.len()),
        })
    }

    fn status_at(&self, now: f64, user_id: &str, tier: Tier) -> RateLimitStatus {
        let TierLimits { per_minute, per_hour } = self.limits.for_tier(tier);
        let history = self.history.lock().unwrap();

        let (in_minute, in_hour) = match history.get(user_id) {
            Some(deque) => (
                deque.iter().filter(|&&t| t >= now - MINUTE).count(),
                deque.iter().filter(|&&t| t >= now - HOUR).count(),
            ),
            None => (0, 0),
        };

        RateLimitStatus {
            minute_limit: per_minute,
            minute_remaining: per_minute.saturating_sub(in_minute),
            hour_limit: per_hour,
            hour_remaining: per_hour.saturating_sub(in_hour),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(RateLimits::default())
    }

    #[test]
    fn standard_tier_trips_the_minute_window_and_recovers() {
        let limiter = limiter();

        // A burst of 30 requests at t=0 all admit.
        for i in 0..30 {
            let status = limiter
                .admit_at(0.0, "u", Tier::Standard)
                .expect("within limits");
            assert_eq!(status.minute_remaining, 30 - (i + 1) as usize);
        }

        // Request 31 at t=30s is refused; the burst leaves the minute window
        // at t=60, so Retry-After lands in [30, 31].
        let rejection = limiter.admit_at(30.0, "u", Tier::Standard).unwrap_err();
        assert_eq!(rejection.window, Window::Minute);
        assert_eq!(rejection.limit, 30);
        assert!((30..=31).contains(&rejection.retry_after));

        // The refusal was not recorded.
        assert_eq!(limiter.status_at(30.0, "u", Tier::Standard).hour_remaining, 270);

        // At t=60.1 the burst has aged out of the minute window.
        let status = limiter.admit_at(60.1, "u", Tier::Standard).expect("window reopened");
        assert_eq!(status.minute_remaining, 29);
        assert_eq!(status.hour_remaining, 300 - 31);
        assert_eq!(limiter.status_at(60.2, "u", Tier::Standard).minute_remaining, 29);
    }

    #[test]
    fn free_tier_trips_the_hour_window() {
        let limiter = limiter();

        // 100 requests spaced 35s apart stay under the minute limit but fill
        // the hour.
        for i in 0..100u32 {
            limiter
                .admit_at(i as f64 * 35.0, "u", Tier::Free)
                .expect("within limits");
        }

        let now = 100.0 * 35.0;
        let rejection = limiter.admit_at(now, "u", Tier::Free).unwrap_err();
        assert_eq!(rejection.window, Window::Hour);
        assert_eq!(rejection.limit, 100);
        // Oldest arrival is t=0 and exits the hour window at t=3600.
        assert_eq!(rejection.retry_after, 3600 - now as u64);
    }

    #[test]
    fn hour_aged_entries_count_toward_neither_window() {
        let limiter = RateLimiter::new(RateLimits {
            free: TierLimits { per_minute: 2, per_hour: 3 },
            ..RateLimits::default()
        });

        limiter.admit_at(0.0, "u", Tier::Free).unwrap();
        limiter.admit_at(1.0, "u", Tier::Free).unwrap();
        limiter.admit_at(100.0, "u", Tier::Free).unwrap();
        assert!(limiter.admit_at(101.0, "u", Tier::Free).is_err());

        // One hour later the first two arrivals are evicted; both windows
        // admit again and the deque never exceeds the hour limit.
        let status = limiter.admit_at(3601.5, "u", Tier::Free).expect("evicted");
        assert!(status.hour_remaining <= 3);
        assert_eq!(limiter.history.lock().unwrap()["u"].len(), 2);
    }

    #[test]
    fn bounds_hold_under_a_dense_arrival_sequence() {
        let limiter = RateLimiter::new(RateLimits {
            free: TierLimits { per_minute: 5, per_hour: 20 },
            ..RateLimits::default()
        });

        // Ten arrivals per second for two simulated minutes; only the
        // admitted ones may occupy the deque.
        for tick in 0..1200u32 {
            let now = tick as f64 * 0.1;
            let _ = limiter.admit_at(now, "u", Tier::Free);

            let history = limiter.history.lock().unwrap();
            let deque = &history["u"];
            assert!(deque.len() <= 20);
            assert!(deque.iter().filter(|&&t| t >= now - MINUTE).count() <= 5);
            // Arrival order is non-decreasing.
            assert!(deque.iter().zip(deque.iter().skip(1)).all(|(a, b)| a <= b));
        }
    }

    #[test]
    fn status_does_not_mutate_and_users_are_independent() {
        let limiter = limiter();

        limiter.admit_at(0.0, "alice", Tier::Free).unwrap();
        for _ in 0..5 {
            let status = limiter.status_at(1.0, "alice", Tier::Free);
            assert_eq!(status.minute_remaining, 9);
            assert_eq!(status.hour_remaining, 99);
        }

        let status = limiter.status_at(1.0, "bob", Tier::Premium);
        assert_eq!(status.minute_remaining, 100);
        assert_eq!(status.hour_remaining, 1000);
    }
}
