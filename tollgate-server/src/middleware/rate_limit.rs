//! Per-user request rate limiting.
//!
//! A keyed GCRA limiter (leaky-bucket family) with one cell per user id.
//! Decisions carry what the `X-RateLimit-*` headers need.

use std::num::NonZeroU32;

use axum::response::Response;
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    middleware::StateInformationMiddleware,
    state::keyed::DefaultKeyedStateStore,
};

type KeyedLimiter =
    RateLimiter<i64, DefaultKeyedStateStore<i64>, DefaultClock, StateInformationMiddleware>;

/// Outcome of a rate check
#[derive(Debug, Clone, Copy)]
pub enum RateDecision {
    Allowed { limit: u64, remaining: u64 },
    Limited { limit: u64, retry_after_secs: u64 },
}

/// Per-user rate gate with a configurable requests-per-minute ceiling.
pub struct RateGate {
    limiter: KeyedLimiter,
    clock: DefaultClock,
    limit: u64,
}

impl RateGate {
    pub fn new(requests_per_minute: u64) -> Self {
        let rpm = u32::try_from(requests_per_minute.max(1)).unwrap_or(u32::MAX);
        let quota = Quota::per_minute(NonZeroU32::new(rpm).expect("rpm is non-zero"));

        Self {
            limiter: RateLimiter::keyed(quota).with_middleware::<StateInformationMiddleware>(),
            clock: DefaultClock::default(),
            limit: requests_per_minute.max(1),
        }
    }

    /// Check one request against the user's bucket.
    pub fn check(&self, user_id: i64) -> RateDecision {
        match self.limiter.check_key(&user_id) {
            Ok(snapshot) => RateDecision::Allowed {
                limit: self.limit,
                remaining: u64::from(snapshot.remaining_burst_capacity()),
            },
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                RateDecision::Limited {
                    limit: self.limit,
                    retry_after_secs: wait.as_secs().max(1),
                }
            }
        }
    }
}

/// Stamp the standard rate headers on a successful response.
pub fn apply_headers(response: &mut Response, limit: u64, remaining: u64) {
    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Limit", limit.into());
    headers.insert("X-RateLimit-Remaining", remaining.into());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_within_limit_are_allowed() {
        let gate = RateGate::new(10);

        for i in 0..10 {
            match gate.check(1) {
                RateDecision::Allowed { limit, .. } => assert_eq!(limit, 10),
                RateDecision::Limited { .. } => panic!("request {} should be allowed", i + 1),
            }
        }
    }

    #[test]
    fn test_excess_requests_are_limited() {
        let gate = RateGate::new(5);

        for _ in 0..5 {
            assert!(matches!(gate.check(1), RateDecision::Allowed { .. }));
        }

        match gate.check(1) {
            RateDecision::Limited {
                limit,
                retry_after_secs,
            } => {
                assert_eq!(limit, 5);
                assert!(retry_after_secs >= 1);
            }
            RateDecision::Allowed { .. } => panic!("sixth request should be limited"),
        }
    }

    #[test]
    fn test_users_have_separate_buckets() {
        let gate = RateGate::new(2);

        assert!(matches!(gate.check(1), RateDecision::Allowed { .. }));
        assert!(matches!(gate.check(1), RateDecision::Allowed { .. }));
        assert!(matches!(gate.check(1), RateDecision::Limited { .. }));

        // A different user is unaffected
        assert!(matches!(gate.check(2), RateDecision::Allowed { .. }));
    }

    #[test]
    fn test_remaining_counts_down() {
        let gate = RateGate::new(3);

        let first = gate.check(7);
        let second = gate.check(7);
        match (first, second) {
            (
                RateDecision::Allowed {
                    remaining: first_remaining,
                    ..
                },
                RateDecision::Allowed {
                    remaining: second_remaining,
                    ..
                },
            ) => assert!(second_remaining < first_remaining),
            _ => panic!("both requests should be allowed"),
        }
    }
}
