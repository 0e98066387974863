/// Inbound rate limiting - one token bucket per connection
///
/// `RateLimiter` holds the shared policy; each connection owns its
/// `RateLimitState`, so connections never contend with each other.
use std::time::Duration;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// Outcome of admitting one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Rejected; a token becomes available after `retry_after`
    Rejected { retry_after: Duration },
    /// Rejected, and the violation streak crossed the configured threshold
    Escalate { violations: u32 },
}

/// Shared token bucket policy
#[derive(Debug, Clone)]
pub struct RateLimiter {
    capacity: u32,
    refill_interval: Duration,
    max_violations: u32,
    violation_window: Duration,
}

/// Per-connection bucket
#[derive(Debug, Clone)]
pub struct RateLimitState {
    tokens: u32,
    last_refill: Instant,
    violations: u32,
    first_violation: Option<Instant>,
    total_rejected: u64,
}

impl RateLimitState {
    /// Current whole tokens (as of the last admit)
    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    /// Consecutive rejections in the current streak
    pub fn violations(&self) -> u32 {
        self.violations
    }

    /// Lifetime rejections for this connection
    pub fn total_rejected(&self) -> u64 {
        self.total_rejected
    }
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            capacity: config.capacity.max(1),
            refill_interval: Duration::from_millis(config.refill_interval_ms.max(1)),
            max_violations: config.max_violations,
            violation_window: Duration::from_secs(config.violation_window_secs),
        }
    }

    /// Fresh, full bucket
    pub fn new_state(&self, now: Instant) -> RateLimitState {
        RateLimitState {
            tokens: self.capacity,
            last_refill: now,
            violations: 0,
            first_violation: None,
            total_rejected: 0,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Consume one token if available
    pub fn admit(&self, state: &mut RateLimitState, now: Instant) -> Admission {
        self.refill(state, now);

        if state.tokens > 0 {
            state.tokens -= 1;
            state.violations = 0;
            state.first_violation = None;
            return Admission::Allowed;
        }

        state.total_rejected += 1;

        // A streak that started outside the window starts over
        let streak_start = match state.first_violation {
            Some(start) if now.duration_since(start) <= self.violation_window => start,
            _ => {
                state.violations = 0;
                now
            }
        };
        state.first_violation = Some(streak_start);
        state.violations += 1;

        if self.max_violations > 0 && state.violations >= self.max_violations {
            return Admission::Escalate {
                violations: state.violations,
            };
        }

        let since_refill = now.duration_since(state.last_refill);
        Admission::Rejected {
            retry_after: self.refill_interval.saturating_sub(since_refill),
        }
    }

    /// Add whole tokens for elapsed time, keeping the fractional remainder
    fn refill(&self, state: &mut RateLimitState, now: Instant) {
        if state.tokens >= self.capacity {
            state.last_refill = now;
            return;
        }

        let elapsed = now.duration_since(state.last_refill);
        let interval_nanos = self.refill_interval.as_nanos();
        let earned = elapsed.as_nanos() / interval_nanos;
        if earned == 0 {
            return;
        }

        let missing = u128::from(self.capacity - state.tokens);
        if earned >= missing {
            state.tokens = self.capacity;
            state.last_refill = now;
        } else {
            state.tokens += earned as u32;
            let consumed = self.refill_interval * earned as u32;
            state.last_refill += consumed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(capacity: u32, refill_ms: u64, max_violations: u32) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            capacity,
            refill_interval_ms: refill_ms,
            max_violations,
            violation_window_secs: 10,
        })
    }

    #[test]
    fn test_burst_up_to_capacity_then_reject() {
        let limiter = limiter(5, 100, 0);
        let start = Instant::now();
        let mut state = limiter.new_state(start);

        for _ in 0..5 {
            assert_eq!(limiter.admit(&mut state, start), Admission::Allowed);
        }
        match limiter.admit(&mut state, start) {
            Admission::Rejected { retry_after } => {
                assert_eq!(retry_after, Duration::from_millis(100))
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(state.total_rejected(), 1);
    }

    #[test]
    fn test_refill_is_lazy_and_bounded() {
        let limiter = limiter(3, 100, 0);
        let start = Instant::now();
        let mut state = limiter.new_state(start);
        for _ in 0..3 {
            limiter.admit(&mut state, start);
        }

        // 250ms -> two whole tokens, 50ms carried over
        let later = start + Duration::from_millis(250);
        assert_eq!(limiter.admit(&mut state, later), Admission::Allowed);
        assert_eq!(limiter.admit(&mut state, later), Admission::Allowed);
        assert!(matches!(
            limiter.admit(&mut state, later),
            Admission::Rejected { retry_after } if retry_after == Duration::from_millis(50)
        ));

        // The carried 50ms completes a token at 300ms
        let next = start + Duration::from_millis(300);
        assert_eq!(limiter.admit(&mut state, next), Admission::Allowed);

        // A long idle never overfills
        let much_later = start + Duration::from_secs(60);
        limiter.admit(&mut state, much_later);
        assert_eq!(state.tokens(), 2);
    }

    #[test]
    fn test_sustained_rate_matches_refill() {
        let limiter = limiter(2, 100, 0);
        let start = Instant::now();
        let mut state = limiter.new_state(start);

        // One attempt every 10ms for one second: capacity + one per 100ms
        let mut allowed = 0;
        for step in 0..=100u64 {
            let now = start + Duration::from_millis(step * 10);
            if limiter.admit(&mut state, now) == Admission::Allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 2 + 10);
    }

    #[test]
    fn test_violation_streak_escalates() {
        let limiter = limiter(1, 1_000, 3);
        let start = Instant::now();
        let mut state = limiter.new_state(start);

        assert_eq!(limiter.admit(&mut state, start), Admission::Allowed);
        assert!(matches!(limiter.admit(&mut state, start), Admission::Rejected { .. }));
        assert!(matches!(limiter.admit(&mut state, start), Admission::Rejected { .. }));
        assert_eq!(
            limiter.admit(&mut state, start),
            Admission::Escalate { violations: 3 }
        );
    }

    #[test]
    fn test_admission_resets_streak() {
        let limiter = limiter(1, 100, 3);
        let start = Instant::now();
        let mut state = limiter.new_state(start);

        limiter.admit(&mut state, start);
        limiter.admit(&mut state, start);
        limiter.admit(&mut state, start);
        assert_eq!(state.violations(), 2);

        let later = start + Duration::from_millis(100);
        assert_eq!(limiter.admit(&mut state, later), Admission::Allowed);
        assert_eq!(state.violations(), 0);

        // One interval buys exactly one request
        assert!(matches!(
            limiter.admit(&mut state, later),
            Admission::Rejected { .. }
        ));
        assert_eq!(state.violations(), 1);
    }

    #[test]
    fn test_stale_violations_fall_out_of_window() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            capacity: 1,
            refill_interval_ms: 60_000,
            max_violations: 3,
            violation_window_secs: 1,
        });
        let start = Instant::now();
        let mut state = limiter.new_state(start);

        limiter.admit(&mut state, start);
        limiter.admit(&mut state, start);
        limiter.admit(&mut state, start);
        assert_eq!(state.violations(), 2);

        // Outside the window the streak restarts instead of escalating
        let later = start + Duration::from_secs(2);
        assert!(matches!(limiter.admit(&mut state, later), Admission::Rejected { .. }));
        assert_eq!(state.violations(), 1);
    }
}
