//! Reconnect decisions for the stream connection manager.
//!
//! The policy is pure: it looks at the number of retries already scheduled
//! and answers whether another one is allowed and how long to wait. The wait
//! itself comes from a pluggable [`Backoff`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::retry::jitter_duration;

/// Default number of retries after a connection loss.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// Default wait before each retry.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Computes the wait before a retry.
///
/// `attempt` is the 1-based number of the retry being scheduled.
pub trait Backoff: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

impl<F> Backoff for F
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    fn delay(&self, attempt: u32) -> Duration {
        self(attempt)
    }
}

/// Same wait before every retry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FixedDelay(pub Duration);

impl Backoff for FixedDelay {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// Doubling wait capped at `max`, plus up to `jitter` of noise.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub jitter: Duration,
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let mut delay = self.initial;
        for _ in 1..attempt {
            delay = std::cmp::min(delay.saturating_mul(2), self.max);
        }
        delay.saturating_add(jitter_duration(self.jitter, attempt as usize))
    }
}

/// Outcome of [`ReconnectPolicy::decide`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReconnectDecision {
    /// Schedule retry number `attempt` after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// Automatic reconnection is turned off.
    Disabled,
    /// The retry budget is spent.
    Exhausted,
}

/// Bounded reconnect policy.
#[derive(Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub auto_reconnect: bool,
    backoff: Arc<dyn Backoff>,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, auto_reconnect: bool, backoff: impl Backoff + 'static) -> Self {
        Self {
            max_attempts,
            auto_reconnect,
            backoff: Arc::new(backoff),
        }
    }

    /// Fixed-delay policy.
    pub fn fixed(max_attempts: u32, delay: Duration, auto_reconnect: bool) -> Self {
        Self::new(max_attempts, auto_reconnect, FixedDelay(delay))
    }

    /// Policy that never reconnects automatically.
    pub fn disabled() -> Self {
        Self::fixed(0, Duration::ZERO, false)
    }

    /// Replaces the backoff strategy, keeping the attempt budget.
    pub fn with_backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    /// Decides what to do after a connection loss when `attempts` retries
    /// have already been scheduled since the last successful open.
    pub fn decide(&self, attempts: u32) -> ReconnectDecision {
        if !self.auto_reconnect {
            return ReconnectDecision::Disabled;
        }
        if attempts >= self.max_attempts {
            return ReconnectDecision::Exhausted;
        }
        let attempt = attempts + 1;
        ReconnectDecision::Retry {
            attempt,
            delay: self.backoff.delay(attempt),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(
            DEFAULT_MAX_RECONNECT_ATTEMPTS,
            DEFAULT_RECONNECT_DELAY,
            true,
        )
    }
}

impl fmt::Debug for ReconnectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("first_delay", &self.backoff.delay(1))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Backoff, ExponentialBackoff, ReconnectDecision, ReconnectPolicy};

    #[test]
    fn default_policy_retries_five_times_with_fixed_delay() {
        let policy = ReconnectPolicy::default();
        for attempts in 0..5 {
            assert_eq!(
                policy.decide(attempts),
                ReconnectDecision::Retry {
                    attempt: attempts + 1,
                    delay: Duration::from_millis(3000),
                }
            );
        }
        assert_eq!(policy.decide(5), ReconnectDecision::Exhausted);
        assert_eq!(policy.decide(9), ReconnectDecision::Exhausted);
    }

    #[test]
    fn disabled_policy_never_retries() {
        let policy = ReconnectPolicy::fixed(5, Duration::from_millis(10), false);
        assert_eq!(policy.decide(0), ReconnectDecision::Disabled);
        assert_eq!(ReconnectPolicy::disabled().decide(0), ReconnectDecision::Disabled);
    }

    #[test]
    fn closure_backoff_is_consulted_with_attempt_number() {
        let policy = ReconnectPolicy::default()
            .with_backoff(|attempt: u32| Duration::from_millis(u64::from(attempt) * 100));
        assert_eq!(
            policy.decide(2),
            ReconnectDecision::Retry {
                attempt: 3,
                delay: Duration::from_millis(300),
            }
        );
    }

    #[test]
    fn exponential_backoff_doubles_up_to_cap() {
        let policy = ReconnectPolicy::new(
            10,
            true,
            ExponentialBackoff {
                initial: Duration::from_millis(100),
                max: Duration::from_millis(350),
                jitter: Duration::ZERO,
            },
        );
        let delays: Vec<Duration> = (0..4)
            .map(|attempts| match policy.decide(attempts) {
                ReconnectDecision::Retry { delay, .. } => delay,
                other => panic!("unexpected decision: {other:?}"),
            })
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(350),
                Duration::from_millis(350),
            ]
        );
    }

    #[test]
    fn jitter_on_saturated_backoff_does_not_overflow() {
        let backoff = ExponentialBackoff {
            initial: Duration::MAX,
            max: Duration::MAX,
            jitter: Duration::from_secs(1),
        };
        assert_eq!(backoff.delay(3), Duration::MAX);
    }
}
