use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Reconnection schedule: exponential growth, bounded jitter, a hard cap.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Fraction of the nominal delay added or removed at random, `0.0..=1.0`.
    pub jitter: f64,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Un-jittered delay before attempt `attempt` (zero-based), capped.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(64) as i32);
        let millis = (self.base_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

/// Stateful iterator over a [`BackoffPolicy`].
///
/// Delays never decrease across one reconnection cycle and never exceed the
/// policy cap. `None` means the attempt budget is spent.
#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
    last: Duration,
    rng: StdRng,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self::with_rng(policy, StdRng::from_entropy())
    }

    /// Deterministic jitter for tests.
    pub fn with_seed(policy: BackoffPolicy, seed: u64) -> Self {
        Self::with_rng(policy, StdRng::seed_from_u64(seed))
    }

    fn with_rng(policy: BackoffPolicy, rng: StdRng) -> Self {
        Self {
            policy,
            attempt: 0,
            last: Duration::ZERO,
            rng,
        }
    }

    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }

        let nominal = self.policy.nominal_delay(self.attempt);
        let jitter = self.policy.jitter.clamp(0.0, 1.0);
        let jittered = if jitter > 0.0 {
            let factor = self.rng.gen_range((1.0 - jitter)..=(1.0 + jitter));
            Duration::from_millis((nominal.as_millis() as f64 * factor) as u64)
        } else {
            nominal
        };

        let delay = jittered.min(self.policy.max_delay).max(self.last);
        self.last = delay;
        self.attempt += 1;
        Some(delay)
    }

    /// Attempts handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Starts a new cycle with the full attempt budget.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Backoff, BackoffPolicy};

    #[test]
    fn nominal_delay_grows_and_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.nominal_delay(0), Duration::from_secs(1));
        assert_eq!(policy.nominal_delay(1), Duration::from_secs(2));
        assert_eq!(policy.nominal_delay(3), Duration::from_secs(8));
        assert_eq!(policy.nominal_delay(10), Duration::from_secs(30));
    }

    #[test]
    fn delays_are_monotonic_capped_and_bounded_in_count() {
        for seed in 0..32 {
            let policy = BackoffPolicy {
                max_attempts: 8,
                jitter: 0.5,
                ..BackoffPolicy::default()
            };
            let mut backoff = Backoff::with_seed(policy.clone(), seed);
            let mut previous = Duration::ZERO;
            let mut count = 0;
            while let Some(delay) = backoff.next_delay() {
                assert!(delay >= previous, "seed {seed}: {delay:?} < {previous:?}");
                assert!(delay <= policy.max_delay);
                previous = delay;
                count += 1;
            }
            assert_eq!(count, 8);
            assert_eq!(backoff.next_delay(), None);
        }
    }

    #[test]
    fn reset_restarts_the_schedule() {
        let policy = BackoffPolicy {
            jitter: 0.0,
            max_attempts: 2,
            ..BackoffPolicy::default()
        };
        let mut backoff = Backoff::with_seed(policy, 7);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_delay(), None);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }
}
