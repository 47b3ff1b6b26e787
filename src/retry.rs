// src/retry.rs

//! Retry backoff policies.
//!
//! The manager asks a [`RetryScheduler`] how long a freshly spawned retry
//! has to wait before it becomes eligible. `attempt` is the number of
//! retries already spawned for the chain, so the first retry is attempt 0.

use std::fmt::Debug;
use std::time::Duration;

pub trait RetryScheduler: Send + Sync + Debug {
    fn delay_for(&self, attempt: u32) -> Duration;
}

/// `base ^ attempt` seconds, optionally capped. Default base is 5, giving
/// 1s, 5s, 25s, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialRetryScheduler {
    pub base: u32,
    pub cap: Option<Duration>,
}

impl ExponentialRetryScheduler {
    pub fn new(base: u32) -> Self {
        Self { base, cap: None }
    }

    pub fn with_cap(mut self, cap: Duration) -> Self {
        self.cap = Some(cap);
        self
    }
}

impl Default for ExponentialRetryScheduler {
    fn default() -> Self {
        Self::new(5)
    }
}

impl RetryScheduler for ExponentialRetryScheduler {
    fn delay_for(&self, attempt: u32) -> Duration {
        let secs = u64::from(self.base).saturating_pow(attempt);
        let delay = Duration::from_secs(secs);
        match self.cap {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

/// Same delay for every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRetryScheduler(pub Duration);

impl RetryScheduler for FixedRetryScheduler {
    fn delay_for(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// Retries are eligible immediately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoDelayRetryScheduler;

impl RetryScheduler for NoDelayRetryScheduler {
    fn delay_for(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_grows_geometrically() {
        let s = ExponentialRetryScheduler::default();
        let delays: Vec<u64> = (0..4).map(|n| s.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 5, 25, 125]);
    }

    #[test]
    fn exponential_saturates_and_caps() {
        let s = ExponentialRetryScheduler::new(10);
        assert_eq!(s.delay_for(1000), Duration::from_secs(u64::MAX));

        let capped = s.with_cap(Duration::from_secs(60));
        assert_eq!(capped.delay_for(1), Duration::from_secs(10));
        assert_eq!(capped.delay_for(5), Duration::from_secs(60));
    }

    #[test]
    fn alternate_policies() {
        assert_eq!(
            FixedRetryScheduler(Duration::from_secs(3)).delay_for(7),
            Duration::from_secs(3)
        );
        assert_eq!(NoDelayRetryScheduler.delay_for(3), Duration::ZERO);
    }
}
