use std::time::Duration;

use rand::{Rng, SeedableRng, rngs::SmallRng};
use tokio_util::sync::CancellationToken;

use super::types::RetryConfig;

/// Policy deciding how long to wait before the next connection attempt.
pub trait BackoffPolicy: Send + 'static {
    /// Wait before the next attempt, or `None` once the retry budget is spent.
    fn next_backoff(&mut self) -> Option<Duration>;

    /// Forget previous attempts.
    fn reset(&mut self);

    /// Backoffs handed out since the last reset.
    fn attempts(&self) -> u32;
}

/// How many times a failed connect may be retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryBudget {
    Unlimited,
    Never,
    Limited(u32),
}

impl RetryBudget {
    /// `-1` (or any negative) is unlimited, `0` never retries, `N` allows `N` retries.
    pub fn from_retries(retries: i32) -> Self {
        match retries {
            r if r < 0 => RetryBudget::Unlimited,
            0 => RetryBudget::Never,
            r => RetryBudget::Limited(r as u32),
        }
    }

    fn allows(self, attempts: u32) -> bool {
        match self {
            RetryBudget::Unlimited => true,
            RetryBudget::Never => false,
            RetryBudget::Limited(max) => attempts < max,
        }
    }
}

/// `2^attempt` seconds plus up to one second of jitter, capped at `maximum`.
///
/// Once the uncapped value first exceeds `maximum`, every later wait is exactly `maximum`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    budget: RetryBudget,
    maximum: Duration,
    attempts: u32,
    at_ceiling: bool,
    rng: SmallRng,
}

impl ExponentialBackoff {
    pub fn new(budget: RetryBudget, maximum: Duration) -> Self {
        Self {
            budget,
            maximum,
            attempts: 0,
            at_ceiling: false,
            rng: SmallRng::from_entropy(),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            RetryBudget::from_retries(config.retries),
            config.maximum_backoff,
        )
    }

    pub fn budget(&self) -> RetryBudget {
        self.budget
    }

    pub fn is_at_ceiling(&self) -> bool {
        self.at_ceiling
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        if !self.budget.allows(self.attempts) {
            return None;
        }
        let exponent = self.attempts.min(62) as i32;
        self.attempts = self.attempts.saturating_add(1);

        if self.at_ceiling {
            return Some(self.maximum);
        }

        let jitter: f64 = self.rng.gen_range(0.0..1.0);
        let secs = 2f64.powi(exponent) + jitter;
        if secs > self.maximum.as_secs_f64() {
            self.at_ceiling = true;
            return Some(self.maximum);
        }
        Some(Duration::from_secs_f64(secs))
    }

    fn reset(&mut self) {
        self.attempts = 0;
        self.at_ceiling = false;
    }

    fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Outcome of [`wait_backoff`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackoffWait {
    /// The full delay passed; go ahead with the next attempt.
    Elapsed(Duration),
    /// The cancellation token fired during the wait.
    Interrupted,
    /// The policy has no retries left.
    Exhausted,
}

/// Sleep for the policy's next delay unless `cancel` fires first.
pub async fn wait_backoff<P>(policy: &mut P, cancel: &CancellationToken) -> BackoffWait
where
    P: BackoffPolicy + ?Sized,
{
    let Some(delay) = policy.next_backoff() else {
        return BackoffWait::Exhausted;
    };
    if cancel.is_cancelled() {
        return BackoffWait::Interrupted;
    }
    tokio::select! {
        _ = cancel.cancelled() => BackoffWait::Interrupted,
        _ = tokio::time::sleep(delay) => BackoffWait::Elapsed(delay),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finite_budget_hands_out_exactly_n_waits() {
        let mut policy = ExponentialBackoff::new(RetryBudget::from_retries(3), Duration::from_secs(10));
        let mut previous = Duration::ZERO;
        for _ in 0..3 {
            let delay = policy.next_backoff().expect("budget left");
            assert!(delay < Duration::from_millis(10_000), "{delay:?}");
            assert!(delay >= previous, "{delay:?} < {previous:?}");
            previous = delay;
        }
        assert_eq!(policy.next_backoff(), None);
        assert_eq!(policy.next_backoff(), None);
        assert_eq!(policy.attempts(), 3);
    }

    #[test]
    fn unlimited_budget_never_stops_and_locks_to_ceiling() {
        let max = Duration::from_secs(10);
        let mut policy = ExponentialBackoff::new(RetryBudget::from_retries(-1), max);
        for _ in 0..1_000 {
            assert!(policy.next_backoff().is_some());
        }
        assert!(policy.is_at_ceiling());
        assert_eq!(policy.next_backoff(), Some(max));
    }

    #[test]
    fn zero_budget_never_retries() {
        let mut policy = ExponentialBackoff::new(RetryBudget::from_retries(0), Duration::from_secs(10));
        assert_eq!(policy.next_backoff(), None);
        assert_eq!(policy.attempts(), 0);
    }

    #[test]
    fn waits_grow_exponentially_with_bounded_jitter() {
        let mut policy = ExponentialBackoff::new(RetryBudget::Unlimited, Duration::from_secs(300));
        for attempt in 0..6 {
            let base = 2f64.powi(attempt);
            let secs = policy.next_backoff().expect("unlimited").as_secs_f64();
            assert!(secs >= base && secs < base + 1.0, "attempt {attempt}: {secs}");
        }
    }

    #[test]
    fn ceiling_is_sticky_once_reached() {
        let max = Duration::from_secs(3);
        let mut policy = ExponentialBackoff::new(RetryBudget::Limited(10), max);
        // 1+j and 2+j stay below 3s; 4+j exceeds it.
        assert!(policy.next_backoff().expect("left") < max);
        assert!(policy.next_backoff().expect("left") < max);
        for _ in 0..8 {
            assert_eq!(policy.next_backoff(), Some(max));
        }
        assert_eq!(policy.next_backoff(), None);
    }

    #[test]
    fn reset_restarts_the_sequence() {
        let mut policy = ExponentialBackoff::new(RetryBudget::Limited(1), Duration::from_secs(1));
        assert_eq!(policy.next_backoff(), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_backoff(), None);
        policy.reset();
        assert!(!policy.is_at_ceiling());
        assert_eq!(policy.next_backoff(), Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn cancelled_token_interrupts_wait() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut policy = ExponentialBackoff::new(RetryBudget::Unlimited, Duration::from_secs(60));
        assert_eq!(wait_backoff(&mut policy, &cancel).await, BackoffWait::Interrupted);
    }

    #[tokio::test]
    async fn exhausted_budget_reports_without_sleeping() {
        let cancel = CancellationToken::new();
        let mut policy = ExponentialBackoff::new(RetryBudget::Never, Duration::from_secs(60));
        assert_eq!(wait_backoff(&mut policy, &cancel).await, BackoffWait::Exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_elapses_after_delay() {
        let cancel = CancellationToken::new();
        let mut policy = ExponentialBackoff::new(RetryBudget::Limited(1), Duration::from_millis(250));
        let started = tokio::time::Instant::now();
        assert_eq!(
            wait_backoff(&mut policy, &cancel).await,
            BackoffWait::Elapsed(Duration::from_millis(250))
        );
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_wait_interrupts() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let mut policy = ExponentialBackoff::new(RetryBudget::Unlimited, Duration::from_secs(60));
        assert_eq!(wait_backoff(&mut policy, &cancel).await, BackoffWait::Interrupted);
    }
}
