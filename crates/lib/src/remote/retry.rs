//! Retry policies for remote calls.

use std::time::Duration;

use super::RemoteError;

/// Decides whether a failed remote call is attempted again.
pub trait RetryPolicy: Send + Sync {
  /// Delay before attempt `attempt + 1`, or `None` to give up.
  ///
  /// `attempt` counts calls made so far, starting at 1. Terminal errors
  /// never reach the policy.
  fn next_delay(&self, attempt: u32, error: &RemoteError) -> Option<Duration>;
}

/// Never retry. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
  fn next_delay(&self, _attempt: u32, _error: &RemoteError) -> Option<Duration> {
    None
  }
}

/// Delay growth between attempts.
#[derive(Debug, Clone, Copy)]
pub enum BackoffStrategy {
  Constant(Duration),
  Linear(Duration),
  Exponential(Duration),
}

impl BackoffStrategy {
  pub fn delay(&self, attempt: u32) -> Duration {
    match self {
      Self::Constant(d) => *d,
      Self::Linear(d) => *d * attempt,
      Self::Exponential(d) => *d * 2u32.saturating_pow(attempt.saturating_sub(1)),
    }
  }
}

/// Retry transient failures up to `max_attempts` total calls.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
  pub max_attempts: u32,
  pub strategy: BackoffStrategy,
}

impl Backoff {
  pub fn exponential(max_attempts: u32, base: Duration) -> Self {
    Self {
      max_attempts,
      strategy: BackoffStrategy::Exponential(base),
    }
  }
}

impl RetryPolicy for Backoff {
  fn next_delay(&self, attempt: u32, _error: &RemoteError) -> Option<Duration> {
    (attempt < self.max_attempts).then(|| self.strategy.delay(attempt))
  }
}
