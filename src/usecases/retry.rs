//! Retry Policy - Exponential Backoff for Transient Venue Failures
//!
//! Only `VenueError::is_transient` failures are retried, and only inside
//! the running task. Backoff sleeps are abandoned as soon as the task's
//! cancel flag is raised.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::config::PipelineConfig;
use crate::ports::execution::{CancelFlag, VenueError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Retries after the first attempt.
  pub max_retries: u32,
  /// Delay before the first retry; doubles each time.
  pub base_delay: Duration,
}

impl RetryPolicy {
  pub const fn none() -> Self {
    Self {
      max_retries: 0,
      base_delay: Duration::ZERO,
    }
  }

  /// Delay before retry number `attempt` (1-based).
  pub fn delay_for(&self, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    self.base_delay.saturating_mul(factor)
  }

  /// Run `op` until it succeeds, fails permanently, or retries run out.
  pub async fn run<T, F, Fut>(&self, cancel: &CancelFlag, mut op: F) -> Result<T, VenueError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VenueError>>,
  {
    let mut attempt = 0;
    loop {
      match op().await {
        Ok(value) => return Ok(value),
        Err(e) if e.is_transient() && attempt < self.max_retries => {
          attempt += 1;
          let delay = self.delay_for(attempt);
          debug!(
            attempt,
            max_retries = self.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "Retrying venue call"
          );
          tokio::select! {
            () = cancel.cancelled() => return Err(VenueError::Cancelled),
            () = tokio::time::sleep(delay) => {}
          }
        }
        Err(e) => return Err(e),
      }
    }
  }
}

impl From<&PipelineConfig> for RetryPolicy {
  fn from(config: &PipelineConfig) -> Self {
    Self {
      max_retries: config.venue_retries,
      base_delay: config.retry_base_delay(),
    }
  }
}
