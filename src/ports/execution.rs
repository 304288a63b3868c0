//! Execution Venue Port - Order Execution Interface
//!
//! Defines the trait the pipeline's work function calls to execute a
//! validated order, the venue error taxonomy, and the cooperative
//! cancellation flag handed to every running task.
//!
//! Key design decisions:
//! - Venues never see raw requests, only `ValidatedOrder`s
//! - Cancellation is cooperative: venues poll or await the flag at safe points
//! - Venue errors map onto the pipeline's fault kinds in one place

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::domain::envelope::{Fault, FaultKind};
use crate::domain::order::{ExecutionResult, ValidatedOrder};

/// Cooperative cancellation flag shared between a task and its handle.
///
/// Cloning is cheap; every clone observes the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
  inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
  cancelled: AtomicBool,
  notify: Notify,
}

impl CancelFlag {
  /// Create a flag in the not-cancelled state.
  pub fn new() -> Self {
    Self::default()
  }

  /// Raise the flag and wake every `cancelled()` waiter. Idempotent.
  pub fn cancel(&self) {
    if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
      self.inner.notify.notify_waiters();
    }
  }

  /// Check the flag without waiting.
  pub fn is_cancelled(&self) -> bool {
    self.inner.cancelled.load(Ordering::SeqCst)
  }

  /// Resolve once the flag is raised.
  pub async fn cancelled(&self) {
    loop {
      let notified = self.inner.notify.notified();
      tokio::pin!(notified);
      // Register before checking so a concurrent cancel() is never missed.
      notified.as_mut().enable();
      if self.is_cancelled() {
        return;
      }
      notified.await;
    }
  }
}

/// Errors a venue can report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VenueError {
  /// Venue unreachable or overloaded; worth retrying.
  #[error("venue unavailable: {0}")]
  Unavailable(String),
  /// No reference price for the symbol.
  #[error("no quote for symbol {0}")]
  NoQuote(String),
  /// Venue refused the order.
  #[error("order rejected by venue: {0}")]
  Rejected(String),
  /// Fill or notional computation failed.
  #[error("pricing failed: {0}")]
  Pricing(String),
  /// Execution observed the cancel flag and stopped.
  #[error("execution cancelled")]
  Cancelled,
}

impl VenueError {
  /// Only transient unavailability is retried locally.
  pub const fn is_transient(&self) -> bool {
    matches!(self, Self::Unavailable(_))
  }

  /// Fault kind this error maps to.
  pub const fn fault_kind(&self) -> FaultKind {
    match self {
      Self::Unavailable(_) | Self::NoQuote(_) | Self::Rejected(_) => FaultKind::ExternalServiceFailure,
      Self::Pricing(_) => FaultKind::ComputationFailure,
      Self::Cancelled => FaultKind::PoolSaturation,
    }
  }
}

impl From<VenueError> for Fault {
  fn from(err: VenueError) -> Self {
    match err {
      VenueError::Cancelled => Self::cancelled(),
      other => Self::new(other.fault_kind(), other.to_string()),
    }
  }
}

/// Trait for execution venues.
///
/// Implementors fill (or refuse) validated orders. They must be safe to
/// call concurrently from every pool worker.
#[async_trait]
pub trait ExecutionVenue: Send + Sync + 'static {
  /// Execute a validated order.
  ///
  /// Long-running implementations should observe `cancel` and return
  /// `VenueError::Cancelled` once it is raised.
  async fn execute(
    &self,
    order: &ValidatedOrder,
    cancel: &CancelFlag,
  ) -> Result<ExecutionResult, VenueError>;

  /// Check if the venue connection is healthy.
  async fn is_healthy(&self) -> bool;
}
