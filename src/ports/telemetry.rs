//! Telemetry Port - Observability Hooks
//!
//! Use cases report what happens through `PipelineObserver`; adapters turn
//! those calls into metrics. `StatusSource` exposes a point-in-time
//! snapshot for health endpoints.

use std::time::Duration;

use serde::Serialize;

use crate::domain::envelope::FaultKind;

/// Terminal outcome of one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderOutcome {
  Completed,
  Rejected,
  Failed,
}

impl OrderOutcome {
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Completed => "completed",
      Self::Rejected => "rejected",
      Self::Failed => "failed",
    }
  }
}

/// Receives pipeline events. Every method defaults to a no-op.
pub trait PipelineObserver: Send + Sync + 'static {
  /// An order reached a terminal state.
  fn order_finished(&self, _outcome: OrderOutcome, _latency: Duration) {}

  /// A fault record reached the fault sink.
  fn fault_reported(&self, _kind: FaultKind) {}

  /// An alert threshold fired.
  fn alert_raised(&self, _kind: FaultKind) {}

  /// The fault sink entered or left degraded mode.
  fn sink_degraded(&self, _degraded: bool) {}

  /// Current number of queued, not-yet-started tasks.
  fn queue_depth(&self, _depth: usize) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Point-in-time view of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatus {
  /// Whether new orders are being admitted.
  pub accepting: bool,
  /// Worker count.
  pub pool_size: usize,
  /// Queued, not-yet-started tasks.
  pub queue_depth: usize,
  /// Maximum queued tasks.
  pub queue_capacity: usize,
  /// Workers currently running a task.
  pub active_workers: usize,
  /// Tasks admitted into the queue.
  pub submitted: u64,
  /// Tasks that produced an `Ok` envelope.
  pub completed: u64,
  /// Tasks that produced an `Err` envelope while running.
  pub failed: u64,
  /// Submissions refused by admission control.
  pub rejected: u64,
  /// Tasks cancelled or drained before they started.
  pub cancelled: u64,
  /// Fault sink is buffering in memory.
  pub sink_degraded: bool,
  /// Records waiting in the sink's fallback buffer.
  pub fallback_buffered: usize,
  /// Fault records reported since start.
  pub faults_total: u64,
}

/// Anything that can produce a `PipelineStatus`.
pub trait StatusSource: Send + Sync + 'static {
  fn status(&self) -> PipelineStatus;
}
