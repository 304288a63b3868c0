//! Order Pipeline - Intake Orchestration
//!
//! Composes the pipeline for one order:
//! 1. Intake rate limit (optional, governor)
//! 2. `ValidationGate` → reject early with `ValidationFailure`
//! 3. Submit the venue call to the `TaskExecutor`
//! 4. Await the envelope within the per-order deadline
//!
//! Every order ends in exactly one terminal state and yields exactly one
//! envelope. Rejections, pipeline-level timeouts and shutdown
//! cancellations are reported to the `FaultSink` here; faults raised
//! while a task runs are reported by the executor. A timed-out order is
//! reported once: the pipeline abandons the task before reporting.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tracing::{debug, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::domain::envelope::{Fault, ResultEnvelope};
use crate::domain::order::{ExecutionResult, OrderRequest};
use crate::domain::validation::ValidationGate;
use crate::ports::execution::ExecutionVenue;
use crate::ports::telemetry::{OrderOutcome, PipelineObserver, PipelineStatus, StatusSource};
use crate::usecases::fault_sink::FaultSink;
use crate::usecases::retry::RetryPolicy;
use crate::usecases::task_executor::{ExecutorSettings, TaskExecutor};

/// Lifecycle of one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderState {
  Received,
  Validating,
  Rejected,
  Queued,
  Executing,
  Completed,
  Failed,
}

impl OrderState {
  pub const fn is_terminal(self) -> bool {
    matches!(self, Self::Rejected | Self::Completed | Self::Failed)
  }

  /// Legal transitions.
  ///
  /// `Received → Rejected` covers the intake rate limit; `Queued → Failed`
  /// covers orders that time out or are drained before a worker starts them.
  pub const fn can_transition_to(self, next: Self) -> bool {
    matches!(
      (self, next),
      (Self::Received, Self::Validating | Self::Rejected)
        | (Self::Validating, Self::Rejected | Self::Queued)
        | (Self::Queued, Self::Executing | Self::Failed)
        | (Self::Executing, Self::Completed | Self::Failed)
    )
  }

  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Received => "received",
      Self::Validating => "validating",
      Self::Rejected => "rejected",
      Self::Queued => "queued",
      Self::Executing => "executing",
      Self::Completed => "completed",
      Self::Failed => "failed",
    }
  }
}

impl std::fmt::Display for OrderState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Per-order state tracker.
#[derive(Debug)]
struct OrderLifecycle {
  state: OrderState,
  received_at: Instant,
}

impl OrderLifecycle {
  fn start() -> Self {
    Self {
      state: OrderState::Received,
      received_at: Instant::now(),
    }
  }

  /// Move to `next`; illegal transitions are refused and logged.
  fn advance(&mut self, next: OrderState) -> bool {
    if !self.state.can_transition_to(next) {
      warn!(from = %self.state, to = %next, "Refused illegal order state transition");
      return false;
    }
    debug!(from = %self.state, to = %next, "Order state transition");
    self.state = next;
    true
  }
}

/// Bounded concurrent order intake.
pub struct OrderPipeline<V: ExecutionVenue> {
  gate: ValidationGate,
  executor: TaskExecutor,
  sink: Arc<FaultSink>,
  venue: Arc<V>,
  retry: RetryPolicy,
  per_order_timeout: Duration,
  limiter: Option<DefaultDirectRateLimiter>,
  observer: Arc<dyn PipelineObserver>,
}

impl<V: ExecutionVenue> OrderPipeline<V> {
  /// Build the pipeline and start its worker pool.
  ///
  /// Must be called from within a Tokio runtime.
  pub fn new(
    config: &PipelineConfig,
    venue: Arc<V>,
    sink: Arc<FaultSink>,
    observer: Arc<dyn PipelineObserver>,
  ) -> Self {
    let executor = TaskExecutor::new(
      ExecutorSettings::from(config),
      Arc::clone(&sink),
      Arc::clone(&observer),
    );
    let limiter = NonZeroU32::new(config.max_orders_per_second)
      .map(|rate| RateLimiter::direct(Quota::per_second(rate)));

    info!(
      per_order_timeout_ms = config.per_order_timeout_ms,
      venue_retries = config.venue_retries,
      rate_limit = config.max_orders_per_second,
      "Order pipeline initialized"
    );

    Self {
      gate: ValidationGate::new(),
      executor,
      sink,
      venue,
      retry: RetryPolicy::from(config),
      per_order_timeout: config.per_order_timeout(),
      limiter,
      observer,
    }
  }

  /// Process one order to a terminal state.
  #[instrument(
    skip(self, req),
    fields(symbol = %req.symbol(), side = %req.side(), quantity = req.quantity())
  )]
  pub async fn process_order(&self, req: OrderRequest) -> ResultEnvelope<ExecutionResult> {
    let mut lifecycle = OrderLifecycle::start();
    let deadline = tokio::time::Instant::from_std(lifecycle.received_at) + self.per_order_timeout;

    // ── Intake rate limit ──
    if let Some(limiter) = &self.limiter {
      if limiter.check().is_err() {
        let fault = Fault::saturated("intake rate limit exceeded");
        self.sink.report_fault(&fault, None, "order intake");
        return self.finish(lifecycle, OrderState::Rejected, Err(fault));
      }
    }

    // ── Validation ──
    lifecycle.advance(OrderState::Validating);
    let order = match self.gate.validate(&req) {
      Ok(order) => order,
      Err(fault) => {
        self.sink.report_fault(&fault, None, "validation gate");
        return self.finish(lifecycle, OrderState::Rejected, Err(fault));
      }
    };

    // ── Submission ──
    let venue = Arc::clone(&self.venue);
    let retry = self.retry;
    let submitted = self.executor.submit(order, move |order, cancel| async move {
      let result = retry
        .run(&cancel, || venue.execute(&order, &cancel))
        .await?;
      Ok(result)
    });
    let handle = match submitted {
      Ok(handle) => handle,
      // Already reported by the executor.
      Err(fault) => return self.finish(lifecycle, OrderState::Rejected, Err(fault)),
    };
    lifecycle.advance(OrderState::Queued);

    // ── Await within the per-order deadline ──
    let control = handle.control();
    let envelope = match tokio::time::timeout_at(deadline, handle.wait()).await {
      Ok(envelope) => {
        if let Err(fault) = &envelope {
          if fault.is_cancellation() {
            self.sink.report_fault(fault, Some(control.id()), "order drained before execution");
          }
        }
        envelope
      }
      Err(_) => {
        let fault = Fault::timeout();
        // The task may still fail later; only one side reports it.
        if control.abandon() {
          self.sink.report_fault(
            &fault,
            Some(control.id()),
            &format!("order exceeded {}ms deadline", self.per_order_timeout.as_millis()),
          );
        }
        Err(fault)
      }
    };

    if control.has_started() {
      lifecycle.advance(OrderState::Executing);
    }
    let terminal = if envelope.is_ok() {
      OrderState::Completed
    } else {
      OrderState::Failed
    };
    self.finish(lifecycle, terminal, envelope)
  }

  /// Process a batch concurrently. Results keep the input order.
  pub async fn process_batch(&self, requests: Vec<OrderRequest>) -> Vec<ResultEnvelope<ExecutionResult>> {
    join_all(requests.into_iter().map(|req| self.process_order(req))).await
  }

  fn finish(
    &self,
    mut lifecycle: OrderLifecycle,
    terminal: OrderState,
    envelope: ResultEnvelope<ExecutionResult>,
  ) -> ResultEnvelope<ExecutionResult> {
    lifecycle.advance(terminal);
    let latency = lifecycle.received_at.elapsed();
    let latency_ms = latency.as_millis() as u64;

    let outcome = match (&envelope, lifecycle.state) {
      (Ok(result), _) => {
        info!(
          execution_id = %result.execution_id,
          fill_price = %result.fill_price,
          notional = %result.notional,
          latency_ms,
          "Order completed"
        );
        OrderOutcome::Completed
      }
      (Err(fault), OrderState::Rejected) => {
        debug!(kind = %fault.kind(), message = fault.message(), latency_ms, "Order rejected");
        OrderOutcome::Rejected
      }
      (Err(fault), _) => {
        warn!(kind = %fault.kind(), message = fault.message(), latency_ms, "Order failed");
        OrderOutcome::Failed
      }
    };
    self.observer.order_finished(outcome, latency);

    envelope
  }

  pub const fn gate(&self) -> &ValidationGate {
    &self.gate
  }

  /// The worker pool, for callers submitting custom work.
  pub const fn executor(&self) -> &TaskExecutor {
    &self.executor
  }

  pub const fn sink(&self) -> &Arc<FaultSink> {
    &self.sink
  }

  pub const fn venue(&self) -> &Arc<V> {
    &self.venue
  }

  /// Stop intake, drain the pool and flush the fault sink.
  #[instrument(skip(self))]
  pub async fn shutdown(&self) {
    self.executor.shutdown().await;
    self.sink.shutdown().await;
    info!("Order pipeline stopped");
  }
}

impl<V: ExecutionVenue> StatusSource for OrderPipeline<V> {
  fn status(&self) -> PipelineStatus {
    let stats = self.executor.stats();
    PipelineStatus {
      accepting: stats.accepting,
      pool_size: stats.pool_size,
      queue_depth: stats.queue_depth,
      queue_capacity: stats.queue_capacity,
      active_workers: stats.active_workers,
      submitted: stats.submitted,
      completed: stats.completed,
      failed: stats.failed,
      rejected: stats.rejected,
      cancelled: stats.cancelled,
      sink_degraded: self.sink.is_degraded(),
      fallback_buffered: self.sink.fallback_len(),
      faults_total: self.sink.total(),
    }
  }
}
