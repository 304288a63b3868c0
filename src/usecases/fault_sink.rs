//! Fault Sink - Centralized Fault Capture
//!
//! Single process-wide collaborator that receives every fault record:
//! - Structured log line per record, severity by kind
//! - Bounded in-memory history for inspection
//! - Single background writer forwarding records to the backend port
//! - Bounded fallback buffer + degraded mode when the backend fails
//! - Sliding-window alert thresholds per fault kind
//!
//! `report` is synchronous and never fails toward the caller, so workers
//! can call it from inside their isolation boundary. Records reach the
//! backend in report order, including those that overflow the writer
//! queue into the fallback buffer.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::FaultSinkConfig;
use crate::domain::envelope::{Fault, FaultKind};
use crate::domain::fault::FaultRecord;
use crate::ports::fault_backend::FaultBackend;
use crate::ports::telemetry::{NoopObserver, PipelineObserver};

/// Raised when one fault kind crosses the configured threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
  /// Kind that crossed the threshold.
  pub kind: FaultKind,
  /// Faults of that kind inside the window.
  pub count: usize,
  /// Window length.
  pub window: Duration,
  /// When the alert fired.
  pub raised_at: DateTime<Utc>,
}

/// A record on its way to the backend, numbered in report order.
struct Pending {
  seq: u64,
  record: FaultRecord,
}

/// State shared between the sink handle and its writer task.
struct SinkState {
  /// Recent records, oldest first.
  history: Mutex<VecDeque<FaultRecord>>,
  /// Undelivered records, sorted by `seq`.
  fallback: Mutex<VecDeque<Pending>>,
  /// Per-kind timestamps inside the alert window.
  alert_windows: Mutex<HashMap<FaultKind, VecDeque<Instant>>>,
  history_capacity: usize,
  fallback_capacity: usize,
  alert_threshold: usize,
  alert_window: Duration,
  emit_timeout: Duration,
  degraded: AtomicBool,
  total: AtomicU64,
  dropped: AtomicU64,
  per_kind: HashMap<FaultKind, AtomicU64>,
  alert_tx: broadcast::Sender<Alert>,
  observer: Arc<dyn PipelineObserver>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SinkState {
  fn set_degraded(&self, degraded: bool) {
    if self.degraded.swap(degraded, Ordering::SeqCst) == degraded {
      return;
    }
    if degraded {
      warn!("Fault backend behind or unavailable, buffering records in memory (degraded mode)");
    } else {
      info!("Fault backend recovered, leaving degraded mode");
    }
    self.observer.sink_degraded(degraded);
  }

  /// Keep a record that could not be delivered, in report order.
  ///
  /// A full buffer evicts its oldest record.
  fn buffer_fallback(&self, pending: Pending) {
    let mut fallback = lock(&self.fallback);
    let position = fallback.partition_point(|p| p.seq < pending.seq);
    fallback.insert(position, pending);
    if fallback.len() > self.fallback_capacity {
      fallback.pop_front();
      self.dropped.fetch_add(1, Ordering::Relaxed);
    }
    // Under the lock, so a concurrent flush cannot clear it behind our back.
    self.set_degraded(true);
  }

  /// Emit one record with the configured timeout.
  async fn emit(&self, backend: &dyn FaultBackend, record: &FaultRecord) -> bool {
    match tokio::time::timeout(self.emit_timeout, backend.emit(record)).await {
      Ok(Ok(())) => true,
      Ok(Err(e)) => {
        warn!(error = %e, kind = %record.kind, "Fault backend emit failed");
        false
      }
      Err(_) => {
        warn!(
          timeout_ms = self.emit_timeout.as_millis() as u64,
          kind = %record.kind,
          "Fault backend emit timed out"
        );
        false
      }
    }
  }

  /// Drain the fallback buffer into the backend, oldest first.
  ///
  /// Stops at the first failure and leaves the rest buffered.
  async fn flush_fallback(&self, backend: &dyn FaultBackend) -> bool {
    loop {
      let next = {
        let mut fallback = lock(&self.fallback);
        let next = fallback.pop_front();
        if next.is_none() {
          self.set_degraded(false);
        }
        next
      };
      let Some(pending) = next else {
        return true;
      };
      if !self.emit(backend, &pending.record).await {
        lock(&self.fallback).push_front(pending);
        return false;
      }
    }
  }

  /// Deliver one record, preserving order behind anything buffered.
  async fn deliver(&self, backend: &dyn FaultBackend, pending: Pending) {
    if self.degraded.load(Ordering::SeqCst) {
      self.buffer_fallback(pending);
      self.flush_fallback(backend).await;
      return;
    }
    if !self.emit(backend, &pending.record).await {
      self.buffer_fallback(pending);
    }
  }

  fn check_alert(&self, kind: FaultKind) {
    if self.alert_threshold == 0 {
      return;
    }

    let now = Instant::now();
    let count = {
      let mut windows = lock(&self.alert_windows);
      let window = windows.entry(kind).or_default();
      window.push_back(now);
      while window
        .front()
        .is_some_and(|t| now.duration_since(*t) > self.alert_window)
      {
        window.pop_front();
      }
      if window.len() < self.alert_threshold {
        return;
      }
      let count = window.len();
      // Restart the window so one burst raises one alert.
      window.clear();
      count
    };

    let alert = Alert {
      kind,
      count,
      window: self.alert_window,
      raised_at: Utc::now(),
    };
    error!(
      kind = %kind,
      count,
      window_secs = self.alert_window.as_secs(),
      "Fault alert threshold reached"
    );
    self.observer.alert_raised(kind);
    let _ = self.alert_tx.send(alert);
  }
}

/// Process-wide fault sink.
pub struct FaultSink {
  state: Arc<SinkState>,
  /// Queue to the backend writer (absent without a backend).
  writer_tx: Option<mpsc::Sender<Pending>>,
  /// Stops the writer after draining.
  shutdown_tx: broadcast::Sender<()>,
  /// Writer task handle, taken on shutdown.
  writer: Mutex<Option<JoinHandle<()>>>,
}

impl FaultSink {
  /// Create a sink.
  ///
  /// With a backend, a writer task is spawned, so this must be called
  /// from within a Tokio runtime.
  pub fn new(
    config: &FaultSinkConfig,
    backend: Option<Arc<dyn FaultBackend>>,
    observer: Arc<dyn PipelineObserver>,
  ) -> Self {
    let (alert_tx, _) = broadcast::channel(64);
    let (shutdown_tx, _) = broadcast::channel(1);

    let state = Arc::new(SinkState {
      history: Mutex::new(VecDeque::with_capacity(config.history_capacity.min(1_024))),
      fallback: Mutex::new(VecDeque::new()),
      alert_windows: Mutex::new(HashMap::new()),
      history_capacity: config.history_capacity.max(1),
      fallback_capacity: config.fallback_capacity.max(1),
      alert_threshold: config.alert_threshold as usize,
      alert_window: config.alert_window(),
      emit_timeout: config.emit_timeout(),
      degraded: AtomicBool::new(false),
      total: AtomicU64::new(0),
      dropped: AtomicU64::new(0),
      per_kind: FaultKind::ALL.iter().map(|k| (*k, AtomicU64::new(0))).collect(),
      alert_tx,
      observer,
    });

    let (writer_tx, writer) = match backend {
      Some(backend) => {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let handle = tokio::spawn(run_writer(
          Arc::clone(&state),
          backend,
          rx,
          shutdown_tx.subscribe(),
        ));
        (Some(tx), Some(handle))
      }
      None => (None, None),
    };

    Self {
      state,
      writer_tx,
      shutdown_tx,
      writer: Mutex::new(writer),
    }
  }

  /// Sink with logging and history only, no backend.
  pub fn in_memory(config: &FaultSinkConfig) -> Self {
    Self::new(config, None, Arc::new(NoopObserver))
  }

  /// Record one fault. Never fails and never blocks on I/O.
  pub fn report(&self, record: FaultRecord) {
    let state = &self.state;
    let seq = state.total.fetch_add(1, Ordering::SeqCst);
    if let Some(counter) = state.per_kind.get(&record.kind) {
      counter.fetch_add(1, Ordering::Relaxed);
    }
    state.observer.fault_reported(record.kind);

    log_record(&record);

    {
      let mut history = lock(&state.history);
      if history.len() >= state.history_capacity {
        history.pop_front();
      }
      history.push_back(record.clone());
    }

    state.check_alert(record.kind);

    if let Some(tx) = &self.writer_tx {
      match tx.try_send(Pending { seq, record }) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(pending)) => {
          debug!(seq, "Fault writer queue full");
          state.buffer_fallback(pending);
        }
        Err(mpsc::error::TrySendError::Closed(pending)) => {
          state.buffer_fallback(pending);
        }
      }
    }
  }

  /// Convenience wrapper building the record from a fault.
  pub fn report_fault(&self, fault: &Fault, source_task_id: Option<u64>, context: &str) {
    self.report(FaultRecord::from_fault(fault, source_task_id, context));
  }

  /// Recent records, oldest first.
  pub fn history(&self) -> Vec<FaultRecord> {
    lock(&self.state.history).iter().cloned().collect()
  }

  /// Whether records are currently being buffered in memory.
  pub fn is_degraded(&self) -> bool {
    self.state.degraded.load(Ordering::SeqCst)
  }

  /// Records waiting in the fallback buffer.
  pub fn fallback_len(&self) -> usize {
    lock(&self.state.fallback).len()
  }

  /// Records evicted from a full fallback buffer.
  pub fn dropped(&self) -> u64 {
    self.state.dropped.load(Ordering::Relaxed)
  }

  /// Records reported since start.
  pub fn total(&self) -> u64 {
    self.state.total.load(Ordering::Relaxed)
  }

  /// Records of one kind reported since start.
  pub fn count(&self, kind: FaultKind) -> u64 {
    self
      .state
      .per_kind
      .get(&kind)
      .map_or(0, |c| c.load(Ordering::Relaxed))
  }

  /// Receive alerts raised after this call.
  pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
    self.state.alert_tx.subscribe()
  }

  /// Drain queued records to the backend and stop the writer.
  #[instrument(skip(self))]
  pub async fn shutdown(&self) {
    let handle = lock(&self.writer).take();
    let Some(handle) = handle else {
      return;
    };
    let _ = self.shutdown_tx.send(());
    if let Err(e) = handle.await {
      error!(error = %e, "Fault writer task failed");
    }
    info!(
      total = self.total(),
      buffered = self.fallback_len(),
      "Fault sink stopped"
    );
  }
}

/// Log one record at the severity its kind calls for.
fn log_record(record: &FaultRecord) {
  let task_id = record.source_task_id;
  match record.kind {
    FaultKind::UnhandledTaskFault => error!(
      kind = %record.kind,
      task_id,
      message = %record.message,
      context = %record.stack_context,
      "Unhandled task fault"
    ),
    FaultKind::ExternalServiceFailure | FaultKind::ComputationFailure | FaultKind::PoolSaturation => {
      warn!(
        kind = %record.kind,
        task_id,
        message = %record.message,
        context = %record.stack_context,
        "Fault reported"
      );
    }
    FaultKind::ValidationFailure => info!(
      kind = %record.kind,
      message = %record.message,
      "Order rejected"
    ),
  }
}

/// Backend writer loop: one record at a time, so lines never interleave.
async fn run_writer(
  state: Arc<SinkState>,
  backend: Arc<dyn FaultBackend>,
  mut rx: mpsc::Receiver<Pending>,
  mut shutdown_rx: broadcast::Receiver<()>,
) {
  debug!("Fault writer started");

  loop {
    tokio::select! {
      biased;
      _ = shutdown_rx.recv() => {
        rx.close();
        while let Some(pending) = rx.recv().await {
          state.deliver(backend.as_ref(), pending).await;
        }
        if !state.flush_fallback(backend.as_ref()).await {
          warn!(
            buffered = lock(&state.fallback).len(),
            "Fault backend still unavailable at shutdown"
          );
        }
        break;
      }
      maybe = rx.recv() => match maybe {
        Some(pending) => state.deliver(backend.as_ref(), pending).await,
        None => break,
      },
    }
  }

  debug!("Fault writer stopped");
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::AtomicUsize;

  use async_trait::async_trait;

  use super::*;

  /// Backend that stores records and can be switched off.
  #[derive(Default)]
  struct MemoryBackend {
    records: Mutex<Vec<FaultRecord>>,
    failing: AtomicBool,
    attempts: AtomicUsize,
  }

  #[async_trait]
  impl FaultBackend for MemoryBackend {
    async fn emit(&self, record: &FaultRecord) -> anyhow::Result<()> {
      self.attempts.fetch_add(1, Ordering::SeqCst);
      if self.failing.load(Ordering::SeqCst) {
        anyhow::bail!("disk full");
      }
      self.records.lock().unwrap().push(record.clone());
      Ok(())
    }

    async fn is_healthy(&self) -> bool {
      !self.failing.load(Ordering::SeqCst)
    }
  }

  /// Backend whose emits wait until `open` is called.
  struct GatedBackend {
    gate: tokio::sync::Semaphore,
    records: Mutex<Vec<FaultRecord>>,
    attempts: AtomicUsize,
  }

  impl GatedBackend {
    fn new() -> Self {
      Self {
        gate: tokio::sync::Semaphore::new(0),
        records: Mutex::new(Vec::new()),
        attempts: AtomicUsize::new(0),
      }
    }

    fn open(&self) {
      self.gate.add_permits(1);
    }
  }

  #[async_trait]
  impl FaultBackend for GatedBackend {
    async fn emit(&self, record: &FaultRecord) -> anyhow::Result<()> {
      self.attempts.fetch_add(1, Ordering::SeqCst);
      let _permit = self.gate.acquire().await?;
      self.records.lock().unwrap().push(record.clone());
      Ok(())
    }

    async fn is_healthy(&self) -> bool {
      true
    }
  }

  fn config() -> FaultSinkConfig {
    FaultSinkConfig {
      history_capacity: 4,
      fallback_capacity: 3,
      alert_threshold: 0,
      ..FaultSinkConfig::default()
    }
  }

  fn record(kind: FaultKind, message: &str) -> FaultRecord {
    FaultRecord::new(kind, message, None, "test")
  }

  #[tokio::test]
  async fn test_history_is_bounded() {
    let sink = FaultSink::in_memory(&config());
    for i in 0..6 {
      sink.report(record(FaultKind::ComputationFailure, &format!("f{i}")));
    }
    let history = sink.history();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].message, "f2");
    assert_eq!(sink.total(), 6);
    assert_eq!(sink.count(FaultKind::ComputationFailure), 6);
    assert_eq!(sink.count(FaultKind::ValidationFailure), 0);
  }

  #[tokio::test]
  async fn test_records_reach_backend() {
    let backend = Arc::new(MemoryBackend::default());
    let sink = FaultSink::new(&config(), Some(backend.clone()), Arc::new(NoopObserver));

    sink.report(record(FaultKind::ExternalServiceFailure, "a"));
    sink.report(record(FaultKind::UnhandledTaskFault, "b"));
    sink.shutdown().await;

    let stored = backend.records.lock().unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].message, "a");
    assert_eq!(stored[1].message, "b");
    assert!(!sink.is_degraded());
  }

  #[tokio::test]
  async fn test_failing_backend_degrades_to_fallback() {
    let backend = Arc::new(MemoryBackend::default());
    backend.failing.store(true, Ordering::SeqCst);
    let sink = FaultSink::new(&config(), Some(backend.clone()), Arc::new(NoopObserver));

    for i in 0..5 {
      sink.report(record(FaultKind::ComputationFailure, &format!("f{i}")));
    }
    sink.shutdown().await;

    assert!(sink.is_degraded());
    // Fallback keeps the newest records up to its capacity.
    assert_eq!(sink.fallback_len(), 3);
    assert_eq!(sink.dropped(), 2);
    assert_eq!(sink.history().len(), 4);
  }

  #[tokio::test]
  async fn test_recovery_flushes_fallback_in_order() {
    let backend = Arc::new(MemoryBackend::default());
    backend.failing.store(true, Ordering::SeqCst);
    let sink = FaultSink::new(&config(), Some(backend.clone()), Arc::new(NoopObserver));

    sink.report(record(FaultKind::ComputationFailure, "first"));
    tokio::time::timeout(Duration::from_secs(1), async {
      while !sink.is_degraded() {
        tokio::time::sleep(Duration::from_millis(5)).await;
      }
    })
    .await
    .unwrap();

    backend.failing.store(false, Ordering::SeqCst);
    sink.report(record(FaultKind::ComputationFailure, "second"));
    sink.shutdown().await;

    let stored = backend.records.lock().unwrap();
    let messages: Vec<_> = stored.iter().map(|r| r.message.as_str()).collect();
    assert_eq!(messages, vec!["first", "second"]);
    assert!(!sink.is_degraded());
    assert_eq!(sink.fallback_len(), 0);
  }

  #[tokio::test]
  async fn test_writer_queue_overflow_keeps_backend_order() {
    let backend = Arc::new(GatedBackend::new());
    let cfg = FaultSinkConfig {
      channel_capacity: 1,
      fallback_capacity: 16,
      emit_timeout_ms: 5_000,
      ..config()
    };
    let sink = FaultSink::new(&cfg, Some(backend.clone()), Arc::new(NoopObserver));

    // Writer holds "r0" inside the backend.
    sink.report(record(FaultKind::ComputationFailure, "r0"));
    tokio::time::timeout(Duration::from_secs(1), async {
      while backend.attempts.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(2)).await;
      }
    })
    .await
    .unwrap();

    // "r1" fills the queue; the rest overflow into the fallback buffer.
    for i in 1..5 {
      sink.report(record(FaultKind::ComputationFailure, &format!("r{i}")));
    }
    assert_eq!(sink.fallback_len(), 3);

    backend.open();
    sink.shutdown().await;

    let stored = backend.records.lock().unwrap();
    let messages: Vec<_> = stored.iter().map(|r| r.message.as_str()).collect();
    assert_eq!(messages, vec!["r0", "r1", "r2", "r3", "r4"]);
    assert_eq!(sink.fallback_len(), 0);
    assert!(!sink.is_degraded());
  }

  #[tokio::test]
  async fn test_alert_fires_at_threshold() {
    let cfg = FaultSinkConfig {
      alert_threshold: 3,
      alert_window_secs: 60,
      ..config()
    };
    let sink = FaultSink::in_memory(&cfg);
    let mut alerts = sink.subscribe_alerts();

    sink.report(record(FaultKind::ExternalServiceFailure, "1"));
    sink.report(record(FaultKind::ValidationFailure, "other kind"));
    sink.report(record(FaultKind::ExternalServiceFailure, "2"));
    assert!(alerts.try_recv().is_err());

    sink.report(record(FaultKind::ExternalServiceFailure, "3"));
    let alert = alerts.try_recv().unwrap();
    assert_eq!(alert.kind, FaultKind::ExternalServiceFailure);
    assert_eq!(alert.count, 3);

    // Window restarted: the next fault alone does not alert again.
    sink.report(record(FaultKind::ExternalServiceFailure, "4"));
    assert!(alerts.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_concurrent_reports_are_all_counted() {
    let backend = Arc::new(MemoryBackend::default());
    let cfg = FaultSinkConfig {
      history_capacity: 1_000,
      ..config()
    };
    let sink = Arc::new(FaultSink::new(&cfg, Some(backend.clone()), Arc::new(NoopObserver)));

    let mut handles = Vec::new();
    for t in 0..8 {
      let sink = Arc::clone(&sink);
      handles.push(tokio::spawn(async move {
        for i in 0..25 {
          sink.report(record(FaultKind::ComputationFailure, &format!("{t}-{i}")));
        }
      }));
    }
    for h in handles {
      h.await.unwrap();
    }
    sink.shutdown().await;

    assert_eq!(sink.total(), 200);
    assert_eq!(sink.history().len(), 200);
    assert_eq!(
      backend.records.lock().unwrap().len() + sink.fallback_len(),
      200
    );
  }

  #[tokio::test]
  async fn test_shutdown_is_idempotent() {
    let backend = Arc::new(MemoryBackend::default());
    let sink = FaultSink::new(&config(), Some(backend), Arc::new(NoopObserver));
    sink.shutdown().await;
    sink.shutdown().await;
    // Reports after shutdown still land in history and fallback.
    sink.report(record(FaultKind::PoolSaturation, "late"));
    assert_eq!(sink.history().len(), 1);
    assert_eq!(sink.fallback_len(), 1);
  }
}
