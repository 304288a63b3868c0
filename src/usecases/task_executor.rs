//! Task Executor - Bounded Worker Pool with Isolated Tasks
//!
//! Fixed set of Tokio worker tasks pulling from one bounded FIFO queue.
//! Every submission gets a `TaskHandle` that resolves to exactly one
//! `ResultEnvelope`, whatever the work does:
//! - `Ok` value → `Ok`
//! - `Err(Fault)` / `Err(VenueError)` → typed fault
//! - any other error or a panic → `UnhandledTaskFault`
//! - task deadline → `ComputationFailure("timeout")`
//! - cancelled before start or drained at shutdown → `PoolSaturation("cancelled")`
//!
//! Faults raised while running are reported to the `FaultSink` here, with
//! the task id; cancellations are not, and neither are faults of a task
//! whose owner has already reported it through `TaskControl::abandon`.
//! A full queue is refused at submission with `PoolSaturation`, never
//! blocking the caller.

use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace};

use crate::config::PipelineConfig;
use crate::domain::envelope::{Fault, FaultCause, FaultKind, ResultEnvelope};
use crate::domain::fault::FaultRecord;
use crate::domain::order::ValidatedOrder;
use crate::ports::execution::{CancelFlag, VenueError};
use crate::ports::telemetry::{NoopObserver, PipelineObserver};
use crate::usecases::fault_sink::FaultSink;

/// Executor sizing and deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
  /// Number of workers.
  pub pool_size: usize,
  /// Maximum queued, not-yet-started tasks.
  pub queue_capacity: usize,
  /// Deadline for one task once started.
  pub task_timeout: Duration,
}

impl From<&PipelineConfig> for ExecutorSettings {
  fn from(config: &PipelineConfig) -> Self {
    Self {
      pool_size: config.effective_pool_size(),
      queue_capacity: config.queue_capacity,
      task_timeout: config.task_timeout(),
    }
  }
}

/// Counters snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
  pub pool_size: usize,
  pub queue_capacity: usize,
  pub queue_depth: usize,
  pub active_workers: usize,
  pub submitted: u64,
  pub completed: u64,
  pub failed: u64,
  pub rejected: u64,
  pub cancelled: u64,
  pub accepting: bool,
}

type Job = Box<dyn FnOnce(ValidatedOrder) -> BoxFuture<'static, bool> + Send>;

/// Unit of work waiting in (or taken from) the queue.
struct PoolTask {
  id: u64,
  order: ValidatedOrder,
  submitted_at: Instant,
  cancel: CancelFlag,
  started: Arc<AtomicBool>,
  /// Runs the work and delivers its envelope; returns whether it succeeded.
  job: Job,
}

/// Sends exactly one envelope to the handle.
///
/// Dropped without sending (task drained, cancelled or lost), it sends
/// the cancellation fault instead.
struct Delivery<T> {
  tx: Option<oneshot::Sender<ResultEnvelope<T>>>,
}

impl<T> Delivery<T> {
  fn deliver(mut self, envelope: ResultEnvelope<T>) {
    if let Some(tx) = self.tx.take() {
      let _ = tx.send(envelope);
    }
  }
}

impl<T> Drop for Delivery<T> {
  fn drop(&mut self) {
    if let Some(tx) = self.tx.take() {
      let _ = tx.send(Err(Fault::cancelled()));
    }
  }
}

struct QueueState {
  tasks: VecDeque<PoolTask>,
  closed: bool,
}

#[derive(Default)]
struct Counters {
  submitted: AtomicU64,
  completed: AtomicU64,
  failed: AtomicU64,
  rejected: AtomicU64,
  cancelled: AtomicU64,
  active: AtomicUsize,
}

/// State shared by the executor, its workers and task handles.
struct Shared {
  queue: Mutex<QueueState>,
  notify: Notify,
  counters: Counters,
  queue_capacity: usize,
  observer: Arc<dyn PipelineObserver>,
}

enum EnqueueError {
  Full,
  Closed,
}

impl Shared {
  fn lock_queue(&self) -> MutexGuard<'_, QueueState> {
    self.queue.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Admit a task, or hand it back with the reason it was refused.
  fn enqueue(&self, task: PoolTask) -> Result<(), (PoolTask, EnqueueError)> {
    let depth = {
      let mut queue = self.lock_queue();
      if queue.closed {
        return Err((task, EnqueueError::Closed));
      }
      if queue.tasks.len() >= self.queue_capacity {
        return Err((task, EnqueueError::Full));
      }
      queue.tasks.push_back(task);
      queue.tasks.len()
    };
    self.counters.submitted.fetch_add(1, Ordering::Relaxed);
    self.observer.queue_depth(depth);
    self.notify.notify_one();
    Ok(())
  }

  /// Next task in FIFO order; `None` once closed and empty.
  async fn next_task(&self) -> Option<PoolTask> {
    loop {
      let notified = self.notify.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();
      {
        let mut queue = self.lock_queue();
        if let Some(task) = queue.tasks.pop_front() {
          let depth = queue.tasks.len();
          drop(queue);
          self.observer.queue_depth(depth);
          return Some(task);
        }
        if queue.closed {
          return None;
        }
      }
      notified.await;
    }
  }

  /// Remove a still-queued task.
  fn remove(&self, id: u64) -> Option<PoolTask> {
    let (task, depth) = {
      let mut queue = self.lock_queue();
      let position = queue.tasks.iter().position(|t| t.id == id)?;
      let task = queue.tasks.remove(position);
      (task, queue.tasks.len())
    };
    self.observer.queue_depth(depth);
    task
  }

  /// Stop admission and take every queued task.
  fn close(&self) -> Vec<PoolTask> {
    let drained: Vec<PoolTask> = {
      let mut queue = self.lock_queue();
      queue.closed = true;
      queue.tasks.drain(..).collect()
    };
    self.notify.notify_waiters();
    if !drained.is_empty() {
      self.counters.cancelled.fetch_add(drained.len() as u64, Ordering::Relaxed);
      self.observer.queue_depth(0);
    }
    drained
  }
}

/// Cloneable control over one submitted task.
#[derive(Clone)]
pub struct TaskControl {
  id: u64,
  cancel: CancelFlag,
  started: Arc<AtomicBool>,
  /// Set by whichever side reports the task's fault first.
  fault_claimed: Arc<AtomicBool>,
  shared: Weak<Shared>,
}

impl TaskControl {
  pub const fn id(&self) -> u64 {
    self.id
  }

  /// Whether a worker has picked the task up.
  pub fn has_started(&self) -> bool {
    self.started.load(Ordering::SeqCst)
  }

  /// Cancel the task.
  ///
  /// Returns `true` when the task was still queued and has been removed;
  /// its handle resolves to `PoolSaturation("cancelled")`. Otherwise the
  /// cooperative cancel flag is raised and `false` is returned.
  pub fn cancel(&self) -> bool {
    if let Some(shared) = self.shared.upgrade() {
      if let Some(task) = shared.remove(self.id) {
        shared.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        debug!(task_id = self.id, "Queued task cancelled");
        drop(task);
        return true;
      }
    }
    self.cancel.cancel();
    false
  }

  /// Cancel the task and take over reporting its fault.
  ///
  /// Returns `true` when the caller now owns the report. Returns `false`
  /// when the task already reported a fault of its own; the caller must
  /// not report again. Anything the task raises after a successful
  /// `abandon` is not reported by the executor.
  pub fn abandon(&self) -> bool {
    let claimed = !self.fault_claimed.swap(true, Ordering::SeqCst);
    self.cancel();
    claimed
  }
}

impl std::fmt::Debug for TaskControl {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TaskControl")
      .field("id", &self.id)
      .field("started", &self.has_started())
      .field("cancelled", &self.cancel.is_cancelled())
      .finish()
  }
}

/// Handle to a submitted task's single result.
#[derive(Debug)]
pub struct TaskHandle<T> {
  control: TaskControl,
  rx: oneshot::Receiver<ResultEnvelope<T>>,
}

fn lost_result() -> Fault {
  Fault::new(FaultKind::UnhandledTaskFault, "task result lost")
}

impl<T> TaskHandle<T> {
  pub const fn id(&self) -> u64 {
    self.control.id
  }

  pub fn has_started(&self) -> bool {
    self.control.has_started()
  }

  /// Control that outlives a consuming `wait`.
  pub fn control(&self) -> TaskControl {
    self.control.clone()
  }

  /// See [`TaskControl::cancel`].
  pub fn cancel(&self) -> bool {
    self.control.cancel()
  }

  /// Block until the task's envelope is available.
  pub async fn wait(self) -> ResultEnvelope<T> {
    self.rx.await.unwrap_or_else(|_| Err(lost_result()))
  }

  /// Wait at most `limit`; on expiry the task is cancelled and the
  /// envelope is `ComputationFailure("timeout")`.
  pub async fn wait_timeout(mut self, limit: Duration) -> ResultEnvelope<T> {
    match tokio::time::timeout(limit, &mut self.rx).await {
      Ok(received) => received.unwrap_or_else(|_| Err(lost_result())),
      Err(_) => {
        self.control.cancel();
        Err(Fault::timeout())
      }
    }
  }

  /// Non-blocking check. `Some` exactly once, when the envelope is ready.
  pub fn try_poll(&mut self) -> Option<ResultEnvelope<T>> {
    match self.rx.try_recv() {
      Ok(envelope) => Some(envelope),
      Err(oneshot::error::TryRecvError::Empty) => None,
      Err(oneshot::error::TryRecvError::Closed) => Some(Err(lost_result())),
    }
  }
}

/// Bounded worker pool.
pub struct TaskExecutor {
  shared: Arc<Shared>,
  sink: Arc<FaultSink>,
  settings: ExecutorSettings,
  next_id: AtomicU64,
  workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskExecutor {
  /// Start `pool_size` workers. Must be called from within a Tokio runtime.
  pub fn new(settings: ExecutorSettings, sink: Arc<FaultSink>, observer: Arc<dyn PipelineObserver>) -> Self {
    let settings = ExecutorSettings {
      pool_size: settings.pool_size.max(1),
      queue_capacity: settings.queue_capacity.max(1),
      ..settings
    };

    let shared = Arc::new(Shared {
      queue: Mutex::new(QueueState {
        tasks: VecDeque::with_capacity(settings.queue_capacity.min(4_096)),
        closed: false,
      }),
      notify: Notify::new(),
      counters: Counters::default(),
      queue_capacity: settings.queue_capacity,
      observer,
    });

    let workers = (0..settings.pool_size)
      .map(|worker| tokio::spawn(worker_loop(worker, Arc::clone(&shared))))
      .collect();

    info!(
      pool_size = settings.pool_size,
      queue_capacity = settings.queue_capacity,
      task_timeout_ms = settings.task_timeout.as_millis() as u64,
      "Task executor started"
    );

    Self {
      shared,
      sink,
      settings,
      next_id: AtomicU64::new(1),
      workers: Mutex::new(workers),
    }
  }

  /// Executor without metrics hooks.
  pub fn with_sink(settings: ExecutorSettings, sink: Arc<FaultSink>) -> Self {
    Self::new(settings, sink, Arc::new(NoopObserver))
  }

  /// Queue `work` for `order`.
  ///
  /// Never blocks. A full queue or a shut-down executor yields a
  /// `PoolSaturation` fault, reported to the sink, and the work never runs.
  pub fn submit<T, F, Fut>(&self, order: ValidatedOrder, work: F) -> ResultEnvelope<TaskHandle<T>>
  where
    T: Send + 'static,
    F: FnOnce(ValidatedOrder, CancelFlag) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
  {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let cancel = CancelFlag::new();
    let started = Arc::new(AtomicBool::new(false));
    let fault_claimed = Arc::new(AtomicBool::new(false));
    let (tx, rx) = oneshot::channel();
    let delivery = Delivery { tx: Some(tx) };

    let sink = Arc::clone(&self.sink);
    let flag = cancel.clone();
    let claim = Arc::clone(&fault_claimed);
    let limit = self.settings.task_timeout;
    let job: Job = Box::new(move |order: ValidatedOrder| {
      async move {
        let context = format!("task {id}: {order}");
        let work_flag = flag.clone();
        let envelope = run_isolated(async move { work(order, work_flag).await }, limit, &flag).await;
        let succeeded = envelope.is_ok();
        if let Err(fault) = &envelope {
          if fault.is_cancellation() {
            trace!(task_id = id, "Task cancelled");
          } else if claim.swap(true, Ordering::SeqCst) {
            debug!(task_id = id, kind = %fault.kind(), "Fault of abandoned task already reported");
          } else {
            sink.report(FaultRecord::from_fault(fault, Some(id), &context));
          }
        }
        delivery.deliver(envelope);
        succeeded
      }
      .boxed()
    });

    let task = PoolTask {
      id,
      order,
      submitted_at: Instant::now(),
      cancel: cancel.clone(),
      started: Arc::clone(&started),
      job,
    };

    match self.shared.enqueue(task) {
      Ok(()) => {
        trace!(task_id = id, "Task queued");
        Ok(TaskHandle {
          control: TaskControl {
            id,
            cancel,
            started,
            fault_claimed,
            shared: Arc::downgrade(&self.shared),
          },
          rx,
        })
      }
      Err((task, reason)) => {
        self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
        let fault = match reason {
          EnqueueError::Full => {
            Fault::saturated(format!("queue full ({} pending)", self.settings.queue_capacity))
          }
          EnqueueError::Closed => Fault::saturated("executor shut down"),
        };
        let context = format!("submission of {}", task.order);
        self.sink.report(FaultRecord::from_fault(&fault, Some(id), &context));
        Err(fault)
      }
    }
  }

  /// Whether new submissions are admitted.
  pub fn is_accepting(&self) -> bool {
    !self.shared.lock_queue().closed
  }

  pub fn stats(&self) -> ExecutorStats {
    let counters = &self.shared.counters;
    let (queue_depth, closed) = {
      let queue = self.shared.lock_queue();
      (queue.tasks.len(), queue.closed)
    };
    ExecutorStats {
      pool_size: self.settings.pool_size,
      queue_capacity: self.settings.queue_capacity,
      queue_depth,
      active_workers: counters.active.load(Ordering::Relaxed),
      submitted: counters.submitted.load(Ordering::Relaxed),
      completed: counters.completed.load(Ordering::Relaxed),
      failed: counters.failed.load(Ordering::Relaxed),
      rejected: counters.rejected.load(Ordering::Relaxed),
      cancelled: counters.cancelled.load(Ordering::Relaxed),
      accepting: !closed,
    }
  }

  pub const fn settings(&self) -> ExecutorSettings {
    self.settings
  }

  /// Stop admission, cancel queued tasks and wait for running ones.
  #[instrument(skip(self))]
  pub async fn shutdown(&self) {
    let drained = self.shared.close();
    info!(drained = drained.len(), "Task executor shutting down");
    drop(drained);

    let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
    for handle in workers {
      if let Err(e) = handle.await {
        error!(error = %e, "Worker task ended abnormally");
      }
    }
    info!("Task executor stopped");
  }
}

impl Drop for TaskExecutor {
  fn drop(&mut self) {
    // Workers exit after their current task.
    drop(self.shared.close());
  }
}

async fn worker_loop(worker: usize, shared: Arc<Shared>) {
  debug!(worker, "Worker started");

  while let Some(task) = shared.next_task().await {
    let PoolTask {
      id,
      order,
      submitted_at,
      cancel,
      started,
      job,
    } = task;

    if cancel.is_cancelled() {
      shared.counters.cancelled.fetch_add(1, Ordering::Relaxed);
      trace!(worker, task_id = id, "Skipping cancelled task");
      continue;
    }

    started.store(true, Ordering::SeqCst);
    shared.counters.active.fetch_add(1, Ordering::Relaxed);
    trace!(
      worker,
      task_id = id,
      queued_ms = submitted_at.elapsed().as_millis() as u64,
      "Task started"
    );

    let succeeded = job(order).await;

    shared.counters.active.fetch_sub(1, Ordering::Relaxed);
    let counter = if succeeded {
      &shared.counters.completed
    } else {
      &shared.counters.failed
    };
    counter.fetch_add(1, Ordering::Relaxed);
  }

  debug!(worker, "Worker stopped");
}

/// Run `work` behind the isolation boundary.
///
/// Nothing escapes: errors are classified, panics are caught, and a task
/// past its deadline has its cancel flag raised and is dropped.
async fn run_isolated<T, Fut>(work: Fut, limit: Duration, cancel: &CancelFlag) -> ResultEnvelope<T>
where
  Fut: Future<Output = anyhow::Result<T>>,
{
  match tokio::time::timeout(limit, AssertUnwindSafe(work).catch_unwind()).await {
    Ok(Ok(Ok(value))) => Ok(value),
    Ok(Ok(Err(err))) => Err(classify(err)),
    Ok(Err(payload)) => Err(Fault::new(
      FaultKind::UnhandledTaskFault,
      format!("task panicked: {}", panic_message(payload.as_ref())),
    )),
    Err(_) => {
      cancel.cancel();
      Err(Fault::timeout())
    }
  }
}

/// Map a work error onto the fault taxonomy.
pub fn classify(err: anyhow::Error) -> Fault {
  let err = match err.downcast::<Fault>() {
    Ok(fault) => return fault,
    Err(err) => err,
  };
  let err = match err.downcast::<VenueError>() {
    Ok(venue) => return venue.into(),
    Err(err) => err,
  };
  let message = format!("{err:#}");
  let cause: Box<dyn std::error::Error + Send + Sync + 'static> = err.into();
  Fault::new(FaultKind::UnhandledTaskFault, message).with_cause(FaultCause::from(cause))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
