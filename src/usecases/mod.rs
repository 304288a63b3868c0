//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates domain logic with port interfaces to implement the
//! order-intake workflow.
//!
//! Use cases:
//! - `OrderPipeline`: Validation, submission and per-order deadline
//! - `TaskExecutor`: Bounded worker pool with an isolating task boundary
//! - `FaultSink`: Centralized fault logging, history, alerting and persistence
//! - `RetryPolicy`: Exponential backoff for transient venue failures

pub mod fault_sink;
pub mod order_pipeline;
pub mod retry;
pub mod task_executor;

pub use fault_sink::{Alert, FaultSink};
pub use order_pipeline::{OrderPipeline, OrderState};
pub use retry::RetryPolicy;
pub use task_executor::{ExecutorSettings, ExecutorStats, TaskControl, TaskExecutor, TaskHandle};
