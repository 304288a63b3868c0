//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the use-case layer requires from
//! the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `ExecutionVenue`: Order execution plus the cooperative `CancelFlag`
//! - `FaultBackend`: Durable, append-only fault ingestion
//! - `PipelineObserver` / `StatusSource`: Metrics and health hooks

pub mod execution;
pub mod fault_backend;
pub mod telemetry;
