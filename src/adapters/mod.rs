//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! infrastructure. Each sub-module groups adapters by concern.
//!
//! Adapter categories:
//! - `intake`: JSON-lines order front end
//! - `metrics`: Prometheus metrics export and health checks
//! - `persistence`: JSONL fault log
//! - `venue`: Paper execution venue

pub mod intake;
pub mod metrics;
pub mod persistence;
pub mod venue;
