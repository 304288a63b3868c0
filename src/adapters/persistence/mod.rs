//! Persistence Adapters - JSONL-based File Storage
//!
//! Implements the `FaultBackend` port with append-only JSONL files.
//! No database dependency; a crash loses at most the line being written.

pub mod fault_log;

pub use fault_log::FaultLog;
