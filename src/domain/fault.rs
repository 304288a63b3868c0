//! Fault records.
//!
//! A `FaultRecord` is the immutable, serializable trace of one fault as
//! handed to the fault sink. It is written once and never mutated; each
//! record serializes to a single JSON line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::envelope::{Fault, FaultKind};

/// One observed fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRecord {
    /// When the fault was observed.
    pub timestamp: DateTime<Utc>,
    /// Pool task that produced the fault (`None` for intake-level faults).
    pub source_task_id: Option<u64>,
    /// Fault classification.
    pub kind: FaultKind,
    /// Human-readable message.
    pub message: String,
    /// Where the fault happened plus the rendered cause chain.
    pub stack_context: String,
}

impl FaultRecord {
    pub fn new(
        kind: FaultKind,
        message: impl Into<String>,
        source_task_id: Option<u64>,
        stack_context: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            source_task_id,
            kind,
            message: message.into(),
            stack_context: stack_context.into(),
        }
    }

    /// Build a record from a fault, appending its cause chain to `context`.
    pub fn from_fault(fault: &Fault, source_task_id: Option<u64>, context: &str) -> Self {
        let chain = fault.chain();
        let stack_context = if chain.is_empty() {
            context.to_string()
        } else {
            format!("{context}; caused by: {chain}")
        };
        Self::new(fault.kind(), fault.message(), source_task_id, stack_context)
    }
}
