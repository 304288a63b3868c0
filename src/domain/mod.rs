//! Domain layer - Order intake types and rules.
//!
//! Pure types for the pipeline: raw and validated orders, the result
//! envelope with its fault taxonomy, fault records, and the validation
//! gate. Nothing here performs I/O (hexagonal architecture inner ring).

pub mod envelope;
pub mod fault;
pub mod order;
pub mod validation;

// Re-export core types for convenience
pub use envelope::{EnvelopeExt, Fault, FaultCause, FaultKind, ResultEnvelope};
pub use fault::FaultRecord;
pub use order::{ExecutionResult, OrderRequest, Side, ValidatedOrder};
pub use validation::ValidationGate;
