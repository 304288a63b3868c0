//! Fault Backend Port - Durable Fault Ingestion Interface
//!
//! The fault sink forwards every record to a backend through this trait.
//! Delivery is append-only and best effort: the sink never lets a backend
//! failure reach the code that reported the fault.

use async_trait::async_trait;

use crate::domain::fault::FaultRecord;

/// Trait for fault storage / alerting backends.
#[async_trait]
pub trait FaultBackend: Send + Sync + 'static {
  /// Append one fault record.
  ///
  /// # Errors
  /// Returns error if the record could not be stored; the sink then
  /// buffers it in memory and enters degraded mode.
  async fn emit(&self, record: &FaultRecord) -> anyhow::Result<()>;

  /// Check if the backend can currently accept records.
  async fn is_healthy(&self) -> bool;
}
