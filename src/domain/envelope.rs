//! Result envelope and fault taxonomy.
//!
//! Every operation that can fail in the pipeline returns a
//! `ResultEnvelope<T>`: either the success value or a typed `Fault`.
//! Faults never travel as panics across component boundaries.
//!
//! The envelope is a plain `Result`, so `is_ok`, `unwrap_or` and
//! `and_then` are the standard ones and `?` composes envelopes. The
//! `EnvelopeExt` trait adds the two-branch consumer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Shared, cloneable underlying error attached to a fault.
pub type FaultCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Uniform return type of every pipeline operation.
pub type ResultEnvelope<T> = Result<T, Fault>;

// ────────────────────────────────────────────
// Fault kind
// ────────────────────────────────────────────

/// Classification of a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    /// Malformed request; caller error, never retried.
    ValidationFailure,
    /// Downstream dependency failed; transient, caller may retry with backoff.
    ExternalServiceFailure,
    /// Processing failed or timed out; not retried automatically.
    ComputationFailure,
    /// Backpressure: queue full, intake limited, or task cancelled.
    PoolSaturation,
    /// Anything unrecognized (panics included). Indicates a bug.
    UnhandledTaskFault,
}

impl FaultKind {
    /// All kinds, in severity-ascending order.
    pub const ALL: [Self; 5] = [
        Self::ValidationFailure,
        Self::PoolSaturation,
        Self::ExternalServiceFailure,
        Self::ComputationFailure,
        Self::UnhandledTaskFault,
    ];

    /// Stable snake_case label used in logs and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailure => "validation_failure",
            Self::ExternalServiceFailure => "external_service_failure",
            Self::ComputationFailure => "computation_failure",
            Self::PoolSaturation => "pool_saturation",
            Self::UnhandledTaskFault => "unhandled_task_fault",
        }
    }

    /// Whether a caller may reasonably resubmit after this fault.
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::ExternalServiceFailure | Self::PoolSaturation)
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ────────────────────────────────────────────
// Fault
// ────────────────────────────────────────────

/// Typed failure carried in the `Err` branch of an envelope.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Fault {
    kind: FaultKind,
    message: String,
    #[source]
    cause: Option<FaultCause>,
}

impl Fault {
    /// Message used for deadline expiry.
    pub const TIMEOUT: &'static str = "timeout";
    /// Message used for tasks removed before they started.
    pub const CANCELLED: &'static str = "cancelled";

    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Attach the underlying error that produced this fault.
    #[must_use]
    pub fn with_cause(mut self, cause: FaultCause) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FaultKind::ValidationFailure, message)
    }

    pub fn saturated(message: impl Into<String>) -> Self {
        Self::new(FaultKind::PoolSaturation, message)
    }

    pub fn timeout() -> Self {
        Self::new(FaultKind::ComputationFailure, Self::TIMEOUT)
    }

    pub fn cancelled() -> Self {
        Self::new(FaultKind::PoolSaturation, Self::CANCELLED)
    }

    pub const fn kind(&self) -> FaultKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn cause(&self) -> Option<&FaultCause> {
        self.cause.as_ref()
    }

    /// True for the synthetic fault of a task cancelled before it ran.
    pub fn is_cancellation(&self) -> bool {
        self.kind == FaultKind::PoolSaturation && self.message == Self::CANCELLED
    }

    /// Render the cause chain, outermost first, joined by ` <- `.
    ///
    /// Empty when the fault has no cause.
    pub fn chain(&self) -> String {
        let mut parts = Vec::new();
        let mut next: Option<&(dyn std::error::Error + 'static)> =
            self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static));
        while let Some(err) = next {
            parts.push(err.to_string());
            next = err.source();
        }
        parts.join(" <- ")
    }
}

/// Faults compare by kind and message; causes are diagnostic only.
impl PartialEq for Fault {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message
    }
}

impl Eq for Fault {}

// ────────────────────────────────────────────
// Envelope helpers
// ────────────────────────────────────────────

/// Wrap a success value.
pub const fn ok<T>(value: T) -> ResultEnvelope<T> {
    Ok(value)
}

/// Build a failed envelope.
pub fn err<T>(kind: FaultKind, message: impl Into<String>, cause: Option<FaultCause>) -> ResultEnvelope<T> {
    let fault = Fault::new(kind, message);
    Err(match cause {
        Some(cause) => fault.with_cause(cause),
        None => fault,
    })
}

/// Extra combinators on `ResultEnvelope`.
pub trait EnvelopeExt<T> {
    /// Consume the envelope through exactly one of two branches.
    fn match_with<R>(self, on_ok: impl FnOnce(T) -> R, on_err: impl FnOnce(Fault) -> R) -> R;

    /// Kind of the fault, if any.
    fn fault_kind(&self) -> Option<FaultKind>;
}

impl<T> EnvelopeExt<T> for ResultEnvelope<T> {
    fn match_with<R>(self, on_ok: impl FnOnce(T) -> R, on_err: impl FnOnce(Fault) -> R) -> R {
        match self {
            Ok(value) => on_ok(value),
            Err(fault) => on_err(fault),
        }
    }

    fn fault_kind(&self) -> Option<FaultKind> {
        self.as_ref().err().map(Fault::kind)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("socket reset")]
    struct Reset;

    #[derive(Debug, thiserror::Error)]
    #[error("quote fetch failed")]
    struct QuoteFailed(#[source] Reset);

    #[test]
    fn test_and_then_applies_to_ok() {
        let env: ResultEnvelope<i32> = ok(5);
        assert_eq!(env.and_then(|x| ok(x + 1)), Ok(6));
    }

    #[test]
    fn test_and_then_skips_err() {
        let called = Cell::new(false);
        let env: ResultEnvelope<i32> = err(FaultKind::ComputationFailure, "boom", None);
        let out = env.and_then(|x| {
            called.set(true);
            ok(x + 1)
        });
        assert_eq!(out, Err(Fault::new(FaultKind::ComputationFailure, "boom")));
        assert!(!called.get());
    }

    #[test]
    fn test_unwrap_or_on_err() {
        let env: ResultEnvelope<u32> = Err(Fault::timeout());
        assert_eq!(env.unwrap_or(7), 7);
    }

    #[test]
    fn test_match_with_picks_branch() {
        let good: ResultEnvelope<u32> = ok(3);
        let bad: ResultEnvelope<u32> = Err(Fault::validation("symbol empty"));
        assert_eq!(good.match_with(|v| v.to_string(), |f| f.message().to_string()), "3");
        assert_eq!(
            bad.match_with(|v| v.to_string(), |f| f.message().to_string()),
            "symbol empty"
        );
    }

    #[test]
    fn test_fault_equality_ignores_cause() {
        let plain = Fault::new(FaultKind::ExternalServiceFailure, "down");
        let caused = Fault::new(FaultKind::ExternalServiceFailure, "down").with_cause(Arc::new(Reset));
        assert_eq!(plain, caused);
    }

    #[test]
    fn test_chain_walks_sources() {
        let fault =
            Fault::new(FaultKind::ExternalServiceFailure, "venue").with_cause(Arc::new(QuoteFailed(Reset)));
        assert_eq!(fault.chain(), "quote fetch failed <- socket reset");
        assert_eq!(Fault::timeout().chain(), "");
    }

    #[test]
    fn test_fault_display() {
        assert_eq!(Fault::timeout().to_string(), "computation_failure: timeout");
    }

    #[test]
    fn test_cancellation_marker() {
        assert!(Fault::cancelled().is_cancellation());
        assert!(!Fault::saturated("queue full").is_cancellation());
        assert_eq!(Fault::cancelled().kind(), FaultKind::PoolSaturation);
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(FaultKind::ExternalServiceFailure.is_retryable());
        assert!(FaultKind::PoolSaturation.is_retryable());
        assert!(!FaultKind::ValidationFailure.is_retryable());
        assert!(!FaultKind::UnhandledTaskFault.is_retryable());
    }
}
