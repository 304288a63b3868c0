//! Validation gate.
//!
//! Stateless pre-check of inbound order requests. Rejections are routine,
//! high-volume events, so they are returned as envelopes and never take an
//! unwinding path.

use super::envelope::{Fault, ResultEnvelope};
use super::order::{OrderRequest, Side, ValidatedOrder};

/// Pure structural validation of `OrderRequest`s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationGate;

impl ValidationGate {
    pub const fn new() -> Self {
        Self
    }

    /// Validate a raw request.
    ///
    /// Checks run symbol → side → quantity and the first failure wins:
    /// - empty or whitespace-only symbol → `"symbol empty"`
    /// - side other than BUY/SELL → `"unsupported side '<raw>'"`
    /// - quantity ≤ 0 → `"quantity must be positive, got <q>"`
    pub fn validate(&self, req: &OrderRequest) -> ResultEnvelope<ValidatedOrder> {
        let symbol = req.symbol().trim();
        if symbol.is_empty() {
            return Err(Fault::validation("symbol empty"));
        }

        let side: Side = req
            .side()
            .parse()
            .map_err(|e: super::order::UnknownSide| Fault::validation(e.to_string()))?;

        let quantity = u64::try_from(req.quantity())
            .ok()
            .filter(|q| *q > 0)
            .ok_or_else(|| {
                Fault::validation(format!("quantity must be positive, got {}", req.quantity()))
            })?;

        Ok(ValidatedOrder::new(symbol.to_string(), side, quantity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::FaultKind;

    #[test]
    fn test_valid_request_passes() {
        let order = ValidationGate::new()
            .validate(&OrderRequest::buy("AAPL", 10))
            .unwrap();
        assert_eq!(order.symbol(), "AAPL");
        assert_eq!(order.side(), Side::Buy);
        assert_eq!(order.quantity(), 10);
    }

    #[test]
    fn test_symbol_is_trimmed() {
        let order = ValidationGate::new()
            .validate(&OrderRequest::sell("  MSFT ", 1))
            .unwrap();
        assert_eq!(order.symbol(), "MSFT");
    }

    #[test]
    fn test_empty_symbol_rejected() {
        let fault = ValidationGate::new()
            .validate(&OrderRequest::buy("", 10))
            .unwrap_err();
        assert_eq!(fault, Fault::validation("symbol empty"));
    }

    #[test]
    fn test_whitespace_symbol_rejected() {
        let fault = ValidationGate::new()
            .validate(&OrderRequest::buy("   ", 10))
            .unwrap_err();
        assert_eq!(fault.message(), "symbol empty");
    }

    #[test]
    fn test_unknown_side_rejected() {
        let fault = ValidationGate::new()
            .validate(&OrderRequest::new("AAPL", "HOLD", 10))
            .unwrap_err();
        assert_eq!(fault.kind(), FaultKind::ValidationFailure);
        assert_eq!(fault.message(), "unsupported side 'HOLD'");
    }

    #[test]
    fn test_negative_quantity_rejected() {
        let fault = ValidationGate::new()
            .validate(&OrderRequest::buy("AAPL", -5))
            .unwrap_err();
        assert_eq!(fault.kind(), FaultKind::ValidationFailure);
        assert_eq!(fault.message(), "quantity must be positive, got -5");
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let result = ValidationGate::new().validate(&OrderRequest::buy("AAPL", 0));
        assert!(result.is_err());
    }

    #[test]
    fn test_symbol_checked_before_quantity() {
        let fault = ValidationGate::new()
            .validate(&OrderRequest::new("", "HOLD", -1))
            .unwrap_err();
        assert_eq!(fault.message(), "symbol empty");
    }
}
