//! Order intake domain types.
//!
//! Defines the raw inbound request, the validated order that only the
//! validation gate can produce, and the execution result returned to
//! callers of the pipeline.
//!
//! The raw request keeps `side` as the string the transport delivered so
//! that values outside BUY/SELL stay representable until validation.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ────────────────────────────────────────────
// Side
// ────────────────────────────────────────────

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Wire representation (`BUY` / `SELL`).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a raw side is neither BUY nor SELL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported side '{0}'")]
pub struct UnknownSide(pub String);

impl FromStr for Side {
    type Err = UnknownSide;

    /// Parses `BUY` / `SELL`, ignoring ASCII case and surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("BUY") {
            Ok(Self::Buy)
        } else if trimmed.eq_ignore_ascii_case("SELL") {
            Ok(Self::Sell)
        } else {
            Err(UnknownSide(s.to_string()))
        }
    }
}

// ────────────────────────────────────────────
// Raw request
// ────────────────────────────────────────────

/// Raw order request as received from the caller.
///
/// Immutable once constructed. Nothing about it is trusted until the
/// `ValidationGate` turns it into a `ValidatedOrder`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Instrument symbol (e.g. `AAPL`).
    symbol: String,
    /// Raw side string (`BUY` / `SELL` expected).
    side: String,
    /// Requested quantity; must be positive to pass validation.
    quantity: i64,
}

impl OrderRequest {
    /// Create a raw request from transport-level values.
    pub fn new(symbol: impl Into<String>, side: impl Into<String>, quantity: i64) -> Self {
        Self {
            symbol: symbol.into(),
            side: side.into(),
            quantity,
        }
    }

    /// Convenience constructor for a buy request.
    pub fn buy(symbol: impl Into<String>, quantity: i64) -> Self {
        Self::new(symbol, Side::Buy.as_str(), quantity)
    }

    /// Convenience constructor for a sell request.
    pub fn sell(symbol: impl Into<String>, quantity: i64) -> Self {
        Self::new(symbol, Side::Sell.as_str(), quantity)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn side(&self) -> &str {
        &self.side
    }

    pub const fn quantity(&self) -> i64 {
        self.quantity
    }
}

// ────────────────────────────────────────────
// Validated order
// ────────────────────────────────────────────

/// An order known to satisfy every structural invariant.
///
/// Fields are private and the constructor is crate-private: the only way
/// to obtain one is `ValidationGate::validate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedOrder {
    symbol: String,
    side: Side,
    quantity: u64,
}

impl ValidatedOrder {
    pub(crate) const fn new(symbol: String, side: Side, quantity: u64) -> Self {
        Self {
            symbol,
            side,
            quantity,
        }
    }

    /// Non-empty, trimmed symbol.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub const fn side(&self) -> Side {
        self.side
    }

    /// Strictly positive quantity.
    pub const fn quantity(&self) -> u64 {
        self.quantity
    }
}

impl std::fmt::Display for ValidatedOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} x{}", self.side, self.symbol, self.quantity)
    }
}

// ────────────────────────────────────────────
// Execution result
// ────────────────────────────────────────────

/// Successful outcome of processing one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Identifier assigned by the venue.
    pub execution_id: Uuid,
    /// Executed symbol.
    pub symbol: String,
    /// Executed side.
    pub side: Side,
    /// Executed quantity.
    pub quantity: u64,
    /// Fill price per unit.
    pub fill_price: Decimal,
    /// `fill_price * quantity`.
    pub notional: Decimal,
    /// Name of the venue that filled the order.
    pub venue: String,
    /// Fill timestamp.
    pub executed_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Build a full fill of `order` at `fill_price`.
    ///
    /// Returns `None` when the notional overflows `Decimal`.
    pub fn filled(order: &ValidatedOrder, fill_price: Decimal, venue: impl Into<String>) -> Option<Self> {
        let notional = fill_price.checked_mul(Decimal::from(order.quantity()))?;
        Some(Self {
            execution_id: Uuid::new_v4(),
            symbol: order.symbol().to_string(),
            side: order.side(),
            quantity: order.quantity(),
            fill_price,
            notional,
            venue: venue.into(),
            executed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_parse_ignores_case() {
        assert_eq!("buy".parse::<Side>(), Ok(Side::Buy));
        assert_eq!(" SELL ".parse::<Side>(), Ok(Side::Sell));
        assert_eq!("Sell".parse::<Side>(), Ok(Side::Sell));
    }

    #[test]
    fn test_side_parse_rejects_unknown() {
        let err = "HOLD".parse::<Side>().unwrap_err();
        assert_eq!(err.to_string(), "unsupported side 'HOLD'");
    }

    #[test]
    fn test_side_display() {
        assert_eq!(format!("{}", Side::Buy), "BUY");
        assert_eq!(format!("{}", Side::Sell), "SELL");
    }

    #[test]
    fn test_request_deserializes_from_json() {
        let req: OrderRequest =
            serde_json::from_str(r#"{"symbol":"AAPL","side":"BUY","quantity":10}"#).unwrap();
        assert_eq!(req, OrderRequest::buy("AAPL", 10));
    }

    #[test]
    fn test_filled_computes_notional() {
        let order = ValidatedOrder::new("MSFT".to_string(), Side::Sell, 4);
        let result = ExecutionResult::filled(&order, dec!(412.25), "paper").unwrap();
        assert_eq!(result.notional, dec!(1649.00));
        assert_eq!(result.side, Side::Sell);
        assert_eq!(result.venue, "paper");
    }

    #[test]
    fn test_filled_refuses_overflowing_notional() {
        let order = ValidatedOrder::new("MSFT".to_string(), Side::Buy, u64::MAX);
        assert!(ExecutionResult::filled(&order, Decimal::MAX, "paper").is_none());
    }
}
