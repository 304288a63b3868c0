//! Paper Venue - Simulated Fills at Reference Prices
//!
//! Fills every order in full at the configured reference quote after a
//! fixed latency. Used by the binary, the integration tests and the
//! benchmarks; it never touches the network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, instrument};

use crate::config::VenueConfig;
use crate::domain::order::{ExecutionResult, ValidatedOrder};
use crate::ports::execution::{CancelFlag, ExecutionVenue, VenueError};

/// In-process venue with static quotes.
pub struct PaperVenue {
    /// Name stamped on fills.
    name: String,
    /// Simulated latency per fill.
    latency: Duration,
    /// Reference price per symbol.
    quotes: RwLock<HashMap<String, Decimal>>,
    /// When false, every call fails with `Unavailable`.
    available: AtomicBool,
    /// Fills produced so far.
    fills: AtomicU64,
}

impl PaperVenue {
    pub fn new(config: &VenueConfig) -> Self {
        Self {
            name: config.name.clone(),
            latency: Duration::from_millis(config.latency_ms),
            quotes: RwLock::new(config.quotes.clone()),
            available: AtomicBool::new(true),
            fills: AtomicU64::new(0),
        }
    }

    /// Set or replace the quote for `symbol`.
    pub fn set_quote(&self, symbol: impl Into<String>, price: Decimal) {
        self.quotes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(symbol.into(), price);
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn fills(&self) -> u64 {
        self.fills.load(Ordering::Relaxed)
    }

    fn quote(&self, symbol: &str) -> Option<Decimal> {
        self.quotes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .copied()
    }
}

#[async_trait]
impl ExecutionVenue for PaperVenue {
    #[instrument(skip(self, cancel), fields(order = %order))]
    async fn execute(
        &self,
        order: &ValidatedOrder,
        cancel: &CancelFlag,
    ) -> Result<ExecutionResult, VenueError> {
        if !self.latency.is_zero() {
            tokio::select! {
                () = cancel.cancelled() => return Err(VenueError::Cancelled),
                () = tokio::time::sleep(self.latency) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(VenueError::Cancelled);
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(VenueError::Unavailable(format!("{} offline", self.name)));
        }

        let price = self
            .quote(order.symbol())
            .ok_or_else(|| VenueError::NoQuote(order.symbol().to_string()))?;
        let result = ExecutionResult::filled(order, price, &self.name)
            .ok_or_else(|| VenueError::Pricing(format!("notional overflow for {order}")))?;
        self.fills.fetch_add(1, Ordering::Relaxed);
        debug!(execution_id = %result.execution_id, notional = %result.notional, "Paper fill");
        Ok(result)
    }

    async fn is_healthy(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::order::OrderRequest;
    use crate::domain::validation::ValidationGate;

    fn venue() -> PaperVenue {
        let mut config = VenueConfig {
            latency_ms: 0,
            ..VenueConfig::default()
        };
        config.quotes.insert("AAPL".to_string(), dec!(189.50));
        PaperVenue::new(&config)
    }

    fn validated(symbol: &str, quantity: i64) -> ValidatedOrder {
        ValidationGate::new()
            .validate(&OrderRequest::buy(symbol, quantity))
            .unwrap()
    }

    #[tokio::test]
    async fn test_fill_at_quote() {
        let venue = venue();
        let fill = venue
            .execute(&validated("AAPL", 10), &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(fill.fill_price, dec!(189.50));
        assert_eq!(fill.notional, dec!(1895.00));
        assert_eq!(fill.venue, "paper");
        assert_eq!(venue.fills(), 1);
    }

    #[tokio::test]
    async fn test_unknown_symbol() {
        let err = venue()
            .execute(&validated("ZZZ", 1), &CancelFlag::new())
            .await
            .unwrap_err();
        assert_eq!(err, VenueError::NoQuote("ZZZ".into()));
    }

    #[tokio::test]
    async fn test_notional_overflow_is_pricing_failure() {
        let venue = venue();
        venue.set_quote("HUGE", Decimal::MAX);
        let err = venue
            .execute(&validated("HUGE", 2), &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VenueError::Pricing(_)));
        assert_eq!(venue.fills(), 0);
    }

    #[tokio::test]
    async fn test_outage_is_transient() {
        let venue = venue();
        venue.set_available(false);
        let err = venue
            .execute(&validated("AAPL", 1), &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(!venue.is_healthy().await);
    }

    #[tokio::test]
    async fn test_cancel_during_latency() {
        let config = VenueConfig {
            latency_ms: 10_000,
            ..VenueConfig::default()
        };
        let venue = PaperVenue::new(&config);
        venue.set_quote("AAPL", dec!(1));
        let flag = CancelFlag::new();
        let canceller = flag.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(1),
            venue.execute(&validated("AAPL", 1), &flag),
        )
        .await
        .unwrap()
        .unwrap_err();
        assert_eq!(err, VenueError::Cancelled);
    }
}
