//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use tracing::{info, warn};

use super::AppConfig;

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    path = %path.display(),
    pool_size = config.pipeline.effective_pool_size(),
    queue_capacity = config.pipeline.queue_capacity,
    per_order_timeout_ms = config.pipeline.per_order_timeout_ms,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Load configuration, falling back to defaults when the file is absent.
///
/// A file that exists but fails to parse or validate is still an error.
pub fn load_or_default(path: &str) -> Result<AppConfig> {
  if Path::new(path).exists() {
    return load_config(path);
  }

  warn!(path, "Config file not found, using defaults");
  let config = AppConfig::default();
  validate_config(&config)?;
  Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig = toml::from_str(content).context("Failed to parse config.toml")?;
  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Non-zero capacities and deadlines
/// - A task deadline that fits inside the per-order deadline
/// - Positive reference quotes
fn validate_config(config: &AppConfig) -> Result<()> {
  let pipeline = &config.pipeline;

  anyhow::ensure!(
    pipeline.queue_capacity > 0,
    "pipeline.queue_capacity must be positive"
  );
  anyhow::ensure!(
    pipeline.per_order_timeout_ms > 0,
    "pipeline.per_order_timeout_ms must be positive"
  );
  anyhow::ensure!(
    pipeline.task_timeout_ms > 0,
    "pipeline.task_timeout_ms must be positive"
  );
  anyhow::ensure!(
    pipeline.task_timeout_ms <= pipeline.per_order_timeout_ms,
    "pipeline.task_timeout_ms ({}) must not exceed per_order_timeout_ms ({})",
    pipeline.task_timeout_ms,
    pipeline.per_order_timeout_ms
  );

  let sink = &config.fault_sink;
  anyhow::ensure!(
    sink.history_capacity > 0,
    "fault_sink.history_capacity must be positive"
  );
  anyhow::ensure!(
    sink.fallback_capacity > 0,
    "fault_sink.fallback_capacity must be positive"
  );
  anyhow::ensure!(
    sink.channel_capacity > 0,
    "fault_sink.channel_capacity must be positive"
  );
  anyhow::ensure!(
    sink.emit_timeout_ms > 0,
    "fault_sink.emit_timeout_ms must be positive"
  );
  anyhow::ensure!(
    sink.alert_threshold == 0 || sink.alert_window_secs > 0,
    "fault_sink.alert_window_secs must be positive when alerting is enabled"
  );
  anyhow::ensure!(
    !sink.persist || !sink.data_dir.trim().is_empty(),
    "fault_sink.data_dir must not be empty when persist = true"
  );

  for (symbol, price) in &config.venue.quotes {
    anyhow::ensure!(!symbol.trim().is_empty(), "venue.quotes has an empty symbol");
    anyhow::ensure!(
      *price > Decimal::ZERO,
      "venue.quotes.{symbol} must be positive, got {price}"
    );
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use rust_decimal_macros::dec;

  use super::*;

  #[test]
  fn test_load_nonexistent_file() {
    let result = load_config("nonexistent.toml");
    assert!(result.is_err());
  }

  #[test]
  fn test_load_or_default_without_file() {
    let config = load_or_default("definitely-missing-config.toml").unwrap();
    assert_eq!(config.pipeline.queue_capacity, 256);
    assert_eq!(config.pipeline.per_order_timeout_ms, 5_000);
  }

  #[test]
  fn test_empty_document_uses_defaults() {
    let config = parse_config("").unwrap();
    assert_eq!(config.service.name, "order-intake");
    assert_eq!(config.fault_sink.alert_threshold, 10);
    assert!(config.metrics.enabled);
  }

  #[test]
  fn test_partial_section_keeps_other_defaults() {
    let config = parse_config(
      r#"
      [pipeline]
      pool_size = 4
      queue_capacity = 8

      [venue.quotes]
      AAPL = "189.50"
      MSFT = 412.25
      "#,
    )
    .unwrap();
    assert_eq!(config.pipeline.effective_pool_size(), 4);
    assert_eq!(config.pipeline.queue_capacity, 8);
    assert_eq!(config.pipeline.task_timeout_ms, 4_000);
    assert_eq!(config.venue.quotes.get("AAPL"), Some(&dec!(189.50)));
    assert_eq!(config.venue.quotes.len(), 2);
  }

  #[test]
  fn test_zero_queue_capacity_rejected() {
    let err = parse_config("[pipeline]\nqueue_capacity = 0\n").unwrap_err();
    assert!(err.to_string().contains("queue_capacity"));
  }

  #[test]
  fn test_task_timeout_above_order_timeout_rejected() {
    let result = parse_config("[pipeline]\nper_order_timeout_ms = 100\ntask_timeout_ms = 200\n");
    assert!(result.is_err());
  }

  #[test]
  fn test_negative_quote_rejected() {
    let result = parse_config("[venue.quotes]\nAAPL = \"-1\"\n");
    assert!(result.is_err());
  }

  #[test]
  fn test_auto_pool_size_is_positive() {
    let config = AppConfig::default();
    assert!(config.pipeline.effective_pool_size() > 0);
  }
}
