//! Configuration Module - TOML-based Service Configuration
//!
//! Loads and validates configuration from `config.toml`. Every section
//! and every field is optional; missing values fall back to the defaults
//! below. Configuration is read once at startup and never mutated after
//! the pipeline is constructed.

pub mod loader;

use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

/// Top-level service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  /// Service identity and logging.
  pub service: ServiceConfig,
  /// Worker pool, queue and deadlines.
  pub pipeline: PipelineConfig,
  /// Fault sink buffering, alerting and persistence.
  pub fault_sink: FaultSinkConfig,
  /// Paper venue parameters.
  pub venue: VenueConfig,
  /// Metrics and monitoring.
  pub metrics: MetricsConfig,
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
  /// Human-readable service name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  pub log_level: String,
  /// Emit JSON log lines instead of the human-readable format.
  pub json_logs: bool,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      name: default_service_name(),
      log_level: default_log_level(),
      json_logs: true,
    }
  }
}

/// Worker pool and per-order deadline configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  /// Worker count; 0 means one per available CPU.
  pub pool_size: usize,
  /// Maximum queued, not-yet-started tasks.
  pub queue_capacity: usize,
  /// Deadline for one order, from receipt to terminal state (ms).
  pub per_order_timeout_ms: u64,
  /// Deadline for one task once a worker has started it (ms).
  pub task_timeout_ms: u64,
  /// Intake rate limit; 0 disables it.
  pub max_orders_per_second: u32,
  /// Local retries of transient venue failures.
  pub venue_retries: u32,
  /// Base delay for exponential retry backoff (ms).
  pub retry_base_delay_ms: u64,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      pool_size: 0,
      queue_capacity: default_queue_capacity(),
      per_order_timeout_ms: default_per_order_timeout(),
      task_timeout_ms: default_task_timeout(),
      max_orders_per_second: 0,
      venue_retries: default_venue_retries(),
      retry_base_delay_ms: default_retry_base_delay(),
    }
  }
}

impl PipelineConfig {
  /// Effective worker count (resolves `pool_size = 0`).
  pub fn effective_pool_size(&self) -> usize {
    if self.pool_size > 0 {
      self.pool_size
    } else {
      std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
    }
  }

  pub const fn per_order_timeout(&self) -> Duration {
    Duration::from_millis(self.per_order_timeout_ms)
  }

  pub const fn task_timeout(&self) -> Duration {
    Duration::from_millis(self.task_timeout_ms)
  }

  pub const fn retry_base_delay(&self) -> Duration {
    Duration::from_millis(self.retry_base_delay_ms)
  }
}

/// Fault sink configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FaultSinkConfig {
  /// Recent records kept in memory for inspection.
  pub history_capacity: usize,
  /// Undelivered records kept while the backend is unavailable.
  pub fallback_capacity: usize,
  /// Records queued for the backend writer.
  pub channel_capacity: usize,
  /// Maximum time one backend emit may take (ms).
  pub emit_timeout_ms: u64,
  /// Faults of one kind within the window that raise an alert; 0 disables.
  pub alert_threshold: u32,
  /// Sliding alert window (seconds).
  pub alert_window_secs: u64,
  /// Directory for JSONL fault logs.
  pub data_dir: String,
  /// Persist records to `data_dir`.
  pub persist: bool,
}

impl Default for FaultSinkConfig {
  fn default() -> Self {
    Self {
      history_capacity: default_history_capacity(),
      fallback_capacity: default_fallback_capacity(),
      channel_capacity: default_channel_capacity(),
      emit_timeout_ms: default_emit_timeout(),
      alert_threshold: default_alert_threshold(),
      alert_window_secs: default_alert_window(),
      data_dir: default_data_dir(),
      persist: true,
    }
  }
}

impl FaultSinkConfig {
  pub const fn emit_timeout(&self) -> Duration {
    Duration::from_millis(self.emit_timeout_ms)
  }

  pub const fn alert_window(&self) -> Duration {
    Duration::from_secs(self.alert_window_secs)
  }
}

/// Paper venue configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VenueConfig {
  /// Venue name stamped on execution results.
  pub name: String,
  /// Simulated fill latency (ms).
  pub latency_ms: u64,
  /// Reference prices by symbol.
  pub quotes: HashMap<String, Decimal>,
}

impl Default for VenueConfig {
  fn default() -> Self {
    Self {
      name: default_venue_name(),
      latency_ms: default_venue_latency(),
      quotes: HashMap::new(),
    }
  }
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics and health endpoints.
  pub enabled: bool,
  /// Metrics server bind address.
  pub bind_address: String,
  /// Health check endpoint port.
  pub health_port: u16,
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      bind_address: default_metrics_addr(),
      health_port: default_health_port(),
    }
  }
}

// Default value functions

fn default_service_name() -> String {
  "order-intake".to_string()
}

fn default_log_level() -> String {
  "info".to_string()
}

const fn default_queue_capacity() -> usize {
  256
}

const fn default_per_order_timeout() -> u64 {
  5_000
}

const fn default_task_timeout() -> u64 {
  4_000
}

const fn default_venue_retries() -> u32 {
  2
}

const fn default_retry_base_delay() -> u64 {
  50
}

const fn default_history_capacity() -> usize {
  1_024
}

const fn default_fallback_capacity() -> usize {
  4_096
}

const fn default_channel_capacity() -> usize {
  1_024
}

const fn default_emit_timeout() -> u64 {
  1_000
}

const fn default_alert_threshold() -> u32 {
  10
}

const fn default_alert_window() -> u64 {
  60
}

fn default_data_dir() -> String {
  "data".to_string()
}

fn default_venue_name() -> String {
  "paper".to_string()
}

const fn default_venue_latency() -> u64 {
  5
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}

const fn default_health_port() -> u16 {
  8080
}
