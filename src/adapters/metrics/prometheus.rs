//! Prometheus Metrics Registry - Pipeline Observability
//!
//! Registers and exposes Prometheus metrics on :9090. Implements
//! `PipelineObserver`, so the use cases feed it directly: order outcomes
//! and latency, fault counts by kind, alerts, sink degradation and
//! queue depth.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tokio::sync::broadcast;
use tracing::{error, info, instrument};

use crate::domain::envelope::FaultKind;
use crate::ports::telemetry::{OrderOutcome, PipelineObserver};

/// Centralized Prometheus metrics for the order pipeline.
///
/// All metrics follow the naming convention `order_intake_*`.
pub struct MetricsRegistry {
    /// Prometheus registry.
    registry: Registry,
    /// End-to-end order latency (seconds) by outcome.
    pub order_latency_seconds: HistogramVec,
    /// Orders reaching a terminal state, by outcome.
    pub orders_total: IntCounterVec,
    /// Fault records, by kind.
    pub faults_total: IntCounterVec,
    /// Alerts raised, by kind.
    pub alerts_total: IntCounterVec,
    /// Fault sink degraded (1) or healthy (0).
    pub sink_degraded: IntGauge,
    /// Queued, not-yet-started tasks.
    pub queue_depth: IntGauge,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let order_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "order_intake_order_latency_seconds",
                "Time from receipt to terminal state",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["outcome"],
        )?;

        let orders_total = IntCounterVec::new(
            Opts::new("order_intake_orders_total", "Orders reaching a terminal state"),
            &["outcome"],
        )?;

        let faults_total = IntCounterVec::new(
            Opts::new("order_intake_faults_total", "Fault records reported"),
            &["kind"],
        )?;

        let alerts_total = IntCounterVec::new(
            Opts::new("order_intake_alerts_total", "Fault alert thresholds crossed"),
            &["kind"],
        )?;

        let sink_degraded = IntGauge::new(
            "order_intake_fault_sink_degraded",
            "Whether the fault sink is buffering in memory (1=yes, 0=no)",
        )?;

        let queue_depth = IntGauge::new(
            "order_intake_queue_depth",
            "Queued tasks waiting for a worker",
        )?;

        registry.register(Box::new(order_latency_seconds.clone()))?;
        registry.register(Box::new(orders_total.clone()))?;
        registry.register(Box::new(faults_total.clone()))?;
        registry.register(Box::new(alerts_total.clone()))?;
        registry.register(Box::new(sink_degraded.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;

        // Pre-create label sets so every series is exported from the start.
        for kind in FaultKind::ALL {
            faults_total.with_label_values(&[kind.as_str()]);
        }

        Ok(Self {
            registry,
            order_latency_seconds,
            orders_total,
            faults_total,
            alerts_total,
            sink_degraded,
            queue_depth,
        })
    }

    /// Encode every registered metric in the text exposition format.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Serve Prometheus metrics on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics = Arc::clone(&self);

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&metrics);
                async move {
                    match metrics.render() {
                        Ok(body) => (StatusCode::OK, body),
                        Err(e) => {
                            error!(error = %e, "Failed to encode metrics");
                            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
                        }
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}

impl PipelineObserver for MetricsRegistry {
    fn order_finished(&self, outcome: OrderOutcome, latency: Duration) {
        self.orders_total.with_label_values(&[outcome.as_str()]).inc();
        self.order_latency_seconds
            .with_label_values(&[outcome.as_str()])
            .observe(latency.as_secs_f64());
    }

    fn fault_reported(&self, kind: FaultKind) {
        self.faults_total.with_label_values(&[kind.as_str()]).inc();
    }

    fn alert_raised(&self, kind: FaultKind) {
        self.alerts_total.with_label_values(&[kind.as_str()]).inc();
    }

    fn sink_degraded(&self, degraded: bool) {
        self.sink_degraded.set(i64::from(degraded));
    }

    fn queue_depth(&self, depth: usize) {
        self.queue_depth.set(i64::try_from(depth).unwrap_or(i64::MAX));
    }
}
