//! Order Intake Service - Entry Point
//!
//! Initializes configuration, logging, the fault sink and the order
//! pipeline, then streams JSON orders from stdin until EOF or SIGINT.
//!
//! Wiring sequence:
//! 1. Load config.toml (argv[1] or ORDER_INTAKE_CONFIG) + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Create Prometheus registry (implements the pipeline observer)
//! 4. Create JSONL fault log + FaultSink (single writer task)
//! 5. Create PaperVenue + OrderPipeline (worker pool starts here)
//! 6. Spawn metrics server on :9090 and health server on :8080
//! 7. Run stdin → pipeline → stdout intake
//! 8. EOF or SIGINT → graceful shutdown (stop intake → not ready → drain → flush)

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use order_intake::adapters::intake::JsonLinesIntake;
use order_intake::adapters::metrics::{HealthServer, HealthState, MetricsRegistry};
use order_intake::adapters::persistence::FaultLog;
use order_intake::adapters::venue::PaperVenue;
use order_intake::config::{self, AppConfig};
use order_intake::ports::fault_backend::FaultBackend;
use order_intake::ports::telemetry::{NoopObserver, PipelineObserver, StatusSource};
use order_intake::usecases::{FaultSink, OrderPipeline};

const CONFIG_ENV: &str = "ORDER_INTAKE_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration ───────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .unwrap_or_else(|| "config.toml".to_string());
    let config = config::loader::load_or_default(&config_path)
        .with_context(|| format!("Failed to load configuration from {config_path}"))?;

    // ── 2. Initialize structured logging ────────────────────
    init_tracing(&config);

    info!(
        name = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path,
        pool_size = config.pipeline.effective_pool_size(),
        queue_capacity = config.pipeline.queue_capacity,
        "Starting order intake service"
    );

    // ── 3. Shutdown signal channel ──────────────────────────
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);

    // ── 4. Metrics registry (pipeline observer) ─────────────
    let metrics = if config.metrics.enabled {
        Some(Arc::new(
            MetricsRegistry::new().context("Failed to create metrics registry")?,
        ))
    } else {
        None
    };
    let observer: Arc<dyn PipelineObserver> = match &metrics {
        Some(registry) => Arc::clone(registry) as Arc<dyn PipelineObserver>,
        None => Arc::new(NoopObserver),
    };

    // ── 5. Fault log + fault sink ───────────────────────────
    let backend: Option<Arc<dyn FaultBackend>> = if config.fault_sink.persist {
        let log = FaultLog::new(&config.fault_sink.data_dir)
            .await
            .context("Failed to open fault log")?;
        info!(dir = %log.dir().display(), "Fault log ready");
        Some(Arc::new(log) as Arc<dyn FaultBackend>)
    } else {
        warn!("Fault persistence disabled, faults are kept in memory only");
        None
    };
    let sink = Arc::new(FaultSink::new(&config.fault_sink, backend, Arc::clone(&observer)));
    let alert_handle = spawn_alert_watcher(&sink, shutdown_tx.subscribe());

    // ── 6. Venue + pipeline ─────────────────────────────────
    let venue = Arc::new(PaperVenue::new(&config.venue));
    if config.venue.quotes.is_empty() {
        warn!("No venue quotes configured, every order will fail with no quote");
    }
    let pipeline = Arc::new(OrderPipeline::new(
        &config.pipeline,
        venue,
        Arc::clone(&sink),
        observer,
    ));

    // ── 7. Metrics + health servers ─────────────────────────
    let health_state = Arc::new(HealthState::new(
        Arc::clone(&pipeline) as Arc<dyn StatusSource>
    ));
    let mut server_handles = Vec::new();
    if let Some(registry) = &metrics {
        let registry = Arc::clone(registry);
        let bind_address = config.metrics.bind_address.clone();
        let rx = shutdown_tx.subscribe();
        server_handles.push(tokio::spawn(async move {
            if let Err(e) = registry.serve(bind_address, rx).await {
                error!(error = %e, "Metrics server failed");
            }
        }));

        let health = HealthServer::new(Arc::clone(&health_state), config.metrics.health_port);
        let rx = shutdown_tx.subscribe();
        server_handles.push(tokio::spawn(async move {
            if let Err(e) = health.run(rx).await {
                error!(error = %e, "Health server failed");
            }
        }));
    }

    // ── 8. Intake: stdin → pipeline → stdout ────────────────
    let max_in_flight = config.pipeline.effective_pool_size() + config.pipeline.queue_capacity;
    let intake = JsonLinesIntake::new(Arc::clone(&pipeline), max_in_flight);
    let intake_shutdown = shutdown_tx.subscribe();
    let mut intake_handle = tokio::spawn(async move {
        intake
            .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), intake_shutdown)
            .await
    });

    info!("Order intake service running");

    // ── 9. Wait for EOF or SIGINT ───────────────────────────
    let intake_result = tokio::select! {
        result = &mut intake_handle => Some(result),
        _ = signal::ctrl_c() => {
            info!("SIGINT received, initiating graceful shutdown");
            None
        }
    };

    // ── Graceful shutdown (stop intake → not ready → drain → flush) ──

    // 1. Mark readiness as failing
    health_state.mark_stopping();

    // 2. Signal intake, servers and alert watcher to stop
    let _ = shutdown_tx.send(());

    // 3. Let in-flight orders finish (bounded by the per-order deadline)
    let intake_result = match intake_result {
        Some(result) => Some(result),
        None => {
            let grace = config.pipeline.per_order_timeout() + Duration::from_secs(1);
            tokio::time::timeout(grace, intake_handle).await.ok()
        }
    };
    match intake_result {
        Some(Ok(Ok(summary))) => info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Intake finished"
        ),
        Some(Ok(Err(e))) => error!(error = %e, "Intake failed"),
        Some(Err(e)) => error!(error = %e, "Intake task panicked"),
        None => warn!("Intake did not finish within the grace period"),
    }

    // 4. Drain the worker pool and flush the fault sink
    pipeline.shutdown().await;

    // 5. Stop servers
    for handle in server_handles {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    let _ = alert_handle.await;

    let status = pipeline.status();
    info!(
        completed = status.completed,
        failed = status.failed,
        rejected = status.rejected,
        faults = status.faults_total,
        unflushed_faults = status.fallback_buffered,
        "Shutdown complete"
    );
    Ok(())
}

/// Initialize `tracing` with an env override, else the configured level.
fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.service.log_level));

    // Replies go to stdout; logs go to stderr.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.service.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Log every alert the fault sink raises until shutdown.
fn spawn_alert_watcher(
    sink: &FaultSink,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    let mut alerts = sink.subscribe_alerts();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                alert = alerts.recv() => match alert {
                    Ok(alert) => warn!(
                        kind = %alert.kind,
                        count = alert.count,
                        window_secs = alert.window.as_secs(),
                        raised_at = %alert.raised_at,
                        "Fault alert"
                    ),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Alert watcher lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}
