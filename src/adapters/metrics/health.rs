//! Health Check Server - Liveness, Readiness and Status
//!
//! Exposes /live, /ready and /status via axum 0.7. Readiness turns 503
//! once shutdown begins or the pipeline stops admitting orders; /status
//! returns the pipeline snapshot as JSON.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::ports::telemetry::{PipelineStatus, StatusSource};

/// Shared health state polled by the probes.
#[derive(Clone)]
pub struct HealthState {
    /// Cleared when graceful shutdown starts.
    pub running: Arc<AtomicBool>,
    /// Pipeline snapshot provider.
    source: Arc<dyn StatusSource>,
}

impl HealthState {
    pub fn new(source: Arc<dyn StatusSource>) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            source,
        }
    }

    /// Mark the service as draining; readiness fails from now on.
    pub fn mark_stopping(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn status(&self) -> PipelineStatus {
        self.source.status()
    }

    /// Check if the service should receive new orders.
    pub fn is_ready(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.source.status().accepting
    }
}

/// Axum-based health check HTTP server.
pub struct HealthServer {
    /// Health state shared with `main`.
    state: Arc<HealthState>,
    /// Bind port (default 8080 from config).
    port: u16,
}

impl HealthServer {
    pub const fn new(state: Arc<HealthState>, port: u16) -> Self {
        Self { state, port }
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .route("/status", get(Self::status))
            .with_state(Arc::clone(&self.state))
    }

    /// Serve until `shutdown_rx` fires.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let app = self.router();
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!(address = %addr, "Health server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Liveness probe: always returns 200 if the process is running.
    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    async fn readiness(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
        if state.is_ready() {
            (StatusCode::OK, "READY")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }

    async fn status(State(state): State<Arc<HealthState>>) -> Json<PipelineStatus> {
        Json(state.status())
    }
}
