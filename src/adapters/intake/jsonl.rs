//! JSON Lines Intake - Stream Orders Through the Pipeline
//!
//! Reads one JSON `OrderRequest` per line from any async reader, keeps up
//! to `max_in_flight` orders in the pipeline at once, and writes one
//! `OrderReply` JSON line per request in completion order. Lines that do
//! not decode are answered (and reported) as `ValidationFailure`.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

use crate::domain::envelope::{Fault, FaultKind, ResultEnvelope};
use crate::domain::order::{ExecutionResult, OrderRequest};
use crate::ports::execution::ExecutionVenue;
use crate::usecases::order_pipeline::OrderPipeline;

/// Fault as seen by the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultReply {
    pub kind: FaultKind,
    pub message: String,
    /// Whether resubmitting later may succeed.
    pub retryable: bool,
}

/// Reply to one input line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReply {
    /// 1-based input line number.
    pub line: u64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<FaultReply>,
}

impl OrderReply {
    pub fn from_envelope(line: u64, envelope: ResultEnvelope<ExecutionResult>) -> Self {
        match envelope {
            Ok(result) => Self {
                line,
                ok: true,
                result: Some(result),
                fault: None,
            },
            Err(fault) => Self {
                line,
                ok: false,
                result: None,
                fault: Some(FaultReply {
                    kind: fault.kind(),
                    message: fault.message().to_string(),
                    retryable: fault.kind().is_retryable(),
                }),
            },
        }
    }
}

/// Totals for one intake run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntakeSummary {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Line-oriented intake in front of an `OrderPipeline`.
pub struct JsonLinesIntake<V: ExecutionVenue> {
    pipeline: Arc<OrderPipeline<V>>,
    max_in_flight: usize,
}

impl<V: ExecutionVenue> JsonLinesIntake<V> {
    pub fn new(pipeline: Arc<OrderPipeline<V>>, max_in_flight: usize) -> Self {
        Self {
            pipeline,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Run until the reader is exhausted or `shutdown_rx` fires.
    ///
    /// Orders already in flight when reading stops are still answered.
    #[instrument(skip_all, fields(max_in_flight = self.max_in_flight))]
    pub async fn run<R, W>(
        &self,
        reader: R,
        mut writer: W,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<IntakeSummary>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        let mut in_flight = FuturesUnordered::new();
        let mut summary = IntakeSummary::default();
        let mut line_no = 0u64;
        let mut reading = true;

        info!("Order intake started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv(), if reading => {
                    info!(in_flight = in_flight.len(), "Order intake stopping");
                    reading = false;
                }
                Some(reply) = in_flight.next(), if !in_flight.is_empty() => {
                    write_reply(&mut writer, &reply).await?;
                    summary.processed += 1;
                    if reply.ok {
                        summary.succeeded += 1;
                    } else {
                        summary.failed += 1;
                    }
                }
                line = lines.next_line(), if reading && in_flight.len() < self.max_in_flight => {
                    match line.context("Failed to read order line")? {
                        Some(line) => {
                            line_no += 1;
                            if line.trim().is_empty() {
                                continue;
                            }
                            in_flight.push(self.handle_line(line_no, line));
                        }
                        None => {
                            debug!(lines = line_no, "Order input exhausted");
                            reading = false;
                        }
                    }
                }
                else => break,
            }
        }

        writer.flush().await.context("Failed to flush replies")?;
        info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Order intake finished"
        );
        Ok(summary)
    }

    async fn handle_line(&self, line_no: u64, line: String) -> OrderReply {
        let envelope = match serde_json::from_str::<OrderRequest>(&line) {
            Ok(req) => self.pipeline.process_order(req).await,
            Err(e) => {
                let fault = Fault::validation(format!("malformed order: {e}"));
                self.pipeline
                    .sink()
                    .report_fault(&fault, None, &format!("intake line {line_no}"));
                Err(fault)
            }
        };
        OrderReply::from_envelope(line_no, envelope)
    }
}

async fn write_reply<W: AsyncWrite + Unpin>(writer: &mut W, reply: &OrderReply) -> Result<()> {
    let mut json = serde_json::to_string(reply).context("Failed to serialize reply")?;
    json.push('\n');
    writer
        .write_all(json.as_bytes())
        .await
        .context("Failed to write reply")?;
    Ok(())
}
