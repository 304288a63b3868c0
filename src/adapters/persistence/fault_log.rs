//! Fault Log - Append-only JSONL Fault Records
//!
//! Persists fault records to daily JSONL files in the format
//! `faults/YYYY-MM-DD.jsonl`. Each line is one self-contained
//! `FaultRecord`, so a partially written file stays readable.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};

use crate::domain::fault::FaultRecord;
use crate::ports::fault_backend::FaultBackend;

/// Append-only JSONL fault log with daily file rotation.
///
/// Writes come from the fault sink's single writer task, so lines are
/// never interleaved.
pub struct FaultLog {
    /// Directory holding the daily files.
    faults_dir: PathBuf,
}

impl FaultLog {
    /// Create the log under `data_dir/faults`.
    pub async fn new(data_dir: &str) -> Result<Self> {
        let faults_dir = Path::new(data_dir).join("faults");
        fs::create_dir_all(&faults_dir)
            .await
            .with_context(|| format!("Failed to create fault directory {}", faults_dir.display()))?;

        Ok(Self { faults_dir })
    }

    pub fn dir(&self) -> &Path {
        &self.faults_dir
    }

    fn today_path(&self) -> PathBuf {
        let date = Utc::now().format("%Y-%m-%d");
        self.faults_dir.join(format!("{date}.jsonl"))
    }

    /// Append one record to today's file.
    #[instrument(skip(self, record), fields(kind = %record.kind))]
    pub async fn append(&self, record: &FaultRecord) -> Result<()> {
        let mut json = serde_json::to_string(record).context("Failed to serialize fault record")?;
        json.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.today_path())
            .await
            .context("Failed to open fault log file")?;

        file.write_all(json.as_bytes())
            .await
            .context("Failed to write fault record")?;
        file.flush().await.context("Failed to flush fault log")?;

        Ok(())
    }

    /// Load every record from every daily file, oldest first.
    ///
    /// Malformed lines are skipped with a warning.
    #[instrument(skip(self))]
    pub async fn load_all(&self) -> Result<Vec<FaultRecord>> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.faults_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "jsonl") {
                continue;
            }
            let content = fs::read_to_string(&path).await?;
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                match serde_json::from_str::<FaultRecord>(line) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(
                        file = %path.display(),
                        error = %e,
                        "Skipping malformed fault record"
                    ),
                }
            }
        }

        records.sort_by_key(|r| r.timestamp);
        info!(count = records.len(), "Loaded fault records");
        Ok(records)
    }
}

#[async_trait]
impl FaultBackend for FaultLog {
    async fn emit(&self, record: &FaultRecord) -> Result<()> {
        self.append(record).await
    }

    /// Check if the fault directory is writable.
    async fn is_healthy(&self) -> bool {
        let probe = self.faults_dir.join(".health_check");
        let result = fs::write(&probe, b"ok").await;
        let _ = fs::remove_file(&probe).await;
        result.is_ok()
    }
}
