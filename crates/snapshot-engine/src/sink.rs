//! Run artifacts on disk
//!
//! Layout under the data directory:
//!
//! ```text
//! snapshots/snapshot_<date>.json
//! metrics/run_<run_id>.json
//! errors/errors_<date>.jsonl
//! errors/error_summary_<date>.json
//! errors/error_summary_<date>.txt
//! reports/morning_snapshot_<date>.md
//! ```

use crate::Result;
use crate::metrics::RunMetrics;
use crate::orchestrator::{RunOutcome, Snapshot};
use crate::tracker::ErrorTracker;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const ERROR_FILE_EXTENSIONS: [&str; 3] = ["json", "jsonl", "txt"];

/// Paths written for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenArtifacts {
    pub snapshot: PathBuf,
    pub metrics: PathBuf,
    /// Absent when the run recorded no errors
    pub error_log: Option<PathBuf>,
    pub error_summary: PathBuf,
    pub error_summary_text: PathBuf,
}

/// Writes run artifacts under a root directory
#[derive(Debug, Clone)]
pub struct FileSink {
    root: PathBuf,
}

fn day(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    write_atomic(path, &serde_json::to_vec_pretty(value)?).await
}

impl FileSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn errors_dir(&self) -> PathBuf {
        self.root.join("errors")
    }

    /// Remove error logs left by earlier runs; returns how many were removed
    pub async fn clear_stale_errors(&self) -> Result<usize> {
        let dir = self.errors_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_error_file = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ERROR_FILE_EXTENSIONS.contains(&ext));
            if is_error_file && entry.file_type().await?.is_file() {
                tokio::fs::remove_file(&path).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(dir = %dir.display(), removed, "Cleared stale error files");
        }
        Ok(removed)
    }

    pub async fn write_snapshot(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        let path = self
            .root
            .join("snapshots")
            .join(format!("snapshot_{}.json", day(snapshot.generated_at)));
        write_json(&path, snapshot).await?;
        debug!(path = %path.display(), "Snapshot written");
        Ok(path)
    }

    pub async fn write_metrics(&self, metrics: &RunMetrics) -> Result<PathBuf> {
        let path = self
            .root
            .join("metrics")
            .join(format!("run_{}.json", metrics.run_id()));
        write_json(&path, metrics).await?;
        debug!(path = %path.display(), "Run metrics written");
        Ok(path)
    }

    /// Append records to the daily log and rewrite the daily summaries.
    ///
    /// Returns the log path (when anything was appended), then the JSON and
    /// text summary paths.
    pub async fn write_errors(
        &self,
        errors: &ErrorTracker,
        at: DateTime<Utc>,
    ) -> Result<(Option<PathBuf>, PathBuf, PathBuf)> {
        let dir = self.errors_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let date = day(at);

        let log = if errors.is_empty() {
            None
        } else {
            let path = dir.join(format!("errors_{date}.jsonl"));
            let mut lines = Vec::new();
            for record in errors.records() {
                serde_json::to_writer(&mut lines, record)?;
                lines.push(b'\n');
            }
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(&lines).await?;
            file.flush().await?;
            Some(path)
        };

        let summary = errors.summary();
        let json_path = dir.join(format!("error_summary_{date}.json"));
        write_json(&json_path, &summary).await?;
        let text_path = dir.join(format!("error_summary_{date}.txt"));
        write_atomic(&text_path, summary.render_text().as_bytes()).await?;

        Ok((log, json_path, text_path))
    }

    pub async fn write_report(&self, markdown: &str, at: DateTime<Utc>) -> Result<PathBuf> {
        let path = self
            .root
            .join("reports")
            .join(format!("morning_snapshot_{}.md", day(at)));
        write_atomic(&path, markdown.as_bytes()).await?;
        Ok(path)
    }

    /// Write the snapshot, metrics and error files of a finished run
    pub async fn persist(&self, outcome: &RunOutcome) -> Result<WrittenArtifacts> {
        let snapshot = self.write_snapshot(&outcome.snapshot).await?;
        let metrics = self.write_metrics(&outcome.metrics).await?;
        let (error_log, error_summary, error_summary_text) = self
            .write_errors(&outcome.errors, outcome.snapshot.generated_at)
            .await?;
        info!(root = %self.root.display(), "Run artifacts written");
        Ok(WrittenArtifacts {
            snapshot,
            metrics,
            error_log,
            error_summary,
            error_summary_text,
        })
    }
}
