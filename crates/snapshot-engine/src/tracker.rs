//! Error tracking
//!
//! The authoritative failure log of a run. Records are appended once and
//! never changed; [`ErrorTracker::summary`] groups them for triage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snapshot_core::{Diagnostics, FailureKind, FetchFailure, SourceName, Stage, Ticker};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::warn;

/// Records kept in a summary for context
const RECENT_RECORDS: usize = 10;

/// One recorded failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub source: SourceName,
    pub ticker: Option<Ticker>,
    /// Last stage the task reached
    pub stage: Stage,
    pub kind: FailureKind,
    pub message: String,
    /// The task still produced a result despite this failure
    #[serde(default)]
    pub recovered: bool,
    pub diagnostics: Diagnostics,
}

impl ErrorRecord {
    /// Inspector link captured for the failing session
    pub fn session_url(&self) -> Option<&str> {
        self.diagnostics.session_url.as_deref()
    }
}

/// Append-only failure log
#[derive(Debug, Default)]
pub struct ErrorTracker {
    records: Vec<ErrorRecord>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a terminal task failure
    pub fn record_failure(
        &mut self,
        source: SourceName,
        ticker: Option<&Ticker>,
        failure: &FetchFailure,
    ) {
        warn!(
            source = %source,
            ticker = ticker.map(Ticker::as_str),
            stage = %failure.diagnostics.stage,
            kind = %failure.kind,
            message = %failure.message,
            "Fetch failed"
        );
        self.records.push(ErrorRecord {
            timestamp: Utc::now(),
            source,
            ticker: ticker.cloned(),
            stage: failure.diagnostics.stage,
            kind: failure.kind,
            message: failure.message.clone(),
            recovered: false,
            diagnostics: failure.diagnostics.clone(),
        });
    }

    /// Record a failure the task recovered from
    pub fn record_incident(
        &mut self,
        source: SourceName,
        ticker: Option<&Ticker>,
        kind: FailureKind,
        message: impl Into<String>,
        diagnostics: Diagnostics,
    ) {
        self.records.push(ErrorRecord {
            timestamp: Utc::now(),
            source,
            ticker: ticker.cloned(),
            stage: diagnostics.stage,
            kind,
            message: message.into(),
            recovered: true,
            diagnostics,
        });
    }

    pub fn records(&self) -> &[ErrorRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records that ended their task
    pub fn failures(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.records.iter().filter(|r| !r.recovered)
    }

    /// Group the records for triage
    pub fn summary(&self) -> ErrorSummary {
        let mut by_source: BTreeMap<SourceName, usize> = BTreeMap::new();
        let mut by_kind: BTreeMap<FailureKind, usize> = BTreeMap::new();
        for record in &self.records {
            *by_source.entry(record.source).or_default() += 1;
            *by_kind.entry(record.kind).or_default() += 1;
        }

        let most_problematic_source = most_frequent(&by_source);
        let most_common_kind = most_frequent(&by_kind);
        let skip = self.records.len().saturating_sub(RECENT_RECORDS);

        ErrorSummary {
            generated_at: Utc::now(),
            total_errors: self.records.len(),
            task_failures: self.failures().count(),
            by_source,
            by_kind,
            most_problematic_source,
            most_common_kind,
            recent: self.records[skip..].to_vec(),
        }
    }
}

/// Highest count; ties go to the first key in order
fn most_frequent<K: Copy + Ord>(counts: &BTreeMap<K, usize>) -> Option<Ranked<K>> {
    let mut best: Option<Ranked<K>> = None;
    for (key, count) in counts {
        if best.as_ref().is_none_or(|b| *count > b.count) {
            best = Some(Ranked { key: *key, count: *count });
        }
    }
    best
}

/// A key with its count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ranked<K> {
    pub key: K,
    pub count: usize,
}

/// Failures grouped for humans and tooling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub generated_at: DateTime<Utc>,
    pub total_errors: usize,
    pub task_failures: usize,
    pub by_source: BTreeMap<SourceName, usize>,
    pub by_kind: BTreeMap<FailureKind, usize>,
    pub most_problematic_source: Option<Ranked<SourceName>>,
    pub most_common_kind: Option<Ranked<FailureKind>>,
    /// Most recent records, oldest first
    pub recent: Vec<ErrorRecord>,
}

impl ErrorSummary {
    pub fn is_clean(&self) -> bool {
        self.total_errors == 0
    }

    /// Plain-text rendering
    pub fn render_text(&self) -> String {
        let rule = "=".repeat(60);
        let mut out = String::new();
        let _ = writeln!(out, "{rule}\nERROR SUMMARY\n{rule}\n");
        let _ = writeln!(out, "Total errors: {}", self.total_errors);
        let _ = writeln!(out, "Task failures: {}", self.task_failures);

        if self.is_clean() {
            let _ = writeln!(out, "\nNo errors occurred in this run.");
            return out;
        }

        let _ = writeln!(out, "\nErrors by source:");
        for (source, count) in &self.by_source {
            let _ = writeln!(out, "  - {}: {count}", source.label());
        }

        let _ = writeln!(out, "\nErrors by kind:");
        for (kind, count) in &self.by_kind {
            let _ = writeln!(out, "  - {kind}: {count}");
        }

        if let Some(worst) = &self.most_problematic_source {
            let _ = writeln!(
                out,
                "\nMost problematic source: {} ({} errors)",
                worst.key.label(),
                worst.count
            );
        }
        if let Some(kind) = &self.most_common_kind {
            let _ = writeln!(out, "Most common kind: {} ({})", kind.key, kind.count);
        }

        let _ = writeln!(out, "\nRecent errors:");
        for record in &self.recent {
            let ticker = record.ticker.as_ref().map_or("-", Ticker::as_str);
            let _ = writeln!(
                out,
                "\n  {} / {ticker} at {}{}",
                record.source.label(),
                record.stage,
                if record.recovered { " (recovered)" } else { "" }
            );
            let _ = writeln!(out, "  {}: {}", record.kind, record.message);
            if let Some(url) = record.session_url() {
                let _ = writeln!(out, "  Session: {url}");
            }
        }
        out
    }
}
