//! Run metrics
//!
//! [`MetricsCollector`] accumulates per-session and per-result figures while
//! the run is in flight; [`MetricsCollector::finalize`] consumes it and
//! returns the immutable [`RunMetrics`] written at run end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snapshot_browser::UsageSnapshot;
use snapshot_core::{FetchResult, SourceName};
use std::collections::BTreeMap;
use tracing::debug;

/// One browser session's footprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetric {
    pub source: SourceName,
    /// Ticker, batch or `global`
    pub target: String,
    pub session_id: String,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub usage: UsageSnapshot,
}

/// Outcome counts and cost for one source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCounts {
    pub success: usize,
    pub failure: usize,
    pub skipped: usize,
    pub sessions: usize,
    pub total_tokens: u64,
    pub session_ms: u64,
}

impl SourceCounts {
    pub fn results(&self) -> usize {
        self.success + self.failure + self.skipped
    }
}

/// Collects metrics during a run
#[derive(Debug)]
pub struct MetricsCollector {
    run_id: String,
    started_at: DateTime<Utc>,
    sessions: Vec<SessionMetric>,
    by_source: BTreeMap<SourceName, SourceCounts>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        let started_at = Utc::now();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            run_id: format!("{}_{}", started_at.format("%Y%m%d_%H%M%S"), &suffix[..8]),
            started_at,
            sessions: Vec::new(),
            by_source: BTreeMap::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn record_session(&mut self, metric: SessionMetric) {
        let counts = self.by_source.entry(metric.source).or_default();
        counts.sessions += 1;
        counts.total_tokens += metric.usage.total_tokens();
        counts.session_ms += metric.duration_ms;
        debug!(
            source = %metric.source,
            target = %metric.target,
            tokens = metric.usage.total_tokens(),
            duration_ms = metric.duration_ms,
            "Session recorded"
        );
        self.sessions.push(metric);
    }

    pub fn record_result(&mut self, source: SourceName, result: &FetchResult) {
        let counts = self.by_source.entry(source).or_default();
        match result {
            FetchResult::Success { .. } => counts.success += 1,
            FetchResult::Failure(_) => counts.failure += 1,
            FetchResult::Skipped { .. } => counts.skipped += 1,
        }
    }

    /// Close the run and compute totals
    pub fn finalize(self) -> RunMetrics {
        let finished_at = Utc::now();
        let total_sessions = self.sessions.len();
        let session_success = self.sessions.iter().filter(|s| s.success).count();

        let mut total_prompt_tokens = 0;
        let mut total_completion_tokens = 0;
        let mut total_inference_time_ms = 0;
        let mut total_session_ms = 0;
        for session in &self.sessions {
            total_prompt_tokens += session.usage.prompt_tokens;
            total_completion_tokens += session.usage.completion_tokens;
            total_inference_time_ms += session.usage.inference_time_ms;
            total_session_ms += session.duration_ms;
        }

        let avg_session_ms = if total_sessions == 0 {
            0.0
        } else {
            total_session_ms as f64 / total_sessions as f64
        };
        let success_rate = if total_sessions == 0 {
            0.0
        } else {
            session_success as f64 / total_sessions as f64
        };

        RunMetrics {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at,
            wall_time_ms: (finished_at - self.started_at).num_milliseconds().max(0) as u64,
            total_sessions,
            session_success,
            session_failure: total_sessions - session_success,
            success_rate,
            total_prompt_tokens,
            total_completion_tokens,
            total_tokens: total_prompt_tokens + total_completion_tokens,
            total_inference_time_ms,
            total_session_ms,
            browser_minutes: total_session_ms as f64 / 60_000.0,
            avg_session_ms,
            by_source: self.by_source,
            sessions: self.sessions,
        }
    }
}

/// Finalised metrics for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    run_id: String,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    wall_time_ms: u64,
    total_sessions: usize,
    session_success: usize,
    session_failure: usize,
    success_rate: f64,
    total_prompt_tokens: u64,
    total_completion_tokens: u64,
    total_tokens: u64,
    total_inference_time_ms: u64,
    total_session_ms: u64,
    browser_minutes: f64,
    avg_session_ms: f64,
    by_source: BTreeMap<SourceName, SourceCounts>,
    sessions: Vec<SessionMetric>,
}

impl RunMetrics {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn wall_time_ms(&self) -> u64 {
        self.wall_time_ms
    }

    pub fn total_sessions(&self) -> usize {
        self.total_sessions
    }

    pub fn session_success(&self) -> usize {
        self.session_success
    }

    pub fn session_failure(&self) -> usize {
        self.session_failure
    }

    pub fn success_rate(&self) -> f64 {
        self.success_rate
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn total_inference_time_ms(&self) -> u64 {
        self.total_inference_time_ms
    }

    pub fn browser_minutes(&self) -> f64 {
        self.browser_minutes
    }

    pub fn avg_session_ms(&self) -> f64 {
        self.avg_session_ms
    }

    /// Counts for a source; zero if it never ran
    pub fn source(&self, source: SourceName) -> SourceCounts {
        self.by_source.get(&source).copied().unwrap_or_default()
    }

    pub fn by_source(&self) -> &BTreeMap<SourceName, SourceCounts> {
        &self.by_source
    }

    pub fn sessions(&self) -> &[SessionMetric] {
        &self.sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapshot_core::{Diagnostics, FailureKind, Payload, QuoteSnapshot};

    fn session(source: SourceName, success: bool, ms: u64, prompt: u64) -> SessionMetric {
        SessionMetric {
            source,
            target: "AAPL".to_string(),
            session_id: format!("s-{ms}"),
            duration_ms: ms,
            success,
            error: (!success).then(|| "boom".to_string()),
            usage: UsageSnapshot {
                prompt_tokens: prompt,
                completion_tokens: 10,
                inference_time_ms: 5,
            },
        }
    }

    #[test]
    fn test_empty_run_has_zero_averages() {
        let metrics = MetricsCollector::new().finalize();
        assert_eq!(metrics.total_sessions(), 0);
        assert_eq!(metrics.avg_session_ms(), 0.0);
        assert_eq!(metrics.success_rate(), 0.0);
    }

    #[test]
    fn test_finalize_aggregates_sessions_and_results() {
        let mut collector = MetricsCollector::new();
        collector.record_session(session(SourceName::Quote, true, 30_000, 100));
        collector.record_session(session(SourceName::Quote, false, 90_000, 50));
        collector.record_session(session(SourceName::NewsSearch, true, 60_000, 0));

        let payload = Payload::Quote(QuoteSnapshot::default());
        collector.record_result(SourceName::Quote, &FetchResult::success(payload));
        collector.record_result(
            SourceName::Quote,
            &FetchResult::failure(FailureKind::Navigation, "timeout", Diagnostics::default()),
        );
        collector.record_result(SourceName::SecondaryNews, &FetchResult::skipped("disabled"));

        let metrics = collector.finalize();
        assert_eq!(metrics.total_sessions(), 3);
        assert_eq!(metrics.session_success(), 2);
        assert_eq!(metrics.session_failure(), 1);
        assert_eq!(metrics.total_tokens(), 180);
        assert_eq!(metrics.browser_minutes(), 3.0);
        assert_eq!(metrics.avg_session_ms(), 60_000.0);

        let quote = metrics.source(SourceName::Quote);
        assert_eq!((quote.success, quote.failure, quote.sessions), (1, 1, 2));
        assert_eq!(metrics.source(SourceName::SecondaryNews).skipped, 1);
        assert_eq!(metrics.source(SourceName::MacroSummary).results(), 0);
    }

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(MetricsCollector::new().run_id(), MetricsCollector::new().run_id());
    }
}
