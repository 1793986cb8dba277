//! Per-task outcomes and the diagnostics attached to failures

use crate::Payload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle of a single fetch task.
///
/// A task only ever moves forward through these states; a failure keeps
/// the last state reached so reports can tell where it broke.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Created,
    SessionAcquired,
    Navigated,
    Extracted,
    Normalized,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Created => "created",
            Stage::SessionAcquired => "session_acquired",
            Stage::Navigated => "navigated",
            Stage::Extracted => "extracted",
            Stage::Normalized => "normalized",
            Stage::Done => "done",
        };
        f.write_str(s)
    }
}

/// Failure taxonomy for a task.
///
/// All kinds are task-local: they end one task and never the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Could not open a browser session (or a gate slot for one)
    SessionCreation,
    /// Navigation failed after the retry budget
    Navigation,
    /// Extraction failed after the retry budget, including schema mismatches
    Extraction,
    /// One item of a batched source failed; siblings are unaffected
    BatchPartial,
    /// The run was cancelled while the task was in flight
    Cancelled,
    /// The task panicked or otherwise died without reporting
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::SessionCreation => "session_creation",
            FailureKind::Navigation => "navigation",
            FailureKind::Extraction => "extraction",
            FailureKind::BatchPartial => "batch_partial",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Snapshot of what a task knew when it finished.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Diagnostics {
    /// Last lifecycle state reached
    pub stage: Stage,
    /// Remote session identifier, once one was created
    pub session_id: Option<String>,
    /// Link to the provider's session inspector
    pub session_url: Option<String>,
    /// Page URL observed at the page-state checkpoint
    pub page_url: Option<String>,
    /// Page title observed at the page-state checkpoint
    pub page_title: Option<String>,
    /// Whether the page answered the page-state checkpoint
    pub page_accessible: Option<bool>,
    /// Navigation attempts made (including the first)
    pub navigation_attempts: u32,
    /// Extraction attempts made (including the first)
    pub extraction_attempts: u32,
    /// A cached selector was used for a scoped extraction
    pub cache_hit: bool,
    /// A cached selector failed and was dropped
    pub cache_invalidated: bool,
    /// Wall-clock timings in milliseconds, keyed by step
    pub timings_ms: BTreeMap<String, u64>,
}

impl Diagnostics {
    /// Record a step duration
    pub fn record_timing(&mut self, step: impl Into<String>, millis: u64) {
        self.timings_ms.insert(step.into(), millis);
    }
}

/// Terminal failure of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub kind: FailureKind,
    pub message: String,
    pub diagnostics: Diagnostics,
}

/// Outcome of one fetch task for one ticker (or for the ticker-independent task).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchResult {
    Success {
        payload: Payload,
        completed_at: DateTime<Utc>,
    },
    Failure(FetchFailure),
    Skipped {
        reason: String,
    },
}

impl FetchResult {
    /// Successful result stamped with the current time
    pub fn success(payload: Payload) -> Self {
        FetchResult::Success {
            payload,
            completed_at: Utc::now(),
        }
    }

    /// Failed result
    pub fn failure(
        kind: FailureKind,
        message: impl Into<String>,
        diagnostics: Diagnostics,
    ) -> Self {
        FetchResult::Failure(FetchFailure {
            kind,
            message: message.into(),
            diagnostics,
        })
    }

    /// Skipped result
    pub fn skipped(reason: impl Into<String>) -> Self {
        FetchResult::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, FetchResult::Failure(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, FetchResult::Skipped { .. })
    }

    /// The payload, when successful
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            FetchResult::Success { payload, .. } => Some(payload),
            _ => None,
        }
    }

    /// The failure, when failed
    pub fn failure_detail(&self) -> Option<&FetchFailure> {
        match self {
            FetchResult::Failure(f) => Some(f),
            _ => None,
        }
    }

    /// Precedence used when two results compete for the same slot.
    ///
    /// Higher wins; the merge that uses it is order-independent.
    pub fn precedence(&self) -> u8 {
        match self {
            FetchResult::Success { .. } => 2,
            FetchResult::Failure(_) => 1,
            FetchResult::Skipped { .. } => 0,
        }
    }
}
