//! Multi-source fetch engine for the morning snapshot
//!
//! Given a watchlist and a set of enabled sources, the [`Orchestrator`]
//! runs one fetch task per (source, ticker) pair, plus one task per
//! batched or ticker-independent source, and merges every outcome into a
//! [`Snapshot`] in which each slot holds exactly one [`FetchResult`].
//!
//! # Guarantees
//!
//! - A failing task never affects another task's result.
//! - At most `max_concurrency` browser sessions are open at any instant.
//! - Transient navigation and extraction errors are retried with
//!   exponential backoff; everything else fails fast.
//! - A cached selector that stops working is dropped and the extraction
//!   falls back to the full page.
//! - Every failure is recorded once in the [`ErrorTracker`] with the stage
//!   the task reached.
//!
//! # Example
//!
//! ```rust,ignore
//! use snapshot_browser::HttpAutomationClient;
//! use snapshot_engine::{Orchestrator, RunConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RunConfig::from_env()?;
//!     let client = Arc::new(HttpAutomationClient::new(&config.automation.base_url)?);
//!     let outcome = Orchestrator::new(config, client).run().await;
//!     println!("{}", outcome.errors.summary().render_text());
//!     Ok(())
//! }
//! ```
//!
//! [`FetchResult`]: snapshot_core::FetchResult

pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod gate;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod sink;
pub mod sources;
pub mod tracker;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use cache::SelectorCache;
pub use config::{
    AutomationSettings, Credentials, DEFAULT_WATCHLIST, KnowledgeSettings, NewsSettings,
    RetrySettings,
    RunConfig, RunConfigBuilder, load_watchlist,
};
pub use error::{EngineError, FetchError, Result};
pub use fetcher::{
    FetchContext, FetchMode, FetchOutput, FetchTarget, Incident, Outcome, SourceFetcher, TaskDeps,
    TaskReport, run_task,
};
pub use gate::{ConcurrencyGate, GatePermit};
pub use metrics::{MetricsCollector, RunMetrics, SessionMetric, SourceCounts};
pub use orchestrator::{Orchestrator, PlannedTask, RunOutcome, Snapshot, TickerSnapshot};
pub use retry::RetryPolicy;
pub use sink::{FileSink, WrittenArtifacts};
pub use sources::default_fetchers;
pub use tracker::{ErrorRecord, ErrorSummary, ErrorTracker, Ranked};
