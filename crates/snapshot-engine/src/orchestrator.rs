//! Run orchestration
//!
//! Plans one task per (source, ticker), one per batched source and one per
//! ticker-independent source, runs them all under the shared
//! [`ConcurrencyGate`], and merges every result into a fully populated
//! snapshot. Nothing a task does can fail the run: panics become
//! `Internal` failures and missing results become `Skipped`.

use crate::cache::SelectorCache;
use crate::config::RunConfig;
use crate::fetcher::{FetchMode, FetchTarget, SourceFetcher, TaskDeps, TaskReport, run_task};
use crate::gate::ConcurrencyGate;
use crate::metrics::{MetricsCollector, RunMetrics};
use crate::sources::default_fetchers;
use crate::tracker::ErrorTracker;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snapshot_browser::{PageAutomation, SessionProvider};
use snapshot_core::{Diagnostics, FailureKind, FetchResult, SourceName, Stage, Ticker};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

/// One task of a run's plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTask {
    pub source: SourceName,
    pub target: FetchTarget,
}

impl fmt::Display for PlannedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<20} {}", self.source.as_str(), self.target)
    }
}

/// Every enabled per-ticker source's result for one ticker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerSnapshot {
    pub ticker: Ticker,
    pub results: BTreeMap<SourceName, FetchResult>,
}

impl TickerSnapshot {
    pub fn get(&self, source: SourceName) -> Option<&FetchResult> {
        self.results.get(&source)
    }
}

/// The merged outcome of a run, as handed to the report and the sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    /// Watchlist order
    pub tickers: Vec<TickerSnapshot>,
    /// Ticker-independent results (the macro summary)
    pub market: BTreeMap<SourceName, FetchResult>,
}

impl Snapshot {
    pub fn ticker(&self, ticker: &str) -> Option<&TickerSnapshot> {
        self.tickers.iter().find(|t| t.ticker.as_str() == ticker)
    }

    pub fn macro_summary(&self) -> Option<&FetchResult> {
        self.market.get(&SourceName::MacroSummary)
    }
}

/// Everything a run produced
#[derive(Debug)]
pub struct RunOutcome {
    pub snapshot: Snapshot,
    pub errors: ErrorTracker,
    pub metrics: RunMetrics,
    /// The supervisory timeout fired
    pub timed_out: bool,
}

type Slot = (Option<Ticker>, SourceName);

/// Fans out fetch tasks and merges their results
pub struct Orchestrator {
    config: RunConfig,
    fetchers: Vec<Arc<dyn SourceFetcher>>,
    provider: Arc<dyn SessionProvider>,
    page: Arc<dyn PageAutomation>,
    cache: Arc<SelectorCache>,
}

impl Orchestrator {
    /// Orchestrator over one collaborator that provides sessions and page automation
    pub fn new<B>(config: RunConfig, browser: Arc<B>) -> Self
    where
        B: SessionProvider + PageAutomation + 'static,
    {
        let cache = match config.selector_cache_ttl {
            Some(ttl) => SelectorCache::with_ttl(ttl),
            None => SelectorCache::new(),
        };
        Self {
            fetchers: default_fetchers(&config),
            provider: browser.clone(),
            page: browser,
            cache: Arc::new(cache),
            config,
        }
    }

    /// Replace the source fetchers
    pub fn with_fetchers(mut self, fetchers: Vec<Arc<dyn SourceFetcher>>) -> Self {
        self.fetchers = fetchers;
        self
    }

    /// Share an existing selector cache
    pub fn with_cache(mut self, cache: Arc<SelectorCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<SelectorCache> {
        &self.cache
    }

    /// Enabled fetchers, first one per source wins
    fn active_fetchers(&self) -> Vec<Arc<dyn SourceFetcher>> {
        let mut seen = Vec::new();
        let mut active = Vec::new();
        for fetcher in &self.fetchers {
            let source = fetcher.source();
            if !self.config.is_enabled(source) {
                continue;
            }
            if seen.contains(&source) {
                warn!(source = %source, "Duplicate fetcher ignored");
                continue;
            }
            seen.push(source);
            active.push(Arc::clone(fetcher));
        }
        active
    }

    /// The tasks a run would execute
    pub fn plan(&self) -> Vec<PlannedTask> {
        let watchlist = &self.config.watchlist;
        let mut tasks = Vec::new();
        for fetcher in self.active_fetchers() {
            let source = fetcher.source();
            match fetcher.mode() {
                FetchMode::PerTicker => tasks.extend(watchlist.iter().map(|t| PlannedTask {
                    source,
                    target: FetchTarget::Ticker(t.clone()),
                })),
                FetchMode::Batched => tasks.push(PlannedTask {
                    source,
                    target: FetchTarget::Batch(watchlist.clone()),
                }),
                FetchMode::Global => tasks.push(PlannedTask {
                    source,
                    target: FetchTarget::Global,
                }),
            }
        }
        tasks
    }

    fn task_deps(&self) -> TaskDeps {
        let mut gate = ConcurrencyGate::new(self.config.max_concurrency);
        if let Some(per_minute) = self.config.sessions_per_minute {
            gate = gate.with_sessions_per_minute(per_minute);
        }
        TaskDeps {
            provider: Arc::clone(&self.provider),
            page: Arc::clone(&self.page),
            cache: Arc::clone(&self.cache),
            gate,
            session_params: self.config.session.clone(),
            navigation: self.config.navigation_policy(),
            extraction: self.config.extraction_policy(),
            guardrails: self.config.guardrails,
        }
    }

    /// Execute every planned task and merge the results
    pub async fn run(&self) -> RunOutcome {
        let mut metrics = MetricsCollector::new();
        let mut errors = ErrorTracker::new();
        let mut merged: HashMap<Slot, FetchResult> = HashMap::new();

        let fetchers = self.active_fetchers();
        let plan = self.plan();
        let deps = self.task_deps();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        info!(
            run_id = metrics.run_id(),
            tasks = plan.len(),
            tickers = self.config.watchlist.len(),
            max_concurrency = deps.gate.capacity(),
            "Starting run"
        );

        let mut set = JoinSet::new();
        let mut pending = HashMap::new();
        for task in plan {
            let Some(fetcher) = fetchers.iter().find(|f| f.source() == task.source) else {
                continue;
            };
            let handle = set.spawn(run_task(
                deps.clone(),
                Arc::clone(fetcher),
                task.target.clone(),
                cancel_rx.clone(),
            ));
            debug!(task = %task, "Task scheduled");
            pending.insert(handle.id(), task);
        }

        let deadline = self.config.run_timeout.map(|timeout| Instant::now() + timeout);
        let mut timed_out = false;

        loop {
            let joined = match deadline {
                Some(deadline) if !timed_out => tokio::select! {
                    joined = set.join_next_with_id() => joined,
                    () = sleep_until(deadline) => {
                        warn!(
                            in_flight = set.len(),
                            "Run timeout reached, cancelling remaining tasks"
                        );
                        timed_out = true;
                        let _ = cancel_tx.send(true);
                        continue;
                    }
                },
                _ => set.join_next_with_id().await,
            };
            let Some(joined) = joined else {
                break;
            };

            match joined {
                Ok((id, report)) => {
                    pending.remove(&id);
                    absorb(report, &mut merged, &mut errors, &mut metrics);
                }
                Err(join_error) => {
                    let Some(task) = pending.remove(&join_error.id()) else {
                        error!(error = %join_error, "Unknown task died");
                        continue;
                    };
                    error!(task = %task, error = %join_error, "Task died");
                    let message = if join_error.is_panic() {
                        format!("fetch task panicked: {join_error}")
                    } else {
                        format!("fetch task aborted: {join_error}")
                    };
                    let result =
                        FetchResult::failure(
                            FailureKind::Internal,
                            message,
                            Diagnostics::default(),
                        );
                    for slot in task.target.slots() {
                        settle(
                            task.source,
                            slot,
                            result.clone(),
                            &mut merged,
                            &mut errors,
                            &mut metrics,
                        );
                    }
                }
            }
        }

        let snapshot = self.assemble(metrics.run_id().to_string(), &fetchers, merged, &mut metrics);
        let metrics = metrics.finalize();
        info!(
            run_id = metrics.run_id(),
            sessions = metrics.total_sessions(),
            failures = errors.failures().count(),
            timed_out,
            "Run complete"
        );

        RunOutcome {
            snapshot,
            errors,
            metrics,
            timed_out,
        }
    }

    /// Lay merged results out per ticker, backfilling any empty slot
    fn assemble(
        &self,
        run_id: String,
        fetchers: &[Arc<dyn SourceFetcher>],
        mut merged: HashMap<Slot, FetchResult>,
        metrics: &mut MetricsCollector,
    ) -> Snapshot {
        let mode_of = |source: SourceName| {
            fetchers
                .iter()
                .find(|f| f.source() == source)
                .map(|f| f.mode())
        };

        let mut per_ticker_sources = Vec::new();
        let mut market_sources = Vec::new();
        for &source in &self.config.enabled_sources {
            let global = match mode_of(source) {
                Some(mode) => mode == FetchMode::Global,
                None => !source.is_per_ticker(),
            };
            if global {
                market_sources.push(source);
            } else {
                per_ticker_sources.push(source);
            }
        }

        let mut take = |slot: Slot| {
            merged.remove(&slot).unwrap_or_else(|| {
                let reason = match mode_of(slot.1) {
                    Some(_) => "no result was produced for this source",
                    None => "no fetcher is registered for this source",
                };
                let result = FetchResult::skipped(reason);
                metrics.record_result(slot.1, &result);
                result
            })
        };

        let tickers = self
            .config
            .watchlist
            .iter()
            .map(|ticker| TickerSnapshot {
                ticker: ticker.clone(),
                results: per_ticker_sources
                    .iter()
                    .map(|&source| (source, take((Some(ticker.clone()), source))))
                    .collect(),
            })
            .collect();

        let market = market_sources
            .iter()
            .map(|&source| (source, take((None, source))))
            .collect();

        Snapshot {
            run_id,
            generated_at: Utc::now(),
            tickers,
            market,
        }
    }
}

fn absorb(
    report: TaskReport,
    merged: &mut HashMap<Slot, FetchResult>,
    errors: &mut ErrorTracker,
    metrics: &mut MetricsCollector,
) {
    let source = report.source;
    let session_id = report.session.as_ref().map(|s| s.session_id.clone());

    for incident in report.incidents {
        let diagnostics = Diagnostics {
            stage: Stage::SessionAcquired,
            session_id: session_id.clone(),
            ..Diagnostics::default()
        };
        errors.record_incident(
            source,
            incident.ticker.as_ref(),
            incident.kind,
            incident.message,
            diagnostics,
        );
    }

    if let Some(session) = report.session {
        metrics.record_session(session);
    }

    for (slot, result) in report.results {
        settle(source, slot, result, merged, errors, metrics);
    }
}

fn settle(
    source: SourceName,
    ticker: Option<Ticker>,
    result: FetchResult,
    merged: &mut HashMap<Slot, FetchResult>,
    errors: &mut ErrorTracker,
    metrics: &mut MetricsCollector,
) {
    if let Some(failure) = result.failure_detail() {
        errors.record_failure(source, ticker.as_ref(), failure);
    }
    metrics.record_result(source, &result);

    let slot = (ticker, source);
    match merged.get(&slot) {
        Some(existing) if existing.precedence() >= result.precedence() => {
            debug!(source = %source, "Duplicate result for slot ignored");
        }
        _ => {
            merged.insert(slot, result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedBrowser, StubFetcher};

    fn tickers(symbols: &[&str]) -> Vec<Ticker> {
        symbols.iter().map(|s| Ticker::new(s).unwrap()).collect()
    }

    #[test]
    fn test_plan_expands_modes() {
        let config = RunConfig::builder()
            .watchlist(tickers(&["AAPL", "MSFT"]))
            .sources([SourceName::Quote, SourceName::KnowledgeHeadlines, SourceName::MacroSummary])
            .build()
            .unwrap();
        let orchestrator = Orchestrator::new(config, Arc::new(ScriptedBrowser::new()));

        let plan = orchestrator.plan();
        assert_eq!(plan.len(), 4);
        assert_eq!(plan[0].target, FetchTarget::Ticker(Ticker::new("AAPL").unwrap()));
        assert_eq!(plan[2].target, FetchTarget::Batch(tickers(&["AAPL", "MSFT"])));
        assert_eq!(plan[3].target, FetchTarget::Global);
    }

    #[test]
    fn test_plan_ignores_disabled_fetchers() {
        let config = RunConfig::builder()
            .watchlist(tickers(&["AAPL"]))
            .sources([SourceName::Quote])
            .build()
            .unwrap();
        let orchestrator =
            Orchestrator::new(config, Arc::new(ScriptedBrowser::new())).with_fetchers(vec![
            Arc::new(StubFetcher::new(SourceName::Quote)),
            Arc::new(StubFetcher::new(SourceName::NewsSearch)),
        ]);
        assert_eq!(orchestrator.plan().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_fetcher_is_backfilled_as_skipped() {
        let config = RunConfig::builder()
            .watchlist(tickers(&["AAPL"]))
            .sources([SourceName::Quote, SourceName::AiAnalysis])
            .build()
            .unwrap();
        let orchestrator = Orchestrator::new(config, Arc::new(ScriptedBrowser::new()))
            .with_fetchers(vec![Arc::new(StubFetcher::new(SourceName::Quote))]);

        let outcome = orchestrator.run().await;
        let aapl = outcome.snapshot.ticker("AAPL").unwrap();
        assert!(aapl.get(SourceName::Quote).unwrap().is_success());
        assert!(aapl.get(SourceName::AiAnalysis).unwrap().is_skipped());
        assert!(outcome.errors.is_empty());
    }
}
