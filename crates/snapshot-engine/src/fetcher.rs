//! Source fetcher contract and the task runner
//!
//! A [`SourceFetcher`] knows how to get one source's data out of an open
//! session. Everything around that (gate slot, session lifecycle,
//! cancellation, timing, turning errors into results) lives in
//! [`run_task`], so every fetcher gets the same guarantees:
//!
//! - exactly one [`FetchResult`] per slot of the task's target
//! - the session is closed and the gate slot released on every exit path
//! - failures carry the last [`Stage`] reached plus diagnostics

use crate::cache::SelectorCache;
use crate::error::FetchError;
use crate::gate::ConcurrencyGate;
use crate::metrics::SessionMetric;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use snapshot_browser::{
    ExtractRequest, NavigateOptions, PageAutomation, SessionHandle, SessionParams, SessionProvider,
};
use snapshot_core::{Diagnostics, FailureKind, FetchResult, Payload, SourceName, Stage, Ticker};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How a source's tasks are planned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// One task and one session per ticker
    PerTicker,
    /// One task and one session for the whole watchlist
    Batched,
    /// One ticker-independent task
    Global,
}

/// What a task fetches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchTarget {
    Ticker(Ticker),
    Batch(Vec<Ticker>),
    Global,
}

impl FetchTarget {
    /// Result slots the task must fill; `None` is the ticker-independent slot
    pub fn slots(&self) -> Vec<Option<Ticker>> {
        match self {
            FetchTarget::Ticker(t) => vec![Some(t.clone())],
            FetchTarget::Batch(tickers) => tickers.iter().cloned().map(Some).collect(),
            FetchTarget::Global => vec![None],
        }
    }

    /// The single ticker, for per-ticker targets
    pub fn ticker(&self) -> Option<&Ticker> {
        match self {
            FetchTarget::Ticker(t) => Some(t),
            _ => None,
        }
    }
}

impl fmt::Display for FetchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchTarget::Ticker(t) => write!(f, "{t}"),
            FetchTarget::Batch(tickers) => {
                let names: Vec<&str> = tickers.iter().map(Ticker::as_str).collect();
                write!(f, "batch[{}]", names.join(","))
            }
            FetchTarget::Global => f.write_str("global"),
        }
    }
}

/// A fetcher's verdict for one slot
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Payload(Payload),
    /// Nothing to report (feature absent on the page, bot wall); never an error
    Skipped(String),
}

/// What a fetch produced
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutput {
    /// One outcome, applied to every slot of the target
    Single(Outcome),
    /// Batched sources: one entry per ticker, failures kept per item
    PerTicker(BTreeMap<Ticker, Result<Outcome, FetchError>>),
}

/// A non-fatal failure inside a task that still produced a result
#[derive(Debug, Clone, PartialEq)]
pub struct Incident {
    pub ticker: Option<Ticker>,
    pub kind: FailureKind,
    pub message: String,
}

/// One data source
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Source this fetcher produces
    fn source(&self) -> SourceName;

    /// How tasks for this source are planned
    fn mode(&self) -> FetchMode {
        FetchMode::PerTicker
    }

    /// Checks that need no session, run before a gate slot is taken.
    ///
    /// An error here fails every slot of the task without opening a session.
    fn preflight(&self) -> Result<(), FetchError> {
        Ok(())
    }

    /// Fetch the target inside an already open session
    async fn fetch(
        &self,
        ctx: &mut FetchContext,
        target: &FetchTarget,
    ) -> Result<FetchOutput, FetchError>;
}

/// Everything a task needs besides its fetcher and target
#[derive(Clone)]
pub struct TaskDeps {
    pub provider: Arc<dyn SessionProvider>,
    pub page: Arc<dyn PageAutomation>,
    pub cache: Arc<SelectorCache>,
    pub gate: ConcurrencyGate,
    pub session_params: SessionParams,
    pub navigation: RetryPolicy,
    pub extraction: RetryPolicy,
    pub guardrails: bool,
}

/// Per-task execution state handed to a fetcher.
///
/// Wraps the page API with retries, stage tracking and diagnostics so
/// fetchers only describe what to navigate to and what to extract.
pub struct FetchContext {
    source: SourceName,
    session: SessionHandle,
    page: Arc<dyn PageAutomation>,
    cache: Arc<SelectorCache>,
    navigation: RetryPolicy,
    extraction: RetryPolicy,
    guardrails: bool,
    stage: Stage,
    diagnostics: Diagnostics,
    incidents: Vec<Incident>,
}

fn is_transient(e: &snapshot_browser::BrowserError) -> bool {
    e.is_transient()
}

fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, FetchError> {
    serde_json::from_value(value)
        .map_err(|e| FetchError::Extraction(format!("schema mismatch: {e}")))
}

impl FetchContext {
    pub fn new(source: SourceName, session: SessionHandle, deps: &TaskDeps) -> Self {
        let diagnostics = Diagnostics {
            session_id: Some(session.id.clone()),
            session_url: session.inspector_url.clone(),
            ..Diagnostics::default()
        };
        Self {
            source,
            session,
            page: Arc::clone(&deps.page),
            cache: Arc::clone(&deps.cache),
            navigation: deps.navigation.clone(),
            extraction: deps.extraction.clone(),
            guardrails: deps.guardrails,
            stage: Stage::Created,
            diagnostics,
            incidents: Vec::new(),
        }
    }

    pub fn source(&self) -> SourceName {
        self.source
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Move forward to `stage`; stages never move backwards
    pub fn advance(&mut self, stage: Stage) {
        if stage > self.stage {
            self.stage = stage;
            self.diagnostics.stage = stage;
        }
    }

    /// Add to a step's accumulated wall time
    pub fn record_timing(&mut self, step: &str, elapsed: Duration) {
        *self
            .diagnostics
            .timings_ms
            .entry(step.to_string())
            .or_insert(0) += elapsed.as_millis() as u64;
    }

    /// Note a failure that did not stop the task
    pub fn record_incident(
        &mut self,
        ticker: Option<&Ticker>,
        kind: FailureKind,
        message: impl Into<String>,
    ) {
        let message = message.into();
        warn!(
            source = %self.source,
            ticker = ticker.map(Ticker::as_str),
            %kind,
            %message,
            "Recoverable failure"
        );
        self.incidents.push(Incident {
            ticker: ticker.cloned(),
            kind,
            message,
        });
    }

    pub fn take_incidents(&mut self) -> Vec<Incident> {
        std::mem::take(&mut self.incidents)
    }

    /// Navigate with the default options
    pub async fn navigate(&mut self, url: &str) -> Result<(), FetchError> {
        self.navigate_with(url, &NavigateOptions::default()).await
    }

    /// Navigate with retries, then run the page-state checkpoint
    pub async fn navigate_with(
        &mut self,
        url: &str,
        options: &NavigateOptions,
    ) -> Result<(), FetchError> {
        let started = Instant::now();
        let page = Arc::clone(&self.page);
        let session = self.session.clone();

        let (result, attempts) = self
            .navigation
            .execute_counted("navigate", is_transient, || {
                let page = Arc::clone(&page);
                let session = session.clone();
                let url = url.to_string();
                let options = options.clone();
                async move { page.navigate(&session, &url, &options).await }
            })
            .await;

        self.diagnostics.navigation_attempts += attempts;
        self.record_timing("navigation_ms", started.elapsed());
        result.map_err(|e| FetchError::Navigation(format!("{url}: {e}")))?;

        self.advance(Stage::Navigated);
        debug!(source = %self.source, url, attempts, "Navigated");

        if self.guardrails {
            self.check_page_state().await;
        }
        Ok(())
    }

    /// Record the page URL and title; an unreachable page is noted, not fatal
    async fn check_page_state(&mut self) {
        match self.page.page_state(&self.session).await {
            Ok(state) => {
                self.diagnostics.page_url = Some(state.url);
                self.diagnostics.page_title = Some(state.title);
                self.diagnostics.page_accessible = Some(true);
            }
            Err(e) => {
                warn!(source = %self.source, error = %e, "Page state checkpoint failed");
                self.diagnostics.page_accessible = Some(false);
            }
        }
    }

    /// Locate an element and return its selector (single attempt)
    pub async fn locate(&mut self, instruction: &str) -> Result<String, FetchError> {
        let started = Instant::now();
        let result = self.page.locate(&self.session, instruction).await;
        self.record_timing("locate_ms", started.elapsed());
        result.map_err(|e| FetchError::Extraction(format!("locate failed: {e}")))
    }

    /// Perform a page action (single attempt)
    pub async fn act(&mut self, instruction: &str) -> Result<(), FetchError> {
        let started = Instant::now();
        let result = self.page.act(&self.session, instruction).await;
        self.record_timing("action_ms", started.elapsed());
        result.map_err(|e| FetchError::Navigation(format!("action failed: {e}")))
    }

    async fn extract_value(
        &mut self,
        request: &ExtractRequest,
    ) -> Result<serde_json::Value, FetchError> {
        let started = Instant::now();
        let page = Arc::clone(&self.page);
        let session = self.session.clone();

        let (result, attempts) = self
            .extraction
            .execute_counted("extract", is_transient, || {
                let page = Arc::clone(&page);
                let session = session.clone();
                let request = request.clone();
                async move { page.extract(&session, &request).await }
            })
            .await;

        self.diagnostics.extraction_attempts += attempts;
        self.record_timing("extraction_ms", started.elapsed());
        result.map_err(|e| FetchError::Extraction(e.to_string()))
    }

    /// Extract with retries and decode into `T`.
    ///
    /// A payload that does not decode is an extraction failure and is not
    /// retried.
    pub async fn extract_as<T: DeserializeOwned>(
        &mut self,
        request: &ExtractRequest,
    ) -> Result<T, FetchError> {
        let value = self.extract_value(request).await?;
        let decoded = decode(value)?;
        self.advance(Stage::Extracted);
        Ok(decoded)
    }

    /// Observe, cache, extract.
    ///
    /// Uses the cached selector for `cache_key` (or locates one) to run a
    /// cheaper scoped extraction. A scoped result that fails or that
    /// `is_usable` rejects counts as a miss: a cached selector is deleted,
    /// and the call falls back to a full-page extraction. A freshly located
    /// selector is only cached once its scoped result was usable.
    pub async fn scoped_extract<T, V>(
        &mut self,
        cache_key: &str,
        locate_instruction: &str,
        request: &ExtractRequest,
        is_usable: V,
    ) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
        V: Fn(&T) -> bool,
    {
        let cached = self.cache.get(cache_key).await;
        let from_cache = cached.is_some();
        let selector = match cached {
            Some(selector) => Some(selector),
            None => match self.locate(locate_instruction).await {
                Ok(selector) => Some(selector),
                Err(e) => {
                    debug!(
                        source = %self.source,
                        error = %e,
                        "No selector located, extracting full page"
                    );
                    None
                }
            },
        };

        if let Some(selector) = selector {
            self.diagnostics.cache_hit = from_cache;
            let scoped = self.try_scoped(request, &selector).await.and_then(|decoded: T| {
                if is_usable(&decoded) {
                    Ok(decoded)
                } else {
                    Err(FetchError::Extraction(format!(
                        "scoped extraction with {selector} returned no usable data"
                    )))
                }
            });
            match scoped {
                Ok(decoded) => {
                    if !from_cache {
                        self.cache.set(cache_key, selector).await;
                    }
                    self.advance(Stage::Extracted);
                    return Ok(decoded);
                }
                Err(e) if from_cache => {
                    warn!(
                        source = %self.source,
                        cache_key,
                        error = %e,
                        "Cached selector failed, invalidating"
                    );
                    self.cache.delete(cache_key).await;
                    self.diagnostics.cache_invalidated = true;
                }
                Err(e) => {
                    debug!(
                        source = %self.source,
                        error = %e,
                        "Scoped extraction failed, extracting full page"
                    );
                }
            }
        }

        self.extract_as(request).await
    }

    async fn try_scoped<T: DeserializeOwned>(
        &mut self,
        request: &ExtractRequest,
        selector: &str,
    ) -> Result<T, FetchError> {
        let started = Instant::now();
        let scoped = request.clone().scoped(selector);
        let result = self.page.extract(&self.session, &scoped).await;
        self.diagnostics.extraction_attempts += 1;
        self.record_timing("extraction_ms", started.elapsed());
        let value = result.map_err(|e| FetchError::Extraction(e.to_string()))?;
        decode(value)
    }
}

/// Everything one task produced
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub source: SourceName,
    pub target: FetchTarget,
    pub results: Vec<(Option<Ticker>, FetchResult)>,
    pub incidents: Vec<Incident>,
    pub session: Option<SessionMetric>,
}

impl TaskReport {
    fn new(source: SourceName, target: FetchTarget) -> Self {
        Self {
            source,
            target,
            results: Vec::new(),
            incidents: Vec::new(),
            session: None,
        }
    }

    /// Give every slot of the target the same result
    pub fn fill(mut self, result: &FetchResult) -> Self {
        self.results = self
            .target
            .slots()
            .into_iter()
            .map(|slot| (slot, result.clone()))
            .collect();
        self
    }

    fn absorb(&mut self, output: Result<FetchOutput, FetchError>, ctx: &mut FetchContext) {
        let slots = self.target.slots();
        self.results = match output {
            Ok(FetchOutput::Single(outcome)) => {
                let result = settle(outcome, ctx);
                slots.into_iter().map(|slot| (slot, result.clone())).collect()
            }
            Ok(FetchOutput::PerTicker(mut items)) => {
                let mut results = Vec::with_capacity(slots.len());
                for slot in slots {
                    let result = match slot.as_ref().map(|t| (t, items.remove(t))) {
                        Some((_, Some(Ok(outcome)))) => settle(outcome, ctx),
                        Some((_, Some(Err(e)))) => FetchResult::failure(
                            FailureKind::BatchPartial,
                            e.to_string(),
                            ctx.diagnostics().clone(),
                        ),
                        Some((ticker, None)) => FetchResult::failure(
                            FailureKind::BatchPartial,
                            format!("batch produced no result for {ticker}"),
                            ctx.diagnostics().clone(),
                        ),
                        None => FetchResult::failure(
                            FailureKind::Internal,
                            "per-ticker output for a ticker-independent task",
                            ctx.diagnostics().clone(),
                        ),
                    };
                    results.push((slot, result));
                }
                results
            }
            Err(e) => {
                let result =
                    FetchResult::failure(e.kind(), e.to_string(), ctx.diagnostics().clone());
                slots.into_iter().map(|slot| (slot, result.clone())).collect()
            }
        };
    }
}

fn settle(outcome: Outcome, ctx: &mut FetchContext) -> FetchResult {
    match outcome {
        Outcome::Payload(payload) => {
            ctx.advance(Stage::Normalized);
            ctx.advance(Stage::Done);
            FetchResult::success(payload)
        }
        Outcome::Skipped(reason) => FetchResult::skipped(reason),
    }
}

/// Closes its session when dropped unless closed explicitly first.
///
/// Covers panics and aborted tasks; the normal path awaits [`close`](Self::close).
struct SessionGuard {
    provider: Arc<dyn SessionProvider>,
    session: Option<SessionHandle>,
}

impl SessionGuard {
    fn new(provider: Arc<dyn SessionProvider>, session: SessionHandle) -> Self {
        Self {
            provider,
            session: Some(session),
        }
    }

    async fn close(mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = self.provider.close(&session).await {
                warn!(session_id = %session.id, error = %e, "Failed to close session");
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let provider = Arc::clone(&self.provider);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = provider.close(&session).await {
                        warn!(
                            session_id = %session.id,
                            error = %e,
                            "Failed to close abandoned session"
                        );
                    }
                });
            }
            Err(_) => warn!(session_id = %session.id, "No runtime to close abandoned session"),
        }
    }
}

/// Resolves once the run is cancelled; never resolves if the sender is gone
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

const NOT_STARTED: &str = "run cancelled before the task started";

/// Run one fetch task to completion.
///
/// Never fails: every error, including cancellation, becomes a result in
/// the returned report.
pub async fn run_task(
    deps: TaskDeps,
    fetcher: Arc<dyn SourceFetcher>,
    target: FetchTarget,
    mut cancel: watch::Receiver<bool>,
) -> TaskReport {
    let source = fetcher.source();
    let started = Instant::now();
    let report = TaskReport::new(source, target.clone());

    if *cancel.borrow() {
        return report.fill(&FetchResult::skipped(NOT_STARTED));
    }

    if let Err(e) = fetcher.preflight() {
        warn!(source = %source, target = %target, error = %e, "Task cannot start");
        let failure = FetchResult::failure(e.kind(), e.to_string(), Diagnostics::default());
        return report.fill(&failure);
    }

    let permit = tokio::select! {
        biased;
        () = cancelled(&mut cancel) => return report.fill(&FetchResult::skipped(NOT_STARTED)),
        permit = deps.gate.acquire() => permit,
    };
    let _permit = match permit {
        Ok(permit) => permit,
        Err(e) => {
            let failure = FetchResult::failure(e.kind(), e.to_string(), Diagnostics::default());
            return report.fill(&failure);
        }
    };

    tokio::select! {
        biased;
        () = cancelled(&mut cancel) => return report.fill(&FetchResult::skipped(NOT_STARTED)),
        () = deps.gate.pace() => {}
    }

    let session_started = Instant::now();
    let session = match deps.provider.create_session(&deps.session_params).await {
        Ok(session) => session,
        Err(e) => {
            warn!(source = %source, target = %target, error = %e, "Session creation failed");
            let mut diagnostics = Diagnostics::default();
            diagnostics.record_timing("session_ms", session_started.elapsed().as_millis() as u64);
            diagnostics.record_timing("total_ms", started.elapsed().as_millis() as u64);
            let err = FetchError::SessionCreation(e.to_string());
            return report.fill(&FetchResult::failure(err.kind(), err.to_string(), diagnostics));
        }
    };

    let guard = SessionGuard::new(Arc::clone(&deps.provider), session.clone());
    let mut ctx = FetchContext::new(source, session, &deps);
    ctx.record_timing("session_ms", session_started.elapsed());
    ctx.advance(Stage::SessionAcquired);
    info!(source = %source, target = %target, session_id = %ctx.session().id, "Session acquired");

    let output = if *cancel.borrow() {
        Err(FetchError::Cancelled("run cancelled before the fetch started".to_string()))
    } else {
        tokio::select! {
            biased;
            () = cancelled(&mut cancel) => Err(FetchError::Cancelled(format!(
                "run cancelled at stage {}",
                ctx.stage()
            ))),
            output = fetcher.fetch(&mut ctx, &target) => output,
        }
    };

    let usage = deps.page.usage(ctx.session()).await.unwrap_or_default();
    let session_id = ctx.session().id.clone();
    guard.close().await;
    ctx.record_timing("total_ms", started.elapsed());

    let mut report = report;
    report.incidents = ctx.take_incidents();
    report.session = Some(SessionMetric {
        source,
        target: target.to_string(),
        session_id,
        duration_ms: started.elapsed().as_millis() as u64,
        success: output.is_ok(),
        error: output.as_ref().err().map(ToString::to_string),
        usage,
    });

    match &output {
        Ok(_) => info!(source = %source, target = %target, stage = %ctx.stage(), "Task finished"),
        Err(e) => warn!(
            source = %source,
            target = %target,
            stage = %ctx.stage(),
            error = %e,
            "Task failed"
        ),
    }
    report.absorb(output, &mut ctx);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBrowser;
    use serde_json::json;
    use snapshot_core::QuoteSnapshot;

    fn deps(browser: &Arc<ScriptedBrowser>) -> TaskDeps {
        TaskDeps {
            provider: browser.clone(),
            page: browser.clone(),
            cache: Arc::new(SelectorCache::new()),
            gate: ConcurrencyGate::new(2),
            session_params: SessionParams::default(),
            navigation: RetryPolicy::new(2, Duration::from_millis(10)),
            extraction: RetryPolicy::new(1, Duration::from_millis(10)),
            guardrails: true,
        }
    }

    fn schema() -> serde_json::Value {
        json!({"type": "object"})
    }

    struct QuoteLike;

    #[async_trait]
    impl SourceFetcher for QuoteLike {
        fn source(&self) -> SourceName {
            SourceName::Quote
        }

        async fn fetch(
            &self,
            ctx: &mut FetchContext,
            target: &FetchTarget,
        ) -> Result<FetchOutput, FetchError> {
            let ticker = target
                .ticker()
                .cloned()
                .ok_or_else(|| FetchError::Internal("no ticker".into()))?;
            ctx.navigate(&format!("https://quotes.test/{ticker}")).await?;
            let request = ExtractRequest::new("quote", schema());
            let quote: QuoteSnapshot = ctx
                .scoped_extract(
                    "quote_panel",
                    "find the quote panel",
                    &request,
                    |q: &QuoteSnapshot| !q.is_empty(),
                )
                .await?;
            Ok(FetchOutput::Single(Outcome::Payload(Payload::Quote(quote))))
        }
    }

    #[tokio::test]
    async fn test_success_closes_session_and_records_diagnostics() {
        let browser = Arc::new(ScriptedBrowser::new());
        browser.on_extract("quotes.test", "quote", json!({"ticker": "AAPL", "lastPrice": 190.1}));

        let deps = deps(&browser);
        let (_tx, rx) = watch::channel(false);
        let report = run_task(
            deps.clone(),
            Arc::new(QuoteLike),
            FetchTarget::Ticker(Ticker::new("AAPL").unwrap()),
            rx,
        )
        .await;

        assert_eq!(report.results.len(), 1);
        assert!(report.results[0].1.is_success());
        assert_eq!(browser.sessions_created(), 1);
        assert_eq!(browser.sessions_closed(), 1);
        assert_eq!(deps.gate.active(), 0);
        assert!(report.session.as_ref().unwrap().success);
    }

    #[tokio::test]
    async fn test_navigation_failure_reports_stage_and_attempts() {
        let browser = Arc::new(ScriptedBrowser::new());
        browser.always_fail_navigation("quotes.test/AAPL");

        let (_tx, rx) = watch::channel(false);
        let report = run_task(
            deps(&browser),
            Arc::new(QuoteLike),
            FetchTarget::Ticker(Ticker::new("AAPL").unwrap()),
            rx,
        )
        .await;

        let failure = report.results[0].1.failure_detail().unwrap().clone();
        assert_eq!(failure.kind, FailureKind::Navigation);
        assert_eq!(failure.diagnostics.stage, Stage::SessionAcquired);
        assert_eq!(failure.diagnostics.navigation_attempts, 3);
        assert!(failure.diagnostics.session_id.is_some());
        assert_eq!(browser.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn test_session_creation_failure() {
        let browser = Arc::new(ScriptedBrowser::new());
        browser.fail_sessions();

        let deps = deps(&browser);
        let (_tx, rx) = watch::channel(false);
        let report = run_task(
            deps.clone(),
            Arc::new(QuoteLike),
            FetchTarget::Ticker(Ticker::new("AAPL").unwrap()),
            rx,
        )
        .await;

        let failure = report.results[0].1.failure_detail().unwrap();
        assert_eq!(failure.kind, FailureKind::SessionCreation);
        assert!(report.session.is_none());
        assert_eq!(deps.gate.active(), 0);
    }

    #[tokio::test]
    async fn test_stale_selector_is_invalidated_then_full_page_used() {
        let browser = Arc::new(ScriptedBrowser::new());
        browser.on_extract("quotes.test", "quote", json!({"ticker": "AAPL", "lastPrice": 190.1}));
        browser.break_selector("xpath=//stale");

        let deps = deps(&browser);
        deps.cache.set("quote_panel", "xpath=//stale").await;

        let (_tx, rx) = watch::channel(false);
        let report = run_task(
            deps.clone(),
            Arc::new(QuoteLike),
            FetchTarget::Ticker(Ticker::new("AAPL").unwrap()),
            rx,
        )
        .await;

        assert!(report.results[0].1.is_success());
        assert!(deps.cache.get("quote_panel").await.is_none());
        let calls = browser.extract_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].selector.as_deref(), Some("xpath=//stale"));
        assert!(calls[1].selector.is_none());
    }

    #[tokio::test]
    async fn test_located_selector_is_cached_after_success() {
        let browser = Arc::new(ScriptedBrowser::new());
        browser.on_locate("quote panel", "xpath=//section[@id='quote']");
        browser.on_extract("quotes.test", "quote", json!({"ticker": "AAPL", "lastPrice": 190.1}));

        let deps = deps(&browser);
        let (_tx, rx) = watch::channel(false);
        run_task(
            deps.clone(),
            Arc::new(QuoteLike),
            FetchTarget::Ticker(Ticker::new("AAPL").unwrap()),
            rx,
        )
        .await;

        assert_eq!(
            deps.cache.get("quote_panel").await.as_deref(),
            Some("xpath=//section[@id='quote']")
        );
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_extraction_failure() {
        let browser = Arc::new(ScriptedBrowser::new());
        browser.on_extract("quotes.test", "quote", json!({"lastPrice": "not a number"}));

        let (_tx, rx) = watch::channel(false);
        let report = run_task(
            deps(&browser),
            Arc::new(QuoteLike),
            FetchTarget::Ticker(Ticker::new("AAPL").unwrap()),
            rx,
        )
        .await;

        let failure = report.results[0].1.failure_detail().unwrap();
        assert_eq!(failure.kind, FailureKind::Extraction);
        assert_eq!(failure.diagnostics.stage, Stage::Navigated);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_is_skipped_without_session() {
        let browser = Arc::new(ScriptedBrowser::new());
        let (_tx, rx) = watch::channel(true);

        let report = run_task(
            deps(&browser),
            Arc::new(QuoteLike),
            FetchTarget::Ticker(Ticker::new("AAPL").unwrap()),
            rx,
        )
        .await;

        assert!(report.results[0].1.is_skipped());
        assert_eq!(browser.sessions_created(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_in_flight_closes_session() {
        let browser = Arc::new(ScriptedBrowser::with_latency(Duration::from_secs(60)));
        let deps = deps(&browser);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_task(
            deps.clone(),
            Arc::new(QuoteLike),
            FetchTarget::Ticker(Ticker::new("AAPL").unwrap()),
            rx,
        ));
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();

        let report = handle.await.unwrap();
        let failure = report.results[0].1.failure_detail().unwrap();
        assert_eq!(failure.kind, FailureKind::Cancelled);
        assert_eq!(browser.sessions_closed(), 1);
        assert_eq!(deps.gate.active(), 0);
    }

    #[tokio::test]
    async fn test_empty_scoped_result_is_not_cached_and_falls_back() {
        let browser = Arc::new(ScriptedBrowser::new());
        browser.on_locate("quote panel", "xpath=//footer");
        browser.on_scoped_extract("xpath=//footer", json!({}));
        browser.on_extract("quotes.test", "quote", json!({"ticker": "AAPL", "lastPrice": 190.1}));

        let deps = deps(&browser);
        let (_tx, rx) = watch::channel(false);
        let report = run_task(
            deps.clone(),
            Arc::new(QuoteLike),
            FetchTarget::Ticker(Ticker::new("AAPL").unwrap()),
            rx,
        )
        .await;

        assert!(report.results[0].1.is_success());
        assert!(deps.cache.get("quote_panel").await.is_none());
        let calls = browser.extract_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].selector.as_deref(), Some("xpath=//footer"));
        assert!(calls[1].selector.is_none());
    }

    struct NeedsLogin;

    #[async_trait]
    impl SourceFetcher for NeedsLogin {
        fn source(&self) -> SourceName {
            SourceName::MacroSummary
        }

        fn preflight(&self) -> Result<(), FetchError> {
            Err(FetchError::Navigation("login is not configured".to_string()))
        }

        async fn fetch(
            &self,
            ctx: &mut FetchContext,
            _target: &FetchTarget,
        ) -> Result<FetchOutput, FetchError> {
            ctx.navigate("https://portal.test/login").await?;
            Ok(FetchOutput::Single(Outcome::Skipped("unreachable".to_string())))
        }
    }

    #[tokio::test]
    async fn test_failed_preflight_takes_no_slot_or_session() {
        let browser = Arc::new(ScriptedBrowser::new());
        let deps = deps(&browser);
        let (_tx, rx) = watch::channel(false);

        let report = run_task(deps.clone(), Arc::new(NeedsLogin), FetchTarget::Global, rx).await;

        let failure = report.results[0].1.failure_detail().unwrap();
        assert_eq!(failure.kind, FailureKind::Navigation);
        assert!(failure.message.contains("login is not configured"));
        assert!(report.session.is_none());
        assert_eq!(browser.sessions_created(), 0);
        assert!(browser.navigations().is_empty());
        assert_eq!(deps.gate.active(), 0);
    }

    #[test]
    fn test_target_display_and_slots() {
        let batch = FetchTarget::Batch(vec![
            Ticker::new("AAPL").unwrap(),
            Ticker::new("MSFT").unwrap(),
        ]);
        assert_eq!(batch.to_string(), "batch[AAPL,MSFT]");
        assert_eq!(batch.slots().len(), 2);
        assert_eq!(FetchTarget::Global.slots(), vec![None]);
    }
}
