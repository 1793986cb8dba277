//! In-memory collaborators for tests
//!
//! [`ScriptedBrowser`] answers page calls from rules registered up front and
//! counts what it was asked to do. [`StubFetcher`] is a source with
//! configurable failures, delays and panics.

use crate::error::FetchError;
use crate::fetcher::{FetchContext, FetchMode, FetchOutput, FetchTarget, Outcome, SourceFetcher};
use async_trait::async_trait;
use serde_json::{Value, json};
use snapshot_browser::{
    BrowserError, ExtractRequest, NavigateOptions, PageAutomation, PageState,
    Result as BrowserResult, SessionHandle, SessionParams, SessionProvider, UsageSnapshot,
};
use snapshot_core::{
    AiAnalysis, KnowledgeReport, MacroSummary, NewsStories, NewsStory, Payload, QuoteSnapshot,
    SourceName, Ticker,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// One extraction call as the browser saw it
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractCall {
    pub url: String,
    pub instruction: String,
    pub selector: Option<String>,
}

#[derive(Debug)]
struct NavFailure {
    url_contains: String,
    /// `None` fails forever
    remaining: Option<u32>,
}

#[derive(Debug, Default)]
struct Script {
    fail_sessions: bool,
    nav_failures: Vec<NavFailure>,
    nav_panics: Vec<String>,
    extract_rules: Vec<(String, String, Value)>,
    extract_failures: Vec<(String, String)>,
    locate_rules: Vec<(String, String)>,
    selector_rules: Vec<(String, Value)>,
    broken_selectors: HashSet<String>,
    act_failures: Vec<String>,

    current_url: HashMap<String, String>,
    open: HashSet<String>,
    sessions_created: usize,
    sessions_closed: usize,
    max_open_sessions: usize,
    navigations: Vec<String>,
    extract_calls: Vec<ExtractCall>,
    act_calls: Vec<String>,
}

/// A browser that follows a script.
///
/// Extraction answers with the first rule whose URL fragment matches the
/// session's current page and whose instruction fragment matches the
/// request; with no rule it answers `{}`.
#[derive(Debug, Default)]
pub struct ScriptedBrowser {
    latency: Duration,
    script: Mutex<Script>,
}

impl ScriptedBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every navigation takes `latency`
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn on_extract(&self, url_contains: &str, instruction_contains: &str, value: Value) {
        self.script()
            .extract_rules
            .push((url_contains.to_string(), instruction_contains.to_string(), value));
    }

    pub fn fail_extract(&self, url_contains: &str, instruction_contains: &str) {
        self.script()
            .extract_failures
            .push((url_contains.to_string(), instruction_contains.to_string()));
    }

    pub fn on_locate(&self, instruction_contains: &str, selector: &str) {
        self.script()
            .locate_rules
            .push((instruction_contains.to_string(), selector.to_string()));
    }

    /// Scoped extractions with `selector` answer `value` whatever the page
    pub fn on_scoped_extract(&self, selector: &str, value: Value) {
        self.script().selector_rules.push((selector.to_string(), value));
    }

    /// Scoped extractions with `selector` fail
    pub fn break_selector(&self, selector: &str) {
        self.script().broken_selectors.insert(selector.to_string());
    }

    /// The next `times` navigations to matching URLs fail
    pub fn fail_navigation(&self, url_contains: &str, times: u32) {
        self.script().nav_failures.push(NavFailure {
            url_contains: url_contains.to_string(),
            remaining: Some(times),
        });
    }

    pub fn always_fail_navigation(&self, url_contains: &str) {
        self.script().nav_failures.push(NavFailure {
            url_contains: url_contains.to_string(),
            remaining: None,
        });
    }

    pub fn panic_on_navigate(&self, url_contains: &str) {
        self.script().nav_panics.push(url_contains.to_string());
    }

    pub fn fail_act(&self, instruction_contains: &str) {
        self.script().act_failures.push(instruction_contains.to_string());
    }

    pub fn fail_sessions(&self) {
        self.script().fail_sessions = true;
    }

    pub fn sessions_created(&self) -> usize {
        self.script().sessions_created
    }

    pub fn sessions_closed(&self) -> usize {
        self.script().sessions_closed
    }

    /// Most sessions that were open at the same time
    pub fn max_open_sessions(&self) -> usize {
        self.script().max_open_sessions
    }

    pub fn navigations(&self) -> Vec<String> {
        self.script().navigations.clone()
    }

    pub fn extract_calls(&self) -> Vec<ExtractCall> {
        self.script().extract_calls.clone()
    }

    pub fn act_calls(&self) -> Vec<String> {
        self.script().act_calls.clone()
    }
}

#[async_trait]
impl SessionProvider for ScriptedBrowser {
    async fn create_session(&self, _params: &SessionParams) -> BrowserResult<SessionHandle> {
        let mut script = self.script();
        if script.fail_sessions {
            return Err(BrowserError::SessionCreation("quota exhausted".to_string()));
        }
        script.sessions_created += 1;
        let id = format!("session-{}", script.sessions_created);
        script.open.insert(id.clone());
        script.max_open_sessions = script.max_open_sessions.max(script.open.len());
        Ok(SessionHandle::new(&id).with_inspector_url(format!("https://inspector.test/{id}")))
    }

    async fn close(&self, session: &SessionHandle) -> BrowserResult<()> {
        let mut script = self.script();
        script.current_url.remove(&session.id);
        if script.open.remove(&session.id) {
            script.sessions_closed += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl PageAutomation for ScriptedBrowser {
    async fn navigate(
        &self,
        session: &SessionHandle,
        url: &str,
        _options: &NavigateOptions,
    ) -> BrowserResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let should_panic = {
            let mut script = self.script();
            script.navigations.push(url.to_string());
            script.nav_panics.iter().any(|p| url.contains(p.as_str()))
        };
        if should_panic {
            panic!("scripted navigation panic for {url}");
        }

        let mut script = self.script();
        let failure = script
            .nav_failures
            .iter_mut()
            .find(|f| url.contains(f.url_contains.as_str()) && f.remaining != Some(0));
        if let Some(failure) = failure {
            if let Some(remaining) = failure.remaining.as_mut() {
                *remaining -= 1;
            }
            return Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_CONNECTION_RESET".to_string(),
            });
        }
        script.current_url.insert(session.id.clone(), url.to_string());
        Ok(())
    }

    async fn locate(&self, _session: &SessionHandle, instruction: &str) -> BrowserResult<String> {
        self.script()
            .locate_rules
            .iter()
            .find(|(fragment, _)| instruction.contains(fragment.as_str()))
            .map(|(_, selector)| selector.clone())
            .ok_or_else(|| BrowserError::Locate(format!("nothing matches '{instruction}'")))
    }

    async fn extract(
        &self,
        session: &SessionHandle,
        request: &ExtractRequest,
    ) -> BrowserResult<Value> {
        let mut script = self.script();
        let url = script.current_url.get(&session.id).cloned().unwrap_or_default();
        script.extract_calls.push(ExtractCall {
            url: url.clone(),
            instruction: request.instruction.clone(),
            selector: request.selector.clone(),
        });

        if let Some(selector) = &request.selector {
            if script.broken_selectors.contains(selector) {
                return Err(BrowserError::Extraction(format!(
                    "selector {selector} matched nothing"
                )));
            }
            let scoped = script
                .selector_rules
                .iter()
                .find(|(s, _)| s == selector)
                .map(|(_, value)| value.clone());
            if let Some(value) = scoped {
                return Ok(value);
            }
        }
        let matches = |u: &str, i: &str| url.contains(u) && request.instruction.contains(i);
        if script.extract_failures.iter().any(|(u, i)| matches(u.as_str(), i.as_str())) {
            return Err(BrowserError::Schema("model returned malformed output".to_string()));
        }
        Ok(script
            .extract_rules
            .iter()
            .find(|(u, i, _)| matches(u.as_str(), i.as_str()))
            .map(|(_, _, value)| value.clone())
            .unwrap_or_else(|| json!({})))
    }

    async fn act(&self, _session: &SessionHandle, instruction: &str) -> BrowserResult<()> {
        let mut script = self.script();
        script.act_calls.push(instruction.to_string());
        if script.act_failures.iter().any(|f| instruction.contains(f.as_str())) {
            return Err(BrowserError::Action(format!("could not perform '{instruction}'")));
        }
        Ok(())
    }

    async fn page_state(&self, session: &SessionHandle) -> BrowserResult<PageState> {
        let url = self.script().current_url.get(&session.id).cloned().unwrap_or_default();
        Ok(PageState {
            url,
            title: "Scripted page".to_string(),
        })
    }

    async fn usage(&self, _session: &SessionHandle) -> BrowserResult<UsageSnapshot> {
        Ok(UsageSnapshot {
            prompt_tokens: 100,
            completion_tokens: 20,
            inference_time_ms: 50,
        })
    }
}

/// A source that navigates to `https://stub.test/<source>/<ticker>` and
/// returns a canned payload.
#[derive(Debug, Clone)]
pub struct StubFetcher {
    source: SourceName,
    mode: FetchMode,
    delay: Duration,
    fail_for: HashSet<String>,
    panic_for: HashSet<String>,
}

impl StubFetcher {
    pub fn new(source: SourceName) -> Self {
        let mode = if source.is_per_ticker() {
            FetchMode::PerTicker
        } else {
            FetchMode::Global
        };
        Self {
            source,
            mode,
            delay: Duration::ZERO,
            fail_for: HashSet::new(),
            panic_for: HashSet::new(),
        }
    }

    pub fn with_mode(mut self, mode: FetchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Hold the session this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail with an extraction error for `ticker` (or `"global"`)
    pub fn failing_for(mut self, ticker: &str) -> Self {
        self.fail_for.insert(ticker.to_string());
        self
    }

    pub fn panicking_for(mut self, ticker: &str) -> Self {
        self.panic_for.insert(ticker.to_string());
        self
    }

    /// Stub page URL for one ticker, or the global page
    pub fn url(source: SourceName, ticker: Option<&Ticker>) -> String {
        let name = ticker.map_or("global", Ticker::as_str);
        format!("https://stub.test/{}/{name}", source.as_str())
    }

    fn payload(&self, ticker: Option<&Ticker>) -> Payload {
        let symbol = ticker.map(|t| t.as_str().to_string()).unwrap_or_default();
        match self.source {
            SourceName::Quote => Payload::Quote(QuoteSnapshot {
                ticker: symbol,
                last_price: Some(100.0),
                ..QuoteSnapshot::default()
            }),
            SourceName::AiAnalysis => Payload::AiAnalysis(AiAnalysis {
                ticker: symbol,
                summary: Some("Shares rise on strong demand.".to_string()),
                ..AiAnalysis::default()
            }),
            SourceName::NewsSearch | SourceName::SecondaryNews => {
                let stories = NewsStories {
                    ticker: symbol,
                    stories: vec![NewsStory {
                        headline: "Stub headline".to_string(),
                        url: None,
                        source: None,
                        age: None,
                        summary: None,
                        sentiment: None,
                    }],
                    news_summary: None,
                };
                if self.source == SourceName::NewsSearch {
                    Payload::NewsSearch(stories)
                } else {
                    Payload::SecondaryNews(stories)
                }
            }
            SourceName::KnowledgeHeadlines => Payload::KnowledgeHeadlines(KnowledgeReport {
                ticker: symbol,
                ..KnowledgeReport::default()
            }),
            SourceName::MacroSummary => Payload::MacroSummary(MacroSummary {
                report_count: 1,
                summary: Some("Markets steady.".to_string()),
                ..MacroSummary::default()
            }),
        }
    }

    async fn one(
        &self,
        ctx: &mut FetchContext,
        ticker: Option<&Ticker>,
    ) -> Result<Outcome, FetchError> {
        let name = ticker.map_or("global", Ticker::as_str);
        if self.panic_for.contains(name) {
            panic!("stub fetcher panic for {name}");
        }
        ctx.navigate(&Self::url(self.source, ticker)).await?;
        if self.fail_for.contains(name) {
            return Err(FetchError::Extraction(format!("no data for {name}")));
        }
        Ok(Outcome::Payload(self.payload(ticker)))
    }
}

#[async_trait]
impl SourceFetcher for StubFetcher {
    fn source(&self) -> SourceName {
        self.source
    }

    fn mode(&self) -> FetchMode {
        self.mode
    }

    async fn fetch(
        &self,
        ctx: &mut FetchContext,
        target: &FetchTarget,
    ) -> Result<FetchOutput, FetchError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match target {
            FetchTarget::Ticker(ticker) => {
                Ok(FetchOutput::Single(self.one(ctx, Some(ticker)).await?))
            }
            FetchTarget::Global => Ok(FetchOutput::Single(self.one(ctx, None).await?)),
            FetchTarget::Batch(tickers) => {
                let mut items = BTreeMap::new();
                for ticker in tickers {
                    let item = self.one(ctx, Some(ticker)).await;
                    items.insert(ticker.clone(), item);
                }
                Ok(FetchOutput::PerTicker(items))
            }
        }
    }
}
