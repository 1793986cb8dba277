//! Knowledge-base headlines (batched)
//!
//! One session logs in, lists the reports inside the window and reads each
//! report once for every ticker. A report or a (report, ticker) extraction
//! that fails is an incident; it never discards bullets other tickers
//! already collected. A ticker only fails when no report could be read for
//! it at all.
//!
//! The portal helpers here are shared with the macro summary source.

use super::dates::{ReportWindow, parse_report_date};
use crate::config::{Credentials, KnowledgeSettings};
use crate::error::FetchError;
use crate::fetcher::{FetchContext, FetchMode, FetchOutput, FetchTarget, Outcome, SourceFetcher};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use snapshot_browser::{ExtractRequest, NavigateOptions, WaitUntil};
use snapshot_core::{
    FailureKind, Headline, HeadlineSummary, KnowledgeReport, Payload, ReportSource, SourceName,
    Ticker,
};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

pub(crate) const PORTAL_URL: &str = "https://vitalknowledge.net/";
const LOGIN_URL: &str = "https://vitalknowledge.net/login";

/// Bullets kept per ticker per report and per ticker overall
const MAX_BULLETS: usize = 5;

const LISTING_INSTRUCTION: &str = "On this 'Everything' page, extract all visible report links. \
     For each report extract the title, the full date and time string as shown \
     (e.g. 'Dec 3, 2025 05:20 AM') as date_str, and the category label \
     (MORNING, MARKET CLOSE, INTRADAY, EARNINGS, ...). Include every category.";

/// A report link from the listing page
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct ReportLink {
    pub title: String,
    pub date_str: String,
    #[serde(default)]
    pub category: String,
}

impl ReportLink {
    pub fn source(&self) -> ReportSource {
        ReportSource {
            title: self.title.clone(),
            date_str: self.date_str.clone(),
            category: self.category.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReportListing {
    #[serde(default)]
    reports: Vec<ReportLink>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TickerBullets {
    bullets: Vec<String>,
}

/// Recency weight of the `index`-th newest of `count` reports: 1.0 down to 0.5
pub(crate) fn recency_weight(index: usize, count: usize) -> f64 {
    1.0 - index as f64 * 0.5 / count.saturating_sub(1).max(1) as f64
}

fn settle_page() -> NavigateOptions {
    NavigateOptions {
        wait_until: WaitUntil::NetworkIdle,
        ..NavigateOptions::default()
    }
}

/// Portal credentials, or the failure every portal task reports without them
pub(crate) fn require_credentials(settings: &KnowledgeSettings) -> Result<Credentials, FetchError> {
    settings.credentials().ok_or_else(|| {
        FetchError::Navigation("knowledge-base login is not configured".to_string())
    })
}

/// Log in to the portal
pub(crate) async fn login(
    ctx: &mut FetchContext,
    credentials: &Credentials,
) -> Result<(), FetchError> {
    ctx.navigate_with(LOGIN_URL, &settle_page()).await?;
    ctx.act(&format!(
        "Enter '{}' into the username or email input field",
        credentials.username
    ))
    .await?;
    ctx.act(&format!("Enter '{}' into the password input field", credentials.password))
        .await?;
    ctx.act("Click the login or sign in button").await?;
    info!(source = %ctx.source(), "Logged in to knowledge base");
    Ok(())
}

async fn open_everything(ctx: &mut FetchContext) -> Result<(), FetchError> {
    ctx.act("Click on the 'Everything' link or button in the navigation")
        .await
}

/// Reports inside `window`, newest first as listed
pub(crate) async fn list_reports(
    ctx: &mut FetchContext,
    window: &ReportWindow,
) -> Result<Vec<ReportLink>, FetchError> {
    open_everything(ctx).await?;

    let schema = json!({
        "type": "object",
        "properties": {
            "reports": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "title": {"type": "string"},
                        "date_str": {"type": "string"},
                        "category": {"type": "string"}
                    },
                    "required": ["title", "date_str"]
                }
            }
        },
        "required": ["reports"]
    });
    let listing: ReportListing = ctx
        .extract_as(&ExtractRequest::new(LISTING_INSTRUCTION, schema))
        .await?;
    let listed = listing.reports.len();

    let reports: Vec<ReportLink> = listing
        .reports
        .into_iter()
        .filter(|report| match parse_report_date(&report.date_str) {
            Some(at) if window.contains(at) => true,
            Some(_) => {
                debug!(title = %report.title, date = %report.date_str, "Report outside window");
                false
            }
            None => {
                warn!(title = %report.title, date = %report.date_str, "Unreadable report date");
                false
            }
        })
        .collect();

    info!(
        source = %ctx.source(),
        listed,
        in_window = reports.len(),
        window = %window.label(),
        "Reports listed"
    );
    Ok(reports)
}

/// Open a report; every report after the first starts again from the listing
pub(crate) async fn open_report(
    ctx: &mut FetchContext,
    report: &ReportLink,
    from_listing: bool,
) -> Result<(), FetchError> {
    if !from_listing {
        ctx.navigate_with(PORTAL_URL, &settle_page()).await?;
        open_everything(ctx).await?;
    }
    ctx.act(&format!("Click the link with the title '{}'", report.title))
        .await
}

/// The report window a fetch should read
pub(crate) fn window(
    settings: &KnowledgeSettings,
    start_hour: u32,
) -> Result<ReportWindow, FetchError> {
    ReportWindow::ending_at(Utc::now(), settings.days_back, start_hour, settings.et_offset_hours)
        .ok_or_else(|| FetchError::Internal("invalid knowledge-base report window".to_string()))
}

fn bullets_request(ticker: &Ticker) -> ExtractRequest {
    ExtractRequest::new(
        format!(
            "Read this whole market report and extract only news that directly concerns {ticker}: \
             the symbol, the company name, its products or executives, analyst actions or \
             earnings for it. Ignore general macro news and competitors. Return up to \
             {MAX_BULLETS} specific one or two sentence bullets, with numbers where available. \
             If nothing concerns {ticker}, return an empty list."
        ),
        json!({
            "type": "object",
            "properties": {
                "bullets": {"type": "array", "items": {"type": "string"}, "maxItems": MAX_BULLETS}
            },
            "required": ["bullets"]
        }),
    )
}

fn summary_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "overall_sentiment": {"enum": ["bullish", "bearish", "mixed", "neutral", null]},
            "key_themes": {"type": "array", "items": {"type": "string"}},
            "summary": {"type": ["string", "null"]}
        }
    })
}

/// Bullets collected for one ticker across reports
#[derive(Debug, Default)]
struct Collected {
    bullets: Vec<(String, f64, usize)>,
    failures: Vec<String>,
}

/// Per-ticker headlines from the knowledge-base reports
#[derive(Debug, Clone)]
pub struct KnowledgeHeadlinesFetcher {
    settings: KnowledgeSettings,
}

impl KnowledgeHeadlinesFetcher {
    pub fn new(settings: KnowledgeSettings) -> Self {
        Self { settings }
    }

    async fn summarise(
        ctx: &mut FetchContext,
        ticker: &Ticker,
        headlines: &[Headline],
    ) -> Option<HeadlineSummary> {
        let bullets: Vec<String> = headlines.iter().map(|h| format!("- {}", h.headline)).collect();
        let instruction = format!(
            "Based on these bullets about {ticker}:\n\n{}\n\nGive overall_sentiment (exactly one \
             of bullish, bearish, mixed, neutral), 2-3 key_themes and a 1-2 sentence summary.",
            bullets.join("\n")
        );
        match ctx.extract_as(&ExtractRequest::new(instruction, summary_schema())).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                ctx.record_incident(Some(ticker), FailureKind::Extraction, format!("summary: {e}"));
                None
            }
        }
    }

    async fn assemble(
        ctx: &mut FetchContext,
        ticker: &Ticker,
        mut collected: Collected,
        reports: &[ReportLink],
    ) -> Result<Outcome, FetchError> {
        if collected.bullets.is_empty() && collected.failures.len() >= reports.len() {
            let last = collected.failures.pop().unwrap_or_default();
            return Err(FetchError::BatchPartial(format!(
                "{ticker}: no report could be read ({last})"
            )));
        }

        // Stable sort keeps listing order among equal weights
        collected.bullets.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut seen_titles = HashSet::new();
        let mut sources = Vec::new();
        let mut report_dates = Vec::new();
        for (_, _, index) in &collected.bullets {
            let report = &reports[*index];
            if !seen_titles.insert(report.title.as_str()) {
                continue;
            }
            sources.push(report.source());
            let date = parse_report_date(&report.date_str)
                .map(|at| at.format("%Y-%m-%d").to_string());
            if let Some(date) = date {
                if !report_dates.contains(&date) {
                    report_dates.push(date);
                }
            }
        }

        let headlines: Vec<Headline> = collected
            .bullets
            .into_iter()
            .take(MAX_BULLETS)
            .map(|(headline, _, _)| Headline {
                headline,
                context: None,
                sentiment: None,
            })
            .collect();

        let summary = if headlines.is_empty() {
            None
        } else {
            Self::summarise(ctx, ticker, &headlines).await
        };

        Ok(Outcome::Payload(Payload::KnowledgeHeadlines(KnowledgeReport {
            ticker: ticker.as_str().to_string(),
            headlines,
            report_dates,
            sources,
            summary,
        })))
    }
}

#[async_trait]
impl SourceFetcher for KnowledgeHeadlinesFetcher {
    fn source(&self) -> SourceName {
        SourceName::KnowledgeHeadlines
    }

    fn mode(&self) -> FetchMode {
        FetchMode::Batched
    }

    fn preflight(&self) -> Result<(), FetchError> {
        require_credentials(&self.settings).map(drop)
    }

    async fn fetch(
        &self,
        ctx: &mut FetchContext,
        target: &FetchTarget,
    ) -> Result<FetchOutput, FetchError> {
        let tickers: Vec<Ticker> = match target {
            FetchTarget::Batch(tickers) => tickers.clone(),
            FetchTarget::Ticker(ticker) => vec![ticker.clone()],
            FetchTarget::Global => {
                return Err(FetchError::Internal("knowledge headlines need tickers".to_string()));
            }
        };
        let credentials = require_credentials(&self.settings)?;
        let window = window(&self.settings, self.settings.ticker_window_hour)?;

        login(ctx, &credentials).await?;
        let reports = list_reports(ctx, &window).await?;
        if reports.is_empty() {
            return Ok(FetchOutput::Single(Outcome::Skipped(format!(
                "no knowledge-base reports between {}",
                window.label()
            ))));
        }

        let mut collected: BTreeMap<Ticker, Collected> =
            tickers.iter().map(|t| (t.clone(), Collected::default())).collect();

        for (index, report) in reports.iter().enumerate() {
            if let Err(e) = open_report(ctx, report, index == 0).await {
                ctx.record_incident(
                    None,
                    FailureKind::BatchPartial,
                    format!("report '{}': {e}", report.title),
                );
                for entry in collected.values_mut() {
                    entry.failures.push(e.to_string());
                }
                continue;
            }

            let weight = recency_weight(index, reports.len());
            for ticker in &tickers {
                let result = ctx.extract_as::<TickerBullets>(&bullets_request(ticker)).await;
                let Some(entry) = collected.get_mut(ticker) else {
                    continue;
                };
                match result {
                    Ok(found) => {
                        debug!(
                            ticker = %ticker,
                            report = %report.title,
                            bullets = found.bullets.len(),
                            "Report read"
                        );
                        entry.bullets.extend(
                            found
                                .bullets
                                .into_iter()
                                .filter(|b| !b.trim().is_empty())
                                .take(MAX_BULLETS)
                                .map(|b| (b, weight, index)),
                        );
                    }
                    Err(e) => {
                        ctx.record_incident(
                            Some(ticker),
                            FailureKind::BatchPartial,
                            format!("report '{}': {e}", report.title),
                        );
                        entry.failures.push(e.to_string());
                    }
                }
            }
        }

        let mut items = BTreeMap::new();
        for (ticker, entry) in collected {
            let outcome = Self::assemble(ctx, &ticker, entry, &reports).await;
            items.insert(ticker, outcome);
        }
        Ok(FetchOutput::PerTicker(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recency_weight_runs_from_one_to_half() {
        assert_eq!(recency_weight(0, 1), 1.0);
        assert_eq!(recency_weight(0, 3), 1.0);
        assert_eq!(recency_weight(1, 3), 0.75);
        assert_eq!(recency_weight(2, 3), 0.5);
    }

    #[test]
    fn test_report_link_tolerates_missing_category() {
        let link: ReportLink =
            serde_json::from_value(json!({"title": "Morning", "date_str": "Dec 3, 2025 05:20 AM"}))
                    .unwrap();
        assert_eq!(link.source().category, "");
    }
}
