//! "Why is this stock moving" commentary source

use super::{page_url, single_ticker};
use crate::error::FetchError;
use crate::fetcher::{FetchContext, FetchOutput, FetchTarget, Outcome, SourceFetcher};
use async_trait::async_trait;
use serde_json::{Value, json};
use snapshot_browser::{ExtractRequest, NavigateOptions, WaitUntil};
use snapshot_core::{AiAnalysis, Payload, SourceName, Ticker};
use tracing::debug;

const QUOTE_BASE: &str = "https://finance.yahoo.com/quote/";

fn panel_instruction(ticker: &Ticker) -> String {
    format!(
        "If the page has a tab, button, or link labeled something like 'AI Analysis', \
         'Why is this stock moving?', or 'Why is {ticker} moving today?', select the best \
         element to open that analysis card."
    )
}

fn extract_instruction(ticker: &Ticker) -> String {
    format!(
        "On this Yahoo Finance page for {ticker}, locate the AI-driven analysis or \
         'Why is this stock moving?' explanation. Extract the panel heading as title, any \
         'Updated ...' text as updated_at, a 2-4 sentence summary of why the stock is moving \
         today, and 3-5 bullets with concrete drivers. Use only visible text. If the panel \
         is not visible, return empty values."
    )
}

fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": {"type": ["string", "null"]},
            "updatedAt": {"type": ["string", "null"]},
            "summary": {"type": ["string", "null"]},
            "bullets": {"type": "array", "items": {"type": "string"}}
        }
    })
}

/// AI commentary panel on the quote page
#[derive(Debug, Clone, Copy, Default)]
pub struct AiAnalysisFetcher;

impl AiAnalysisFetcher {
    /// Try to open the analysis panel; the page is extracted either way
    async fn open_panel(ctx: &mut FetchContext, ticker: &Ticker) {
        let selector = match ctx.locate(&panel_instruction(ticker)).await {
            Ok(selector) => selector,
            Err(e) => {
                debug!(ticker = %ticker, error = %e, "No analysis panel toggle found");
                return;
            }
        };
        if let Err(e) = ctx.act(&format!("Click the element at {selector}")).await {
            debug!(ticker = %ticker, error = %e, "Could not open analysis panel");
        }
    }
}

#[async_trait]
impl SourceFetcher for AiAnalysisFetcher {
    fn source(&self) -> SourceName {
        SourceName::AiAnalysis
    }

    async fn fetch(
        &self,
        ctx: &mut FetchContext,
        target: &FetchTarget,
    ) -> Result<FetchOutput, FetchError> {
        let ticker = single_ticker(self.source(), target)?;
        let options = NavigateOptions {
            wait_until: WaitUntil::Load,
            ..NavigateOptions::default()
        };
        ctx.navigate_with(&page_url(QUOTE_BASE, ticker.as_str())?, &options)
            .await?;

        Self::open_panel(ctx, ticker).await;

        let request = ExtractRequest::new(extract_instruction(ticker), schema());
        let mut analysis: AiAnalysis = ctx.extract_as(&request).await?;

        if analysis.summary.as_deref().is_none_or(str::is_empty) && analysis.bullets.is_empty() {
            return Ok(FetchOutput::Single(Outcome::Skipped(format!(
                "no AI analysis shown for {ticker}"
            ))));
        }
        analysis.ticker = ticker.as_str().to_string();

        Ok(FetchOutput::Single(Outcome::Payload(Payload::AiAnalysis(analysis))))
    }
}
