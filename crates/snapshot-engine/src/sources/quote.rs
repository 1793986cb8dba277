//! Quote panel source

use super::{page_url, single_ticker};
use crate::error::FetchError;
use crate::fetcher::{FetchContext, FetchOutput, FetchTarget, Outcome, SourceFetcher};
use async_trait::async_trait;
use serde_json::{Value, json};
use snapshot_browser::ExtractRequest;
use snapshot_core::{Payload, QuoteSnapshot, SourceName};

/// Selector cache key for the quote page's main section
pub const CACHE_KEY: &str = "yahoo_quote_main_container";

const QUOTE_BASE: &str = "https://finance.yahoo.com/quote/";

const LOCATE_INSTRUCTION: &str = "find the entire quote page section containing the stock price, \
     change, previous close, volume, and statistics table";

const EXTRACT_INSTRUCTION: &str = "Extract: current price, change, percentage change, currency, \
     previous close, open, day range, volume, average volume, pre-market and after-hours \
     change percent.";

fn schema() -> Value {
    let number = json!({"type": ["number", "null"]});
    let integer = json!({"type": ["integer", "null"]});
    json!({
        "type": "object",
        "properties": {
            "ticker": {"type": "string"},
            "lastPrice": number,
            "changeAbs": number,
            "changePct": number,
            "currency": {"type": ["string", "null"]},
            "openPrice": number,
            "previousClose": number,
            "dayLow": number,
            "dayHigh": number,
            "volume": integer,
            "avgVolume": integer,
            "premarketChangePct": number,
            "afterHoursChangePct": number
        }
    })
}

/// Price, change, ranges and volume from the quote page
#[derive(Debug, Clone, Copy, Default)]
pub struct QuoteFetcher;

#[async_trait]
impl SourceFetcher for QuoteFetcher {
    fn source(&self) -> SourceName {
        SourceName::Quote
    }

    async fn fetch(
        &self,
        ctx: &mut FetchContext,
        target: &FetchTarget,
    ) -> Result<FetchOutput, FetchError> {
        let ticker = single_ticker(self.source(), target)?;
        ctx.navigate(&page_url(QUOTE_BASE, ticker.as_str())?).await?;

        let request = ExtractRequest::new(EXTRACT_INSTRUCTION, schema());
        let mut quote: QuoteSnapshot = ctx
            .scoped_extract(CACHE_KEY, LOCATE_INSTRUCTION, &request, |q: &QuoteSnapshot| {
                !q.is_empty()
            })
            .await?;

        if quote.is_empty() {
            return Err(FetchError::Extraction(format!(
                "no price found on the {ticker} quote page"
            )));
        }
        quote.ticker = ticker.as_str().to_string();

        Ok(FetchOutput::Single(Outcome::Payload(Payload::Quote(quote))))
    }
}
