//! News search source
//!
//! Lists recent articles from a news search, visits each to summarise it,
//! then asks for an overall summary. Per-article and summary failures are
//! recorded as incidents and never drop the stories already collected.

use super::single_ticker;
use crate::config::NewsSettings;
use crate::error::FetchError;
use crate::fetcher::{FetchContext, FetchOutput, FetchTarget, Outcome, SourceFetcher};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use snapshot_browser::{ExtractRequest, NavigateOptions, WaitUntil};
use snapshot_core::{
    FailureKind, NewsStories, NewsStory, NewsSummary, Payload, Sentiment, SourceName, Ticker,
};
use tracing::debug;
use url::Url;

const SEARCH_BASE: &str = "https://www.google.com/search";

#[derive(Debug, Deserialize)]
struct ArticleList {
    #[serde(default)]
    articles: Vec<ArticleLink>,
}

#[derive(Debug, Clone, Deserialize)]
struct ArticleLink {
    headline: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    age: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ArticleDigest {
    summary: Option<String>,
    sentiment: Option<Sentiment>,
}

/// Search URL for a ticker's news from the last `max_days` days, newest first
pub fn search_url(ticker: &Ticker, max_days: u32) -> Result<String, FetchError> {
    let query = format!("{ticker} stock news");
    let recency = format!("qdr:d{max_days},sbd:1");
    Url::parse_with_params(
        SEARCH_BASE,
        &[("q", query.as_str()), ("tbm", "nws"), ("tbs", recency.as_str())],
    )
    .map(String::from)
    .map_err(|e| FetchError::Internal(format!("bad search URL: {e}")))
}

fn list_request(ticker: &Ticker, settings: &NewsSettings) -> ExtractRequest {
    let instruction = format!(
        "Find the top {} news article headlines about {ticker} in these search results. \
         For each, extract the headline, the article link as url, the publisher as source and \
         how old it is as age. Only include articles from the last {} days, most relevant first.",
        settings.max_stories, settings.max_days
    );
    ExtractRequest::new(
        instruction,
        json!({
            "type": "object",
            "properties": {
                "articles": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "headline": {"type": "string"},
                            "url": {"type": ["string", "null"]},
                            "source": {"type": ["string", "null"]},
                            "age": {"type": ["string", "null"]}
                        },
                        "required": ["headline"]
                    }
                }
            },
            "required": ["articles"]
        }),
    )
}

fn digest_request(ticker: &Ticker) -> ExtractRequest {
    ExtractRequest::new(
        format!(
            "Read this news article about {ticker} stock. Write a 2-3 sentence summary of the \
             main event and why it moves {ticker}, and classify its sentiment as positive, \
             negative or neutral. Only use information from this article."
        ),
        json!({
            "type": "object",
            "properties": {
                "summary": {"type": ["string", "null"]},
                "sentiment": {"enum": ["positive", "negative", "neutral", null]}
            }
        }),
    )
}

fn summary_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "overallSentiment": {"enum": ["bullish", "bearish", "mixed", "neutral", null]},
            "bulletPoints": {"type": "array", "items": {"type": "string"}}
        }
    })
}

/// Recent news for a ticker with per-article and overall summaries
#[derive(Debug, Clone, Copy, Default)]
pub struct NewsSearchFetcher {
    settings: NewsSettings,
}

impl NewsSearchFetcher {
    pub fn new(settings: NewsSettings) -> Self {
        Self { settings }
    }

    async fn visit(
        ctx: &mut FetchContext,
        ticker: &Ticker,
        url: &str,
    ) -> Result<ArticleDigest, FetchError> {
        let options = NavigateOptions {
            wait_until: WaitUntil::Load,
            ..NavigateOptions::default()
        };
        ctx.navigate_with(url, &options).await?;
        ctx.extract_as(&digest_request(ticker)).await
    }

    async fn overall_summary(
        ctx: &mut FetchContext,
        ticker: &Ticker,
        stories: &[NewsStory],
    ) -> Option<NewsSummary> {
        let digests: Vec<String> = stories
            .iter()
            .filter_map(|s| {
                let summary = s.summary.as_ref()?;
                Some(format!("- {}: {summary}", s.headline))
            })
            .collect();
        if digests.is_empty() {
            return None;
        }

        let instruction = format!(
            "Based on these {} news articles about {ticker} stock:\n\n{}\n\nGive the overall \
             sentiment (bullish, bearish, mixed or neutral) and exactly 4 concise bullet points \
             with the most important current market news for {ticker}.",
            digests.len(),
            digests.join("\n")
        );
        match ctx.extract_as(&ExtractRequest::new(instruction, summary_schema())).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                ctx.record_incident(
                    Some(ticker),
                    FailureKind::Extraction,
                    format!("overall summary: {e}"),
                );
                None
            }
        }
    }
}

#[async_trait]
impl SourceFetcher for NewsSearchFetcher {
    fn source(&self) -> SourceName {
        SourceName::NewsSearch
    }

    async fn fetch(
        &self,
        ctx: &mut FetchContext,
        target: &FetchTarget,
    ) -> Result<FetchOutput, FetchError> {
        let ticker = single_ticker(self.source(), target)?;
        let options = NavigateOptions {
            wait_until: WaitUntil::NetworkIdle,
            ..NavigateOptions::default()
        };
        ctx.navigate_with(&search_url(ticker, self.settings.max_days)?, &options)
            .await?;

        let mut listing: ArticleList = ctx.extract_as(&list_request(ticker, &self.settings)).await?;
        listing.articles.truncate(self.settings.max_stories);
        if listing.articles.is_empty() {
            return Ok(FetchOutput::Single(Outcome::Skipped(format!(
                "no news in the last {} days for {ticker}",
                self.settings.max_days
            ))));
        }
        debug!(ticker = %ticker, articles = listing.articles.len(), "Articles listed");

        let mut stories = Vec::with_capacity(listing.articles.len());
        for article in listing.articles {
            let mut story = NewsStory {
                headline: article.headline,
                url: article.url,
                source: article.source,
                age: article.age,
                summary: None,
                sentiment: None,
            };

            if let Some(url) = story.url.clone() {
                match Self::visit(ctx, ticker, &url).await {
                    Ok(digest) => {
                        story.summary = digest.summary.filter(|s| !s.trim().is_empty());
                        story.sentiment = digest.sentiment;
                    }
                    Err(e) => ctx.record_incident(
                        Some(ticker),
                        e.kind(),
                        format!("article '{}': {e}", story.headline),
                    ),
                }
            }
            stories.push(story);
        }

        let news_summary = Self::overall_summary(ctx, ticker, &stories).await;

        Ok(FetchOutput::Single(Outcome::Payload(Payload::NewsSearch(NewsStories {
            ticker: ticker.as_str().to_string(),
            stories,
            news_summary,
        }))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_url_encodes_query() {
        let url = search_url(&Ticker::new("BRK.B").unwrap(), 2).unwrap();
        assert_eq!(
            url,
            "https://www.google.com/search?q=BRK.B+stock+news&tbm=nws&tbs=qdr%3Ad2%2Csbd%3A1"
        );
    }
}
