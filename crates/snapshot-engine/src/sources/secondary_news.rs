//! Secondary news site (disabled by default)
//!
//! The site usually answers automated sessions with a bot wall, so an
//! empty extraction is the common case and is reported as skipped.

use super::{page_url, single_ticker};
use crate::error::FetchError;
use crate::fetcher::{FetchContext, FetchOutput, FetchTarget, Outcome, SourceFetcher};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use snapshot_browser::{ExtractRequest, NavigateOptions, WaitUntil};
use snapshot_core::{NewsStories, NewsStory, Payload, SourceName};

const STOCK_BASE: &str = "https://www.marketwatch.com/investing/stock/";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StoryList {
    stories: Vec<NewsStory>,
}

/// Top stories from the secondary news site
#[derive(Debug, Clone, Copy)]
pub struct SecondaryNewsFetcher {
    max_stories: usize,
}

impl Default for SecondaryNewsFetcher {
    fn default() -> Self {
        Self { max_stories: 3 }
    }
}

#[async_trait]
impl SourceFetcher for SecondaryNewsFetcher {
    fn source(&self) -> SourceName {
        SourceName::SecondaryNews
    }

    async fn fetch(
        &self,
        ctx: &mut FetchContext,
        target: &FetchTarget,
    ) -> Result<FetchOutput, FetchError> {
        let ticker = single_ticker(self.source(), target)?;
        let url = page_url(STOCK_BASE, &ticker.as_str().to_ascii_lowercase())?;
        let options = NavigateOptions {
            wait_until: WaitUntil::NetworkIdle,
            ..NavigateOptions::default()
        };
        ctx.navigate_with(&url, &options).await?;

        let request = ExtractRequest::new(
            format!(
                "Extract up to {} top news stories about {ticker} visible on this page: \
                 headline, url, source, age and a 2-3 sentence summary. Return an empty list \
                 if the page shows no stories.",
                self.max_stories
            ),
            json!({
                "type": "object",
                "properties": {
                    "stories": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "headline": {"type": "string"},
                                "url": {"type": ["string", "null"]},
                                "source": {"type": ["string", "null"]},
                                "age": {"type": ["string", "null"]},
                                "summary": {"type": ["string", "null"]}
                            },
                            "required": ["headline"]
                        }
                    }
                }
            }),
        );
        let mut list: StoryList = ctx.extract_as(&request).await?;
        list.stories.retain(|s| !s.headline.trim().is_empty());
        list.stories.truncate(self.max_stories);

        if list.stories.is_empty() {
            return Ok(FetchOutput::Single(Outcome::Skipped(format!(
                "no stories readable for {ticker} (automated access blocked)"
            ))));
        }

        Ok(FetchOutput::Single(Outcome::Payload(Payload::SecondaryNews(NewsStories {
            ticker: ticker.as_str().to_string(),
            stories: list.stories,
            news_summary: None,
        }))))
    }
}
