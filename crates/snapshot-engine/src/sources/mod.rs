//! Concrete data sources
//!
//! Each source is a [`SourceFetcher`]; [`default_fetchers`] builds the set
//! a configuration enables.

pub mod ai_analysis;
pub mod dates;
pub mod knowledge;
pub mod macro_summary;
pub mod news_search;
pub mod quote;
pub mod secondary_news;

pub use ai_analysis::AiAnalysisFetcher;
pub use knowledge::KnowledgeHeadlinesFetcher;
pub use macro_summary::MacroSummaryFetcher;
pub use news_search::NewsSearchFetcher;
pub use quote::QuoteFetcher;
pub use secondary_news::SecondaryNewsFetcher;

use crate::config::RunConfig;
use crate::error::FetchError;
use crate::fetcher::{FetchTarget, SourceFetcher};
use snapshot_core::{SourceName, Ticker};
use std::sync::Arc;
use url::Url;

/// Fetchers for every enabled source, in report order
pub fn default_fetchers(config: &RunConfig) -> Vec<Arc<dyn SourceFetcher>> {
    config
        .enabled_sources
        .iter()
        .map(|source| -> Arc<dyn SourceFetcher> {
            match source {
                SourceName::Quote => Arc::new(QuoteFetcher),
                SourceName::AiAnalysis => Arc::new(AiAnalysisFetcher),
                SourceName::NewsSearch => Arc::new(NewsSearchFetcher::new(config.news)),
                SourceName::KnowledgeHeadlines => {
                    Arc::new(KnowledgeHeadlinesFetcher::new(config.knowledge.clone()))
                }
                SourceName::MacroSummary => {
                    Arc::new(MacroSummaryFetcher::new(config.knowledge.clone()))
                }
                SourceName::SecondaryNews => Arc::new(SecondaryNewsFetcher::default()),
            }
        })
        .collect()
}

/// `base` with `segment` appended as one escaped path segment
pub(crate) fn page_url(base: &str, segment: &str) -> Result<String, FetchError> {
    let mut url = Url::parse(base)
        .map_err(|e| FetchError::Internal(format!("bad base URL {base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| FetchError::Internal(format!("{base} cannot take a path")))?
        .pop_if_empty()
        .push(segment);
    Ok(url.into())
}

/// The ticker of a per-ticker target
pub(crate) fn single_ticker(
    source: SourceName,
    target: &FetchTarget,
) -> Result<&Ticker, FetchError> {
    target
        .ticker()
        .ok_or_else(|| {
            FetchError::Internal(format!("{source} needs a single ticker, got {target}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_url_escapes_segment() {
        assert_eq!(
            page_url("https://finance.yahoo.com/quote/", "AAPL").unwrap(),
            "https://finance.yahoo.com/quote/AAPL"
        );
        assert_eq!(
            page_url("https://finance.yahoo.com/quote", "BRK.B").unwrap(),
            "https://finance.yahoo.com/quote/BRK.B"
        );
        assert!(page_url("https://finance.yahoo.com/quote/", "A/B").unwrap().ends_with("/A%2FB"));
    }

    #[test]
    fn test_default_fetchers_follow_enabled_sources() {
        let config = RunConfig::builder()
            .sources([SourceName::NewsSearch, SourceName::Quote])
            .build()
            .unwrap();
        let sources: Vec<SourceName> =
            default_fetchers(&config).iter().map(|f| f.source()).collect();
        assert_eq!(sources, vec![SourceName::Quote, SourceName::NewsSearch]);
    }

    #[test]
    fn test_single_ticker_rejects_batches() {
        let target = FetchTarget::Global;
        assert!(matches!(single_ticker(SourceName::Quote, &target), Err(FetchError::Internal(_))));
    }
}
