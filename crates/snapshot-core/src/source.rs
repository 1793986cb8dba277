//! Data source identifiers

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which fetcher produced a result.
///
/// Used as a key for results, metrics, error records and selector cache
/// entries. The declaration order is the order sources appear in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceName {
    /// Quote panel: price, change, ranges, volume
    Quote,
    /// AI "why is this stock moving" commentary
    AiAnalysis,
    /// News search results with a short summary
    NewsSearch,
    /// Per-ticker headlines from the knowledge-base reports (batched)
    KnowledgeHeadlines,
    /// Ticker-independent macro summary
    MacroSummary,
    /// Secondary news site, disabled by default (bot wall)
    SecondaryNews,
}

impl SourceName {
    /// Every known source, in report order
    pub const ALL: [SourceName; 6] = [
        SourceName::Quote,
        SourceName::AiAnalysis,
        SourceName::NewsSearch,
        SourceName::KnowledgeHeadlines,
        SourceName::MacroSummary,
        SourceName::SecondaryNews,
    ];

    /// Stable lowercase identifier, used in file names and CLI flags
    pub fn as_str(self) -> &'static str {
        match self {
            SourceName::Quote => "quote",
            SourceName::AiAnalysis => "ai_analysis",
            SourceName::NewsSearch => "news_search",
            SourceName::KnowledgeHeadlines => "knowledge_headlines",
            SourceName::MacroSummary => "macro_summary",
            SourceName::SecondaryNews => "secondary_news",
        }
    }

    /// Human-readable label for logs and reports
    pub fn label(self) -> &'static str {
        match self {
            SourceName::Quote => "Yahoo Quote",
            SourceName::AiAnalysis => "Yahoo AI Analysis",
            SourceName::NewsSearch => "Google News",
            SourceName::KnowledgeHeadlines => "Vital Knowledge",
            SourceName::MacroSummary => "Macro News",
            SourceName::SecondaryNews => "MarketWatch",
        }
    }

    /// Environment toggle controlling this source
    pub fn env_flag(self) -> &'static str {
        match self {
            SourceName::Quote => "ENABLE_YAHOO_QUOTE",
            SourceName::AiAnalysis => "ENABLE_YAHOO_ANALYSIS",
            SourceName::NewsSearch => "ENABLE_GOOGLE_NEWS",
            SourceName::KnowledgeHeadlines => "ENABLE_VITAL_NEWS",
            SourceName::MacroSummary => "ENABLE_MACRO_NEWS",
            SourceName::SecondaryNews => "ENABLE_MARKETWATCH",
        }
    }

    /// Whether the source is on when no toggle is configured
    pub fn enabled_by_default(self) -> bool {
        !matches!(self, SourceName::SecondaryNews)
    }

    /// Whether results are keyed by ticker (false only for the macro summary)
    pub fn is_per_ticker(self) -> bool {
        !matches!(self, SourceName::MacroSummary)
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        match wanted.as_str() {
            "quote" | "yahoo_quote" => Ok(SourceName::Quote),
            "ai_analysis" | "analysis" | "yahoo_analysis" => Ok(SourceName::AiAnalysis),
            "news_search" | "news" | "google_news" => Ok(SourceName::NewsSearch),
            "knowledge_headlines" | "knowledge" | "vital_knowledge" => {
                Ok(SourceName::KnowledgeHeadlines)
            }
            "macro_summary" | "macro" | "macro_news" => Ok(SourceName::MacroSummary),
            "secondary_news" | "marketwatch" => Ok(SourceName::SecondaryNews),
            _ => Err(Error::UnknownSource(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trips_through_str() {
        for source in SourceName::ALL {
            assert_eq!(source.as_str().parse::<SourceName>().unwrap(), source);
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!("google-news".parse::<SourceName>().unwrap(), SourceName::NewsSearch);
        assert_eq!("MarketWatch".parse::<SourceName>().unwrap(), SourceName::SecondaryNews);
        assert!("bloomberg".parse::<SourceName>().is_err());
    }

    #[test]
    fn test_defaults() {
        assert!(SourceName::Quote.enabled_by_default());
        assert!(!SourceName::SecondaryNews.enabled_by_default());
        assert!(!SourceName::MacroSummary.is_per_ticker());
        assert!(SourceName::KnowledgeHeadlines.is_per_ticker());
    }
}
