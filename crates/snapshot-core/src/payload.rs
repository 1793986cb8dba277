//! Normalised payloads produced by each source
//!
//! Extraction returns loosely-typed JSON; each source deserialises it into
//! one of these structs. Field aliases accept the camelCase names the
//! extraction schemas use.

use crate::{SourceName, Ticker};
use serde::{Deserialize, Serialize};

/// Headline sentiment for a single story
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

/// Aggregate sentiment across several stories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outlook {
    Bullish,
    Bearish,
    Mixed,
    Neutral,
}

/// Quote panel snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuoteSnapshot {
    pub ticker: String,
    #[serde(alias = "lastPrice")]
    pub last_price: Option<f64>,
    #[serde(alias = "changeAbs")]
    pub change_abs: Option<f64>,
    #[serde(alias = "changePct")]
    pub change_pct: Option<f64>,
    pub currency: Option<String>,
    #[serde(alias = "openPrice")]
    pub open_price: Option<f64>,
    #[serde(alias = "previousClose")]
    pub previous_close: Option<f64>,
    #[serde(alias = "dayLow")]
    pub day_low: Option<f64>,
    #[serde(alias = "dayHigh")]
    pub day_high: Option<f64>,
    pub volume: Option<u64>,
    #[serde(alias = "avgVolume")]
    pub avg_volume: Option<u64>,
    #[serde(alias = "premarketChangePct")]
    pub premarket_change_pct: Option<f64>,
    #[serde(alias = "afterHoursChangePct")]
    pub after_hours_change_pct: Option<f64>,
}

impl QuoteSnapshot {
    /// True when the extraction produced no price at all
    pub fn is_empty(&self) -> bool {
        self.last_price.is_none() && self.previous_close.is_none()
    }
}

/// AI commentary panel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiAnalysis {
    pub ticker: String,
    pub title: Option<String>,
    #[serde(alias = "updatedAt")]
    pub updated_at: Option<String>,
    pub summary: Option<String>,
    pub bullets: Vec<String>,
}

/// One news search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsStory {
    pub headline: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub age: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub sentiment: Option<Sentiment>,
}

/// Summary across a ticker's news stories
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsSummary {
    #[serde(alias = "overallSentiment")]
    pub overall_sentiment: Option<Outlook>,
    #[serde(alias = "bulletPoints")]
    pub bullet_points: Vec<String>,
}

/// News search payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsStories {
    pub ticker: String,
    pub stories: Vec<NewsStory>,
    pub news_summary: Option<NewsSummary>,
}

/// Knowledge-base headline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Headline {
    pub headline: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub sentiment: Option<Sentiment>,
}

/// Short synthesis of a ticker's knowledge-base headlines
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadlineSummary {
    pub overall_sentiment: Option<Outlook>,
    pub key_themes: Vec<String>,
    pub summary: Option<String>,
}

/// Knowledge-base report list entry that contributed to a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSource {
    pub title: String,
    pub date_str: String,
    pub category: String,
}

/// Per-ticker knowledge-base payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeReport {
    pub ticker: String,
    pub headlines: Vec<Headline>,
    pub report_dates: Vec<String>,
    pub sources: Vec<ReportSource>,
    pub summary: Option<HeadlineSummary>,
}

/// Ticker-independent macro summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacroSummary {
    pub report_count: usize,
    pub date_range: String,
    pub summary: Option<String>,
    pub bullets: Vec<String>,
    pub sources: Vec<ReportSource>,
}

/// Source-specific payload carried by a successful result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Quote(QuoteSnapshot),
    AiAnalysis(AiAnalysis),
    NewsSearch(NewsStories),
    KnowledgeHeadlines(KnowledgeReport),
    MacroSummary(MacroSummary),
    SecondaryNews(NewsStories),
}

impl Payload {
    /// The source this payload shape belongs to
    pub fn source(&self) -> SourceName {
        match self {
            Payload::Quote(_) => SourceName::Quote,
            Payload::AiAnalysis(_) => SourceName::AiAnalysis,
            Payload::NewsSearch(_) => SourceName::NewsSearch,
            Payload::KnowledgeHeadlines(_) => SourceName::KnowledgeHeadlines,
            Payload::MacroSummary(_) => SourceName::MacroSummary,
            Payload::SecondaryNews(_) => SourceName::SecondaryNews,
        }
    }

    /// Ticker the payload describes, if any
    pub fn ticker(&self) -> Option<Ticker> {
        let raw = match self {
            Payload::Quote(p) => &p.ticker,
            Payload::AiAnalysis(p) => &p.ticker,
            Payload::NewsSearch(p) | Payload::SecondaryNews(p) => &p.ticker,
            Payload::KnowledgeHeadlines(p) => &p.ticker,
            Payload::MacroSummary(_) => return None,
        };
        Ticker::new(raw).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quote_accepts_camel_case() {
        let quote: QuoteSnapshot = serde_json::from_value(json!({
            "ticker": "AAPL",
            "lastPrice": 189.5,
            "changePct": -0.42,
            "avgVolume": 51_000_000
        }))
        .unwrap();

        assert_eq!(quote.last_price, Some(189.5));
        assert_eq!(quote.change_pct, Some(-0.42));
        assert_eq!(quote.avg_volume, Some(51_000_000));
        assert!(quote.day_high.is_none());
        assert!(!quote.is_empty());
    }

    #[test]
    fn test_news_summary_rejects_unknown_outlook() {
        let bad = json!({"overallSentiment": "euphoric", "bulletPoints": []});
        assert!(serde_json::from_value::<NewsSummary>(bad).is_err());
    }

    #[test]
    fn test_payload_reports_source_and_ticker() {
        let payload = Payload::KnowledgeHeadlines(KnowledgeReport {
            ticker: "MSFT".to_string(),
            ..Default::default()
        });
        assert_eq!(payload.source(), SourceName::KnowledgeHeadlines);
        assert_eq!(payload.ticker().unwrap().as_str(), "MSFT");

        let macro_payload = Payload::MacroSummary(MacroSummary::default());
        assert!(macro_payload.ticker().is_none());
    }
}
