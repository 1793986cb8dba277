//! Core types for the morning snapshot pipeline
//!
//! This crate defines the vocabulary shared by the browser collaborator,
//! the fetch engine and the CLI: tickers, source names, source payloads
//! and the tagged per-task [`FetchResult`].

pub mod error;
pub mod payload;
pub mod result;
pub mod source;
pub mod ticker;

pub use error::{Error, Result};
pub use payload::{
    AiAnalysis, Headline, HeadlineSummary, KnowledgeReport, MacroSummary, NewsStories, NewsStory,
    NewsSummary, Outlook, Payload, QuoteSnapshot, ReportSource, Sentiment,
};
pub use result::{Diagnostics, FailureKind, FetchFailure, FetchResult, Stage};
pub use source::SourceName;
pub use ticker::{Ticker, parse_watchlist};
