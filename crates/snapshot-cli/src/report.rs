//! Markdown report rendering
//!
//! Sources that failed or were skipped get an explicit "unavailable" line
//! so a missing section is never mistaken for an empty one.

use chrono::{DateTime, Utc};
use snapshot_core::{
    AiAnalysis, FetchResult, KnowledgeReport, MacroSummary, NewsStories, Outlook, Payload,
    QuoteSnapshot, Sentiment, SourceName,
};
use snapshot_engine::{ErrorSummary, Snapshot};
use std::fmt::Write;

pub fn render(snapshot: &Snapshot, errors: &ErrorSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Morning Snapshot - {}", heading_date(snapshot.generated_at));
    let _ = writeln!(out);
    let _ = writeln!(out, "_Run `{}`_", snapshot.run_id);

    if let Some(result) = snapshot.macro_summary() {
        let _ = writeln!(out, "\n## Market\n");
        section(&mut out, SourceName::MacroSummary, result);
    }

    for ticker in &snapshot.tickers {
        let _ = writeln!(out, "\n## {}\n", ticker.ticker);
        if ticker.results.is_empty() {
            let _ = writeln!(out, "_No per-ticker sources enabled._");
        }
        for (source, result) in &ticker.results {
            let _ = writeln!(out, "### {}\n", source.label());
            section(&mut out, *source, result);
            let _ = writeln!(out);
        }
    }

    let _ = writeln!(out, "\n## Errors\n");
    let _ = writeln!(out, "```text\n{}\n```", errors.render_text().trim_end());
    out
}

fn heading_date(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn section(out: &mut String, source: SourceName, result: &FetchResult) {
    match result {
        FetchResult::Success { payload, .. } => match payload {
            Payload::Quote(quote) => quote_section(out, quote),
            Payload::AiAnalysis(analysis) => analysis_section(out, analysis),
            Payload::NewsSearch(news) | Payload::SecondaryNews(news) => news_section(out, news),
            Payload::KnowledgeHeadlines(report) => knowledge_section(out, report),
            Payload::MacroSummary(summary) => macro_section(out, summary),
        },
        FetchResult::Failure(failure) => {
            let _ = writeln!(
                out,
                "_Unavailable: {} failed ({}): {}_",
                source.label(),
                failure.kind,
                failure.message
            );
        }
        FetchResult::Skipped { reason } => {
            let _ = writeln!(out, "_Unavailable: {reason}_");
        }
    }
}

fn num(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}"))
}

fn pct(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:+.2}%"))
}

fn quote_section(out: &mut String, quote: &QuoteSnapshot) {
    let currency = quote.currency.as_deref().unwrap_or("");
    let _ = writeln!(
        out,
        "**{} {}** ({} / {})",
        num(quote.last_price),
        currency,
        quote.change_abs.map_or_else(|| "n/a".to_string(), |v| format!("{v:+.2}")),
        pct(quote.change_pct)
    );
    let _ = writeln!(
        out,
        "- Open {} | Prev close {} | Day range {} - {}",
        num(quote.open_price),
        num(quote.previous_close),
        num(quote.day_low),
        num(quote.day_high)
    );
    if let Some(volume) = quote.volume {
        let avg = quote.avg_volume.map(|v| format!(" (avg {v})")).unwrap_or_default();
        let _ = writeln!(out, "- Volume {volume}{avg}");
    }
    if quote.premarket_change_pct.is_some() {
        let _ = writeln!(out, "- Pre-market {}", pct(quote.premarket_change_pct));
    }
    if quote.after_hours_change_pct.is_some() {
        let _ = writeln!(out, "- After hours {}", pct(quote.after_hours_change_pct));
    }
}

fn analysis_section(out: &mut String, analysis: &AiAnalysis) {
    if let Some(title) = &analysis.title {
        let _ = writeln!(out, "**{title}**");
    }
    if let Some(summary) = &analysis.summary {
        let _ = writeln!(out, "{summary}");
    }
    for bullet in &analysis.bullets {
        let _ = writeln!(out, "- {bullet}");
    }
}

fn outlook(value: Outlook) -> &'static str {
    match value {
        Outlook::Bullish => "bullish",
        Outlook::Bearish => "bearish",
        Outlook::Mixed => "mixed",
        Outlook::Neutral => "neutral",
    }
}

fn sentiment_tag(value: Option<Sentiment>) -> &'static str {
    match value {
        Some(Sentiment::Positive) => " [+]",
        Some(Sentiment::Negative) => " [-]",
        Some(Sentiment::Neutral) => " [=]",
        None => "",
    }
}

fn news_section(out: &mut String, news: &NewsStories) {
    if let Some(summary) = &news.news_summary {
        if let Some(sentiment) = summary.overall_sentiment {
            let _ = writeln!(out, "Overall: **{}**", outlook(sentiment));
        }
        for point in &summary.bullet_points {
            let _ = writeln!(out, "- {point}");
        }
        let _ = writeln!(out);
    }
    for story in &news.stories {
        let source = story.source.as_deref().map(|s| format!(" ({s})")).unwrap_or_default();
        match &story.url {
            Some(url) => {
                let _ = writeln!(
                    out,
                    "- [{}]({url}){source}{}",
                    story.headline,
                    sentiment_tag(story.sentiment)
                );
            }
            None => {
                let _ = writeln!(
                    out,
                    "- {}{source}{}",
                    story.headline,
                    sentiment_tag(story.sentiment)
                );
            }
        }
        if let Some(summary) = &story.summary {
            let _ = writeln!(out, "  {summary}");
        }
    }
}

fn knowledge_section(out: &mut String, report: &KnowledgeReport) {
    if let Some(summary) = &report.summary {
        if let Some(sentiment) = summary.overall_sentiment {
            let _ = writeln!(out, "Overall: **{}**", outlook(sentiment));
        }
        if !summary.key_themes.is_empty() {
            let _ = writeln!(out, "Themes: {}", summary.key_themes.join(", "));
        }
    }
    for headline in &report.headlines {
        let _ = writeln!(out, "- {}{}", headline.headline, sentiment_tag(headline.sentiment));
    }
    if !report.report_dates.is_empty() {
        let _ = writeln!(out, "\n_From reports dated {}_", report.report_dates.join(", "));
    }
}

fn macro_section(out: &mut String, summary: &MacroSummary) {
    let _ = writeln!(out, "_{} reports, {}_\n", summary.report_count, summary.date_range);
    if let Some(text) = &summary.summary {
        let _ = writeln!(out, "{text}\n");
    }
    for bullet in &summary.bullets {
        let _ = writeln!(out, "- {bullet}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapshot_core::{Diagnostics, FailureKind, Ticker};
    use snapshot_engine::{ErrorTracker, TickerSnapshot};
    use std::collections::BTreeMap;

    fn snapshot() -> Snapshot {
        let quote = Payload::Quote(QuoteSnapshot {
            ticker: "AAPL".to_string(),
            last_price: Some(189.5),
            change_pct: Some(-0.42),
            currency: Some("USD".to_string()),
            ..Default::default()
        });
        let mut aapl = BTreeMap::new();
        aapl.insert(SourceName::Quote, FetchResult::success(quote));
        aapl.insert(
            SourceName::NewsSearch,
            FetchResult::failure(
                FailureKind::Navigation,
                "page never loaded",
                Diagnostics::default(),
            ),
        );
        let mut msft = BTreeMap::new();
        msft.insert(SourceName::Quote, FetchResult::skipped("no quote panel"));

        let mut market = BTreeMap::new();
        market.insert(
            SourceName::MacroSummary,
            FetchResult::success(Payload::MacroSummary(MacroSummary {
                report_count: 2,
                date_range: "Jan 05 16:00 - Jan 06 08:00 ET".to_string(),
                summary: Some("Futures are flat.".to_string()),
                bullets: vec!["[DATA] Payrolls at 8:30".to_string()],
                sources: Vec::new(),
            })),
        );

        Snapshot {
            run_id: "run-1".to_string(),
            generated_at: Utc::now(),
            tickers: vec![
                TickerSnapshot {
                    ticker: Ticker::new("AAPL").unwrap(),
                    results: aapl,
                },
                TickerSnapshot {
                    ticker: Ticker::new("MSFT").unwrap(),
                    results: msft,
                },
            ],
            market,
        }
    }

    #[test]
    fn test_tickers_follow_watchlist_order() {
        let report = render(&snapshot(), &ErrorTracker::new().summary());
        let aapl = report.find("## AAPL").unwrap();
        let msft = report.find("## MSFT").unwrap();
        let market = report.find("## Market").unwrap();
        assert!(market < aapl && aapl < msft);
        assert!(report.contains("**189.50 USD**"));
        assert!(report.contains("-0.42%"));
    }

    #[test]
    fn test_missing_sources_are_marked_unavailable() {
        let report = render(&snapshot(), &ErrorTracker::new().summary());
        assert!(
            report.contains("_Unavailable: Google News failed (navigation): page never loaded_")
        );
        assert!(report.contains("_Unavailable: no quote panel_"));
    }

    #[test]
    fn test_macro_section_and_error_summary() {
        let report = render(&snapshot(), &ErrorTracker::new().summary());
        assert!(report.contains("_2 reports, Jan 05 16:00 - Jan 06 08:00 ET_"));
        assert!(report.contains("- [DATA] Payrolls at 8:30"));
        assert!(report.contains("## Errors"));
    }
}
