//! Orchestrator properties: isolation, bounded concurrency, coverage,
//! batch preservation, panics and the run timeout.

use snapshot_core::{FailureKind, SourceName, Ticker, parse_watchlist};
use snapshot_engine::testing::{ScriptedBrowser, StubFetcher};
use snapshot_engine::{FetchMode, Orchestrator, RunConfig, SourceFetcher};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

fn watchlist(symbols: &[&str]) -> Vec<Ticker> {
    parse_watchlist(symbols.iter().copied()).unwrap()
}

fn config(symbols: &[&str], sources: &[SourceName], max_concurrency: usize) -> RunConfig {
    RunConfig::builder()
        .watchlist(watchlist(symbols))
        .sources(sources.iter().copied())
        .max_concurrency(max_concurrency)
        .navigation_retry(2, Duration::from_millis(10))
        .extraction_retry(1, Duration::from_millis(10))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_one_failing_task_leaves_others_untouched() {
    let sources = [SourceName::Quote, SourceName::AiAnalysis, SourceName::NewsSearch];
    let fetchers: Vec<Arc<dyn SourceFetcher>> = vec![
        Arc::new(StubFetcher::new(SourceName::Quote).failing_for("MSFT")),
        Arc::new(StubFetcher::new(SourceName::AiAnalysis)),
        Arc::new(StubFetcher::new(SourceName::NewsSearch)),
    ];
    let browser = Arc::new(ScriptedBrowser::new());
    let outcome = Orchestrator::new(config(&["AAPL", "MSFT", "NVDA"], &sources, 3), browser.clone())
        .with_fetchers(fetchers)
        .run()
        .await;

    for ticker in &outcome.snapshot.tickers {
        for (source, result) in &ticker.results {
            if ticker.ticker.as_str() == "MSFT" && *source == SourceName::Quote {
                let failure = result.failure_detail().unwrap();
                assert_eq!(failure.kind, FailureKind::Extraction);
            } else {
                assert!(result.is_success(), "{} {source} should succeed", ticker.ticker);
            }
        }
    }
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(browser.sessions_created(), 9);
    assert_eq!(browser.sessions_closed(), 9);
}

#[tokio::test(start_paused = true)]
async fn test_open_sessions_never_exceed_the_limit() {
    let symbols = ["AAPL", "MSFT", "NVDA", "AMZN", "META", "TSLA"];
    let browser = Arc::new(ScriptedBrowser::new());
    let outcome = Orchestrator::new(config(&symbols, &[SourceName::Quote], 2), browser.clone())
        .with_fetchers(vec![Arc::new(
            StubFetcher::new(SourceName::Quote).with_delay(Duration::from_secs(5)),
        )])
        .run()
        .await;

    assert_eq!(browser.max_open_sessions(), 2);
    assert_eq!(browser.sessions_created(), 6);
    assert_eq!(browser.sessions_closed(), 6);
    assert_eq!(outcome.metrics.total_sessions(), 6);
    assert!(outcome
        .snapshot
        .tickers
        .iter()
        .all(|t| t.get(SourceName::Quote).unwrap().is_success()));
}

#[tokio::test]
async fn test_every_enabled_source_has_an_entry() {
    let sources = [
        SourceName::Quote,
        SourceName::AiAnalysis,
        SourceName::NewsSearch,
        SourceName::KnowledgeHeadlines,
        SourceName::MacroSummary,
    ];
    // NewsSearch has no fetcher, the knowledge source fails for everyone
    let fetchers: Vec<Arc<dyn SourceFetcher>> = vec![
        Arc::new(StubFetcher::new(SourceName::Quote)),
        Arc::new(StubFetcher::new(SourceName::AiAnalysis).failing_for("AAPL")),
        Arc::new(
            StubFetcher::new(SourceName::KnowledgeHeadlines)
                .with_mode(FetchMode::Batched)
                .failing_for("AAPL")
                .failing_for("MSFT"),
        ),
        Arc::new(StubFetcher::new(SourceName::MacroSummary).failing_for("global")),
    ];
    let browser = Arc::new(ScriptedBrowser::new());
    let outcome = Orchestrator::new(config(&["AAPL", "MSFT"], &sources, 2), browser)
        .with_fetchers(fetchers)
        .run()
        .await;

    let expected: BTreeSet<SourceName> = [
        SourceName::Quote,
        SourceName::AiAnalysis,
        SourceName::NewsSearch,
        SourceName::KnowledgeHeadlines,
    ]
    .into_iter()
    .collect();

    let order: Vec<&str> = outcome.snapshot.tickers.iter().map(|t| t.ticker.as_str()).collect();
    assert_eq!(order, ["AAPL", "MSFT"]);
    for ticker in &outcome.snapshot.tickers {
        let present: BTreeSet<SourceName> = ticker.results.keys().copied().collect();
        assert_eq!(present, expected);
        assert!(ticker.get(SourceName::NewsSearch).unwrap().is_skipped());
    }
    assert!(outcome.snapshot.macro_summary().unwrap().is_failure());
}

#[tokio::test]
async fn test_batch_failure_for_one_ticker_keeps_the_rest() {
    let browser = Arc::new(ScriptedBrowser::new());
    let outcome = Orchestrator::new(
        config(&["AAPL", "MSFT", "NVDA"], &[SourceName::KnowledgeHeadlines], 2),
        browser.clone(),
    )
    .with_fetchers(vec![Arc::new(
        StubFetcher::new(SourceName::KnowledgeHeadlines)
            .with_mode(FetchMode::Batched)
            .failing_for("MSFT"),
    )])
    .run()
    .await;

    let result = |symbol: &str| {
        outcome
            .snapshot
            .ticker(symbol)
            .unwrap()
            .get(SourceName::KnowledgeHeadlines)
            .unwrap()
            .clone()
    };
    assert!(result("AAPL").is_success());
    assert!(result("NVDA").is_success());
    assert_eq!(result("MSFT").failure_detail().unwrap().kind, FailureKind::BatchPartial);
    assert_eq!(browser.sessions_created(), 1);
}

#[tokio::test]
async fn test_panicking_task_becomes_internal_failure() {
    let browser = Arc::new(ScriptedBrowser::new());
    let outcome = Orchestrator::new(config(&["AAPL", "MSFT"], &[SourceName::Quote], 2), browser)
        .with_fetchers(vec![Arc::new(StubFetcher::new(SourceName::Quote).panicking_for("AAPL"))])
        .run()
        .await;

    let aapl = outcome.snapshot.ticker("AAPL").unwrap().get(SourceName::Quote).unwrap();
    assert_eq!(aapl.failure_detail().unwrap().kind, FailureKind::Internal);
    assert!(outcome.snapshot.ticker("MSFT").unwrap().get(SourceName::Quote).unwrap().is_success());
    assert_eq!(outcome.errors.len(), 1);
}

#[tokio::test]
async fn test_every_session_failing_still_completes() {
    let browser = Arc::new(ScriptedBrowser::new());
    browser.fail_sessions();
    let outcome = Orchestrator::new(
        config(&["AAPL", "MSFT"], &[SourceName::Quote, SourceName::NewsSearch], 2),
        browser,
    )
    .with_fetchers(vec![
        Arc::new(StubFetcher::new(SourceName::Quote)),
        Arc::new(StubFetcher::new(SourceName::NewsSearch)),
    ])
    .run()
    .await;

    assert_eq!(outcome.errors.len(), 4);
    assert!(outcome
        .errors
        .records()
        .iter()
        .all(|r| r.kind == FailureKind::SessionCreation));
    assert_eq!(outcome.metrics.source(SourceName::Quote).failure, 2);
    assert!(!outcome.timed_out);
}

#[tokio::test(start_paused = true)]
async fn test_run_timeout_cancels_in_flight_and_skips_waiting() {
    let config = RunConfig::builder()
        .watchlist(watchlist(&["AAPL", "MSFT", "NVDA"]))
        .sources([SourceName::Quote])
        .max_concurrency(1)
        .run_timeout(Duration::from_secs(10))
        .build()
        .unwrap();
    let browser = Arc::new(ScriptedBrowser::new());
    let outcome = Orchestrator::new(config, browser.clone())
        .with_fetchers(vec![Arc::new(
            StubFetcher::new(SourceName::Quote).with_delay(Duration::from_secs(60)),
        )])
        .run()
        .await;

    assert!(outcome.timed_out);
    let results: Vec<_> = outcome
        .snapshot
        .tickers
        .iter()
        .map(|t| t.get(SourceName::Quote).unwrap().clone())
        .collect();
    let cancelled = results
        .iter()
        .filter(|r| r.failure_detail().is_some_and(|f| f.kind == FailureKind::Cancelled))
        .count();
    let skipped = results.iter().filter(|r| r.is_skipped()).count();
    assert_eq!(cancelled, 1);
    assert_eq!(skipped, 2);
    assert_eq!(browser.sessions_created(), 1);
    assert_eq!(browser.sessions_closed(), 1);
}
