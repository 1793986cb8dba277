//! End-to-end runs with the real sources against a scripted browser

use serde_json::json;
use snapshot_core::{FailureKind, Payload, SourceName, Stage, parse_watchlist};
use snapshot_engine::sources::quote::CACHE_KEY;
use snapshot_engine::testing::ScriptedBrowser;
use snapshot_engine::{Orchestrator, RunConfig, SelectorCache};
use std::sync::Arc;
use std::time::Duration;

fn quote_and_news_config() -> RunConfig {
    RunConfig::builder()
        .watchlist(parse_watchlist(["AAPL", "MSFT"]).unwrap())
        .sources([SourceName::Quote, SourceName::NewsSearch])
        .max_concurrency(1)
        .navigation_retry(2, Duration::from_secs(1))
        .extraction_retry(1, Duration::from_secs(1))
        .build()
        .unwrap()
}

fn script_news(browser: &ScriptedBrowser) {
    browser.on_extract(
        "google.com/search",
        "news article headlines",
        json!({"articles": [
            {"headline": "Shares climb ahead of earnings", "source": "Reuters",
             "age": "2 hours ago"},
            {"headline": "Analysts lift price targets", "source": "Bloomberg", "age": "5 hours ago"}
        ]}),
    );
}

#[tokio::test(start_paused = true)]
async fn test_quote_failure_for_one_ticker_only() {
    let browser = Arc::new(ScriptedBrowser::new());
    browser.always_fail_navigation("finance.yahoo.com/quote/AAPL");
    browser.on_extract(
        "finance.yahoo.com/quote/MSFT",
        "",
        json!({"lastPrice": 410.5, "currency": "USD"}),
    );
    script_news(&browser);

    let outcome = Orchestrator::new(quote_and_news_config(), browser.clone()).run().await;
    let snapshot = &outcome.snapshot;

    let aapl = snapshot.ticker("AAPL").unwrap();
    let failure = aapl.get(SourceName::Quote).unwrap().failure_detail().unwrap();
    assert_eq!(failure.kind, FailureKind::Navigation);
    assert_eq!(failure.diagnostics.stage, Stage::SessionAcquired);
    assert_eq!(failure.diagnostics.navigation_attempts, 3);
    assert!(aapl.get(SourceName::NewsSearch).unwrap().is_success());

    let msft = snapshot.ticker("MSFT").unwrap();
    match msft.get(SourceName::Quote).unwrap().payload() {
        Some(Payload::Quote(quote)) => {
            assert_eq!(quote.ticker, "MSFT");
            assert_eq!(quote.last_price, Some(410.5));
        }
        other => panic!("expected a quote, got {other:?}"),
    }
    match msft.get(SourceName::NewsSearch).unwrap().payload() {
        Some(Payload::NewsSearch(news)) => assert_eq!(news.stories.len(), 2),
        other => panic!("expected news, got {other:?}"),
    }

    assert_eq!(outcome.errors.len(), 1);
    let record = &outcome.errors.records()[0];
    assert_eq!(record.source, SourceName::Quote);
    assert_eq!(record.ticker.as_ref().map(|t| t.as_str()), Some("AAPL"));
    assert!(!record.recovered);

    assert!(!outcome.timed_out);
    assert_eq!(outcome.metrics.total_sessions(), 4);
    assert_eq!(browser.max_open_sessions(), 1);
    assert_eq!(browser.sessions_closed(), 4);
}

#[tokio::test]
async fn test_stale_selector_heals_across_runs() {
    let config = RunConfig::builder()
        .watchlist(parse_watchlist(["AAPL"]).unwrap())
        .sources([SourceName::Quote])
        .build()
        .unwrap();
    let browser = Arc::new(ScriptedBrowser::new());
    browser.break_selector("xpath=//old-layout");
    browser.on_locate("entire quote page section", "xpath=//new-layout");
    browser.on_extract("finance.yahoo.com/quote/AAPL", "", json!({"lastPrice": 190.1}));

    let cache = Arc::new(SelectorCache::new());
    cache.set(CACHE_KEY, "xpath=//old-layout").await;

    let first = Orchestrator::new(config.clone(), browser.clone())
        .with_cache(cache.clone())
        .run()
        .await;
    assert!(first.snapshot.ticker("AAPL").unwrap().get(SourceName::Quote).unwrap().is_success());
    assert!(cache.get(CACHE_KEY).await.is_none());

    let second = Orchestrator::new(config, browser.clone())
        .with_cache(cache.clone())
        .run()
        .await;
    assert!(second.snapshot.ticker("AAPL").unwrap().get(SourceName::Quote).unwrap().is_success());
    assert_eq!(cache.get(CACHE_KEY).await.as_deref(), Some("xpath=//new-layout"));

    let selectors: Vec<Option<String>> =
        browser.extract_calls().into_iter().map(|c| c.selector).collect();
    assert_eq!(
        selectors,
        [
            Some("xpath=//old-layout".to_string()),
            None,
            Some("xpath=//new-layout".to_string())
        ]
    );
}

#[tokio::test]
async fn test_empty_scoped_result_falls_back_and_clears_cache() {
    let config = RunConfig::builder()
        .watchlist(parse_watchlist(["AAPL"]).unwrap())
        .sources([SourceName::Quote])
        .build()
        .unwrap();
    let browser = Arc::new(ScriptedBrowser::new());
    // The footer exists on every layout, so scoping to it succeeds with nothing in it
    browser.on_scoped_extract("xpath=//footer", json!({}));
    browser.on_locate("entire quote page section", "xpath=//footer");
    browser.on_extract("finance.yahoo.com/quote/AAPL", "", json!({"lastPrice": 190.1}));

    let cache = Arc::new(SelectorCache::new());
    cache.set(CACHE_KEY, "xpath=//footer").await;

    for _ in 0..2 {
        let outcome = Orchestrator::new(config.clone(), browser.clone())
            .with_cache(cache.clone())
            .run()
            .await;
        let aapl = outcome.snapshot.ticker("AAPL").unwrap();
        match aapl.get(SourceName::Quote).unwrap().payload() {
            Some(Payload::Quote(quote)) => assert_eq!(quote.last_price, Some(190.1)),
            other => panic!("expected a quote, got {other:?}"),
        }
        assert!(cache.get(CACHE_KEY).await.is_none());
    }

    let selectors: Vec<Option<String>> =
        browser.extract_calls().into_iter().map(|c| c.selector).collect();
    assert_eq!(
        selectors,
        [Some("xpath=//footer".to_string()), None, Some("xpath=//footer".to_string()), None]
    );
}

#[tokio::test]
async fn test_panic_inside_page_call_closes_session_and_frees_slot() {
    let config = RunConfig::builder()
        .watchlist(parse_watchlist(["AAPL", "MSFT"]).unwrap())
        .sources([SourceName::Quote])
        .max_concurrency(1)
        .build()
        .unwrap();
    let browser = Arc::new(ScriptedBrowser::new());
    browser.panic_on_navigate("finance.yahoo.com/quote/AAPL");
    browser.on_extract("finance.yahoo.com/quote/MSFT", "", json!({"lastPrice": 410.5}));

    let outcome = Orchestrator::new(config, browser.clone()).run().await;

    let aapl = outcome.snapshot.ticker("AAPL").unwrap().get(SourceName::Quote).unwrap();
    assert_eq!(aapl.failure_detail().unwrap().kind, FailureKind::Internal);
    assert!(outcome.snapshot.ticker("MSFT").unwrap().get(SourceName::Quote).unwrap().is_success());

    // The abandoned session is closed from a spawned task
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(browser.sessions_created(), 2);
    assert_eq!(browser.sessions_closed(), 2);
    assert_eq!(browser.max_open_sessions(), 1);
}
