//! morning-snapshot: fetch every enabled source for a watchlist and write
//! the report, the snapshot and the run's metrics and error logs.

mod report;

use anyhow::Context;
use clap::Parser;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use snapshot_browser::HttpAutomationClient;
use snapshot_core::SourceName;
use snapshot_engine::{FileSink, Orchestrator, RunConfig, RunMetrics};
use snapshot_utils::{LogFormat, env_flag, init_tracing_with};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "morning-snapshot")]
#[command(about = "Pre-market snapshot of a ticker watchlist", long_about = None)]
struct Args {
    /// Watchlist JSON file (overrides WATCHLIST_PATH)
    #[arg(short, long)]
    watchlist: Option<PathBuf>,

    /// Maximum browser sessions open at once
    #[arg(short = 'c', long)]
    max_concurrency: Option<usize>,

    /// Comma-separated sources to run, replacing the ENABLE_* toggles
    #[arg(short, long, value_delimiter = ',')]
    sources: Vec<SourceName>,

    /// Cancel whatever is still running after this many seconds
    #[arg(long, value_name = "SECS")]
    run_timeout: Option<u64>,

    /// Print the planned tasks and exit
    #[arg(long)]
    dry_run: bool,

    /// Log JSON lines instead of text
    #[arg(long)]
    json_logs: bool,
}

fn load_config(args: &Args) -> anyhow::Result<RunConfig> {
    let watchlist = args.watchlist.as_ref().map(|p| p.display().to_string());
    let mut config = RunConfig::from_lookup(|key| match (key, &watchlist) {
        ("WATCHLIST_PATH", Some(path)) => Some(path.clone()),
        _ => std::env::var(key).ok(),
    })?;

    if let Some(n) = args.max_concurrency {
        config.max_concurrency = n.max(1);
    }
    if !args.sources.is_empty() {
        config.enabled_sources = args.sources.iter().copied().collect();
    }
    if let Some(secs) = args.run_timeout.filter(|s| *s > 0) {
        config.run_timeout = Some(Duration::from_secs(secs));
    }
    config.validate()?;
    Ok(config)
}

fn automation_client(config: &RunConfig) -> anyhow::Result<HttpAutomationClient> {
    let settings = &config.automation;
    let mut client = HttpAutomationClient::new(&settings.base_url)
        .with_context(|| format!("automation service at {}", settings.base_url))?;
    if let Some(key) = &settings.api_key {
        client = client.with_api_key(key);
    }
    if let Some(template) = &settings.inspector_template {
        client = client.with_inspector_template(template);
    }
    Ok(client)
}

fn metrics_table(metrics: &RunMetrics) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            "Source",
            "Success",
            "Failed",
            "Skipped",
            "Sessions",
            "Tokens",
            "Avg session",
        ]);

    for (source, counts) in metrics.by_source() {
        let avg = if counts.sessions == 0 {
            "-".to_string()
        } else {
            format!("{:.1}s", counts.session_ms as f64 / counts.sessions as f64 / 1000.0)
        };
        table.add_row(vec![
            source.label().to_string(),
            counts.success.to_string(),
            counts.failure.to_string(),
            counts.skipped.to_string(),
            counts.sessions.to_string(),
            counts.total_tokens.to_string(),
            avg,
        ]);
    }
    table
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let format = if args.json_logs || env_flag("JSON_LOGS", false) {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_tracing_with(format);

    let config = load_config(&args).context("invalid configuration")?;
    let client = Arc::new(automation_client(&config)?);
    let orchestrator = Orchestrator::new(config.clone(), client);

    if args.dry_run {
        let plan = orchestrator.plan();
        println!("{} tasks planned:", plan.len());
        for task in plan {
            println!("  {task}");
        }
        return Ok(());
    }

    let sink = FileSink::new(&config.data_dir);
    if let Err(e) = sink.clear_stale_errors().await {
        warn!(error = %e, "Could not clear old error files");
    }
    let loaded = orchestrator.cache().load(&config.selector_cache_path).await;
    info!(loaded, "Selector cache ready");

    let outcome = orchestrator.run().await;

    if let Err(e) = orchestrator.cache().flush(&config.selector_cache_path).await {
        warn!(error = %e, "Could not save selector cache");
    }

    let summary = outcome.errors.summary();
    let markdown = report::render(&outcome.snapshot, &summary);

    match sink.persist(&outcome).await {
        Ok(written) => info!(snapshot = %written.snapshot.display(), "Artifacts saved"),
        Err(e) => warn!(error = %e, "Could not save run artifacts"),
    }
    match sink.write_report(&markdown, outcome.snapshot.generated_at).await {
        Ok(path) => println!("Report: {}", path.display()),
        Err(e) => {
            warn!(error = %e, "Could not save report, printing it instead");
            println!("{markdown}");
        }
    }

    let metrics = &outcome.metrics;
    println!("{}", metrics_table(metrics));
    println!(
        "Run {}: {} sessions, {:.0}% succeeded, {:.1} browser minutes, {} tokens",
        metrics.run_id(),
        metrics.total_sessions(),
        metrics.success_rate() * 100.0,
        metrics.browser_minutes(),
        metrics.total_tokens()
    );
    if !summary.is_clean() {
        println!(
            "{} errors recorded ({} task failures)",
            summary.total_errors, summary.task_failures
        );
    }
    if outcome.timed_out {
        warn!("Run stopped by the run timeout; unfinished sources are marked unavailable");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sources_flag_parses_aliases() {
        let args =
            Args::try_parse_from(["morning-snapshot", "--sources", "quote,news", "--dry-run"])
                .unwrap();
        assert_eq!(args.sources, [SourceName::Quote, SourceName::NewsSearch]);
        assert!(args.dry_run);
    }

    #[test]
    fn test_unknown_source_is_rejected() {
        assert!(Args::try_parse_from(["morning-snapshot", "--sources", "quote,nope"]).is_err());
    }

    #[test]
    fn test_metrics_table_has_a_row_per_source() {
        let metrics = snapshot_engine::MetricsCollector::new().finalize();
        let table = metrics_table(&metrics);
        assert_eq!(table.row_iter().count(), metrics.by_source().len());
    }
}
