//! Ticker-independent macro summary from the knowledge-base reports

use super::knowledge::{
    list_reports, login, open_report, recency_weight, require_credentials, window,
};
use crate::config::KnowledgeSettings;
use crate::error::FetchError;
use crate::fetcher::{FetchContext, FetchMode, FetchOutput, FetchTarget, Outcome, SourceFetcher};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use snapshot_browser::ExtractRequest;
use snapshot_core::{FailureKind, MacroSummary, Payload, SourceName};
use tracing::info;

/// Bullets kept per report and overall
const MAX_BULLETS: usize = 10;

/// Report summaries fed into the final synthesis
const MAX_SYNTHESIS_INPUTS: usize = 5;

const MACRO_INSTRUCTION: &str = "You are a macro equity strategist writing a pre-market brief. \
     From this market report, write a 2-3 sentence overview of the global market backdrop and its \
     main drivers as summary, and 7-10 detailed bullets tagged like [MACRO], [CENTRAL BANK], \
     [DATA], [EARNINGS] as bullets.";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MacroExtract {
    summary: Option<String>,
    bullets: Vec<String>,
}

fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "summary": {"type": ["string", "null"]},
            "bullets": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["bullets"]
    })
}

/// Merged macro view across the reports inside the window
#[derive(Debug, Clone)]
pub struct MacroSummaryFetcher {
    settings: KnowledgeSettings,
}

impl MacroSummaryFetcher {
    pub fn new(settings: KnowledgeSettings) -> Self {
        Self { settings }
    }

    /// One summary and ranked bullet list across all report summaries
    async fn synthesise(
        ctx: &mut FetchContext,
        summaries: &[String],
    ) -> Result<MacroExtract, FetchError> {
        let inputs: Vec<&str> = summaries
            .iter()
            .take(MAX_SYNTHESIS_INPUTS)
            .map(String::as_str)
            .collect();
        let instruction = format!(
            "{MACRO_INSTRUCTION}\n\nYou are synthesising several reports. Their summaries:\n\n\
             {}\n\nProduce one unified summary and one bullet list ranked by market impact, \
             merging duplicate themes.",
            inputs.join("\n\n")
        );
        ctx.extract_as(&ExtractRequest::new(instruction, schema())).await
    }
}

#[async_trait]
impl SourceFetcher for MacroSummaryFetcher {
    fn source(&self) -> SourceName {
        SourceName::MacroSummary
    }

    fn mode(&self) -> FetchMode {
        FetchMode::Global
    }

    fn preflight(&self) -> Result<(), FetchError> {
        require_credentials(&self.settings).map(drop)
    }

    async fn fetch(
        &self,
        ctx: &mut FetchContext,
        _target: &FetchTarget,
    ) -> Result<FetchOutput, FetchError> {
        let credentials = require_credentials(&self.settings)?;
        let window = window(&self.settings, self.settings.macro_window_hour)?;

        login(ctx, &credentials).await?;
        let reports = list_reports(ctx, &window).await?;
        if reports.is_empty() {
            return Ok(FetchOutput::Single(Outcome::Skipped(format!(
                "no macro reports between {}",
                window.label()
            ))));
        }

        let mut summaries = Vec::new();
        let mut bullets: Vec<(String, f64)> = Vec::new();
        let mut sources = Vec::new();
        let mut last_error = None;

        for (index, report) in reports.iter().enumerate() {
            let extracted = match open_report(ctx, report, index == 0).await {
                Ok(()) => {
                    let request = ExtractRequest::new(MACRO_INSTRUCTION, schema());
                    ctx.extract_as::<MacroExtract>(&request).await
                }
                Err(e) => Err(e),
            };
            let extracted = match extracted {
                Ok(extracted) => extracted,
                Err(e) => {
                    ctx.record_incident(None, e.kind(), format!("report '{}': {e}", report.title));
                    last_error = Some(e);
                    continue;
                }
            };

            let weight = recency_weight(index, reports.len());
            if let Some(summary) = extracted.summary.filter(|s| !s.trim().is_empty()) {
                summaries.push(summary);
            }
            bullets.extend(
                extracted
                    .bullets
                    .into_iter()
                    .take(MAX_BULLETS)
                    .map(|b| (b, weight)),
            );
            sources.push(report.source());
        }

        if sources.is_empty() {
            return Err(last_error.unwrap_or_else(|| {
                FetchError::Extraction("no macro report could be read".to_string())
            }));
        }

        bullets.sort_by(|a, b| b.1.total_cmp(&a.1));
        let mut final_bullets: Vec<String> =
            bullets.into_iter().take(MAX_BULLETS).map(|(b, _)| b).collect();
        let mut summary = (!summaries.is_empty()).then(|| summaries.join(" "));

        if !summaries.is_empty() && !final_bullets.is_empty() {
            match Self::synthesise(ctx, &summaries).await {
                Ok(merged) => {
                    if let Some(merged_summary) = merged.summary.filter(|s| !s.trim().is_empty()) {
                        summary = Some(merged_summary);
                    }
                    if !merged.bullets.is_empty() {
                        final_bullets = merged.bullets.into_iter().take(MAX_BULLETS).collect();
                    }
                }
                Err(e) => {
                    ctx.record_incident(None, FailureKind::Extraction, format!("synthesis: {e}"));
                    summary = summaries.first().cloned();
                }
            }
        }

        info!(reports = sources.len(), bullets = final_bullets.len(), "Macro summary assembled");

        Ok(FetchOutput::Single(Outcome::Payload(Payload::MacroSummary(MacroSummary {
            report_count: sources.len(),
            date_range: window.label(),
            summary,
            bullets: final_bullets,
            sources,
        }))))
    }
}
