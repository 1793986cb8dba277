//! Page automation: navigate, locate, extract, act

use crate::{Result, SessionHandle};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Load event to wait for after navigation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    Load,
    #[default]
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    #[serde(rename = "networkidle")]
    NetworkIdle,
}

/// Navigation options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigateOptions {
    pub wait_until: WaitUntil,
    pub timeout: Duration,
}

impl Default for NavigateOptions {
    fn default() -> Self {
        Self {
            wait_until: WaitUntil::DomContentLoaded,
            timeout: Duration::from_secs(30),
        }
    }
}

/// A structured extraction call.
///
/// `schema` is a JSON Schema the returned data must satisfy; `selector`
/// narrows the extraction to a previously located element.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractRequest {
    pub instruction: String,
    pub schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

impl ExtractRequest {
    pub fn new(instruction: impl Into<String>, schema: Value) -> Self {
        Self {
            instruction: instruction.into(),
            schema,
            selector: None,
        }
    }

    /// Scope the extraction to a located element
    pub fn scoped(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }
}

/// URL and title of the current page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageState {
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// Inference usage reported by the automation service for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageSnapshot {
    #[serde(alias = "promptTokens")]
    pub prompt_tokens: u64,
    #[serde(alias = "completionTokens")]
    pub completion_tokens: u64,
    #[serde(alias = "inferenceTimeMs")]
    pub inference_time_ms: u64,
}

impl UsageSnapshot {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// AI-assisted page automation bound to an open session.
///
/// Locate and extract calls cost inference; navigation is cheap but often
/// transiently flaky.
#[async_trait]
pub trait PageAutomation: Send + Sync {
    /// Load a URL in the session's page
    async fn navigate(&self, session: &SessionHandle, url: &str, options: &NavigateOptions)
    -> Result<()>;

    /// Find the element described by `instruction` and return a reusable selector
    async fn locate(&self, session: &SessionHandle, instruction: &str) -> Result<String>;

    /// Extract structured data matching the request's schema
    async fn extract(&self, session: &SessionHandle, request: &ExtractRequest) -> Result<Value>;

    /// Perform an action described in natural language (click, type)
    async fn act(&self, session: &SessionHandle, instruction: &str) -> Result<()>;

    /// Current page URL and title
    async fn page_state(&self, session: &SessionHandle) -> Result<PageState>;

    /// Token usage accumulated by the session so far
    async fn usage(&self, _session: &SessionHandle) -> Result<UsageSnapshot> {
        Ok(UsageSnapshot::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_request_omits_missing_selector() {
        let req = ExtractRequest::new("get the price", json!({"type": "object"}));
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("selector").is_none());

        let scoped = req.scoped("xpath=//main");
        let value = serde_json::to_value(&scoped).unwrap();
        assert_eq!(value["selector"], "xpath=//main");
    }

    #[test]
    fn test_wait_until_wire_names() {
        assert_eq!(serde_json::to_value(WaitUntil::DomContentLoaded).unwrap(), "domcontentloaded");
        assert_eq!(serde_json::to_value(WaitUntil::NetworkIdle).unwrap(), "networkidle");
        assert_eq!(serde_json::to_value(WaitUntil::Load).unwrap(), "load");
    }

    #[test]
    fn test_usage_accepts_camel_case() {
        let usage: UsageSnapshot =
            serde_json::from_value(json!({"promptTokens": 1200, "completionTokens": 300})).unwrap();
        assert_eq!(usage.total_tokens(), 1500);
        assert_eq!(usage.inference_time_ms, 0);
    }
}
