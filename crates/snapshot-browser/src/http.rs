//! HTTP client for a remote browser automation service
//!
//! The service owns the browsers and the inference; this client only speaks
//! its JSON API:
//!
//! | Call | Route |
//! |------|-------|
//! | create session | `POST /v1/sessions` |
//! | close session | `POST /v1/sessions/{id}/end` |
//! | navigate | `POST /v1/sessions/{id}/navigate` |
//! | locate | `POST /v1/sessions/{id}/observe` |
//! | extract | `POST /v1/sessions/{id}/extract` |
//! | act | `POST /v1/sessions/{id}/act` |
//! | page state | `GET /v1/sessions/{id}/page` |
//! | usage | `GET /v1/sessions/{id}/metrics` |
//!
//! Errors come back as `{"error": {"code": ..., "message": ...}}`.

use crate::{
    BrowserError, ExtractRequest, NavigateOptions, PageAutomation, PageState, Result,
    SessionHandle, SessionParams, SessionProvider, UsageSnapshot,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, instrument, warn};

const API_KEY_HEADER: &str = "x-api-key";

/// Automation service client implementing both collaborator traits
#[derive(Debug, Clone)]
pub struct HttpAutomationClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    inspector_template: Option<String>,
}

impl HttpAutomationClient {
    /// Create a client for the service at `base_url`
    pub fn new(base_url: &str) -> Result<Self> {
        let parsed = url::Url::parse(base_url)
            .map_err(|e| BrowserError::Config(format!("invalid automation URL {base_url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(BrowserError::Config(format!(
                "automation URL must be http(s): {base_url}"
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(180))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            inspector_template: None,
        })
    }

    /// Authenticate requests with an API key
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Template for inspector links when the service does not return one.
    ///
    /// `{id}` is replaced with the session id.
    pub fn with_inspector_template(mut self, template: impl Into<String>) -> Self {
        self.inspector_template = Some(template.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn session_url(&self, session: &SessionHandle, action: &str) -> String {
        self.url(&format!("sessions/{}/{action}", session.id))
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        Ok(self.authed(builder).send().await?)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    id: String,
    #[serde(default)]
    inspector_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObserveResponse {
    #[serde(default)]
    selectors: Vec<String>,
    #[serde(default)]
    selector: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

/// Pull a readable message out of an error response
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) => match env.error.code {
            Some(code) => format!("{code}: {}", env.error.message),
            None => env.error.message,
        },
        Err(_) if body.trim().is_empty() => "empty response".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

/// Map a non-success response to an error.
///
/// Throttling, timeouts and server errors keep their status so callers can
/// retry them; anything else goes through `on_error` so each call can name
/// its own failure.
async fn check(
    response: Response,
    on_error: impl FnOnce(StatusCode, String) -> BrowserError,
) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body);
    debug!(status = status.as_u16(), %message, "Automation API returned an error");

    let error = if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        BrowserError::Timeout(message)
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        BrowserError::Api {
            status: status.as_u16(),
            message,
        }
    } else {
        on_error(status, message)
    };
    Err(error)
}

#[async_trait]
impl SessionProvider for HttpAutomationClient {
    #[instrument(skip(self, params), fields(region = %params.region))]
    async fn create_session(&self, params: &SessionParams) -> Result<SessionHandle> {
        let body = json!({
            "region": params.region,
            "keepAlive": params.keep_alive,
            "timeout": params.timeout.as_secs(),
        });

        let response = self.send(self.client.post(self.url("sessions")).json(&body)).await?;
        let response = check(response, |status, message| {
            BrowserError::SessionCreation(format!("{status}: {message}"))
        })
        .await?;
        let created: CreateSessionResponse = Self::decode(response).await?;

        let mut handle = SessionHandle::new(created.id);
        let inspector = created.inspector_url.or_else(|| {
            self.inspector_template
                .as_ref()
                .map(|t| t.replace("{id}", &handle.id))
        });
        if let Some(url) = inspector {
            handle = handle.with_inspector_url(url);
        }

        debug!(session_id = %handle.id, "Session created");
        Ok(handle)
    }

    #[instrument(skip(self, session), fields(session_id = %session.id))]
    async fn close(&self, session: &SessionHandle) -> Result<()> {
        let response = self
            .send(self.client.post(self.session_url(session, "end")))
            .await?;

        // Unknown or already-ended sessions count as closed
        if response.status() == StatusCode::NOT_FOUND || response.status() == StatusCode::GONE {
            debug!("Session already closed");
            return Ok(());
        }

        check(response, |status, message| BrowserError::Api {
            status: status.as_u16(),
            message,
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PageAutomation for HttpAutomationClient {
    #[instrument(skip(self, session, options), fields(session_id = %session.id))]
    async fn navigate(
        &self,
        session: &SessionHandle,
        url: &str,
        options: &NavigateOptions,
    ) -> Result<()> {
        let body = json!({
            "url": url,
            "waitUntil": options.wait_until,
            "timeoutMs": options.timeout.as_millis() as u64,
        });

        let response = self
            .send(
                self.client
                    .post(self.session_url(session, "navigate"))
                    .timeout(options.timeout + Duration::from_secs(10))
                    .json(&body),
            )
            .await?;

        let target = url.to_string();
        let session_id = session.id.clone();
        check(response, move |status, message| {
            if status == StatusCode::NOT_FOUND {
                BrowserError::SessionNotFound(session_id)
            } else {
                BrowserError::Navigation {
                    url: target,
                    reason: message,
                }
            }
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self, session), fields(session_id = %session.id))]
    async fn locate(&self, session: &SessionHandle, instruction: &str) -> Result<String> {
        let response = self
            .send(
                self.client
                    .post(self.session_url(session, "observe"))
                    .json(&json!({ "instruction": instruction })),
            )
            .await?;
        let response = check(response, |_, message| BrowserError::Locate(message)).await?;
        let observed: ObserveResponse = Self::decode(response).await?;

        observed
            .selectors
            .into_iter()
            .next()
            .or(observed.selector)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| BrowserError::Locate(format!("no element matched: {instruction}")))
    }

    #[instrument(
        skip(self, session, request),
        fields(session_id = %session.id, scoped = request.selector.is_some())
    )]
    async fn extract(&self, session: &SessionHandle, request: &ExtractRequest) -> Result<Value> {
        let response = self
            .send(
                self.client
                    .post(self.session_url(session, "extract"))
                    .json(request),
            )
            .await?;
        let response = check(response, |status, message| {
            if status == StatusCode::UNPROCESSABLE_ENTITY {
                BrowserError::Schema(message)
            } else {
                BrowserError::Extraction(message)
            }
        })
        .await?;
        let extracted: ExtractResponse = Self::decode(response).await?;

        if extracted.data.is_null() {
            return Err(BrowserError::Extraction("extraction returned no data".to_string()));
        }
        Ok(extracted.data)
    }

    #[instrument(skip(self, session), fields(session_id = %session.id))]
    async fn act(&self, session: &SessionHandle, instruction: &str) -> Result<()> {
        let response = self
            .send(
                self.client
                    .post(self.session_url(session, "act"))
                    .json(&json!({ "instruction": instruction })),
            )
            .await?;
        check(response, |_, message| BrowserError::Action(message)).await?;
        Ok(())
    }

    async fn page_state(&self, session: &SessionHandle) -> Result<PageState> {
        let response = self
            .send(self.client.get(self.session_url(session, "page")))
            .await?;
        let response = check(response, |status, message| BrowserError::Api {
            status: status.as_u16(),
            message,
        })
        .await?;
        Self::decode(response).await
    }

    async fn usage(&self, session: &SessionHandle) -> Result<UsageSnapshot> {
        let response = self
            .send(self.client.get(self.session_url(session, "metrics")))
            .await?;
        match check(response, |status, message| BrowserError::Api {
            status: status.as_u16(),
            message,
        })
        .await
        {
            Ok(response) => Self::decode(response).await,
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Usage metrics unavailable");
                Ok(UsageSnapshot::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> HttpAutomationClient {
        HttpAutomationClient::new(&server.uri()).unwrap()
    }

    #[test]
    fn test_rejects_non_http_url() {
        assert!(matches!(
            HttpAutomationClient::new("ftp://example.com"),
            Err(BrowserError::Config(_))
        ));
        assert!(HttpAutomationClient::new("not a url").is_err());
    }

    #[test]
    fn test_error_message_parsing() {
        assert_eq!(
            error_message(
                r#"{"success":false,"error":{"code":"ELEMENT_NOT_FOUND","message":"no panel"}}"#
            ),
            "ELEMENT_NOT_FOUND: no panel"
        );
        assert_eq!(error_message("upstream exploded"), "upstream exploded");
        assert_eq!(error_message(""), "empty response");
    }

    #[tokio::test]
    async fn test_create_session_fills_inspector_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions"))
            .and(header(API_KEY_HEADER, "secret"))
            .and(body_partial_json(json!({"region": "us-west-2", "keepAlive": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "sess-1"})))
            .mount(&server)
            .await;

        let client = client_for(&server)
            .await
            .with_api_key("secret")
            .with_inspector_template("https://inspect.example/sessions/{id}");

        let handle = client.create_session(&SessionParams::default()).await.unwrap();
        assert_eq!(handle.id, "sess-1");
        assert_eq!(
            handle.inspector_url.as_deref(),
            Some("https://inspect.example/sessions/sess-1")
        );
    }

    #[tokio::test]
    async fn test_create_session_rejection_is_session_creation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions"))
            .respond_with(ResponseTemplate::new(402).set_body_string("quota exhausted"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .create_session(&SessionParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BrowserError::SessionCreation(_)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions/gone/end"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let handle = SessionHandle::new("gone");
        assert!(client.close(&handle).await.is_ok());
        assert!(client.close(&handle).await.is_ok());
    }

    #[tokio::test]
    async fn test_navigate_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions/s1/navigate"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .navigate(
                &SessionHandle::new("s1"),
                "https://finance.yahoo.com/quote/AAPL",
                &NavigateOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BrowserError::Api { status: 503, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_extract_schema_mismatch_is_not_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions/s1/extract"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "error": {"code": "SCHEMA", "message": "lastPrice must be a number"}
            })))
            .mount(&server)
            .await;

        let request = ExtractRequest::new("quote", json!({"type": "object"}));
        let err = client_for(&server)
            .await
            .extract(&SessionHandle::new("s1"), &request)
            .await
            .unwrap_err();
        assert!(matches!(err, BrowserError::Schema(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_extract_returns_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions/s1/extract"))
            .and(body_partial_json(json!({"selector": "xpath=//main"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": {"lastPrice": 101.5}})),
            )
            .mount(&server)
            .await;

        let request =
            ExtractRequest::new("quote", json!({"type": "object"})).scoped("xpath=//main");
        let data = client_for(&server)
            .await
            .extract(&SessionHandle::new("s1"), &request)
            .await
            .unwrap();
        assert_eq!(data["lastPrice"], 101.5);
    }

    #[tokio::test]
    async fn test_locate_without_match_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions/s1/observe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"selectors": []})))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .locate(&SessionHandle::new("s1"), "the quote panel")
            .await
            .unwrap_err();
        assert!(matches!(err, BrowserError::Locate(_)));
    }

    #[tokio::test]
    async fn test_usage_falls_back_to_zero() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sessions/s1/metrics"))
            .respond_with(ResponseTemplate::new(501))
            .mount(&server)
            .await;

        let usage = client_for(&server)
            .await
            .usage(&SessionHandle::new("s1"))
            .await
            .unwrap();
        assert_eq!(usage, UsageSnapshot::default());
    }
}
