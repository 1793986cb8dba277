//! Remote browser sessions

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest session lifetime the provider accepts (six hours)
pub const MAX_SESSION_TIMEOUT: Duration = Duration::from_secs(21_600);

/// Parameters for opening a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParams {
    /// Provider region the browser runs in
    pub region: String,
    /// Keep the remote browser alive between page loads
    pub keep_alive: bool,
    /// Hard lifetime after which the provider kills the session
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            region: "us-west-2".to_string(),
            keep_alive: true,
            timeout: Duration::from_secs(900),
        }
    }
}

impl SessionParams {
    /// Clamp the timeout to what the provider accepts
    pub fn clamped(mut self) -> Self {
        if self.timeout > MAX_SESSION_TIMEOUT {
            self.timeout = MAX_SESSION_TIMEOUT;
        }
        self
    }
}

/// An open session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    /// Provider-assigned identifier
    pub id: String,
    /// Link to the provider's live inspector, if it exposes one
    pub inspector_url: Option<String>,
    /// When the session was opened
    pub created_at: DateTime<Utc>,
}

impl SessionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            inspector_url: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_inspector_url(mut self, url: impl Into<String>) -> Self {
        self.inspector_url = Some(url.into());
        self
    }
}

/// Opens and closes remote browser sessions.
///
/// `close` must be idempotent: calling it twice, or on a session that never
/// finished initialising, is not an error.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Open a new session
    async fn create_session(&self, params: &SessionParams) -> Result<SessionHandle>;

    /// Release a session
    async fn close(&self, session: &SessionHandle) -> Result<()>;
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
