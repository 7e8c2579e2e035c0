use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Body returned by the refresh endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Lifetime in seconds, informational only; expiry is read from the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RefreshResponse {
    pub fn issued(token: impl Into<String>) -> Self {
        Self {
            success: true,
            access_token: Some(token.into()),
            ..Default::default()
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// The new token, if this response may be persisted.
    pub fn into_token(self) -> Result<String, SessionError> {
        if !self.success {
            return Err(SessionError::InvalidResponse(format!(
                "refresh rejected: {}",
                self.error.as_deref().unwrap_or("unknown")
            )));
        }
        match self.access_token {
            Some(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(SessionError::InvalidResponse(
                "success response without accessToken".to_string(),
            )),
        }
    }
}

/// Performs one refresh exchange.
///
/// The refresh credential is owned by the transport (an HTTP-only cookie for
/// [`HttpRefreshTransport`]) and never handed to the session manager.
#[async_trait]
pub trait RefreshTransport: Send + Sync {
    async fn exchange(&self) -> Result<RefreshResponse, SessionError>;
}

/// `POST`s to the refresh endpoint, carrying the refresh cookie.
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use freshtoken::auth::HttpRefreshTransport;
///
/// let transport = HttpRefreshTransport::new(
///     "https://api.example.com/auth/refresh",
///     Duration::from_secs(15),
/// )?
/// .with_refresh_cookie("refresh_token=abc; HttpOnly; Path=/auth");
/// # Ok::<(), freshtoken::error::SessionError>(())
/// ```
pub struct HttpRefreshTransport {
    client: reqwest::Client,
    endpoint: Url,
    jar: Arc<Jar>,
    timeout: Duration,
}

impl HttpRefreshTransport {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, SessionError> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            SessionError::Configuration(format!("invalid refresh endpoint {endpoint}: {e}"))
        })?;
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint,
            jar,
            timeout,
        })
    }

    /// Seed the cookie jar, e.g. with a `Set-Cookie` value captured at sign-in.
    pub fn with_refresh_cookie(self, set_cookie: &str) -> Self {
        self.jar.add_cookie_str(set_cookie, &self.endpoint);
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Client timeouts report the configured limit.
    fn classify(&self, error: reqwest::Error) -> SessionError {
        if error.is_timeout() {
            return SessionError::Timeout(self.timeout.as_millis() as u64);
        }
        error.into()
    }
}

#[async_trait]
impl RefreshTransport for HttpRefreshTransport {
    async fn exchange(&self) -> Result<RefreshResponse, SessionError> {
        let resp = self
            .client
            .post(self.endpoint.clone())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::debug!(
                status = status.as_u16(),
                error = extract_error_code(&body).as_deref().unwrap_or("unknown"),
                "Refresh endpoint rejected request"
            );
            return Err(SessionError::Http {
                status: status.as_u16(),
            });
        }
        let body = resp.text().await.map_err(|e| self.classify(e))?;
        serde_json::from_str(&body)
            .map_err(|e| SessionError::InvalidResponse(format!("malformed refresh body: {e}")))
    }
}

fn extract_error_code(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
}
