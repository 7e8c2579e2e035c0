use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

use super::coordinator::RefreshCoordinator;
use super::failure::FailureHandler;
use super::store::TokenStore;

/// The only way request code obtains credentials.
///
/// Stale tokens are refreshed through the same de-duplicated path the
/// scheduler uses, so a burst of requests costs at most one exchange.
#[derive(Clone)]
pub struct AuthHeaderProvider {
    store: Arc<TokenStore>,
    coordinator: Arc<RefreshCoordinator>,
    failures: Arc<FailureHandler>,
    threshold: Duration,
}

impl AuthHeaderProvider {
    pub fn new(
        store: Arc<TokenStore>,
        coordinator: Arc<RefreshCoordinator>,
        failures: Arc<FailureHandler>,
        threshold: Duration,
    ) -> Self {
        Self {
            store,
            coordinator,
            failures,
            threshold,
        }
    }

    /// A token that is valid and outside the refresh window, refreshing first
    /// if needed. `None` once the session is logged out.
    pub async fn ensure_valid_token(&self) -> Option<String> {
        if self.failures.is_logged_out() {
            return None;
        }
        let threshold_millis = self.threshold.as_millis() as i64;
        if let Some(info) = self.store.token_info() {
            if !info.needs_refresh(threshold_millis) {
                return Some(info.token);
            }
        }
        if !self.coordinator.refresh().await {
            return None;
        }
        self.store
            .token_info()
            .filter(|info| !info.is_expired)
            .map(|info| info.token)
    }

    /// `Authorization: Bearer <token>`, or an empty map when no token can be had.
    pub async fn auth_header(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let Some(token) = self.ensure_valid_token().await else {
            return headers;
        };
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Err(e) => tracing::warn!(error = %e, "Token is not a valid header value"),
        }
        headers
    }

    /// Attach the authorization header to an outgoing request.
    pub async fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.headers(self.auth_header().await)
    }
}
