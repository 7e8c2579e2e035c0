use std::sync::Arc;

use super::token::{decode_claims, TokenInfo};
use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::storage::Storage;

/// Reads, writes and decodes the persisted bearer token.
///
/// This is the only component that touches the token key in storage.
pub struct TokenStore {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    key: String,
    identity_keys: Vec<String>,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, config: &SessionConfig) -> Self {
        Self {
            storage,
            clock,
            key: config.storage_key.clone(),
            identity_keys: config.identity_keys.clone(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The stored token string, undecoded.
    pub fn raw_token(&self) -> Option<String> {
        match self.storage.get(&self.key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Failed to read stored token");
                None
            }
        }
    }

    /// Expiry facts for the stored token.
    ///
    /// Absent and undecodable tokens both yield `None`.
    pub fn token_info(&self) -> Option<TokenInfo> {
        let token = self.raw_token()?;
        self.info_for(&token)
    }

    /// Expiry facts for an arbitrary token, evaluated against this store's clock.
    pub fn info_for(&self, token: &str) -> Option<TokenInfo> {
        match decode_claims(token) {
            Ok(claims) => Some(TokenInfo::from_claims(token, &claims, self.clock.now_millis())),
            Err(e) => {
                tracing::warn!(error = %e, "Stored token could not be decoded; treating as absent");
                None
            }
        }
    }

    /// Overwrite the stored token. Other tabs see this write.
    pub fn persist(&self, token: &str) -> Result<(), SessionError> {
        self.storage.set(&self.key, token)
    }

    /// Remove the token and every cached identity entry.
    ///
    /// Keeps going after a failed removal and reports the first error.
    pub fn clear(&self) -> Result<(), SessionError> {
        let mut first_error = None;
        for key in std::iter::once(&self.key).chain(self.identity_keys.iter()) {
            if let Err(e) = self.storage.remove(key) {
                tracing::warn!(key = %key, error = %e, "Failed to clear stored entry");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
