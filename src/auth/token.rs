use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// base64url that accepts both padded and unpadded segments.
const SEGMENT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Claims read from the payload segment of a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Expiry, seconds since the epoch.
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub sub: Option<String>,
}

/// Expiry facts derived from the stored token. Recomputed on every read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub token: String,
    pub expires_at_millis: i64,
    pub is_expired: bool,
    /// Negative once the token has expired.
    pub time_until_expiry_millis: i64,
}

impl TokenInfo {
    pub fn from_claims(token: impl Into<String>, claims: &TokenClaims, now_millis: i64) -> Self {
        let expires_at_millis = claims.exp.saturating_mul(1000);
        Self {
            token: token.into(),
            expires_at_millis,
            is_expired: now_millis >= expires_at_millis,
            time_until_expiry_millis: expires_at_millis.saturating_sub(now_millis),
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.expires_at_millis).single()
    }

    /// Expired, or strictly inside the refresh window.
    pub fn needs_refresh(&self, threshold_millis: i64) -> bool {
        self.is_expired || self.time_until_expiry_millis < threshold_millis
    }
}

/// Decode the claims of a `header.payload.signature` token.
///
/// The signature is not verified; only the server can do that.
///
/// # Example
/// ```
/// use freshtoken::auth::decode_claims;
///
/// // {"exp":1700000000}
/// let token = "eyJhbGciOiJIUzI1NiJ9.eyJleHAiOjE3MDAwMDAwMDB9.sig";
/// assert_eq!(decode_claims(token)?.exp, 1_700_000_000);
/// # Ok::<(), freshtoken::error::SessionError>(())
/// ```
pub fn decode_claims(token: &str) -> Result<TokenClaims, SessionError> {
    let mut segments = token.trim().split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(SessionError::Decode(
            "expected three dot-separated segments".to_string(),
        ));
    };
    let bytes = SEGMENT_ENGINE.decode(payload)?;
    serde_json::from_slice(&bytes).map_err(|e| SessionError::Decode(e.to_string()))
}

/// Build an unsigned token carrying the given claims.
///
/// Useful for fixtures and local tooling; servers will reject it.
pub fn encode_unsigned(claims: &TokenClaims) -> Result<String, SessionError> {
    let header = SEGMENT_ENGINE.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = SEGMENT_ENGINE.encode(serde_json::to_vec(claims)?);
    Ok(format!("{header}.{payload}.unsigned"))
}
