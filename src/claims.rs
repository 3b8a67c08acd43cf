//! Token Claims Module
//!
//! Reads the payload segment of a bearer token. Signatures are never
//! checked: the issuer is trusted and the claims only feed local expiry
//! heuristics and user identification.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;

/// Claims read from an access token payload
///
/// Each claim is read on its own: a claim of an unexpected JSON type is
/// treated as absent without losing the other one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "RawClaims")]
pub struct DecodedClaims {
    pub subject: Option<String>,
    pub expires_at: Option<i64>,
}

#[derive(Deserialize)]
struct RawClaims {
    #[serde(default)]
    sub: Option<Value>,
    #[serde(default)]
    exp: Option<Value>,
}

impl From<RawClaims> for DecodedClaims {
    fn from(raw: RawClaims) -> Self {
        let subject = match raw.sub {
            Some(Value::String(sub)) => Some(sub),
            Some(Value::Number(sub)) => Some(sub.to_string()),
            _ => None,
        };
        // Fractional expiries are truncated to whole seconds.
        let expires_at = raw.exp.as_ref().and_then(|exp| {
            exp.as_i64().or_else(|| {
                exp.as_f64()
                    .filter(|secs| secs.is_finite())
                    .map(|secs| secs.floor() as i64)
            })
        });

        Self {
            subject,
            expires_at,
        }
    }
}

/// Token decoding errors
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("expected three dot-separated segments, found {0}")]
    Segments(usize),

    #[error("payload is not base64url: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not a JSON object: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode the middle segment of a three-part token.
pub fn decode_claims(token: &str) -> Result<DecodedClaims, DecodeError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(DecodeError::Segments(segments.len()));
    }

    // Some issuers keep the base64 padding; the no-pad engine rejects it.
    let payload = segments[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD.decode(payload)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Claims of `token`, or `None` when it cannot be decoded.
pub fn safe_decode(token: &str) -> Option<DecodedClaims> {
    decode_claims(token).ok()
}

/// Subject claim of `token`, if it decodes and carries one.
pub fn subject_of(token: &str) -> Option<String> {
    safe_decode(token).and_then(|claims| claims.subject)
}

/// Whether a token with these claims needs refreshing at `now`.
///
/// A missing expiry is always stale.
pub fn is_stale_at(claims: Option<&DecodedClaims>, now: i64, margin_secs: i64) -> bool {
    match claims.and_then(|c| c.expires_at) {
        Some(exp) => exp.saturating_sub(now) < margin_secs,
        None => true,
    }
}

/// Staleness of `token` against the wall clock.
pub fn is_stale(token: &str, margin_secs: i64) -> bool {
    let now = chrono::Utc::now().timestamp();
    is_stale_at(safe_decode(token).as_ref(), now, margin_secs)
}
