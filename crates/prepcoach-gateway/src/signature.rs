//! `t=<unix seconds>,v0=<hex hmac>` request signatures.
//!
//! The signed message is `"<timestamp>.<raw body>"`, keyed with the shared
//! webhook secret, using HMAC-SHA256.

use axum::http::{HeaderMap, StatusCode};
use hmac::{Hmac, Mac};
use prepcoach_core::{PrepcoachError, PrepcoachResult};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header names checked for a signature, in order.
pub const SIGNATURE_HEADERS: [&str; 2] = ["x-signature", "elevenlabs-signature"];

/// Requests signed longer ago than this are rejected.
pub const DEFAULT_TOLERANCE_SECS: i64 = 30 * 60;

/// Why a request's signature was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// No signature header.
    #[error("Missing signature header")]
    Missing,
    /// Header lacks `t=` or `v0=`.
    #[error("Invalid signature format")]
    Malformed,
    /// Timestamp older than the tolerance.
    #[error("Request expired")]
    Expired,
    /// No shared secret is configured.
    #[error("Server configuration error: Missing webhook secret")]
    SecretMissing,
    /// Digest does not match the body.
    #[error("Invalid signature")]
    Mismatch,
}

impl SignatureError {
    /// HTTP status the webhook answers with.
    pub fn status(&self) -> StatusCode {
        match self {
            SignatureError::Missing | SignatureError::Malformed | SignatureError::Mismatch => {
                StatusCode::UNAUTHORIZED
            }
            SignatureError::Expired => StatusCode::FORBIDDEN,
            SignatureError::SecretMissing => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A parsed signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// The timestamp exactly as sent; this is what was signed.
    pub timestamp_raw: String,
    /// Unix seconds parsed from `timestamp_raw`.
    pub timestamp: i64,
    /// Full `v0=…` element.
    pub v0: String,
}

/// Splits a header value on `,` and picks out the `t=` and `v0=` elements.
pub fn parse_signature_header(value: &str) -> Option<SignatureHeader> {
    let mut timestamp_raw = None;
    let mut v0 = None;
    for part in value.split(',').map(str::trim) {
        if let Some(t) = part.strip_prefix("t=") {
            timestamp_raw.get_or_insert(t);
        } else if part.starts_with("v0=") {
            v0.get_or_insert(part);
        }
    }

    let timestamp_raw = timestamp_raw.filter(|t| !t.is_empty())?;
    let v0 = v0.filter(|v| v.len() > 3)?;
    let timestamp = timestamp_raw.parse::<i64>().ok()?;
    Some(SignatureHeader {
        timestamp_raw: timestamp_raw.to_string(),
        timestamp,
        v0: v0.to_string(),
    })
}

fn keyed_mac(secret: &str, timestamp: &str, body: &str) -> PrepcoachResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PrepcoachError::Webhook(format!("Invalid HMAC key: {e}")))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());
    Ok(mac)
}

/// The `v0=…` element a correctly signed request carries.
pub fn compute_signature(secret: &str, timestamp: &str, body: &str) -> PrepcoachResult<String> {
    let digest = keyed_mac(secret, timestamp, body)?.finalize().into_bytes();
    Ok(format!("v0={}", hex::encode(digest)))
}

/// Constant-time check of `header.v0` against the expected digest.
pub fn verify_signature(secret: &str, header: &SignatureHeader, body: &str) -> bool {
    let Some(hex_digest) = header.v0.strip_prefix("v0=") else {
        return false;
    };
    let Ok(claimed) = hex::decode(hex_digest) else {
        return false;
    };
    keyed_mac(secret, &header.timestamp_raw, body)
        .is_ok_and(|mac| mac.verify_slice(&claimed).is_ok())
}

/// Runs every check in order: presence, format, freshness, configured
/// secret, digest.
pub fn check_request(
    headers: &HeaderMap,
    body: &str,
    secret: Option<&str>,
    now: i64,
    tolerance_secs: i64,
) -> Result<SignatureHeader, SignatureError> {
    let value = SIGNATURE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .ok_or(SignatureError::Missing)?;
    let value = value.to_str().map_err(|_| SignatureError::Malformed)?;
    let header = parse_signature_header(value).ok_or(SignatureError::Malformed)?;

    if header.timestamp < now - tolerance_secs {
        return Err(SignatureError::Expired);
    }

    let secret = secret
        .filter(|s| !s.is_empty())
        .ok_or(SignatureError::SecretMissing)?;
    if !verify_signature(secret, &header, body) {
        return Err(SignatureError::Mismatch);
    }
    Ok(header)
}
