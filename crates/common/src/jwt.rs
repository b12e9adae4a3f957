//! JWT utilities shared across gateway services.
//!
//! This module provides the structural half of token validation:
//! - Size limits for DoS prevention
//! - `Bearer ` prefix handling
//! - Compact JWS parsing (header, payload, signature) without trusting the token
//! - Clock skew constants and `iat` validation
//!
//! Nothing here verifies a signature. Callers must resolve the signing key
//! from a trusted key set and verify the token before using any claim.
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{parse_header, strip_bearer};
//!
//! let token = strip_bearer(authorization_value);
//! let header = parse_header(token)?;
//! let kid = header.kid()?;
//! // check header.alg against the accepted set, then look up `kid`
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Tokens larger than this are rejected before any base64 decoding or
/// cryptographic work. Identity-provider tokens carrying a handful of groups
/// and custom attributes stay well under 2KB.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default JWT clock skew tolerance (5 minutes).
///
/// Tokens with an `iat` more than this far in the future are rejected.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Maximum configurable JWT clock skew tolerance (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

/// Authorization scheme prefix. Matched case-sensitively.
pub const BEARER_PREFIX: &str = "Bearer ";

// =============================================================================
// Error Types
// =============================================================================

/// Structural JWT validation failures.
///
/// These messages are for server-side logs. Call boundaries must map them to
/// a generic unauthenticated response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds [`MAX_JWT_SIZE_BYTES`].
    #[error("token exceeds the maximum allowed size")]
    TokenTooLarge,

    /// Token is not three base64url segments with JSON header and payload.
    #[error("token is not a well-formed compact JWS")]
    MalformedToken,

    /// Header `kid` is absent, empty, or not a string.
    #[error("token header has no key id")]
    MissingKid,

    /// Token `iat` claim is too far in the future.
    #[error("token iat is too far in the future")]
    IatTooFarInFuture,
}

// =============================================================================
// Header
// =============================================================================

/// Untrusted JOSE header of a compact JWS.
///
/// `alg` is kept as the raw string so that callers can reject `none` and
/// symmetric algorithms explicitly instead of relying on a parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwtHeader {
    /// Declared signing algorithm, verbatim.
    pub alg: String,

    /// Key ID, `None` when absent, empty, or not a string.
    pub kid: Option<String>,

    /// Declared token type, if any.
    pub typ: Option<String>,
}

impl JwtHeader {
    /// Return the key ID or [`JwtValidationError::MissingKid`].
    ///
    /// # Errors
    ///
    /// Returns `MissingKid` if the header did not carry a usable `kid`.
    pub fn kid(&self) -> Result<&str, JwtValidationError> {
        self.kid.as_deref().ok_or(JwtValidationError::MissingKid)
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Strip an optional `Bearer ` prefix.
///
/// The prefix is matched exactly. A value without it is returned unchanged,
/// so bare tokens keep working for older clients.
#[must_use]
pub fn strip_bearer(raw: &str) -> &str {
    raw.strip_prefix(BEARER_PREFIX).unwrap_or(raw)
}

/// Parse the structure of a compact JWS and return its header.
///
/// # Security
///
/// - Token size is checked BEFORE any parsing
/// - This function does NOT validate the signature
/// - The returned header must only be used to select a key from a trusted set
///
/// A well-formed token has exactly three segments. Header and payload must be
/// non-empty base64url JSON objects and the header must declare `alg` as a
/// string. The signature segment must be valid base64url but may be empty,
/// which lets unsigned (`alg: none`) tokens reach the algorithm check and be
/// rejected there for the right reason.
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds `MAX_JWT_SIZE_BYTES`
/// - `MalformedToken` - Wrong segment count, bad base64url, or non-object JSON
pub fn parse_header(token: &str) -> Result<JwtHeader, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let parts: Vec<&str> = token.split('.').collect();
    let [header_b64, payload_b64, signature_b64] = parts.as_slice() else {
        tracing::debug!(
            target: "common.jwt",
            parts = parts.len(),
            "Token rejected: invalid JWT format"
        );
        return Err(JwtValidationError::MalformedToken);
    };

    if header_b64.is_empty() || payload_b64.is_empty() {
        tracing::debug!(target: "common.jwt", "Token rejected: empty header or payload");
        return Err(JwtValidationError::MalformedToken);
    }

    let header = decode_json_object(header_b64, "header")?;
    decode_json_object(payload_b64, "payload")?;

    URL_SAFE_NO_PAD.decode(signature_b64).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT signature base64");
        JwtValidationError::MalformedToken
    })?;

    let alg = header
        .get("alg")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| {
            tracing::debug!(target: "common.jwt", "Token rejected: header has no alg");
            JwtValidationError::MalformedToken
        })?;

    let kid = header
        .get("kid")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string);

    let typ = header
        .get("typ")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    Ok(JwtHeader { alg, kid, typ })
}

fn decode_json_object(
    segment: &str,
    part: &'static str,
) -> Result<serde_json::Map<String, Value>, JwtValidationError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
        tracing::debug!(target: "common.jwt", part, error = %e, "Failed to decode JWT base64");
        JwtValidationError::MalformedToken
    })?;

    serde_json::from_slice(&bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", part, error = %e, "Failed to parse JWT JSON object");
        JwtValidationError::MalformedToken
    })
}

/// Validate the `iat` (issued-at) claim with clock skew tolerance.
///
/// # Errors
///
/// Returns `IatTooFarInFuture` if `iat` is more than `clock_skew` ahead of now.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    validate_iat_at(iat, clock_skew, chrono::Utc::now().timestamp())
}

/// Deterministic `iat` validation against an explicit `now` timestamp.
///
/// # Errors
///
/// Returns `IatTooFarInFuture` if `iat > now + clock_skew`.
pub fn validate_iat_at(iat: i64, clock_skew: Duration, now: i64) -> Result<(), JwtValidationError> {
    // clock_skew is bounded by MAX_CLOCK_SKEW in every config path
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now.saturating_add(clock_skew_secs);

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat,
            now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
