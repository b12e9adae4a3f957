//! Gateway auth error types.
//!
//! Two layers:
//! - [`AuthError`] is the specific reason a token could not be verified. It is
//!   for logs and metrics only.
//! - [`GatewayError`] is what a call boundary reports. Client-facing messages
//!   are intentionally generic; which check failed never leaves the process.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::jwt::JwtValidationError;
use serde::Serialize;
use thiserror::Error;

/// Generic message for every unauthenticated outcome.
pub const UNAUTHENTICATED_MESSAGE: &str = "Invalid or missing authentication";

/// Generic message for every policy denial.
pub const PERMISSION_DENIED_MESSAGE: &str = "Insufficient permissions";

const WWW_AUTHENTICATE_REALM: &str = "Bearer realm=\"storefront-gateway\"";
const WWW_AUTHENTICATE_INVALID: &str =
    "Bearer realm=\"storefront-gateway\", error=\"invalid_token\"";

/// Why token verification failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Token is malformed")]
    MalformedToken,

    #[error("Token header has no key id")]
    MissingKeyId,

    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Signing key not found: {0}")]
    KeyNotFound(String),

    #[error("Key set unavailable: {0}")]
    KeySetUnavailable(String),

    #[error("Token signature is invalid")]
    InvalidSignature,

    #[error("Token use is not access or id")]
    InvalidTokenUse,

    #[error("Token issuer does not match")]
    InvalidIssuer,

    #[error("Token audience does not include this client")]
    InvalidAudience,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token issued in the future")]
    IssuedInFuture,
}

impl AuthError {
    /// Stable, bounded label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MalformedToken => "malformed_token",
            AuthError::MissingKeyId => "missing_kid",
            AuthError::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            AuthError::KeyNotFound(_) => "key_not_found",
            AuthError::KeySetUnavailable(_) => "key_set_unavailable",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::InvalidTokenUse => "invalid_token_use",
            AuthError::InvalidIssuer => "invalid_issuer",
            AuthError::InvalidAudience => "invalid_audience",
            AuthError::TokenExpired => "token_expired",
            AuthError::IssuedInFuture => "issued_in_future",
        }
    }
}

impl From<JwtValidationError> for AuthError {
    fn from(err: JwtValidationError) -> Self {
        match err {
            JwtValidationError::TokenTooLarge | JwtValidationError::MalformedToken => {
                AuthError::MalformedToken
            }
            JwtValidationError::MissingKid => AuthError::MissingKeyId,
            JwtValidationError::IatTooFarInFuture => AuthError::IssuedInFuture,
        }
    }
}

/// Outcome of a rejected call.
///
/// Maps to:
/// - MissingCredential, InvalidToken: 401 / `Unauthenticated`
/// - PermissionDenied: 403 / `PermissionDenied`
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Missing credential")]
    MissingCredential,

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] AuthError),

    #[error("Permission denied: {method} requires role '{role}'")]
    PermissionDenied { method: String, role: String },
}

impl GatewayError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MissingCredential | GatewayError::InvalidToken(_) => {
                StatusCode::UNAUTHORIZED
            }
            GatewayError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
        }
    }

    pub fn is_unauthenticated(&self) -> bool {
        self.status_code() == StatusCode::UNAUTHORIZED
    }
}

impl From<GatewayError> for tonic::Status {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::MissingCredential | GatewayError::InvalidToken(_) => {
                tonic::Status::unauthenticated(UNAUTHENTICATED_MESSAGE)
            }
            GatewayError::PermissionDenied { .. } => {
                tonic::Status::permission_denied(PERMISSION_DENIED_MESSAGE)
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: &'static str,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (code, message, challenge) = match &self {
            GatewayError::MissingCredential => (
                "UNAUTHENTICATED",
                UNAUTHENTICATED_MESSAGE,
                Some(WWW_AUTHENTICATE_REALM),
            ),
            GatewayError::InvalidToken(_) => (
                "INVALID_TOKEN",
                UNAUTHENTICATED_MESSAGE,
                Some(WWW_AUTHENTICATE_INVALID),
            ),
            GatewayError::PermissionDenied { .. } => {
                ("FORBIDDEN", PERMISSION_DENIED_MESSAGE, None)
            }
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                error: ErrorDetail { code, message },
            }),
        )
            .into_response();

        if let Some(challenge) = challenge {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(challenge),
            );
        }

        response
    }
}
