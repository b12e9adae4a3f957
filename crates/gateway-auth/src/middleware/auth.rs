//! Authentication middleware for protected HTTP routes.
//!
//! Verifies the `Authorization` header with the shared [`TokenVerifier`] and
//! injects the verified [`crate::auth::TokenClaims`] into request extensions;
//! handlers read them with `Extension<TokenClaims>`.

use crate::auth::TokenVerifier;
use crate::errors::{AuthError, GatewayError};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// Raw `Authorization` value. The verifier strips the `Bearer ` prefix.
fn authorization_value(req: &Request) -> Result<&str, GatewayError> {
    let header = req.headers().get(AUTHORIZATION).ok_or_else(|| {
        tracing::debug!(target: "gateway.http", "Missing Authorization header");
        GatewayError::MissingCredential
    })?;

    header.to_str().map_err(|_| {
        tracing::debug!(target: "gateway.http", "Authorization header is not visible ASCII");
        GatewayError::InvalidToken(AuthError::MalformedToken)
    })
}

/// Authentication middleware for user tokens.
///
/// # Response
///
/// - Returns 401 Unauthorized if the token is missing or invalid
/// - Continues with `TokenClaims` in extensions if the token is valid
#[instrument(skip_all, name = "gateway.middleware.auth")]
pub async fn require_auth(
    State(verifier): State<Arc<TokenVerifier>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, GatewayError> {
    let raw = authorization_value(&req)?.to_owned();

    let claims = verifier.verify(&raw).await.map_err(|e| {
        tracing::debug!(target: "gateway.http", reason = e.reason(), "Token rejected");
        GatewayError::InvalidToken(e)
    })?;

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}
