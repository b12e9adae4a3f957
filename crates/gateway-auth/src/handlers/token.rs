//! Token introspection handlers.
//!
//! Both routes sit behind [`require_auth`](crate::middleware::require_auth),
//! so a handler only runs with verified claims in the request extensions.

use crate::auth::{AuthContext, TokenClaims};
use crate::models::{CurrentUserResponse, ValidateResponse, ValidatedUser};
use axum::{Extension, Json};

fn display_id(claims: &TokenClaims) -> String {
    claims.username().unwrap_or(&claims.sub).to_string()
}

/// Handler for POST /auth/validate
#[tracing::instrument(skip_all, name = "gateway.auth.validate")]
pub async fn validate_token(Extension(claims): Extension<TokenClaims>) -> Json<ValidateResponse> {
    Json(ValidateResponse {
        valid: true,
        user: ValidatedUser {
            id: display_id(&claims),
            email: claims.email.clone(),
            client_id: claims.issued_to().map(ToString::to_string),
        },
    })
}

/// Handler for GET /auth/user
#[tracing::instrument(skip_all, name = "gateway.auth.user")]
pub async fn current_user(Extension(claims): Extension<TokenClaims>) -> Json<CurrentUserResponse> {
    let context = AuthContext::from_claims(&claims);

    Json(CurrentUserResponse {
        id: display_id(&claims),
        email: claims.email.clone(),
        email_verified: claims.email_verified.unwrap_or(false),
        roles: context.roles().to_vec(),
        seller_id: context.seller_id().map(ToString::to_string),
    })
}
