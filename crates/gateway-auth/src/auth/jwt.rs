//! Token verification against the identity provider's key set.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - The header algorithm is checked against an asymmetric allowlist BEFORE
//!   key lookup; `none` and `HS*` never reach signature verification
//! - The resolved key must admit the header algorithm
//! - Claims are bound to this deployment (issuer, and client for ID tokens)
//! - Failures carry a specific [`AuthError`] for logs; call boundaries map
//!   every one of them to a generic unauthenticated response

use crate::auth::claims::{TokenClaims, TokenUse};
use crate::auth::jwks::{parse_asymmetric_algorithm, KeySetCache};
use crate::config::Config;
use crate::errors::AuthError;
use crate::observability::metrics;
use common::jwt::{parse_header, strip_bearer, validate_iat_at};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Validation};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Verifies bearer tokens and returns their claims.
///
/// Cheap to share: hold it in an `Arc` and clone the `Arc` per task.
pub struct TokenVerifier {
    keys: Arc<KeySetCache>,
    issuer: String,
    client_id: String,
    clock_skew: Duration,
}

impl TokenVerifier {
    /// Create a verifier bound to one issuer and app client.
    ///
    /// # Arguments
    ///
    /// * `keys` - Key set cache to resolve `kid`s against
    /// * `issuer` - Exact expected `iss`
    /// * `client_id` - Client that ID tokens must be issued to
    /// * `clock_skew` - Tolerance for `iat` in the future
    pub fn new(
        keys: Arc<KeySetCache>,
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        clock_skew: Duration,
    ) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            client_id: client_id.into(),
            clock_skew,
        }
    }

    pub fn from_config(config: &Config, keys: Arc<KeySetCache>) -> Self {
        Self::new(
            keys,
            config.issuer(),
            config.client_id.clone(),
            config.jwt_clock_skew(),
        )
    }

    pub fn key_cache(&self) -> &Arc<KeySetCache> {
        &self.keys
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Verify a token against the current time.
    ///
    /// `raw` may carry a `Bearer ` prefix.
    ///
    /// # Errors
    ///
    /// Returns the first [`AuthError`] hit by the verification pipeline.
    pub async fn verify(&self, raw: &str) -> Result<TokenClaims, AuthError> {
        self.verify_at(raw, chrono::Utc::now().timestamp()).await
    }

    /// Verify a token against an explicit `now` (Unix seconds).
    ///
    /// # Errors
    ///
    /// Returns the first [`AuthError`] hit by the verification pipeline.
    #[instrument(skip_all, name = "gateway.auth.jwt.verify")]
    pub async fn verify_at(&self, raw: &str, now: i64) -> Result<TokenClaims, AuthError> {
        let start = Instant::now();
        let result = self.run_pipeline(strip_bearer(raw), now).await;
        let duration = start.elapsed();

        match &result {
            Ok(claims) => {
                tracing::debug!(
                    target: "gateway.auth.jwt",
                    token_use = %claims.token_use,
                    "Token verified"
                );
                metrics::record_token_verification("success", "none", duration);
            }
            Err(e) => {
                tracing::debug!(
                    target: "gateway.auth.jwt",
                    reason = e.reason(),
                    error = %e,
                    "Token rejected"
                );
                metrics::record_token_verification("failure", e.reason(), duration);
            }
        }

        result
    }

    async fn run_pipeline(&self, token: &str, now: i64) -> Result<TokenClaims, AuthError> {
        let header = parse_header(token)?;
        let kid = header.kid()?;

        let alg = parse_asymmetric_algorithm(&header.alg)
            .ok_or_else(|| AuthError::UnsupportedAlgorithm(header.alg.clone()))?;

        let key = self.keys.get(kid).await?;
        if !key.supports(alg) {
            tracing::warn!(
                target: "gateway.auth.jwt",
                kid = %kid,
                header_alg = %header.alg,
                key_alg = ?key.alg(),
                "Token algorithm does not match signing key"
            );
            return Err(AuthError::UnsupportedAlgorithm(header.alg));
        }

        // Signature only; claim checks below run in a fixed order
        let mut validation = Validation::new(alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();
        validation.leeway = 0;

        let claims = decode::<TokenClaims>(token, key.decoding_key(), &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidEcdsaKey
                | ErrorKind::InvalidRsaKey(_)
                | ErrorKind::InvalidKeyFormat
                | ErrorKind::Crypto(_) => AuthError::InvalidSignature,
                ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidAlgorithmName
                | ErrorKind::MissingAlgorithm => {
                    AuthError::UnsupportedAlgorithm(header.alg.clone())
                }
                _ => {
                    tracing::debug!(target: "gateway.auth.jwt", error = %e, "Token payload rejected");
                    AuthError::MalformedToken
                }
            })?
            .claims;

        self.check_claims(&claims, now)?;
        Ok(claims)
    }

    fn check_claims(&self, claims: &TokenClaims, now: i64) -> Result<(), AuthError> {
        let token_use = claims.kind().ok_or(AuthError::InvalidTokenUse)?;

        if claims.iss != self.issuer {
            return Err(AuthError::InvalidIssuer);
        }

        if token_use == TokenUse::Id && !claims.audience_contains(&self.client_id) {
            return Err(AuthError::InvalidAudience);
        }

        if claims.exp <= now {
            return Err(AuthError::TokenExpired);
        }

        validate_iat_at(claims.iat, self.clock_skew, now)?;

        Ok(())
    }
}
