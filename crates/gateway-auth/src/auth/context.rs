//! Per-call identity derived from verified claims.

use crate::auth::claims::{TokenClaims, TokenUse};
use std::fmt;

/// Identity attached to a single call.
///
/// Built once per request from [`TokenClaims`] and dropped with the request.
/// Public calls made without a credential get [`AuthContext::anonymous`].
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    user_id: Option<String>,
    roles: Vec<String>,
    seller_id: Option<String>,
    email: Option<String>,
    token_use: Option<TokenUse>,
}

impl AuthContext {
    /// Context for a public call made without a credential.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Derive the context from verified claims.
    ///
    /// Roles come from `cognito:groups`. Duplicates are dropped and the first
    /// occurrence keeps its position.
    pub fn from_claims(claims: &TokenClaims) -> Self {
        let mut roles: Vec<String> = Vec::with_capacity(claims.groups.len());
        for group in &claims.groups {
            if !roles.contains(group) {
                roles.push(group.clone());
            }
        }

        Self {
            user_id: Some(claims.sub.clone()),
            roles,
            seller_id: claims.seller_id().map(ToString::to_string),
            email: claims.email.clone(),
            token_use: claims.kind(),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Roles in token order.
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn seller_id(&self) -> Option<&str> {
        self.seller_id.as_deref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn token_use(&self) -> Option<TokenUse> {
        self.token_use
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("user_id", &self.user_id.as_ref().map(|_| "[REDACTED]"))
            .field("roles", &self.roles)
            .field("seller_id", &self.seller_id)
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("token_use", &self.token_use)
            .finish()
    }
}
