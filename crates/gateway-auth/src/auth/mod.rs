//! Authentication for the gateway.
//!
//! Tokens are verified against the identity provider's published key set.
//!
//! # Components
//!
//! - `jwks` - Key sources and the key set cache
//! - `jwt` - Token verification pipeline
//! - `claims` - Claims of a verified token
//! - `context` - Per-call identity handed to downstream handlers

pub mod claims;
pub mod context;
pub mod jwks;
pub mod jwt;

pub use claims::{TokenClaims, TokenUse};
pub use context::AuthContext;
pub use jwks::{FetchError, HttpKeySource, KeySetCache, KeySource, SigningKey, StaticKeySource};
pub use jwt::TokenVerifier;
