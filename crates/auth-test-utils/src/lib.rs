//! # Auth Test Utilities
//!
//! Shared test utilities for the gateway auth crates.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (fixed RSA, P-256 and Ed25519 keys)
//! - Test data builders (TestTokenBuilder for Cognito-shaped claims)
//! - A mock JWKS endpoint (MockJwksServer) with key rotation helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use auth_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let key = TestKeypair::rsa(RsaFixture::Primary, "key-1");
//!     let jwks = MockJwksServer::start(&[&key]).await;
//!
//!     let token = key.sign(
//!         &TestTokenBuilder::new()
//!             .for_user("alice")
//!             .with_groups(&["seller"])
//!             .build(),
//!     );
//! }
//! ```

pub mod crypto_fixtures;
pub mod jwks_server;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use jwks_server::*;
pub use token_builders::*;
