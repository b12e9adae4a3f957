//! Mock JWKS endpoint for integration tests
//!
//! Wraps a wiremock [`MockServer`] serving a key set document at
//! [`JWKS_PATH`]. Keys can be swapped at runtime to simulate rotation.

use crate::crypto_fixtures::TestKeypair;
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the mock serves the key set at.
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// Build a JWKS document from keypairs.
pub fn jwks_document(keys: &[&TestKeypair]) -> Value {
    json!({ "keys": keys.iter().map(|k| k.jwk_json()).collect::<Vec<_>>() })
}

/// Mock identity provider JWKS endpoint.
///
/// # Example
/// ```rust,ignore
/// let key = TestKeypair::rsa(RsaFixture::Primary, "key-1");
/// let jwks = MockJwksServer::start(&[&key]).await;
/// let source = HttpKeySource::new(jwks.url(), Duration::from_secs(5))?;
/// ```
pub struct MockJwksServer {
    server: MockServer,
}

impl MockJwksServer {
    /// Start a server publishing `keys`.
    pub async fn start(keys: &[&TestKeypair]) -> Self {
        let server = MockServer::start().await;
        let this = Self { server };
        this.publish(keys).await;
        this
    }

    /// Start a server with no routes mounted.
    pub async fn start_empty() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Full URL of the JWKS document.
    pub fn url(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    /// Underlying wiremock server, for custom mocks and request inspection.
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Replace whatever is mounted with a document publishing `keys`.
    pub async fn publish(&self, keys: &[&TestKeypair]) {
        self.publish_document(jwks_document(keys)).await;
    }

    /// Replace whatever is mounted with an arbitrary JSON body.
    pub async fn publish_document(&self, document: Value) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(document))
            .mount(&self.server)
            .await;
    }

    /// Publish `keys` and expect exactly `times` fetches before the mock is dropped
    /// or verified.
    pub async fn publish_expecting(&self, keys: &[&TestKeypair], times: u64) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_document(keys)))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Publish `keys` with a response delay.
    pub async fn publish_delayed(&self, keys: &[&TestKeypair], delay: Duration) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(jwks_document(keys))
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }

    /// Respond to every fetch with `status`.
    pub async fn fail_with(&self, status: u16) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Number of JWKS fetches received since the last publish.
    pub async fn fetch_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| {
                requests
                    .iter()
                    .filter(|r| r.url.path() == JWKS_PATH)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Check `expect(..)` counts now instead of at drop.
    pub async fn verify(&self) {
        self.server.verify().await;
    }
}
