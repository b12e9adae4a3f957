//! Builder patterns for test data construction
//!
//! Provides a fluent API for Cognito-shaped token claims.

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// Region used by test configurations.
pub const TEST_REGION: &str = "us-east-1";

/// User pool ID used by test configurations.
pub const TEST_USER_POOL_ID: &str = "us-east-1_TestPool";

/// App client ID used by test configurations.
pub const TEST_CLIENT_ID: &str = "test-client-id";

/// Issuer the gateway derives from [`TEST_REGION`] and [`TEST_USER_POOL_ID`].
pub fn test_issuer() -> String {
    format!("https://cognito-idp.{TEST_REGION}.amazonaws.com/{TEST_USER_POOL_ID}")
}

/// Builder for creating test JWT claims
///
/// Defaults to a valid access token for [`TEST_CLIENT_ID`] with no groups.
///
/// # Example
/// ```rust,ignore
/// let claims = TestTokenBuilder::new()
///     .for_user("alice")
///     .with_groups(&["seller"])
///     .expires_in(3600)
///     .build();
/// ```
pub struct TestTokenBuilder {
    claims: Map<String, Value>,
}

impl TestTokenBuilder {
    /// Create a new access-token builder with defaults
    pub fn new() -> Self {
        let now = Utc::now();
        let mut claims = Map::new();
        claims.insert("sub".to_string(), json!("test-subject"));
        claims.insert("iss".to_string(), json!(test_issuer()));
        claims.insert("token_use".to_string(), json!("access"));
        claims.insert("client_id".to_string(), json!(TEST_CLIENT_ID));
        claims.insert("username".to_string(), json!("test-subject"));
        claims.insert(
            "exp".to_string(),
            json!((now + Duration::seconds(3600)).timestamp()),
        );
        claims.insert("iat".to_string(), json!(now.timestamp()));
        Self { claims }
    }

    /// Switch to an ID token: `token_use=id`, `aud` set to the client ID.
    pub fn id_token(mut self) -> Self {
        let sub = self.claims.get("sub").cloned().unwrap_or(Value::Null);
        self.claims.remove("client_id");
        self.claims.remove("username");
        self.claims.insert("token_use".to_string(), json!("id"));
        self.claims.insert("aud".to_string(), json!(TEST_CLIENT_ID));
        self.claims.insert("cognito:username".to_string(), sub);
        self
    }

    /// Set the subject, and the username claim if the token carries one
    pub fn for_user(mut self, subject: &str) -> Self {
        self.claims.insert("sub".to_string(), json!(subject));
        for name in ["username", "cognito:username"] {
            if let Some(value) = self.claims.get_mut(name) {
                *value = json!(subject);
            }
        }
        self
    }

    /// Set `cognito:groups`
    pub fn with_groups(mut self, groups: &[&str]) -> Self {
        self.claims
            .insert("cognito:groups".to_string(), json!(groups));
        self
    }

    pub fn with_email(mut self, email: &str, verified: bool) -> Self {
        self.claims.insert("email".to_string(), json!(email));
        self.claims
            .insert("email_verified".to_string(), json!(verified));
        self
    }

    /// Set `custom:seller_id`
    pub fn with_seller_id(mut self, seller_id: &str) -> Self {
        self.claims
            .insert("custom:seller_id".to_string(), json!(seller_id));
        self
    }

    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.claims.insert("iss".to_string(), json!(issuer));
        self
    }

    /// Set `aud` to any JSON value (string or array)
    pub fn with_audience(mut self, aud: Value) -> Self {
        self.claims.insert("aud".to_string(), aud);
        self
    }

    pub fn with_token_use(mut self, token_use: &str) -> Self {
        self.claims
            .insert("token_use".to_string(), json!(token_use));
        self
    }

    /// Set expiration in seconds from now (negative for already expired)
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.claims.insert(
            "exp".to_string(),
            json!((Utc::now() + Duration::seconds(seconds)).timestamp()),
        );
        self
    }

    /// Set expiration to an absolute timestamp
    pub fn expires_at(mut self, timestamp: i64) -> Self {
        self.claims.insert("exp".to_string(), json!(timestamp));
        self
    }

    /// Set issued-at timestamp
    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.claims.insert("iat".to_string(), json!(timestamp));
        self
    }

    /// Set an arbitrary claim
    pub fn with_claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    /// Remove a claim
    pub fn without_claim(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    /// Build the claims as a JSON value
    pub fn build(self) -> Value {
        Value::Object(self.claims)
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}
