//! Token claims structure.
//!
//! Known identity-provider claims are typed. Anything else, including
//! `custom:*` user attributes, lands in [`TokenClaims::extra`]. Subject and
//! email are redacted in Debug output to prevent exposure in logs.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Prefix the identity provider puts on custom user attributes.
pub const CUSTOM_ATTRIBUTE_PREFIX: &str = "custom:";

/// Kind of token, from the `token_use` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenUse {
    Access,
    Id,
}

impl TokenUse {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "access" => Some(TokenUse::Access),
            "id" => Some(TokenUse::Id),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TokenUse::Access => "access",
            TokenUse::Id => "id",
        }
    }
}

impl fmt::Display for TokenUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims of a verified token.
///
/// `token_use`, `iss` and `aud` default to empty when absent, null or of the
/// wrong JSON type so that the verifier can report the specific claim failure
/// instead of a parse error.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (user ID) - redacted in Debug output.
    pub sub: String,

    /// Email address - redacted in Debug output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,

    /// Raw `token_use` claim ("access" or "id" when valid).
    #[serde(default, deserialize_with = "deserialize_string_or_empty")]
    pub token_use: String,

    /// Issuer.
    #[serde(default, deserialize_with = "deserialize_string_or_empty")]
    pub iss: String,

    /// Audience. Accepts a single string or an array.
    #[serde(
        default,
        deserialize_with = "deserialize_audience",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub aud: Vec<String>,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,

    /// Group memberships, in token order.
    #[serde(rename = "cognito:groups", default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,

    /// Username on ID tokens.
    #[serde(rename = "cognito:username", default, skip_serializing_if = "Option::is_none")]
    pub cognito_username: Option<String>,

    /// Username on access tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// App client on access tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Space-separated OAuth scopes on access tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Every other claim, including custom attributes.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Custom Debug implementation that redacts `sub` and `email`.
impl fmt::Debug for TokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenClaims")
            .field("sub", &"[REDACTED]")
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("token_use", &self.token_use)
            .field("iss", &self.iss)
            .field("aud", &self.aud)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("groups", &self.groups)
            .field("client_id", &self.client_id)
            .field("scope", &self.scope)
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TokenClaims {
    /// Parsed `token_use`, `None` when it is neither "access" nor "id".
    pub fn kind(&self) -> Option<TokenUse> {
        TokenUse::parse(&self.token_use)
    }

    pub fn audience_contains(&self, client_id: &str) -> bool {
        self.aud.iter().any(|a| a == client_id)
    }

    /// Username from whichever claim the token type carries.
    pub fn username(&self) -> Option<&str> {
        self.cognito_username
            .as_deref()
            .or(self.username.as_deref())
    }

    /// Client the token was issued to: `client_id` on access tokens, `aud` on ID tokens.
    pub fn issued_to(&self) -> Option<&str> {
        self.client_id
            .as_deref()
            .or_else(|| self.aud.first().map(String::as_str))
    }

    /// String value of the `custom:<name>` attribute.
    pub fn custom_attribute(&self, name: &str) -> Option<&str> {
        self.extra
            .get(&format!("{CUSTOM_ATTRIBUTE_PREFIX}{name}"))
            .and_then(Value::as_str)
    }

    pub fn seller_id(&self) -> Option<&str> {
        self.custom_attribute("seller_id")
    }

    /// Check if the token has a specific scope.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().any(|s| s == scope)
    }

    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope.as_deref().unwrap_or_default().split_whitespace()
    }
}

fn deserialize_audience<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Other(Value),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(aud) => vec![aud],
        OneOrMany::Many(aud) => aud,
        OneOrMany::Other(_) => Vec::new(),
    })
}

/// Any non-string value, null included, reads as empty.
fn deserialize_string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(value) => value,
        _ => String::new(),
    })
}
