//! HTTP response models.

use serde::{Deserialize, Serialize};

/// Health check response.
///
/// Returned by the `/health` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "healthy" while the process serves requests.
    pub status: String,

    /// Deployment region.
    pub region: String,

    /// "populated" once a key set fetch has succeeded, "empty" before.
    pub key_set: String,
}

/// Response of `POST /auth/validate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub user: ValidatedUser,
}

/// Identity summary inside [`ValidateResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedUser {
    /// Username, or the subject when the token carries none.
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// App client the token was issued to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// Response of `GET /auth/user`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUserResponse {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    pub email_verified: bool,

    /// Groups in token order.
    pub roles: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_id: Option<String>,
}
