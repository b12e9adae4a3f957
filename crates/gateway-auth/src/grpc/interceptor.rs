//! Per-call authentication and authorization pipeline.
//!
//! Each call moves through these stages, failing at most once. A rejection is
//! logged with the last stage the call entered:
//!
//! ```text
//! Unauthenticated -> TokenExtracted -> ClaimsVerified -> AuthContextAttached
//!     -> PolicyChecked -> Dispatched
//! ```
//!
//! Health-check methods dispatch immediately. Public methods dispatch with an
//! anonymous context when no credential is supplied; a supplied credential is
//! always verified.
//!
//! # Security
//!
//! - A missing credential on a protected method fails before any crypto work
//! - A bad credential fails the call even on a public method
//! - Rejections carry generic messages; the specific reason is only logged

use crate::auth::{AuthContext, TokenVerifier};
use crate::errors::{AuthError, GatewayError};
use crate::grpc::GrpcMethod;
use crate::observability::metrics;
use crate::policy::{Decision, PolicyEvaluator};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use std::future::Future;
use std::sync::Arc;
use tonic::metadata::MetadataMap;
use tonic::Status;
use tracing::instrument;

/// Last stage a call entered, for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStage {
    Unauthenticated,
    TokenExtracted,
    ClaimsVerified,
    AuthContextAttached,
    PolicyChecked,
    Dispatched,
}

impl CallStage {
    pub fn as_str(self) -> &'static str {
        match self {
            CallStage::Unauthenticated => "unauthenticated",
            CallStage::TokenExtracted => "token_extracted",
            CallStage::ClaimsVerified => "claims_verified",
            CallStage::AuthContextAttached => "auth_context_attached",
            CallStage::PolicyChecked => "policy_checked",
            CallStage::Dispatched => "dispatched",
        }
    }
}

/// A failed call and the last stage it entered.
#[derive(Debug)]
struct Rejection {
    stage: CallStage,
    error: GatewayError,
}

impl Rejection {
    fn at(stage: CallStage, error: GatewayError) -> Self {
        Self { stage, error }
    }
}

/// What the `authorization` entry held.
enum Credential<'a> {
    Missing,
    /// Present but not visible ASCII.
    Unreadable,
    Present(&'a str),
}

impl<'a> Credential<'a> {
    fn from_metadata(metadata: &'a MetadataMap) -> Self {
        match metadata.get(AUTHORIZATION.as_str()) {
            None => Credential::Missing,
            Some(value) => value
                .to_str()
                .map_or(Credential::Unreadable, Credential::Present),
        }
    }

    fn from_headers(headers: &'a HeaderMap) -> Self {
        match headers.get(AUTHORIZATION) {
            None => Credential::Missing,
            Some(value) => value
                .to_str()
                .map_or(Credential::Unreadable, Credential::Present),
        }
    }
}

/// Authenticates and authorizes calls before they reach a handler.
///
/// Cloning is cheap; clones share the verifier and policy.
#[derive(Clone)]
pub struct RequestInterceptor {
    verifier: Arc<TokenVerifier>,
    policy: Arc<PolicyEvaluator>,
}

impl RequestInterceptor {
    pub fn new(verifier: Arc<TokenVerifier>, policy: Arc<PolicyEvaluator>) -> Self {
        Self { verifier, policy }
    }

    pub fn verifier(&self) -> &Arc<TokenVerifier> {
        &self.verifier
    }

    pub fn policy(&self) -> &Arc<PolicyEvaluator> {
        &self.policy
    }

    /// Run `handler` with the caller's context if the call is permitted.
    ///
    /// `method` is a gRPC path or a bare method name. The context is moved
    /// into the handler and dropped when it returns.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` or `PermissionDenied` with a generic
    /// message, or whatever the handler returns.
    #[allow(clippy::result_large_err)]
    pub async fn intercept<F, Fut, T>(
        &self,
        method: &str,
        metadata: &MetadataMap,
        handler: F,
    ) -> Result<T, Status>
    where
        F: FnOnce(AuthContext) -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        let context = self.authorize(method, metadata).await?;
        handler(context).await
    }

    /// Decide a call from its tonic metadata.
    ///
    /// # Errors
    ///
    /// Returns the [`GatewayError`] that ends the call.
    pub async fn authorize(
        &self,
        method: &str,
        metadata: &MetadataMap,
    ) -> Result<AuthContext, GatewayError> {
        self.run(method, Credential::from_metadata(metadata)).await
    }

    /// Decide a call from raw HTTP/2 headers.
    ///
    /// # Errors
    ///
    /// Returns the [`GatewayError`] that ends the call.
    pub async fn authorize_headers(
        &self,
        method: &str,
        headers: &HeaderMap,
    ) -> Result<AuthContext, GatewayError> {
        self.run(method, Credential::from_headers(headers)).await
    }

    #[instrument(skip_all, name = "gateway.grpc.authorize", fields(method = %method))]
    async fn run(
        &self,
        method: &str,
        credential: Credential<'_>,
    ) -> Result<AuthContext, GatewayError> {
        self.decide(method, credential).await.map_err(reject)
    }

    async fn decide(
        &self,
        method: &str,
        credential: Credential<'_>,
    ) -> Result<AuthContext, Rejection> {
        let grpc_method = GrpcMethod::parse(method);
        if grpc_method.is_health() {
            tracing::trace!(target: "gateway.grpc.auth", "Health check bypasses auth");
            metrics::record_authorization_decision("health_bypass");
            return Ok(AuthContext::anonymous());
        }

        let public = self.policy.is_public(method);

        let raw = match credential {
            Credential::Missing if public => {
                metrics::record_authorization_decision("public");
                return Ok(AuthContext::anonymous());
            }
            Credential::Missing => {
                return Err(Rejection::at(
                    CallStage::Unauthenticated,
                    GatewayError::MissingCredential,
                ));
            }
            Credential::Unreadable => {
                return Err(Rejection::at(
                    CallStage::Unauthenticated,
                    GatewayError::InvalidToken(AuthError::MalformedToken),
                ));
            }
            Credential::Present(raw) => raw,
        };

        let claims = self.verifier.verify(raw).await.map_err(|e| {
            Rejection::at(CallStage::TokenExtracted, GatewayError::InvalidToken(e))
        })?;
        enter(CallStage::ClaimsVerified);

        let context = AuthContext::from_claims(&claims);
        enter(CallStage::AuthContextAttached);

        if public {
            metrics::record_authorization_decision("public");
            enter(CallStage::Dispatched);
            return Ok(context);
        }

        let decision = self.policy.authorize(method, context.roles());
        enter(CallStage::PolicyChecked);

        match decision {
            Decision::Allow => {
                tracing::debug!(
                    target: "gateway.grpc.auth",
                    method = grpc_method.method(),
                    stage = CallStage::Dispatched.as_str(),
                    "Call authorized"
                );
                metrics::record_authorization_decision("allow");
                Ok(context)
            }
            Decision::Deny { required_role } => Err(Rejection::at(
                CallStage::PolicyChecked,
                GatewayError::PermissionDenied {
                    method: grpc_method.method().to_string(),
                    role: required_role,
                },
            )),
        }
    }
}

fn enter(stage: CallStage) {
    tracing::trace!(target: "gateway.grpc.auth", stage = stage.as_str(), "Call advanced");
}

/// Log and count a rejection at its stage.
fn reject(rejection: Rejection) -> GatewayError {
    let Rejection { stage, error } = rejection;
    let reason = match &error {
        GatewayError::MissingCredential => "missing_credential",
        GatewayError::InvalidToken(e) => e.reason(),
        GatewayError::PermissionDenied { .. } => "permission_denied",
    };

    tracing::debug!(
        target: "gateway.grpc.auth",
        stage = stage.as_str(),
        reason,
        error = %error,
        "Call rejected"
    );

    metrics::record_authorization_decision(if error.is_unauthenticated() {
        "unauthenticated"
    } else {
        "deny"
    });

    error
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::jwks::{JwksDocument, KeySetCache, KeySource, StaticKeySource};
    use auth_test_utils::{
        test_issuer, RsaFixture, TestKeypair, TestTokenBuilder, TEST_CLIENT_ID,
    };
    use std::time::Duration;
    use tonic::metadata::MetadataValue;

    fn interceptor(key: &TestKeypair) -> (RequestInterceptor, Arc<StaticKeySource>) {
        let source = Arc::new(StaticKeySource::new(JwksDocument {
            keys: vec![key.jwk_json()],
        }));
        let cache = Arc::new(KeySetCache::new(
            Arc::clone(&source) as Arc<dyn KeySource>
        ));
        let verifier = Arc::new(TokenVerifier::new(
            cache,
            test_issuer(),
            TEST_CLIENT_ID,
            Duration::from_secs(300),
        ));
        let policy = Arc::new(PolicyEvaluator::default_storefront().unwrap());
        (RequestInterceptor::new(verifier, policy), source)
    }

    fn metadata_with(value: &str) -> MetadataMap {
        let mut metadata = MetadataMap::new();
        metadata.insert("authorization", value.parse().unwrap());
        metadata
    }

    fn bearer(key: &TestKeypair, groups: &[&str]) -> MetadataMap {
        let token = key.sign(&TestTokenBuilder::new().for_user("user-1").with_groups(groups).build());
        metadata_with(&format!("Bearer {token}"))
    }

    #[tokio::test]
    async fn test_public_method_without_credential() {
        let key = TestKeypair::rsa(RsaFixture::Primary, "key-1");
        let (interceptor, source) = interceptor(&key);

        let ctx = interceptor
            .authorize("GetProduct", &MetadataMap::new())
            .await
            .unwrap();

        assert!(!ctx.is_authenticated());
        assert!(ctx.roles().is_empty());
        assert_eq!(source.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_public_method_with_valid_credential_gets_context() {
        let key = TestKeypair::rsa(RsaFixture::Primary, "key-1");
        let (interceptor, _) = interceptor(&key);

        let ctx = interceptor
            .authorize("GetProduct", &bearer(&key, &["buyer"]))
            .await
            .unwrap();

        assert_eq!(ctx.user_id(), Some("user-1"));
    }

    #[tokio::test]
    async fn test_public_method_with_bad_credential_fails() {
        let key = TestKeypair::rsa(RsaFixture::Primary, "key-1");
        let (interceptor, _) = interceptor(&key);

        let err = interceptor
            .authorize("GetProduct", &metadata_with("Bearer garbage"))
            .await
            .unwrap_err();

        assert_eq!(err, GatewayError::InvalidToken(AuthError::MalformedToken));
    }

    #[tokio::test]
    async fn test_missing_credential_on_protected_method() {
        let key = TestKeypair::rsa(RsaFixture::Primary, "key-1");
        let (interceptor, source) = interceptor(&key);

        let err = interceptor
            .authorize("CreateProduct", &MetadataMap::new())
            .await
            .unwrap_err();

        assert_eq!(err, GatewayError::MissingCredential);
        assert_eq!(source.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_credential_is_malformed_not_missing() {
        let key = TestKeypair::rsa(RsaFixture::Primary, "key-1");
        let (interceptor, _) = interceptor(&key);

        let err = interceptor
            .authorize("GetProduct", &metadata_with(""))
            .await
            .unwrap_err();

        assert_eq!(err, GatewayError::InvalidToken(AuthError::MalformedToken));
    }

    #[tokio::test]
    async fn test_unreadable_credential() {
        let key = TestKeypair::rsa(RsaFixture::Primary, "key-1");
        let (interceptor, _) = interceptor(&key);
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            axum::http::HeaderValue::from_bytes(b"Bearer \xff\xfe").unwrap(),
        );

        let err = interceptor
            .authorize_headers("GetProduct", &headers)
            .await
            .unwrap_err();

        assert_eq!(err, GatewayError::InvalidToken(AuthError::MalformedToken));
    }

    #[tokio::test]
    async fn test_role_checks() {
        let key = TestKeypair::rsa(RsaFixture::Primary, "key-1");
        let (interceptor, _) = interceptor(&key);

        let err = interceptor
            .authorize("CreateProduct", &bearer(&key, &["buyer"]))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::PermissionDenied {
                method: "CreateProduct".to_string(),
                role: "seller".to_string(),
            }
        );

        let ctx = interceptor
            .authorize("/product.v1.ProductService/CreateProduct", &bearer(&key, &["seller"]))
            .await
            .unwrap();
        assert!(ctx.has_role("seller"));

        let ctx = interceptor
            .authorize("UpdateUser", &bearer(&key, &[]))
            .await
            .unwrap();
        assert!(ctx.is_authenticated());
    }

    #[tokio::test]
    async fn test_health_bypass_ignores_credential() {
        let key = TestKeypair::rsa(RsaFixture::Primary, "key-1");
        let (interceptor, source) = interceptor(&key);

        let ctx = interceptor
            .authorize("/grpc.health.v1.Health/Check", &metadata_with("Bearer garbage"))
            .await
            .unwrap();

        assert!(!ctx.is_authenticated());
        assert_eq!(source.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_intercept_hands_context_to_handler() {
        let key = TestKeypair::rsa(RsaFixture::Primary, "key-1");
        let (interceptor, _) = interceptor(&key);

        let user = interceptor
            .intercept("CreateProduct", &bearer(&key, &["seller"]), |ctx| async move {
                Ok::<_, Status>(ctx.user_id().map(ToString::to_string))
            })
            .await
            .unwrap();

        assert_eq!(user.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn test_intercept_rejection_skips_handler() {
        let key = TestKeypair::rsa(RsaFixture::Primary, "key-1");
        let (interceptor, _) = interceptor(&key);
        let mut reached = false;

        let status = interceptor
            .intercept("ApproveSeller", &bearer(&key, &["seller"]), |_ctx| {
                reached = true;
                async { Ok::<_, Status>(()) }
            })
            .await
            .unwrap_err();

        assert!(!reached);
        assert_eq!(status.code(), tonic::Code::PermissionDenied);
    }

    #[tokio::test]
    async fn test_intercept_maps_to_generic_unauthenticated() {
        let key = TestKeypair::rsa(RsaFixture::Primary, "key-1");
        let (interceptor, _) = interceptor(&key);
        let expired = key.sign(&TestTokenBuilder::new().expires_in(-60).build());
        let mut metadata = MetadataMap::new();
        metadata.insert(
            "authorization",
            MetadataValue::try_from(format!("Bearer {expired}")).unwrap(),
        );

        let status = interceptor
            .intercept("CreateProduct", &metadata, |_ctx| async { Ok::<_, Status>(()) })
            .await
            .unwrap_err();

        assert_eq!(status.code(), tonic::Code::Unauthenticated);
        assert!(!status.message().contains("expired"));
    }

    #[test]
    fn test_call_stage_labels() {
        assert_eq!(CallStage::Unauthenticated.as_str(), "unauthenticated");
        assert_eq!(CallStage::PolicyChecked.as_str(), "policy_checked");
        assert_eq!(CallStage::Dispatched.as_str(), "dispatched");
    }

    #[tokio::test]
    async fn test_rejections_report_last_stage_entered() {
        let key = TestKeypair::rsa(RsaFixture::Primary, "key-1");
        let (interceptor, _) = interceptor(&key);

        let missing = MetadataMap::new();
        let rejection = interceptor
            .decide("CreateProduct", Credential::from_metadata(&missing))
            .await
            .unwrap_err();
        assert_eq!(rejection.stage, CallStage::Unauthenticated);

        let garbage = metadata_with("Bearer garbage");
        let rejection = interceptor
            .decide("CreateProduct", Credential::from_metadata(&garbage))
            .await
            .unwrap_err();
        assert_eq!(rejection.stage, CallStage::TokenExtracted);

        let buyer = bearer(&key, &["buyer"]);
        let rejection = interceptor
            .decide("CreateProduct", Credential::from_metadata(&buyer))
            .await
            .unwrap_err();
        assert_eq!(rejection.stage, CallStage::PolicyChecked);
        assert!(matches!(rejection.error, GatewayError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn test_health_named_service_outside_grpc_health_is_protected() {
        let key = TestKeypair::rsa(RsaFixture::Primary, "key-1");
        let (interceptor, _) = interceptor(&key);

        let err = interceptor
            .authorize("/admin.v1.Health/ApproveSeller", &MetadataMap::new())
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::MissingCredential);

        let err = interceptor
            .authorize("/admin.v1.Health/ApproveSeller", &bearer(&key, &["seller"]))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::PermissionDenied { .. }));
    }
}
