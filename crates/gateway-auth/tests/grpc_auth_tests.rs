//! gRPC auth layer integration tests.
//!
//! Runs a tonic server with the auth layer in front of the standard health
//! service. Calls to other services pass through the layer and then end as
//! `Unimplemented` in the router, so the status code shows whether the layer
//! let the call through.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use auth_test_utils::{
    test_issuer, MockJwksServer, RsaFixture, TestKeypair, TestTokenBuilder, TEST_CLIENT_ID,
};
use gateway_auth::auth::{HttpKeySource, KeySetCache, KeySource, TokenVerifier};
use gateway_auth::grpc::{GrpcAuthLayer, RequestInterceptor};
use gateway_auth::policy::PolicyEvaluator;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Server};
use tonic::{Code, Request};
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::{HealthCheckRequest, HealthCheckResponse};

struct TestGrpcGateway {
    addr: SocketAddr,
    cancel_token: CancellationToken,
    keypair: TestKeypair,
    _jwks: MockJwksServer,
}

impl TestGrpcGateway {
    async fn start() -> Self {
        let keypair = TestKeypair::rsa(RsaFixture::Primary, "key-1");
        let jwks = MockJwksServer::start(&[&keypair]).await;

        let source = HttpKeySource::new(jwks.url(), Duration::from_secs(5)).unwrap();
        let cache = Arc::new(KeySetCache::new(Arc::new(source) as Arc<dyn KeySource>));
        let verifier = Arc::new(TokenVerifier::new(
            cache,
            test_issuer(),
            TEST_CLIENT_ID,
            Duration::from_secs(300),
        ));
        let policy = Arc::new(PolicyEvaluator::default_storefront().unwrap());
        let interceptor = RequestInterceptor::new(verifier, policy);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel_token = CancellationToken::new();
        let cancel_token_clone = cancel_token.clone();

        // Convert tokio listener to tonic-compatible incoming stream
        let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);
        let (_reporter, health_service) = tonic_health::server::health_reporter();

        let server = Server::builder()
            .layer(GrpcAuthLayer::new(interceptor))
            .add_service(health_service)
            .serve_with_incoming_shutdown(incoming, async move {
                cancel_token_clone.cancelled().await;
            });

        tokio::spawn(async move {
            let _ = server.await;
        });

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(50)).await;

        Self {
            addr,
            cancel_token,
            keypair,
            _jwks: jwks,
        }
    }

    async fn channel(&self) -> Channel {
        Channel::from_shared(format!("http://{}", self.addr))
            .unwrap()
            .connect()
            .await
            .unwrap()
    }

    fn token(&self, groups: &[&str]) -> String {
        self.keypair
            .sign(&TestTokenBuilder::new().for_user("caller").with_groups(groups).build())
    }

    /// Unary call to any method path, reusing the health messages as payload.
    async fn call(&self, path: &'static str, token: Option<&str>) -> Code {
        let mut grpc = tonic::client::Grpc::new(self.channel().await);
        grpc.ready().await.unwrap();

        let mut request = Request::new(HealthCheckRequest {
            service: String::new(),
        });
        if let Some(token) = token {
            request
                .metadata_mut()
                .insert("authorization", format!("Bearer {token}").parse().unwrap());
        }

        let codec: ProstCodec<HealthCheckRequest, HealthCheckResponse> = ProstCodec::default();
        match grpc
            .unary(request, PathAndQuery::from_static(path), codec)
            .await
        {
            Ok(_) => Code::Ok,
            Err(status) => status.code(),
        }
    }
}

impl Drop for TestGrpcGateway {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[tokio::test]
async fn test_health_check_served_without_credentials() {
    let gateway = TestGrpcGateway::start().await;
    let mut client = HealthClient::new(gateway.channel().await);

    let response = client
        .check(HealthCheckRequest {
            service: String::new(),
        })
        .await
        .expect("Health check should bypass auth");

    assert_eq!(response.into_inner().status, ServingStatus::Serving as i32);
}

#[tokio::test]
async fn test_protected_method_without_credentials() {
    let gateway = TestGrpcGateway::start().await;

    let code = gateway
        .call("/product.v1.ProductService/CreateProduct", None)
        .await;

    assert_eq!(code, Code::Unauthenticated);
}

#[tokio::test]
async fn test_public_method_passes_without_credentials() {
    let gateway = TestGrpcGateway::start().await;

    let code = gateway
        .call("/product.v1.ProductService/ListProducts", None)
        .await;

    assert_eq!(code, Code::Unimplemented);
}

#[tokio::test]
async fn test_public_method_with_bad_credentials() {
    let gateway = TestGrpcGateway::start().await;

    let code = gateway
        .call("/product.v1.ProductService/GetProduct", Some("not-a-jwt"))
        .await;

    assert_eq!(code, Code::Unauthenticated);
}

#[tokio::test]
async fn test_seller_reaches_seller_method() {
    let gateway = TestGrpcGateway::start().await;
    let token = gateway.token(&["seller"]);

    let code = gateway
        .call("/product.v1.ProductService/UpdateStock", Some(&token))
        .await;

    assert_eq!(code, Code::Unimplemented);
}

#[tokio::test]
async fn test_seller_denied_admin_method() {
    let gateway = TestGrpcGateway::start().await;
    let token = gateway.token(&["seller"]);

    let code = gateway
        .call("/admin.v1.AdminService/ApproveSeller", Some(&token))
        .await;

    assert_eq!(code, Code::PermissionDenied);
}

#[tokio::test]
async fn test_buyer_denied_seller_method() {
    let gateway = TestGrpcGateway::start().await;
    let token = gateway.token(&["buyer"]);

    let code = gateway
        .call("/product.v1.ProductService/CreateProduct", Some(&token))
        .await;

    assert_eq!(code, Code::PermissionDenied);
}

#[tokio::test]
async fn test_unlisted_method_needs_only_authentication() {
    let gateway = TestGrpcGateway::start().await;
    let token = gateway.token(&[]);

    let code = gateway
        .call("/user.v1.UserService/UpdateUser", Some(&token))
        .await;
    assert_eq!(code, Code::Unimplemented);

    let code = gateway.call("/user.v1.UserService/UpdateUser", None).await;
    assert_eq!(code, Code::Unauthenticated);
}

#[tokio::test]
async fn test_expired_token_rejected() {
    let gateway = TestGrpcGateway::start().await;
    let token = gateway
        .keypair
        .sign(&TestTokenBuilder::new().with_groups(&["admin"]).expires_in(-60).build());

    let code = gateway
        .call("/admin.v1.AdminService/GetAnalytics", Some(&token))
        .await;

    assert_eq!(code, Code::Unauthenticated);
}

#[tokio::test]
async fn test_other_health_service_requires_credentials() {
    let gateway = TestGrpcGateway::start().await;

    let code = gateway.call("/admin.v1.Health/Check", None).await;

    assert_eq!(code, Code::Unauthenticated);
}
