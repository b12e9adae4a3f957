//! Tower layer that runs the [`RequestInterceptor`] in front of tonic services.
//!
//! The method comes from the HTTP/2 request path and the credential from the
//! `authorization` header. On success the caller's [`AuthContext`] is inserted
//! into the request extensions, where tonic handlers read it with
//! `request.extensions().get::<AuthContext>()`. It is dropped with the request.
//!
//! [`AuthContext`]: crate::auth::AuthContext

use crate::grpc::RequestInterceptor;
use axum::http;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tonic::body::BoxBody;
use tonic::Status;
use tower::{Layer, Service};

/// Tower layer for gRPC authentication and authorization.
#[derive(Clone)]
pub struct GrpcAuthLayer {
    interceptor: RequestInterceptor,
}

impl GrpcAuthLayer {
    pub fn new(interceptor: RequestInterceptor) -> Self {
        Self { interceptor }
    }
}

impl<S> Layer<S> for GrpcAuthLayer {
    type Service = GrpcAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GrpcAuthService {
            inner,
            interceptor: self.interceptor.clone(),
        }
    }
}

/// Tower service produced by [`GrpcAuthLayer`].
#[derive(Clone)]
pub struct GrpcAuthService<S> {
    inner: S,
    interceptor: RequestInterceptor,
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for GrpcAuthService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<BoxBody>>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        // Take the service that was driven to readiness
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let interceptor = self.interceptor.clone();

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();
            let decision = interceptor
                .authorize_headers(parts.uri.path(), &parts.headers)
                .await;

            match decision {
                Ok(context) => {
                    parts.extensions.insert(context);
                    inner.call(http::Request::from_parts(parts, body)).await
                }
                Err(e) => Ok(Status::from(e).into_http()),
            }
        })
    }
}
