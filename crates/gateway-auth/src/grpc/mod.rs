//! gRPC call authentication and authorization.
//!
//! [`RequestInterceptor`] holds the per-call pipeline. [`GrpcAuthLayer`]
//! runs it as tower middleware in front of tonic services.

pub mod auth_layer;
pub mod interceptor;

pub use auth_layer::{GrpcAuthLayer, GrpcAuthService};
pub use interceptor::{CallStage, RequestInterceptor};

/// Fully qualified name of the standard gRPC health-check service.
pub const GRPC_HEALTH_SERVICE: &str = "grpc.health.v1.Health";

/// A gRPC method split into service and method name.
///
/// Parsed from an HTTP/2 path such as `/product.v1.ProductService/GetProduct`.
/// A bare method name has no service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrpcMethod<'a> {
    service: Option<&'a str>,
    method: &'a str,
}

impl<'a> GrpcMethod<'a> {
    pub fn parse(path: &'a str) -> Self {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        match trimmed.rsplit_once('/') {
            Some((service, method)) => Self {
                service: Some(service),
                method,
            },
            None => Self {
                service: None,
                method: trimmed,
            },
        }
    }

    /// Fully qualified service, e.g. `product.v1.ProductService`.
    pub fn service(&self) -> Option<&'a str> {
        self.service
    }

    /// Bare method name, e.g. `GetProduct`.
    pub fn method(&self) -> &'a str {
        self.method
    }

    /// Whether this is a method of the standard `grpc.health.v1.Health` service.
    ///
    /// Other services named `Health` in their own package are protected.
    pub fn is_health(&self) -> bool {
        self.service == Some(GRPC_HEALTH_SERVICE)
    }
}
