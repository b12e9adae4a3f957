//! Gateway authentication and authorization.
//!
//! Verifies identity-provider bearer tokens on inbound gRPC calls and
//! enforces a method-level role policy before the call reaches its handler.
//!
//! # Architecture
//!
//! ```text
//! grpc::GrpcAuthLayer -> grpc::RequestInterceptor -> auth::TokenVerifier -> auth::KeySetCache
//!                                                 -> policy::PolicyEvaluator
//! ```
//!
//! # Modules
//!
//! - `auth` - Key set cache, token verification, claims and per-call context
//! - `policy` - Public methods and role requirements
//! - `grpc` - Interceptor and tower layer for tonic services
//! - `config` - Service configuration from environment
//! - `errors` - Error types with gRPC and HTTP mappings
//! - `handlers`, `middleware`, `models`, `routes` - HTTP surface
//! - `observability` - Prometheus metrics

pub mod auth;
pub mod config;
pub mod errors;
pub mod grpc;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod policy;
pub mod routes;
