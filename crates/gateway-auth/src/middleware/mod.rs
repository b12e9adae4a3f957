//! HTTP middleware for the gateway.
//!
//! # Components
//!
//! - `auth` - Bearer token verification for protected routes
//! - `http_metrics` - HTTP request metrics for every response

pub mod auth;
pub mod http_metrics;

pub use auth::require_auth;
pub use http_metrics::http_metrics_middleware;
