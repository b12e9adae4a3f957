//! Metrics definitions for the gateway auth service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `gateway_auth_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `outcome`: 2 values (success, failure)
//! - `reason`: bounded by `AuthError::reason()` plus "none"
//! - `status`: 2 values (success, error)
//! - `error_type`: bounded by `FetchError::error_type()`
//! - `decision`: 5 values (allow, deny, public, health_bypass, unauthenticated)
//! - `endpoint`: known routes plus "/other"

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the global Prometheus recorder with the service's bucket layout.
///
/// Can only succeed once per process.
///
/// # Errors
///
/// Returns an error string if buckets are rejected or a recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Verification is CPU-bound on a hit and network-bound on a miss
        .set_buckets_for_metric(
            Matcher::Prefix("gateway_auth_token_verification".to_string()),
            &[
                0.0005, 0.001, 0.002, 0.005, 0.010, 0.025, 0.050, 0.100, 0.500, 1.000, 5.000,
                10.000,
            ],
        )
        .map_err(|e| format!("Failed to set token verification buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("gateway_auth_jwks_refresh".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set JWKS refresh buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("gateway_auth_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Token Verification Metrics
// ============================================================================

/// Record one token verification
///
/// Metric: `gateway_auth_token_verifications_total`, `gateway_auth_token_verification_duration_seconds`
/// Labels: `outcome`, `reason`
pub fn record_token_verification(outcome: &'static str, reason: &'static str, duration: Duration) {
    histogram!("gateway_auth_token_verification_duration_seconds",
        "outcome" => outcome
    )
    .record(duration.as_secs_f64());

    counter!("gateway_auth_token_verifications_total",
        "outcome" => outcome,
        "reason" => reason
    )
    .increment(1);
}

// ============================================================================
// Key Set Metrics
// ============================================================================

/// Record a key set refresh attempt
///
/// Metric: `gateway_auth_jwks_refresh_total`, `gateway_auth_jwks_refresh_duration_seconds`
/// Labels: `status`
pub fn record_jwks_refresh(status: &'static str, duration: Duration) {
    histogram!("gateway_auth_jwks_refresh_duration_seconds").record(duration.as_secs_f64());

    counter!("gateway_auth_jwks_refresh_total",
        "status" => status
    )
    .increment(1);
}

/// Record a key set refresh failure by error type
///
/// Metric: `gateway_auth_jwks_refresh_failures_total`
/// Labels: `error_type`
pub fn record_jwks_refresh_failure(error_type: &'static str) {
    counter!("gateway_auth_jwks_refresh_failures_total",
        "error_type" => error_type
    )
    .increment(1);
}

/// Set the number of keys in the current snapshot
///
/// Metric: `gateway_auth_jwks_keys`
#[allow(clippy::cast_precision_loss)]
pub fn set_jwks_key_count(count: usize) {
    gauge!("gateway_auth_jwks_keys").set(count as f64);
}

// ============================================================================
// Authorization Metrics
// ============================================================================

/// Record the interceptor's final decision for a call
///
/// Metric: `gateway_auth_authorization_decisions_total`
/// Labels: `decision`
pub fn record_authorization_decision(decision: &'static str) {
    counter!("gateway_auth_authorization_decisions_total",
        "decision" => decision
    )
    .increment(1);
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `gateway_auth_http_requests_total`, `gateway_auth_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("gateway_auth_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("gateway_auth_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Unknown paths collapse to "/other".
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/health" => "/health",
        "/metrics" => "/metrics",
        "/auth/validate" => "/auth/validate",
        "/auth/user" => "/auth/user",
        _ => "/other",
    }
}
