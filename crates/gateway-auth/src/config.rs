//! Gateway auth configuration.
//!
//! Configuration is loaded from environment variables once at startup.
//! There is no runtime reconfiguration path.

use common::config::LogFormat;
use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default gRPC bind address.
pub const DEFAULT_GRPC_BIND_ADDRESS: &str = "0.0.0.0:50051";

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default JWKS fetch timeout in seconds.
pub const DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS: u64 = 10;

/// Maximum JWKS fetch timeout in seconds.
pub const MAX_JWKS_FETCH_TIMEOUT_SECONDS: u64 = 60;

/// Maximum graceful shutdown drain in seconds.
pub const MAX_DRAIN_SECONDS: u64 = 300;

/// Gateway auth configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Identity provider user pool ID (e.g. "us-east-1_AbCdEf123").
    pub user_pool_id: String,

    /// App client ID. Required audience of `id` tokens.
    pub client_id: String,

    /// Deployment region (default: "us-east-1").
    pub region: String,

    /// Issuer host (default: "cognito-idp.<region>.amazonaws.com").
    pub issuer_host: String,

    /// JWKS endpoint URL, derived from issuer host and pool unless overridden.
    pub jwks_url: String,

    /// Hard timeout for one JWKS fetch, in seconds.
    pub jwks_fetch_timeout_seconds: u64,

    /// Tolerance for `iat` in the future, in seconds.
    pub jwt_clock_skew_seconds: u64,

    /// HTTP bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// gRPC bind address (default: "0.0.0.0:50051").
    pub grpc_bind_address: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Seconds to keep serving after a shutdown signal (default: 0).
    pub drain_seconds: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid JWKS fetch timeout configuration: {0}")]
    InvalidJwksFetchTimeout(String),

    #[error("Invalid drain configuration: {0}")]
    InvalidDrainSeconds(String),

    #[error("Invalid log format: {0}")]
    InvalidLogFormat(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let user_pool_id = required(vars, "COGNITO_USER_POOL_ID")?;
        let client_id = required(vars, "COGNITO_CLIENT_ID")?;

        let region = optional(vars, "AWS_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string());

        let issuer_host = optional(vars, "COGNITO_ISSUER_HOST")
            .unwrap_or_else(|| format!("cognito-idp.{region}.amazonaws.com"));

        let jwks_url = optional(vars, "JWKS_URL").unwrap_or_else(|| {
            format!("https://{issuer_host}/{user_pool_id}/.well-known/jwks.json")
        });

        let jwks_fetch_timeout_seconds = bounded_seconds(
            vars,
            "JWKS_FETCH_TIMEOUT_SECONDS",
            DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS,
            1..=MAX_JWKS_FETCH_TIMEOUT_SECONDS,
            ConfigError::InvalidJwksFetchTimeout,
        )?;

        let jwt_clock_skew_seconds = bounded_seconds(
            vars,
            "JWT_CLOCK_SKEW_SECONDS",
            DEFAULT_CLOCK_SKEW.as_secs(),
            1..=MAX_CLOCK_SKEW.as_secs(),
            ConfigError::InvalidJwtClockSkew,
        )?;

        let drain_seconds = bounded_seconds(
            vars,
            "DRAIN_SECONDS",
            0,
            0..=MAX_DRAIN_SECONDS,
            ConfigError::InvalidDrainSeconds,
        )?;

        let bind_address =
            optional(vars, "BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let grpc_bind_address = optional(vars, "GRPC_BIND_ADDRESS")
            .unwrap_or_else(|| DEFAULT_GRPC_BIND_ADDRESS.to_string());

        let log_format = match optional(vars, "LOG_FORMAT") {
            Some(value) => value.parse().map_err(ConfigError::InvalidLogFormat)?,
            None => LogFormat::default(),
        };

        Ok(Config {
            user_pool_id,
            client_id,
            region,
            issuer_host,
            jwks_url,
            jwks_fetch_timeout_seconds,
            jwt_clock_skew_seconds,
            bind_address,
            grpc_bind_address,
            log_format,
            drain_seconds,
        })
    }

    /// Expected `iss` claim: `https://<issuer-host>/<pool-id>`.
    pub fn issuer(&self) -> String {
        format!("https://{}/{}", self.issuer_host, self.user_pool_id)
    }

    pub fn jwks_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.jwks_fetch_timeout_seconds)
    }

    pub fn jwt_clock_skew(&self) -> Duration {
        Duration::from_secs(self.jwt_clock_skew_seconds)
    }

    pub fn drain_period(&self) -> Duration {
        Duration::from_secs(self.drain_seconds)
    }
}

/// Blank values count as unset.
fn optional(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    optional(vars, name).ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn bounded_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
    range: std::ops::RangeInclusive<u64>,
    err: fn(String) -> ConfigError,
) -> Result<u64, ConfigError> {
    let Some(value_str) = optional(vars, name) else {
        return Ok(default);
    };

    let value: u64 = value_str.parse().map_err(|e| {
        err(format!(
            "{name} must be a valid non-negative integer, got '{value_str}': {e}"
        ))
    })?;

    if !range.contains(&value) {
        return Err(err(format!(
            "{name} must be between {} and {} seconds, got {value}",
            range.start(),
            range.end()
        )));
    }

    Ok(value)
}
