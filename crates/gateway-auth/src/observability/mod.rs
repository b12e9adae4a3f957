//! Observability module for the gateway auth service.
//!
//! Provides metrics definitions and instrumentation helpers.

pub mod metrics;
