//! Common utilities shared across the storefront gateway crates.

#![warn(clippy::pedantic)]

/// Module for common configuration
pub mod config;

/// Module for JWT utilities (structure parsing, size limits, clock skew)
pub mod jwt;
