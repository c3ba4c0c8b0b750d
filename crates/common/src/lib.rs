//! Common utilities and types shared across backplane components.

#![warn(clippy::pedantic)]

/// Module for routing identity types (servers, entities)
pub mod types;

/// Module for common configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;
