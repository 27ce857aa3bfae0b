//! ==============================================================================
//! error.rs - typed errors
//! ==============================================================================
//!
//! purpose:
//!     errors for the places where callers need to tell failures apart.
//!     everything else (startup, hardware, sinks) goes through `anyhow`.
//!
//! relationships:
//!     - used by: config.rs (validation), controller.rs and web.rs (commands)
//!
//! ==============================================================================

use thiserror::Error;

/// Rejected configuration values.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be positive (got {value})")]
    NotPositive { field: &'static str, value: f64 },
    #[error("{field} is too large for a duration (got {value})")]
    TooLarge { field: &'static str, value: f64 },
    #[error("{field} must not be negative (got {value})")]
    Negative { field: &'static str, value: f64 },
    #[error("exactly 3 sensor aliases are required (got {0})")]
    AliasCount(usize),
    #[error("sensors.read_retries must be at least 1")]
    ZeroRetries,
    #[error("telemetry.channel_capacity must be at least 1")]
    ZeroCapacity,
    #[error("gpio pin {0} is assigned more than once")]
    DuplicatePin(u8),
}

/// Rejected actuator commands from the dashboard.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("action must be on/off")]
    InvalidAction,
    #[error("relay V is not configured")]
    RelayUnavailable,
}
