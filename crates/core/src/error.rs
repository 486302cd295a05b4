//! Error types shared across the workspace.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Malformed or missing market data for a required timestamp.
///
/// Recovered locally: the pipeline logs and skips the affected timestamp.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DataError {
    #[error("no {series} sample at {timestamp}")]
    MissingSample {
        series: &'static str,
        timestamp: DateTime<Utc>,
    },

    #[error("{series} has {available} samples before {timestamp}, window needs {required}")]
    InsufficientHistory {
        series: &'static str,
        timestamp: DateTime<Utc>,
        available: usize,
        required: usize,
    },

    #[error("{series} base value is zero at {timestamp}")]
    ZeroBase {
        series: &'static str,
        timestamp: DateTime<Utc>,
    },

    #[error("{series} value {value} is negative at {timestamp}")]
    NegativeValue {
        series: &'static str,
        timestamp: DateTime<Utc>,
        value: Decimal,
    },

    #[error("malformed {series} row {row}: {reason}")]
    Malformed {
        series: &'static str,
        row: usize,
        reason: String,
    },
}

/// Invalid configuration value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("{field} must not be negative, got {value}")]
    Negative { field: &'static str, value: Decimal },

    #[error("{field} must be at most {max}, got {value}")]
    TooLarge {
        field: &'static str,
        value: Decimal,
        max: Decimal,
    },

    #[error("{field} must be a whole number, got {value}")]
    NotWhole { field: &'static str, value: Decimal },

    #[error("strikes.near_offset_steps ({near}) must be less than strikes.far_offset_steps ({far})")]
    OffsetOrder { near: u32, far: u32 },

    #[error("execution.backoff.max_delay_ms ({max}) must be >= base_delay_ms ({base})")]
    BackoffOrder { base: u64, max: u64 },

    #[error("{field} is required for live execution")]
    MissingForLive { field: &'static str },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },
}
