//! Custom error types for the scanner.
//!
//! This module defines the primary error type, `ScanError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the failure modes of a scan session, from
//! configuration problems to hardware faults.
//!
//! ## Error Hierarchy
//!
//! `ScanError` consolidates the session failure modes:
//!
//! - **`Config`**: Wraps configuration load/validation errors from the
//!   [`crate::config`] module.
//! - **`Motion`**: A stage fault or move timeout. Fatal to the session: once a
//!   move has failed, the physical position is uncertain, so nothing retries a
//!   motion error automatically.
//! - **`Acquisition`**: A DAQ driver fault or read timeout. Callers may retry
//!   a bounded number of times (the grid scanner retries a point once, the
//!   profile scanner retries a sample once) before degrading or abandoning the
//!   affected measurement.
//! - **`InsufficientData`**: The calibration fit is underdetermined (too few
//!   valid edge points). Fatal to calibration; a grid scan must not proceed
//!   without a valid centre estimate.
//! - **`SessionActive`**: A second scan session was opened while the exclusive
//!   session lock is held.
//! - **`Cancelled`**: Cancellation was observed at a poll boundary between
//!   moves or reads.
//!
//! A degraded reading is deliberately NOT an error: when reference fallback or
//! the retry budget is involved, the affected [`crate::core::Reading`] carries
//! a `degraded` flag instead.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Failure modes of a scan session.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Motion error: {0}")]
    Motion(String),

    #[error("Acquisition error: {0}")]
    Acquisition(String),

    #[error("Insufficient data for calibration: {0}")]
    InsufficientData(String),

    #[error("Another scan session is already active")]
    SessionActive,

    #[error("Operation cancelled")]
    Cancelled,
}

impl ScanError {
    /// Shorthand for a motion fault with a formatted message.
    pub fn motion(msg: impl Into<String>) -> Self {
        ScanError::Motion(msg.into())
    }

    /// Shorthand for an acquisition fault with a formatted message.
    pub fn acquisition(msg: impl Into<String>) -> Self {
        ScanError::Acquisition(msg.into())
    }
}
