// ============================================
// File: crates/devbroker-common/src/error.rs
// ============================================
//! # Common Error Types
//!
//! ## Creation Reason
//! Errors raised by the shared value types when text from the wire or
//! the config does not describe a valid value.
//!
//! ## Main Functionality
//! - `CommonError`: Parse and validation failures of shared types
//! - `Result<T>`: Type alias using `CommonError`
//!
//! ## ⚠️ Important Note for Next Developer
//! - Never put passwords or session tokens in error messages; report the
//!   field name and what is wrong with it
//! - Higher crates wrap `CommonError` in their own enums via `#[from]`
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::fmt;
use thiserror::Error;

/// Common result type.
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors produced by the shared types.
///
/// # Example
/// ```
/// use devbroker_common::error::CommonError;
/// use devbroker_common::types::ReservationId;
///
/// let err = "seven".parse::<ReservationId>().unwrap_err();
/// assert!(matches!(err, CommonError::InvalidInput { field: "reservation_id", .. }));
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// Text that does not parse as the expected value.
    #[error("Invalid input for '{field}': {reason}")]
    InvalidInput {
        /// Name of the value being parsed
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// Decoded bytes of the wrong size.
    #[error("Invalid length for '{field}': expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Name of the value being decoded
        field: &'static str,
        /// Expected byte count
        expected: usize,
        /// Actual byte count
        actual: usize,
    },
}

impl CommonError {
    /// Creates an `InvalidInput` error.
    pub fn invalid_input(field: &'static str, reason: impl fmt::Display) -> Self {
        Self::InvalidInput {
            field,
            reason: reason.to_string(),
        }
    }

    /// Returns the name of the offending value.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::InvalidInput { field, .. } | Self::InvalidLength { field, .. } => field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CommonError::invalid_input("timestamp", "invalid digit found in string");
        assert_eq!(
            err.to_string(),
            "Invalid input for 'timestamp': invalid digit found in string"
        );

        let err = CommonError::InvalidLength {
            field: "session_token",
            expected: 16,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "Invalid length for 'session_token': expected 16 bytes, got 2"
        );
        assert_eq!(err.field(), "session_token");
    }
}
