// ============================================
// File: crates/devbroker-core/src/error.rs
// ============================================
//! # Core Error Types
//!
//! ## Creation Reason
//! Defines the errors raised while framing and parsing protocol messages.
//!
//! ## Main Functionality
//! - `CoreError`: Primary error enum for codec operations
//! - Classification helpers used by the connection loop to decide whether
//!   a peer must be disconnected
//!
//! ## Error Categories
//! 1. **Framing Errors**: Oversized fields, truncated frames
//! 2. **Content Errors**: Unknown message types, invalid UTF-8, missing args
//! 3. **I/O Errors**: Surfaced through the `tokio_util` codec adapter
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER include message payloads in error text; Login carries passwords
//! - Every framing error is connection-fatal, see `is_protocol_violation`
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use devbroker_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================
// CoreError
// ============================================

/// Core error types for protocol operations.
#[derive(Error, Debug)]
pub enum CoreError {
    // ========================================
    // Framing Errors
    // ========================================

    /// Unknown or unsupported message type.
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u32),

    /// A declared length exceeds the maximum for its field.
    #[error("Field '{field}' too large: max {max}, got {actual}")]
    FieldTooLarge {
        /// Which field overflowed (`arg`, `data`, `argCount`)
        field: &'static str,
        /// Maximum allowed
        max: usize,
        /// Declared value
        actual: usize,
    },

    /// Message is too short to be valid.
    #[error("Message too short: expected at least {expected} bytes, got {actual}")]
    MessageTooShort {
        /// Minimum expected length
        expected: usize,
        /// Actual length received
        actual: usize,
    },

    /// Message is malformed.
    #[error("Malformed message: {reason}")]
    MalformedMessage {
        /// What's wrong with the message
        reason: String,
    },

    // ========================================
    // Content Errors
    // ========================================

    /// A required argument is missing.
    #[error("Missing argument {index} for {msg_type}")]
    MissingArgument {
        /// Message type name
        msg_type: &'static str,
        /// Zero-based position of the argument
        index: usize,
    },

    /// An argument failed to parse.
    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument {
        /// Argument name
        name: &'static str,
        /// Why it is invalid
        reason: String,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Stream I/O error surfaced through the framed codec.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl CoreError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `MalformedMessage` error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    /// Creates a `MessageTooShort` error.
    pub const fn too_short(expected: usize, actual: usize) -> Self {
        Self::MessageTooShort { expected, actual }
    }

    /// Creates a `FieldTooLarge` error.
    pub const fn too_large(field: &'static str, max: usize, actual: usize) -> Self {
        Self::FieldTooLarge { field, max, actual }
    }

    /// Creates an `InvalidArgument` error.
    pub fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if the peer sent bytes that cannot be framed.
    ///
    /// The connection must be closed; the stream is out of sync.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::UnknownMessageType(_)
                | Self::FieldTooLarge { .. }
                | Self::MessageTooShort { .. }
                | Self::MalformedMessage { .. }
        )
    }

    /// Returns `true` if the frame was fine but its arguments were not.
    ///
    /// These are answered with an `Error` message; the connection stays up.
    #[must_use]
    pub const fn is_request_error(&self) -> bool {
        matches!(
            self,
            Self::MissingArgument { .. } | Self::InvalidArgument { .. }
        )
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::too_large("data", 1024, 4096);
        assert_eq!(err.to_string(), "Field 'data' too large: max 1024, got 4096");

        let err = CoreError::too_short(8, 3);
        assert!(err.to_string().contains('8'));
    }

    #[test]
    fn test_error_classification() {
        assert!(CoreError::UnknownMessageType(99).is_protocol_violation());
        assert!(CoreError::too_large("arg", 256, 257).is_protocol_violation());
        assert!(CoreError::malformed("bad utf-8").is_protocol_violation());

        let missing = CoreError::MissingArgument {
            msg_type: "Reserve",
            index: 2,
        };
        assert!(missing.is_request_error());
        assert!(!missing.is_protocol_violation());
    }

    #[test]
    fn test_wrapped_conversions() {
        let common = CommonError::invalid_input("field", "bad value");
        let core: CoreError = common.into();
        assert!(matches!(core, CoreError::Common(_)));

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let core: CoreError = io.into();
        assert!(matches!(core, CoreError::Io(_)));
    }
}
