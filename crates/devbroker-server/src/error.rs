// ============================================
// File: crates/devbroker-server/src/error.rs
// ============================================
//! # Server Error Types
//!
//! ## Creation Reason
//! One error enum for the engine, the registries, configuration and the
//! connection layer, so request handlers can turn any failure into a
//! wire `ErrorCode` with a single `code()` call.
//!
//! ## Main Functionality
//! - `ServerError`: Primary error enum for server operations
//! - `code()`: Mapping onto the protocol's numeric error codes
//! - Classification helpers (`is_fatal`, `is_config_error`,
//!   `closes_connection`)
//!
//! ## ⚠️ Important Note for Next Developer
//! - Never include passwords or tokens in error messages; `Display` is
//!   sent to clients verbatim
//! - Adding a variant means adding it to `code()`
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use devbroker_common::error::CommonError;
use devbroker_common::types::{ErrorCode, ReservationId};
use devbroker_core::error::CoreError;
use devbroker_transport::error::TransportError;

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Server error types.
#[derive(Error, Debug)]
pub enum ServerError {
    // ========================================
    // Configuration Errors
    // ========================================

    /// Configuration file could not be read or parsed.
    #[error("Failed to load configuration from '{path}': {reason}")]
    ConfigLoad {
        /// Path of the file
        path: String,
        /// Why loading failed
        reason: String,
    },

    /// Configuration value is invalid.
    #[error("Invalid configuration: {field} - {reason}")]
    ConfigInvalid {
        /// Offending key
        field: String,
        /// What is wrong with it
        reason: String,
    },

    // ========================================
    // Request Errors
    // ========================================

    /// A required field is missing or empty.
    #[error("Invalid parameter '{field}': {reason}")]
    InvalidParameter {
        /// Parameter name
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// Interval overlaps an approved reservation on the same device.
    #[error("Device {device_id} is already reserved in that interval (reservation {existing})")]
    ReservationConflict {
        /// Contested device
        device_id: String,
        /// The approved reservation that overlaps
        existing: ReservationId,
    },

    /// Start/end times are not causal or lie in the past.
    #[error("Invalid reservation time: {reason}")]
    InvalidTime {
        /// What is wrong with the interval
        reason: String,
    },

    /// Reservation capacity is exhausted.
    #[error("Reservation limit reached: max {limit}")]
    MaxLimitReached {
        /// Configured capacity
        limit: usize,
    },

    /// Device cannot take the operation in its current status.
    #[error("Device {device_id} is in use: {reason}")]
    ResourceInUse {
        /// Device id
        device_id: String,
        /// Why it is unavailable
        reason: String,
    },

    /// Unknown device.
    #[error("Device not found: {0}")]
    ResourceNotFound(String),

    /// Unknown reservation.
    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// Reservation belongs to someone else.
    #[error("Reservation {id} does not belong to {username}")]
    PermissionDenied {
        /// Reservation id
        id: ReservationId,
        /// Requesting user
        username: String,
    },

    // ========================================
    // Session Errors
    // ========================================

    /// The user already has an active session.
    #[error("Session already exists for {0}")]
    SessionAlreadyExists(String),

    /// Too many concurrent sessions.
    #[error("Session limit reached: max {limit} sessions")]
    SessionLimitReached {
        /// Configured limit
        limit: usize,
    },

    /// Bad username or password.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// The request requires a logged-in session.
    #[error("Not authenticated")]
    NotAuthenticated,

    // ========================================
    // Lifecycle Errors
    // ========================================

    /// Server failed to start.
    #[error("Server failed to start: {reason}")]
    StartupFailed {
        /// Why startup failed
        reason: String,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Codec error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `ConfigLoad` error.
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `ConfigInvalid` error.
    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidParameter` error.
    pub fn invalid_parameter(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidTime` error.
    pub fn invalid_time(reason: impl Into<String>) -> Self {
        Self::InvalidTime {
            reason: reason.into(),
        }
    }

    /// Creates a `ResourceInUse` error.
    pub fn resource_in_use(device_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResourceInUse {
            device_id: device_id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `StartupFailed` error.
    pub fn startup_failed(reason: impl Into<String>) -> Self {
        Self::StartupFailed {
            reason: reason.into(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns the wire error code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidParameter { .. } => ErrorCode::InvalidParameter,
            Self::ReservationConflict { .. } => ErrorCode::ReservationConflict,
            Self::InvalidTime { .. } => ErrorCode::ReservationInvalidTime,
            Self::MaxLimitReached { .. } => ErrorCode::ReservationMaxLimitReached,
            Self::ResourceInUse { .. } => ErrorCode::ResourceInUse,
            Self::ResourceNotFound(_) => ErrorCode::ResourceNotFound,
            Self::ReservationNotFound(_) => ErrorCode::ReservationNotFound,
            Self::PermissionDenied { .. } => ErrorCode::ReservationPermissionDenied,
            Self::SessionAlreadyExists(_) => ErrorCode::SessionAlreadyExists,
            Self::AuthenticationFailed => ErrorCode::AuthenticationFailed,
            Self::NotAuthenticated => ErrorCode::NotAuthenticated,
            Self::Core(e) if e.is_request_error() => ErrorCode::InvalidParameter,
            Self::Core(_) => ErrorCode::ProtocolViolation,
            Self::Common(_) => ErrorCode::InvalidParameter,
            Self::ConfigLoad { .. }
            | Self::ConfigInvalid { .. }
            | Self::SessionLimitReached { .. }
            | Self::StartupFailed { .. }
            | Self::Transport(_)
            | Self::Io(_) => ErrorCode::Internal,
        }
    }

    /// Returns `true` for configuration errors.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigLoad { .. } | Self::ConfigInvalid { .. })
    }

    /// Returns `true` if the process cannot continue.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigLoad { .. } | Self::ConfigInvalid { .. } | Self::StartupFailed { .. }
        )
    }

    /// Returns `true` if the connection that produced this error must be
    /// closed instead of answered.
    #[must_use]
    pub fn closes_connection(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_protocol_violation() || !e.is_retryable(),
            Self::Core(e) => e.is_protocol_violation(),
            _ => false,
        }
    }
}

// ============================================
// Tests
// ============================================
