// ============================================
// File: crates/devbroker-common/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Creation Reason
//! Centralizes the identifiers shared between the codec, the engine and
//! the request handlers so every layer agrees on their representation.
//!
//! ## Main Functionality
//! - `ReservationId`: Monotonic reservation identifier (decimal on the wire)
//! - `SessionToken`: Random per-login token (16 bytes, hex on the wire)
//! - `ErrorCode`: Numeric error codes carried in `Error` messages
//!
//! ## ⚠️ Important Note for Next Developer
//! - `ReservationId(0)` is the "no reservation" sentinel on the wire; the
//!   engine never hands it out
//! - `SessionToken` is zeroized on drop and never printed in full by `Debug`
//! - `ErrorCode` values are part of the protocol; append, never renumber
//!
//! ## Last Modified
//! v0.1.0 - Initial type definitions

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::CommonError;

// ============================================
// Constants
// ============================================

/// Size of a session token in bytes.
pub const SESSION_TOKEN_SIZE: usize = 16;

// ============================================
// ReservationId
// ============================================

/// Identifier of a reservation.
///
/// Assigned by the reservation engine starting at 1 and never reused within
/// a process lifetime. Rendered as a plain decimal string, which is also the
/// key used in the reservation index.
///
/// # Example
/// ```
/// use devbroker_common::types::ReservationId;
///
/// let id: ReservationId = "42".parse().unwrap();
/// assert_eq!(id.value(), 42);
/// assert_eq!(id.to_string(), "42");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(u64);

impl ReservationId {
    /// Wire sentinel meaning "no reservation".
    pub const NONE: Self = Self(0);

    /// Creates an id from its raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Returns `true` for the `NONE` sentinel.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// Returns the index key for this id.
    #[must_use]
    pub fn key(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReservationId {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|e| CommonError::invalid_input("reservation_id", e))
    }
}

impl From<u64> for ReservationId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<ReservationId> for u64 {
    fn from(id: ReservationId) -> Self {
        id.0
    }
}

// ============================================
// SessionToken
// ============================================

/// Token handed to a client after a successful login.
///
/// # Security Properties
/// - Generated with the thread-local CSPRNG
/// - Zeroized on drop
/// - `Debug` shows only the first two bytes
#[derive(Clone, PartialEq, Eq, Hash, Zeroize)]
pub struct SessionToken([u8; SESSION_TOKEN_SIZE]);

impl Drop for SessionToken {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl SessionToken {
    /// Generates a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_TOKEN_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Creates a token from raw bytes, `None` on a length mismatch.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != SESSION_TOKEN_SIZE {
            return None;
        }
        let mut token = [0u8; SESSION_TOKEN_SIZE];
        token.copy_from_slice(bytes);
        Some(Self(token))
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SESSION_TOKEN_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({:02x}{:02x}...)", self.0[0], self.0[1])
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for SessionToken {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| CommonError::invalid_input("session_token", e))?;
        Self::from_bytes(&bytes).ok_or(CommonError::InvalidLength {
            field: "session_token",
            expected: SESSION_TOKEN_SIZE,
            actual: bytes.len(),
        })
    }
}

// ============================================
// ErrorCode
// ============================================

/// Numeric error code sent to clients in `Error` messages.
///
/// # Values
/// | Value | Code |
/// |-------|------|
/// | 1 | InvalidParameter |
/// | 2 | ReservationConflict |
/// | 3 | ReservationInvalidTime |
/// | 4 | ReservationMaxLimitReached |
/// | 5 | ResourceInUse |
/// | 6 | ResourceNotFound |
/// | 7 | ReservationNotFound |
/// | 8 | ReservationPermissionDenied |
/// | 9 | SessionAlreadyExists |
/// | 10 | AuthenticationFailed |
/// | 11 | NotAuthenticated |
/// | 12 | ProtocolViolation |
/// | 13 | Internal |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ErrorCode {
    /// Missing or empty required field.
    InvalidParameter = 1,
    /// Overlapping interval on the same device.
    ReservationConflict = 2,
    /// Non-causal or past start time.
    ReservationInvalidTime = 3,
    /// Reservation capacity exhausted.
    ReservationMaxLimitReached = 4,
    /// Device is reserved or under maintenance.
    ResourceInUse = 5,
    /// Unknown device id.
    ResourceNotFound = 6,
    /// Unknown reservation id.
    ReservationNotFound = 7,
    /// Reservation belongs to another user.
    ReservationPermissionDenied = 8,
    /// User already has an active session.
    SessionAlreadyExists = 9,
    /// Bad username or password.
    AuthenticationFailed = 10,
    /// Request requires a logged-in session.
    NotAuthenticated = 11,
    /// Malformed or unexpected message.
    ProtocolViolation = 12,
    /// Unexpected server-side failure.
    Internal = 13,
}

impl ErrorCode {
    /// Converts a raw value to an `ErrorCode`.
    #[must_use]
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::InvalidParameter),
            2 => Some(Self::ReservationConflict),
            3 => Some(Self::ReservationInvalidTime),
            4 => Some(Self::ReservationMaxLimitReached),
            5 => Some(Self::ResourceInUse),
            6 => Some(Self::ResourceNotFound),
            7 => Some(Self::ReservationNotFound),
            8 => Some(Self::ReservationPermissionDenied),
            9 => Some(Self::SessionAlreadyExists),
            10 => Some(Self::AuthenticationFailed),
            11 => Some(Self::NotAuthenticated),
            12 => Some(Self::ProtocolViolation),
            13 => Some(Self::Internal),
            _ => None,
        }
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        *self as u32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidParameter => "InvalidParameter",
            Self::ReservationConflict => "ReservationConflict",
            Self::ReservationInvalidTime => "ReservationInvalidTime",
            Self::ReservationMaxLimitReached => "ReservationMaxLimitReached",
            Self::ResourceInUse => "ResourceInUse",
            Self::ResourceNotFound => "ResourceNotFound",
            Self::ReservationNotFound => "ReservationNotFound",
            Self::ReservationPermissionDenied => "ReservationPermissionDenied",
            Self::SessionAlreadyExists => "SessionAlreadyExists",
            Self::AuthenticationFailed => "AuthenticationFailed",
            Self::NotAuthenticated => "NotAuthenticated",
            Self::ProtocolViolation => "ProtocolViolation",
            Self::Internal => "Internal",
        };
        f.write_str(name)
    }
}

impl TryFrom<u32> for ErrorCode {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_u32(value).ok_or(value)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservation_id_parse_and_key() {
        let id: ReservationId = " 17 ".parse().unwrap();
        assert_eq!(id, ReservationId::new(17));
        assert_eq!(id.key(), "17");
        assert!(!id.is_none());
        assert!(ReservationId::NONE.is_none());
        assert!("abc".parse::<ReservationId>().is_err());
    }

    #[test]
    fn test_session_token_generation() {
        let a = SessionToken::generate();
        let b = SessionToken::generate();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), SESSION_TOKEN_SIZE * 2);
    }

    #[test]
    fn test_session_token_parse() {
        let token = SessionToken::generate();
        let parsed: SessionToken = token.to_string().parse().unwrap();
        assert_eq!(token, parsed);

        assert!(matches!(
            "zz".parse::<SessionToken>(),
            Err(CommonError::InvalidInput { field: "session_token", .. })
        ));
        assert!(matches!(
            "abcd".parse::<SessionToken>(),
            Err(CommonError::InvalidLength { expected: 16, actual: 2, .. })
        ));
    }

    #[test]
    fn test_session_token_debug_is_truncated() {
        let token = SessionToken::from_bytes(&[0xab; SESSION_TOKEN_SIZE]).unwrap();
        let debug = format!("{:?}", token);
        assert_eq!(debug, "SessionToken(abab...)");
    }

    #[test]
    fn test_error_code_values() {
        for raw in 1..=13 {
            let code = ErrorCode::from_u32(raw).unwrap();
            assert_eq!(code.as_u32(), raw);
        }
        assert_eq!(ErrorCode::from_u32(0), None);
        assert_eq!(ErrorCode::try_from(99), Err(99));
        assert_eq!(ErrorCode::ReservationConflict.to_string(), "ReservationConflict");
    }
}
