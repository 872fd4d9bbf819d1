// ============================================
// File: crates/devbroker-transport/src/error.rs
// ============================================
//! # Transport Error Types
//!
//! ## Creation Reason
//! Defines error types for the listener and the framed message streams.
//!
//! ## Main Functionality
//! - `TransportError`: Primary error enum for transport operations
//! - Error conversion from system and codec errors
//! - Categorization of retryable vs fatal errors
//!
//! ## Error Categories
//! 1. **Listener Errors**: Bind failures, invalid addresses
//! 2. **Stream Errors**: Send/receive failures, timeouts, closed peers
//! 3. **Codec Errors**: Frames that violate the protocol
//!
//! ## ⚠️ Important Note for Next Developer
//! - Only `is_retryable` errors are retried by the stream; everything else
//!   closes the connection
//! - Protocol violations must never be retried, the stream is out of sync
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use devbroker_core::error::CoreError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

// ============================================
// TransportError
// ============================================

/// Transport layer error types.
#[derive(Error, Debug)]
pub enum TransportError {
    // ========================================
    // Listener Errors
    // ========================================

    /// Failed to bind to address.
    #[error("Failed to bind to {addr}: {reason}")]
    BindFailed {
        /// Address we tried to bind
        addr: SocketAddr,
        /// Why binding failed
        reason: String,
    },

    /// Address already in use.
    #[error("Address {addr} already in use")]
    AddressInUse {
        /// The address in use
        addr: SocketAddr,
    },

    /// Invalid listen address.
    #[error("Invalid address: {addr}")]
    InvalidAddress {
        /// The invalid address string
        addr: String,
    },

    // ========================================
    // Stream Errors
    // ========================================

    /// Failed to send to a peer.
    #[error("Failed to send to {peer}: {reason}")]
    SendFailed {
        /// Peer address
        peer: SocketAddr,
        /// Why send failed
        reason: String,
    },

    /// Failed to receive from a peer.
    #[error("Failed to receive from {peer}: {reason}")]
    ReceiveFailed {
        /// Peer address
        peer: SocketAddr,
        /// Why receive failed
        reason: String,
    },

    /// Operation timed out.
    #[error("Operation timed out: {operation}")]
    Timeout {
        /// What operation timed out
        operation: String,
    },

    /// The peer closed the stream.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Transport is shutting down.
    #[error("Transport is shutting down")]
    ShuttingDown,

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Frame encode/decode error.
    #[error("Codec error: {0}")]
    Codec(#[from] CoreError),

    /// I/O error with context.
    #[error("I/O error: {context}")]
    Io {
        /// What operation failed
        context: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `BindFailed` error.
    pub fn bind_failed(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::BindFailed {
            addr,
            reason: reason.into(),
        }
    }

    /// Creates an `Io` error with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates a `Timeout` error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if the operation may succeed when retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        fn transient(kind: io::ErrorKind) -> bool {
            matches!(
                kind,
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
            )
        }

        match self {
            Self::Timeout { .. } => true,
            Self::Io { source, .. } => transient(source.kind()),
            Self::Codec(CoreError::Io(source)) => transient(source.kind()),
            _ => false,
        }
    }

    /// Returns `true` if the peer violated the framing protocol.
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Codec(e) if e.is_protocol_violation())
    }

    /// Returns `true` if the connection is gone and must be dropped.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed
                | Self::ShuttingDown
                | Self::SendFailed { .. }
                | Self::ReceiveFailed { .. }
        )
    }
}

// ============================================
// Error Conversions
// ============================================

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            context: "unspecified I/O operation".into(),
            source: err,
        }
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
        let err = TransportError::bind_failed("127.0.0.1:7070".parse().unwrap(), "address in use");
        assert!(err.to_string().contains("127.0.0.1:7070"));
        assert!(err.to_string().contains("address in use"));
    }

    #[test]
    fn test_error_classification() {
        assert!(TransportError::timeout("send").is_retryable());
        assert!(!TransportError::ConnectionClosed.is_retryable());
        assert!(TransportError::ConnectionClosed.is_disconnect());

        let violation: TransportError = CoreError::UnknownMessageType(99).into();
        assert!(violation.is_protocol_violation());
        assert!(!violation.is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::Interrupted, "signal");
        let err: TransportError = io_err.into();
        assert!(err.is_retryable());

        let codec_io: TransportError =
            CoreError::Io(io::Error::new(io::ErrorKind::WouldBlock, "busy")).into();
        assert!(codec_io.is_retryable());

        let reset: TransportError =
            io::Error::new(io::ErrorKind::ConnectionReset, "reset").into();
        assert!(!reset.is_retryable());
    }
}
