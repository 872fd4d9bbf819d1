// ============================================
// File: crates/devbroker-transport/src/lib.rs
// ============================================
//! # DevBroker Transport - Network I/O Layer
//!
//! ## Creation Reason
//! Carries protocol messages between clients and the server over TCP,
//! with bounded retry of transient I/O failures.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`traits`]: `MessageStream` and the retry policy
//! - [`tcp`]: TCP listener and `Framed` message streams
//! - [`mock`]: In-memory stream for tests
//! - [`error`]: Transport-specific error types
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              devbroker-server                       │
//! │                    │                                │
//! │                    ▼                                │
//! │            devbroker-transport  ◄── You are here    │
//! │                    │                                │
//! │                    ▼                                │
//! │            devbroker-core (Message, MessageCodec)   │
//! │                    │                                │
//! │                    ▼                                │
//! │            devbroker-common                         │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Always program against `MessageStream` so handlers stay testable
//! - A transport error other than a retried transient closes the
//!   connection; there is no reconnect logic at this layer
//!
//! ## Last Modified
//! v0.1.0 - Initial transport layer implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod mock;
pub mod tcp;
pub mod traits;

// Re-export primary types
pub use error::{Result, TransportError};
pub use mock::{MockPeer, MockStream};
pub use tcp::{FramedStream, TcpAcceptor, TcpMessageStream};
pub use traits::{MessageStream, RetryPolicy};
