// ============================================
// File: crates/devbroker-core/src/lib.rs
// ============================================
//! # DevBroker Core - Wire Protocol Library
//!
//! ## Creation Reason
//! Provides the protocol definitions shared by the server and by any
//! client: the message envelope, typed requests and the framing codec.
//!
//! ## Main Functionality
//!
//! ### Protocol Module ([`protocol`])
//! - Message types and the `Message` envelope
//! - `Request`, the validated view of client messages
//! - Stride-6 device lists and stride-7 reservation lists
//! - `ProtocolCodec` and the `MessageCodec` adapter for `Framed`
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              devbroker-server                       │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   devbroker-core  ◄──   devbroker-transport         │
//! │   You are here          │                           │
//! │         │               │                           │
//! │         └──────────┬────┘                           │
//! │                    ▼                                │
//! │            devbroker-common                         │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Protocol changes MUST stay compatible with deployed clients
//! - Decode limits are a memory bound, never raise them casually
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod protocol;

// Re-export commonly used items
pub use error::{CoreError, Result};
pub use protocol::{Message, MessageCodec, MessageType, ProtocolCodec, Request};
