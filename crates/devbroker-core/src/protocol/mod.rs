// ============================================
// File: crates/devbroker-core/src/protocol/mod.rs
// ============================================
//! # Protocol Module
//!
//! ## Creation Reason
//! Defines the wire protocol spoken between DevBroker clients and the
//! server: message types, the message envelope and its binary framing.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`messages`]: Message envelope, request view, list layouts
//! - [`codec`]: Binary serialization and stream framing
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Client ──── Login(user, password) ────────────────► Server │
//! │  Client ◄─── LoginOk(token) ──────────────────────── Server │
//! │                                                             │
//! │  Client ──── Reserve / Cancel / List* / Query ─────► Server │
//! │  Client ◄─── *Ok / *List / ReservationInfo / Error ─ Server │
//! │                                                             │
//! │  Client ◄═══ StatusUpdate (pushed on state change) ═ Server │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format Principles
//! - Big-endian (network order) `u32` for every integer
//! - Every string is length-prefixed and UTF-8
//! - Hard per-field limits bound memory per connection
//!
//! ## ⚠️ Important Note for Next Developer
//! - The codec is transport-agnostic; it never touches sockets
//! - ANY layout change breaks deployed clients
//!
//! ## Last Modified
//! v0.1.0 - Initial protocol definitions

pub mod codec;
pub mod messages;

// Re-export primary types
pub use codec::{decode_message, encode_message, Codec, MessageCodec, ProtocolCodec};
pub use messages::{
    DeviceSummary, Message, MessageType, Request, ReservationSummary, MAX_ARG_COUNT, MAX_ARG_LEN,
    MAX_DATA_LEN,
};
