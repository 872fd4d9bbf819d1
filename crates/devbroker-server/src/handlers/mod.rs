// ============================================
// File: crates/devbroker-server/src/handlers/mod.rs
// ============================================
//! # Connection Handlers
//!
//! ## Creation Reason
//! Connects the wire protocol to the services: one task per client,
//! request dispatch, and status pushes.
//!
//! ## Main Functionality
//! - [`connection`]: Per-connection task
//! - [`request`]: Request → service call → response
//! - [`broadcast`]: Live connections and `StatusUpdate` fan-out
//!
//! ## Request Flow
//! ```text
//! socket ─► MessageStream::recv ─► RequestHandler::handle ─► services
//!                                          │
//! socket ◄─ MessageStream::send ◄──────────┘ response / Error
//!   ▲
//!   └──── Outbound queue ◄── Broadcaster ◄── EngineEvent
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial handlers

pub mod broadcast;
pub mod connection;
pub mod request;

pub use broadcast::{Broadcaster, ConnectionRegistry, Outbound};
pub use connection::serve_connection;
pub use request::{ConnectionContext, RequestHandler};
