// ============================================
// File: crates/devbroker-server/src/lib.rs
// ============================================
//! # devbroker Server Library
//!
//! ## Creation Reason
//! Server side of the device reservation broker: users log in over TCP,
//! reserve lab devices for time windows, and the server releases each
//! reservation when its window ends.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`config`]: Server configuration management
//! - [`server`]: Main server orchestration
//! - [`services`]: Business logic services
//!   - [`services::registry`]: Device catalogue and status
//!   - [`services::timer_wheel`]: Expiry scheduling
//!   - [`services::reservation`]: Reservation engine
//!   - [`services::session`]: Session management
//!   - [`services::credentials`]: Password checks
//! - [`handlers`]: Connection and request handlers
//! - [`error`]: Server-specific error types
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        devbroker Server                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────────┐    │
//! │  │   Config    │────►│   Server    │────►│    Handlers     │    │
//! │  │             │     │ Orchestrator│     │ connection/req  │    │
//! │  └─────────────┘     └──────┬──────┘     └────────┬────────┘    │
//! │                             │                     │             │
//! │         ┌───────────────────┼───────────────────┬─┘             │
//! │         ▼                   ▼                   ▼               │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────┐        │
//! │  │ Reservation │────►│  Resource   │     │  Session    │        │
//! │  │   Engine    │     │  Registry   │     │  Registry   │        │
//! │  │ + TimerWheel│     └─────────────┘     └─────────────┘        │
//! │  └─────────────┘                                                │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                     Transport Layer                             │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │          TCP + length-prefixed protocol frames            │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Reservation Lifecycle
//! ```text
//! Reserve ──► Approved ──(end time passes)──► Completed ──► removed
//!                │
//!                └──(owner cancels)──► Cancelled ──(next wheel visit)──► removed
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - State is in memory only; a restart forgets every reservation
//! - Configuration changes require restart (no hot-reload)
//!
//! ## Last Modified
//! v0.1.0 - Initial server library

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod server;
pub mod services;

// Re-export primary types
pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use server::Server;
