// ============================================
// File: crates/devbroker-common/src/lib.rs
// ============================================
//! # DevBroker Common - Shared Building Blocks
//!
//! ## Creation Reason
//! Holds the pieces every other DevBroker crate needs: identifiers, the
//! clock abstraction, the string-keyed hash index and the base error type.
//!
//! ## Main Functionality
//! - [`types`]: `ReservationId`, `SessionToken`, `ErrorCode`
//! - [`time`]: `Timestamp` and the injectable `Clock`
//! - [`index`]: `HashIndex`, the fixed-bucket table behind every registry
//! - [`error`]: Common error types and result alias
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              devbroker-server                       │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   devbroker-core      devbroker-transport           │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │            devbroker-common  ◄── You are here       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Leaf crate: no internal dependencies
//! - `HashIndex` is used under other locks in the server; keep its own
//!   critical sections short and callback-free where possible
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod index;
pub mod time;
pub mod types;

// Re-export commonly used items at crate root
pub use error::{CommonError, Result};
pub use index::HashIndex;
pub use time::{Clock, ManualClock, SystemClock, Timestamp};
pub use types::{ErrorCode, ReservationId, SessionToken};
