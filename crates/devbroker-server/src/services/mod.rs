// ============================================
// File: crates/devbroker-server/src/services/mod.rs
// ============================================
//! # Server Services
//!
//! ## Creation Reason
//! Holds the broker's state and business rules, separated from the
//! connection and protocol handling.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`registry`]: Device catalogue and device status
//! - [`timer_wheel`]: Expiry scheduling
//! - [`reservation`]: Reservation engine
//! - [`session`]: Logged-in users
//! - [`credentials`]: Password verification
//!
//! ## Service Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Service Layer                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌──────────────────────────┐     ┌──────────────────────┐  │
//! │  │   ReservationEngine      │────►│  ResourceRegistry    │  │
//! │  │  - create / cancel       │     │  - device status     │  │
//! │  │  - conflict check        │     │  - list / query      │  │
//! │  │  - tick (wheel-ticker)   │     └──────────────────────┘  │
//! │  └───────────┬──────────────┘                               │
//! │              │ owns                                         │
//! │  ┌───────────▼──────────────┐     ┌──────────────────────┐  │
//! │  │      TimerWheel          │     │  SessionRegistry     │  │
//! │  │  - schedule / advance    │     │  - login / logout    │  │
//! │  └──────────────────────────┘     │  - idle expiry       │  │
//! │                                   └──────────┬───────────┘  │
//! │                                   ┌──────────▼───────────┐  │
//! │                                   │  CredentialStore     │  │
//! │                                   └──────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Services are synchronous and never block on I/O; call them
//!   directly from async tasks
//! - Services reference each other by id (`ReservationId`, device id),
//!   never by pointer, so each keeps its own lock
//!
//! ## Last Modified
//! v0.1.0 - Initial services structure

pub mod credentials;
pub mod registry;
pub mod reservation;
pub mod session;
pub mod timer_wheel;

pub use credentials::{hash_password, CredentialStore};
pub use registry::{ActiveReservation, Device, DeviceStatus, ResourceRegistry};
pub use reservation::{
    EngineEvent, Reservation, ReservationEngine, ReservationStatus, TickReport, TickerHandle,
};
pub use session::{Session, SessionRegistry, SessionState};
pub use timer_wheel::{TimerWheel, WheelNode, WheelSlot};
