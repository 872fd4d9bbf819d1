// ============================================
// File: crates/devbroker-common/src/time.rs
// ============================================
//! # Time Utilities
//!
//! ## Creation Reason
//! Reservation intervals, wheel scheduling and session idle checks all
//! work in whole Unix seconds. This module gives them one timestamp type
//! and an injectable clock so the engine can be driven deterministically
//! in tests.
//!
//! ## Main Functionality
//! - `Timestamp`: Unix timestamp in seconds
//! - `Clock`: Source of "now" for the engine and session registry
//! - `SystemClock`: Wall clock
//! - `ManualClock`: Settable clock for tests and simulations
//!
//! ## ⚠️ Important Note for Next Developer
//! - Everything is second granularity; the timer wheel assumes one slot
//!   per second
//! - Never call `SystemTime::now()` directly from services, take a `Clock`
//!
//! ## Last Modified
//! v0.1.0 - Initial time utilities

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::CommonError;

// ============================================
// Timestamp
// ============================================

/// Unix timestamp in seconds.
///
/// # Example
/// ```
/// use devbroker_common::time::Timestamp;
///
/// let start = Timestamp::from_secs(1_700_000_000);
/// let end = start.add_secs(3600);
/// assert_eq!(end.secs_since(start), 3600);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from Unix seconds.
    #[must_use]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    /// Returns the wall-clock time, or the epoch if the system clock is
    /// set before 1970.
    #[must_use]
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self(secs)
    }

    /// Returns the Unix timestamp in seconds.
    #[must_use]
    pub const fn as_secs(&self) -> i64 {
        self.0
    }

    /// Returns this timestamp shifted by `secs` (saturating).
    #[must_use]
    pub const fn add_secs(&self, secs: i64) -> Self {
        Self(self.0.saturating_add(secs))
    }

    /// Returns `self - earlier` in seconds; negative if `earlier` is later.
    #[must_use]
    pub const fn secs_since(&self, earlier: Self) -> i64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Timestamp {
    fn from(secs: i64) -> Self {
        Self(secs)
    }
}

impl From<Timestamp> for i64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

impl std::str::FromStr for Timestamp {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|e| CommonError::invalid_input("timestamp", e))
    }
}

// ============================================
// Clock
// ============================================

/// Source of the current time.
///
/// Implementations must be cheap to call; the engine reads the clock
/// inside its critical section.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// Wall clock backed by `SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually driven clock.
///
/// # Example
/// ```
/// use devbroker_common::time::{Clock, ManualClock, Timestamp};
///
/// let clock = ManualClock::new(Timestamp::from_secs(100));
/// clock.advance(5);
/// assert_eq!(clock.now(), Timestamp::from_secs(105));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    secs: AtomicI64,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            secs: AtomicI64::new(start.as_secs()),
        }
    }

    /// Moves the clock forward by `secs`.
    pub fn advance(&self, secs: i64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute time.
    pub fn set(&self, ts: Timestamp) {
        self.secs.store(ts.as_secs(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_secs(self.secs.load(Ordering::SeqCst))
    }
}

// ============================================
// Utility Functions
// ============================================

/// Returns the current Unix timestamp in seconds.
#[must_use]
pub fn unix_timestamp() -> i64 {
    Timestamp::now().as_secs()
}

// ============================================
// Tests
// ============================================
