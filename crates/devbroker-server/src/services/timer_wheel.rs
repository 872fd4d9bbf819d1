// ============================================
// File: crates/devbroker-server/src/services/timer_wheel.rs
// ============================================
//! # Timer Wheel
//!
//! ## Creation Reason
//! Expires reservations without scanning the whole reservation table:
//! each tick visits one bucket, so the per-tick cost is the number of
//! nodes parked in that bucket.
//!
//! ## Main Functionality
//! - `TimerWheel`: `N` buckets, a cursor and a node counter
//! - `WheelNode`: Reservation id, owed rotations and generation
//! - `WheelSlot`: Coordinates a reservation keeps of its node
//!
//! ## Placement
//! ```text
//! remaining = end - now                  (seconds, must be > 0)
//! ticks     = ceil(remaining / period)   (period = one advance)
//! bucket    = (current + ticks) % N
//! cycle     = (ticks - 1) / N            (full rotations still owed)
//!
//!   current                 bucket
//!      │                       │
//!   ┌──▼──┬─────┬─────┬─────┬──▼──┬─────┐
//!   │  0  │  1  │  2  │ ... │  r  │ N-1 │   cycle decremented each
//!   └─────┴─────┴─────┴─────┴─────┴─────┘   time the cursor passes
//! ```
//! A node becomes due after exactly `ticks` advances, exact multiples
//! of `N` included. With the default one-second period `ticks` equals
//! `remaining`.
//!
//! ## ⚠️ Important Note for Next Developer
//! - The period given to `TimerWheel::new` must be the period the ticker
//!   advances at, or expiries drift by the ratio of the two
//! - The wheel only stores nodes; it never looks at reservations. The
//!   engine decides what a visited node means
//! - Never call into the wheel while holding the engine lock
//! - A node whose generation differs from its reservation's slot is
//!   stale; the engine drops it on the next visit
//!
//! ## Last Modified
//! v0.1.0 - Initial timer wheel implementation

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use devbroker_common::time::Timestamp;
use devbroker_common::types::ReservationId;

use crate::error::{Result, ServerError};

// ============================================
// Node Types
// ============================================

/// One scheduled expiry, owned by the wheel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelNode {
    /// Reservation this node expires
    pub reservation_id: ReservationId,
    /// Full rotations still owed before the node is due
    pub cycle: u64,
    /// Must equal the reservation's `WheelSlot::generation`
    pub generation: u64,
}

/// Where a reservation's node lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WheelSlot {
    /// Bucket index, `UNPLACED` until the node is scheduled
    pub bucket: usize,
    /// Node generation
    pub generation: u64,
}

impl WheelSlot {
    /// Bucket value of a slot whose node has not been scheduled yet.
    pub const UNPLACED: usize = usize::MAX;

    /// Creates a slot for `generation` that has no bucket yet.
    #[must_use]
    pub const fn unplaced(generation: u64) -> Self {
        Self {
            bucket: Self::UNPLACED,
            generation,
        }
    }
}

// ============================================
// TimerWheel
// ============================================

struct WheelState {
    buckets: Vec<Vec<WheelNode>>,
    current: usize,
    ticks: u64,
    nodes: usize,
}

/// Hashed timer wheel with one bucket per tick.
///
/// # Thread Safety
/// All bucket access goes through one internal mutex, held only for a
/// single detach or insert.
pub struct TimerWheel {
    state: Mutex<WheelState>,
    slot_count: usize,
    capacity: usize,
    tick_ms: u64,
    base_time: Timestamp,
    next_generation: AtomicU64,
}

impl TimerWheel {
    /// Creates a wheel with `slot_count` buckets holding at most
    /// `capacity` nodes, advanced once per `tick`.
    ///
    /// A zero `slot_count` is clamped to 1, a tick under 1ms to 1ms.
    #[must_use]
    pub fn new(slot_count: usize, capacity: usize, tick: Duration, base_time: Timestamp) -> Self {
        let slot_count = if slot_count == 0 {
            warn!("Timer wheel created with 0 slots, using 1");
            1
        } else {
            slot_count
        };
        let tick_ms = u64::try_from(tick.as_millis()).unwrap_or(u64::MAX).max(1);

        Self {
            state: Mutex::new(WheelState {
                buckets: vec![Vec::new(); slot_count],
                current: 0,
                ticks: 0,
                nodes: 0,
            }),
            slot_count,
            capacity,
            tick_ms,
            base_time,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Hands out a fresh node generation.
    ///
    /// Callers record it on the reservation before the node exists, so a
    /// tick that races the insert still recognises the node as live.
    pub fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Schedules `reservation_id` to come due at `end_time`.
    ///
    /// # Errors
    /// - `InvalidTime` if `end_time <= now` (nothing is inserted)
    /// - `MaxLimitReached` if the wheel already holds `capacity` nodes
    pub fn schedule(
        &self,
        reservation_id: ReservationId,
        generation: u64,
        end_time: Timestamp,
        now: Timestamp,
    ) -> Result<WheelSlot> {
        let remaining = end_time.secs_since(now);
        if remaining <= 0 {
            warn!(
                reservation_id = %reservation_id,
                end_time = %end_time,
                now = %now,
                "Rejected wheel insert for an already expired reservation"
            );
            return Err(ServerError::invalid_time("end time is not in the future"));
        }
        #[allow(clippy::cast_sign_loss)]
        let ticks = self.ticks_for(remaining as u64);
        let n = self.slot_count as u64;

        let mut state = self.state.lock();
        if state.nodes >= self.capacity {
            warn!(
                reservation_id = %reservation_id,
                capacity = self.capacity,
                "Rejected wheel insert, wheel is full"
            );
            return Err(ServerError::MaxLimitReached {
                limit: self.capacity,
            });
        }

        #[allow(clippy::cast_possible_truncation)]
        let bucket = ((state.current as u64 + ticks) % n) as usize;
        let node = WheelNode {
            reservation_id,
            cycle: (ticks - 1) / n,
            generation,
        };

        debug!(
            reservation_id = %reservation_id,
            bucket,
            ticks,
            cycle = node.cycle,
            "Scheduled wheel node"
        );
        state.buckets[bucket].push(node);
        state.nodes += 1;

        Ok(WheelSlot { bucket, generation })
    }

    /// Number of advances covering `remaining_secs`, rounded up.
    fn ticks_for(&self, remaining_secs: u64) -> u64 {
        remaining_secs
            .saturating_mul(1000)
            .div_ceil(self.tick_ms)
            .max(1)
    }

    /// Moves the cursor one bucket forward and detaches everything in it.
    ///
    /// Returns the new cursor position and the detached nodes. Nodes the
    /// caller wants to keep must go back through [`Self::reinsert`].
    pub fn advance(&self) -> (usize, Vec<WheelNode>) {
        let mut state = self.state.lock();
        state.current = (state.current + 1) % self.slot_count;
        state.ticks += 1;
        let index = state.current;
        let nodes = std::mem::take(&mut state.buckets[index]);
        state.nodes -= nodes.len();
        (index, nodes)
    }

    /// Puts a detached node back into `bucket`.
    pub fn reinsert(&self, node: WheelNode, bucket: usize) {
        let mut state = self.state.lock();
        let bucket = bucket % self.slot_count;
        state.buckets[bucket].push(node);
        state.nodes += 1;
    }

    /// Returns the bucket after `index`.
    #[must_use]
    pub const fn next_bucket(&self, index: usize) -> usize {
        (index + 1) % self.slot_count
    }

    /// Returns the advance period.
    #[must_use]
    pub const fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Returns the number of buckets.
    #[must_use]
    pub const fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Returns the number of nodes currently parked in the wheel.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().nodes
    }

    /// Returns `true` if no node is parked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cursor position.
    #[must_use]
    pub fn current_index(&self) -> usize {
        self.state.lock().current
    }

    /// Returns the number of advances so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.state.lock().ticks
    }

    /// Returns the time the wheel was created at.
    #[must_use]
    pub const fn base_time(&self) -> Timestamp {
        self.base_time
    }
}

impl fmt::Debug for TimerWheel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TimerWheel")
            .field("slots", &self.slot_count)
            .field("tick_ms", &self.tick_ms)
            .field("current", &state.current)
            .field("ticks", &state.ticks)
            .field("nodes", &state.nodes)
            .finish()
    }
}

// ============================================
// Tests
// ============================================
