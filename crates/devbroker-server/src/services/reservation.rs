// ============================================
// File: crates/devbroker-server/src/services/reservation.rs
// ============================================
//! # Reservation Engine
//!
//! ## Creation Reason
//! Owns every reservation and keeps the device registry in step with
//! them: creating, cancelling and expiring reservations, and deciding
//! which reservation a device is marked with.
//!
//! ## Main Functionality
//! - `ReservationEngine`: create / cancel / queries / tick
//! - `Reservation` / `ReservationStatus`: The reservation record
//! - `TickReport`: What one wheel tick did
//! - `TickerHandle`: The `wheel-ticker` thread driving `tick`
//! - `EngineEvent`: Change notifications for the broadcaster
//!
//! ## Lifecycle
//! ```text
//!            cancel()                 tick (sweep)
//! Approved ───────────► Cancelled ───────────────► removed
//!     │
//!     │ tick, end <= now
//!     └──────────────► Completed ──► removed (same tick)
//! ```
//! Cancelled records stay in the index, and count against capacity,
//! until the wheel sweeps their bucket. The sweep in `tick` is the only
//! place a live reservation leaves the index.
//!
//! ## Locking
//! - Engine lock (`state`) guards every status transition
//! - Nested order is engine → registry → index
//! - The wheel lock is never taken while the engine lock is held:
//!   `create` schedules after releasing it, `tick` detaches before
//!   taking it and reinserts after releasing it
//!
//! ## ⚠️ Important Note for Next Developer
//! - The conflict check is a full scan of the reservation index. That is
//!   fine for the configured capacity but is the first thing to replace
//!   (per-device interval lists) if capacity grows a lot
//! - A device is marked with its earliest-starting approved reservation;
//!   always go through `refresh_device` after a reservation leaves
//!   `Approved`
//! - Nodes due but not yet expired are re-checked every tick, so the
//!   per-tick cost grows with reservations ending in the next second
//!
//! ## Last Modified
//! v0.1.0 - Initial reservation engine implementation

use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use devbroker_common::index::HashIndex;
use devbroker_common::time::{Clock, Timestamp};
use devbroker_common::types::ReservationId;
use devbroker_core::protocol::ReservationSummary;

use crate::config::EngineConfig;
use crate::error::{Result, ServerError};
use crate::services::registry::{ActiveReservation, DeviceStatus, ResourceRegistry};
use crate::services::timer_wheel::{TimerWheel, WheelSlot};

// ============================================
// Reservation
// ============================================

/// Reservation lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReservationStatus {
    /// Holds the device for its interval.
    Approved,
    /// Cancelled by its owner, awaiting the sweep.
    Cancelled,
    /// Ran to its end time.
    Completed,
}

impl ReservationStatus {
    /// Returns the wire name of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "Approved",
            Self::Cancelled => "Cancelled",
            Self::Completed => "Completed",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reservation record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// Engine-assigned id
    pub id: ReservationId,
    /// Reserved device
    pub device_id: String,
    /// Owner
    pub username: String,
    /// Interval start
    pub start_time: Timestamp,
    /// Interval end (exclusive)
    pub end_time: Timestamp,
    /// Free-form reason
    pub reason: String,
    /// Lifecycle state
    pub status: ReservationStatus,
    /// Creation time
    pub created_at: Timestamp,
    /// Coordinates of the wheel node that expires this reservation
    pub wheel_slot: WheelSlot,
}

impl Reservation {
    /// Returns `true` if `[start, end)` intersects this reservation.
    #[must_use]
    pub fn overlaps(&self, start: Timestamp, end: Timestamp) -> bool {
        !(end <= self.start_time || start >= self.end_time)
    }

    /// Converts to the wire list entry.
    #[must_use]
    pub fn to_summary(&self) -> ReservationSummary {
        ReservationSummary {
            id: self.id,
            device_id: self.device_id.clone(),
            username: self.username.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            status: self.status.as_str().to_string(),
            reason: self.reason.clone(),
        }
    }

    fn as_active(&self) -> ActiveReservation {
        ActiveReservation {
            id: self.id,
            end_time: self.end_time,
            username: self.username.clone(),
        }
    }
}

// ============================================
// Events & Reports
// ============================================

/// Notification sent to the broadcaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// Device status changed; connected clients need a fresh list.
    DevicesChanged,
}

/// Outcome of one `tick`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Nodes detached from the bucket
    pub visited: usize,
    /// Reservations that ran out this tick, in their final state
    pub completed: Vec<Reservation>,
    /// Cancelled records removed from the index
    pub swept: usize,
    /// Nodes put back into the wheel
    pub rescheduled: usize,
    /// Nodes dropped because their reservation is gone or moved on
    pub stale: usize,
}

impl TickReport {
    /// Returns `true` if the tick found nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.visited == 0
    }
}

// ============================================
// ReservationEngine
// ============================================

struct EngineState {
    next_id: u64,
}

/// Reservation engine.
///
/// # Thread Safety
/// Every transition runs under the engine lock. Reads that only need a
/// snapshot go straight to the index.
pub struct ReservationEngine {
    state: Mutex<EngineState>,
    reservations: HashIndex<Reservation>,
    wheel: TimerWheel,
    registry: Arc<ResourceRegistry>,
    clock: Arc<dyn Clock>,
    events: mpsc::UnboundedSender<EngineEvent>,
    max_reservations: usize,
}

impl ReservationEngine {
    /// Creates an engine.
    ///
    /// # Arguments
    /// * `config` - Capacity and sizing
    /// * `registry` - Devices the engine marks
    /// * `clock` - Time source
    /// * `events` - Where `EngineEvent`s go
    #[must_use]
    pub fn new(
        config: &EngineConfig,
        registry: Arc<ResourceRegistry>,
        clock: Arc<dyn Clock>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        let now = clock.now();
        info!(
            max_reservations = config.max_reservations,
            wheel_slots = config.wheel_slots,
            tick_ms = config.tick_interval_ms,
            "Reservation engine initialized"
        );

        Self {
            state: Mutex::new(EngineState { next_id: 1 }),
            reservations: HashIndex::new(config.reservation_buckets),
            wheel: TimerWheel::new(
                config.wheel_slots,
                config.max_reservations,
                Duration::from_millis(config.tick_interval_ms),
                now,
            ),
            registry,
            clock,
            events,
            max_reservations: config.max_reservations,
        }
    }

    // ========================================
    // Transitions
    // ========================================

    /// Creates an approved reservation.
    ///
    /// # Errors
    /// In check order:
    /// - `InvalidParameter` for an empty device id or username
    /// - `MaxLimitReached` when the index is full (cancelled records
    ///   awaiting their sweep count)
    /// - `InvalidTime` when `start >= end` or `start` is in the past
    /// - `ResourceNotFound` / `ResourceInUse` (maintenance)
    /// - `ReservationConflict` when an approved reservation on the device
    ///   overlaps `[start, end)`
    pub fn create(
        &self,
        device_id: &str,
        username: &str,
        start: Timestamp,
        end: Timestamp,
        reason: &str,
    ) -> Result<ReservationId> {
        if device_id.is_empty() {
            return Err(ServerError::invalid_parameter("device_id", "cannot be empty"));
        }
        if username.is_empty() {
            return Err(ServerError::invalid_parameter("username", "cannot be empty"));
        }

        let generation = self.wheel.next_generation();

        let id = {
            let mut state = self.state.lock();

            if self.reservations.len() >= self.max_reservations {
                return Err(ServerError::MaxLimitReached {
                    limit: self.max_reservations,
                });
            }

            let now = self.clock.now();
            if start >= end {
                return Err(ServerError::invalid_time("start must be before end"));
            }
            if start < now {
                return Err(ServerError::invalid_time("start lies in the past"));
            }

            let device = self
                .registry
                .get_device(device_id)
                .ok_or_else(|| ServerError::ResourceNotFound(device_id.to_string()))?;
            if device.status == DeviceStatus::Maintenance {
                return Err(ServerError::resource_in_use(
                    device_id,
                    "device is under maintenance",
                ));
            }

            if let Some(existing) = self.find_conflict(device_id, start, end) {
                debug!(
                    device_id = %device_id,
                    username = %username,
                    existing = %existing,
                    "Reservation conflict"
                );
                return Err(ServerError::ReservationConflict {
                    device_id: device_id.to_string(),
                    existing,
                });
            }

            let id = ReservationId::new(state.next_id);
            state.next_id += 1;

            self.reservations.insert(
                id.key(),
                Reservation {
                    id,
                    device_id: device_id.to_string(),
                    username: username.to_string(),
                    start_time: start,
                    end_time: end,
                    reason: reason.to_string(),
                    status: ReservationStatus::Approved,
                    created_at: now,
                    wheel_slot: WheelSlot::unplaced(generation),
                },
            );

            if let Err(e) = self.refresh_device_locked(&state, device_id) {
                self.reservations.remove(&id.key());
                self.refresh_quietly(&state, device_id);
                return Err(e);
            }
            id
        };

        let slot = match self.wheel.schedule(id, generation, end, self.clock.now()) {
            Ok(slot) => slot,
            Err(e) => {
                self.rollback(id, device_id);
                return Err(e);
            }
        };
        self.record_placement(id, slot);

        info!(
            reservation_id = %id,
            device_id = %device_id,
            username = %username,
            start = %start,
            end = %end,
            "Reservation created"
        );
        self.emit(EngineEvent::DevicesChanged);
        Ok(id)
    }

    /// Cancels an approved reservation.
    ///
    /// Returns `Ok(false)`, with no side effects, if the reservation is no
    /// longer approved. The record stays in the index until the sweep.
    ///
    /// # Errors
    /// - `ReservationNotFound` if there is no such reservation
    /// - `PermissionDenied` if `username` does not own it
    pub fn cancel(&self, id: ReservationId, username: &str) -> Result<bool> {
        let key = id.key();
        {
            let state = self.state.lock();

            let (status, owner, device_id) = self
                .reservations
                .with(&key, |r| (r.status, r.username.clone(), r.device_id.clone()))
                .ok_or(ServerError::ReservationNotFound(id))?;

            if status != ReservationStatus::Approved {
                debug!(reservation_id = %id, status = %status, "Cancel of inactive reservation ignored");
                return Ok(false);
            }
            if owner != username {
                return Err(ServerError::PermissionDenied {
                    id,
                    username: username.to_string(),
                });
            }

            self.reservations
                .with_mut(&key, |r| r.status = ReservationStatus::Cancelled);
            self.refresh_quietly(&state, &device_id);

            info!(
                reservation_id = %id,
                device_id = %device_id,
                username = %username,
                "Reservation cancelled"
            );
        }

        self.emit(EngineEvent::DevicesChanged);
        Ok(true)
    }

    /// Re-derives which reservation `device_id` is marked with.
    ///
    /// # Errors
    /// `ResourceNotFound` if the device is gone.
    pub fn refresh_device(&self, device_id: &str) -> Result<()> {
        let state = self.state.lock();
        self.refresh_device_locked(&state, device_id)
    }

    // ========================================
    // Queries
    // ========================================

    /// Returns the approved reservation `device_id` is marked with.
    #[must_use]
    pub fn get_active_for_device(&self, device_id: &str) -> Option<Reservation> {
        let _state = self.state.lock();
        let active = self.registry.get_device(device_id)?.active_reservation_id?;
        self.reservations
            .get(&active.key())
            .filter(|r| r.status == ReservationStatus::Approved)
    }

    /// Returns a copy of one reservation.
    #[must_use]
    pub fn get(&self, id: ReservationId) -> Option<Reservation> {
        self.reservations.get(&id.key())
    }

    /// Returns `username`'s reservations still in the index, by id.
    #[must_use]
    pub fn list_for_user(&self, username: &str) -> Vec<Reservation> {
        self.collect(|r| r.username == username)
    }

    /// Returns the reservations on `device_id` still in the index, by id.
    #[must_use]
    pub fn list_for_device(&self, device_id: &str) -> Vec<Reservation> {
        self.collect(|r| r.device_id == device_id)
    }

    /// Returns the number of records in the index.
    #[must_use]
    pub fn count(&self) -> usize {
        self.reservations.len()
    }

    /// Returns the device registry this engine marks.
    #[must_use]
    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    // ========================================
    // Expiry
    // ========================================

    /// Advances the wheel one bucket and processes the nodes found there.
    pub fn tick(&self) -> TickReport {
        let (index, nodes) = self.wheel.advance();
        let mut report = TickReport {
            visited: nodes.len(),
            ..TickReport::default()
        };
        if nodes.is_empty() {
            return report;
        }

        let mut reinserts = Vec::new();
        {
            let state = self.state.lock();
            let now = self.clock.now();

            for mut node in nodes {
                let key = node.reservation_id.key();
                let Some(reservation) = self.reservations.get(&key) else {
                    report.stale += 1;
                    continue;
                };
                if reservation.wheel_slot.generation != node.generation {
                    report.stale += 1;
                    continue;
                }

                match reservation.status {
                    ReservationStatus::Cancelled | ReservationStatus::Completed => {
                        self.reservations.delete(&key);
                        report.swept += 1;
                        debug!(reservation_id = %reservation.id, "Swept reservation");
                    }
                    ReservationStatus::Approved if node.cycle > 0 => {
                        node.cycle -= 1;
                        reinserts.push((node, index));
                    }
                    ReservationStatus::Approved if reservation.end_time <= now => {
                        let mut finished = reservation;
                        finished.status = ReservationStatus::Completed;
                        self.reservations.delete(&key);
                        self.refresh_quietly(&state, &finished.device_id);
                        info!(
                            reservation_id = %finished.id,
                            device_id = %finished.device_id,
                            username = %finished.username,
                            "Reservation completed"
                        );
                        report.completed.push(finished);
                    }
                    ReservationStatus::Approved => {
                        let next = self.wheel.next_bucket(index);
                        self.reservations
                            .with_mut(&key, |r| r.wheel_slot.bucket = next);
                        reinserts.push((node, next));
                    }
                }
            }
        }

        report.rescheduled = reinserts.len();
        for (node, bucket) in reinserts {
            self.wheel.reinsert(node, bucket);
        }

        if !report.completed.is_empty() {
            self.emit(EngineEvent::DevicesChanged);
        }
        report
    }

    /// Starts the `wheel-ticker` thread calling [`Self::tick`] every
    /// `period`.
    ///
    /// Expiry times are placed assuming [`Self::tick_period`]; a different
    /// `period` stretches or shrinks every reservation by the same ratio.
    ///
    /// # Errors
    /// `StartupFailed` if the thread cannot be spawned.
    pub fn spawn_ticker(self: &Arc<Self>, period: Duration) -> Result<TickerHandle> {
        let engine = Arc::clone(self);
        let shared = Arc::new(TickerShared {
            stop: Mutex::new(false),
            wake: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);

        let thread = std::thread::Builder::new()
            .name("wheel-ticker".into())
            .spawn(move || run_ticker(&engine, &thread_shared, period))
            .map_err(|e| ServerError::startup_failed(format!("cannot spawn ticker thread: {e}")))?;

        info!(period_ms = period.as_millis(), "Wheel ticker started");
        Ok(TickerHandle {
            shared,
            thread: Some(thread),
        })
    }

    // ========================================
    // Internal Helpers
    // ========================================

    fn find_conflict(&self, device_id: &str, start: Timestamp, end: Timestamp) -> Option<ReservationId> {
        let mut conflict: Option<ReservationId> = None;
        self.reservations.for_each(|_, r| {
            if r.device_id == device_id
                && r.status == ReservationStatus::Approved
                && r.overlaps(start, end)
            {
                conflict = Some(conflict.map_or(r.id, |c| c.min(r.id)));
            }
        });
        conflict
    }

    fn collect(&self, filter: impl Fn(&Reservation) -> bool) -> Vec<Reservation> {
        let mut out = Vec::new();
        self.reservations.for_each(|_, r| {
            if filter(r) {
                out.push(r.clone());
            }
        });
        out.sort_by_key(|r| r.id);
        out
    }

    /// Marks `device_id` with its earliest-starting approved reservation,
    /// or `Available` if none is left. Devices in maintenance are left
    /// alone.
    fn refresh_device_locked(&self, _state: &EngineState, device_id: &str) -> Result<()> {
        let device = self
            .registry
            .get_device(device_id)
            .ok_or_else(|| ServerError::ResourceNotFound(device_id.to_string()))?;
        if device.status == DeviceStatus::Maintenance {
            return Ok(());
        }

        let mut earliest: Option<Reservation> = None;
        self.reservations.for_each(|_, r| {
            if r.device_id == device_id && r.status == ReservationStatus::Approved {
                let better = earliest
                    .as_ref()
                    .map_or(true, |e| (r.start_time, r.id) < (e.start_time, e.id));
                if better {
                    earliest = Some(r.clone());
                }
            }
        });

        match earliest {
            Some(r) => self
                .registry
                .update_status(device_id, DeviceStatus::Reserved, Some(r.as_active())),
            None => self
                .registry
                .update_status(device_id, DeviceStatus::Available, None),
        }
    }

    fn refresh_quietly(&self, state: &EngineState, device_id: &str) {
        if let Err(e) = self.refresh_device_locked(state, device_id) {
            warn!(device_id = %device_id, error = %e, "Failed to refresh device status");
        }
    }

    /// Stores the bucket `schedule` chose, unless a tick has already
    /// visited the node and moved it on.
    fn record_placement(&self, id: ReservationId, slot: WheelSlot) -> bool {
        let _state = self.state.lock();
        self.reservations
            .with_mut(&id.key(), |r| {
                let unplaced = r.wheel_slot == WheelSlot::unplaced(slot.generation);
                if unplaced {
                    r.wheel_slot.bucket = slot.bucket;
                }
                unplaced
            })
            .unwrap_or(false)
    }

    /// Undoes a create whose wheel node could not be scheduled. No node
    /// refers to the record, so it is removed here instead of swept.
    fn rollback(&self, id: ReservationId, device_id: &str) {
        let state = self.state.lock();
        self.reservations.remove(&id.key());
        self.refresh_quietly(&state, device_id);
        warn!(reservation_id = %id, device_id = %device_id, "Reservation rolled back");
    }

    fn emit(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            debug!(?event, "No broadcaster listening, event dropped");
        }
    }

    /// Returns the period the wheel places expiries for.
    #[must_use]
    pub const fn tick_period(&self) -> Duration {
        self.wheel.tick()
    }

    #[cfg(test)]
    pub(crate) const fn wheel(&self) -> &TimerWheel {
        &self.wheel
    }
}

impl fmt::Debug for ReservationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReservationEngine")
            .field("reservations", &self.reservations.len())
            .field("max_reservations", &self.max_reservations)
            .field("wheel", &self.wheel)
            .finish_non_exhaustive()
    }
}

// ============================================
// Ticker Thread
// ============================================

struct TickerShared {
    stop: Mutex<bool>,
    wake: Condvar,
}

/// Handle of the `wheel-ticker` thread. Dropping it stops the thread.
pub struct TickerHandle {
    shared: Arc<TickerShared>,
    thread: Option<JoinHandle<()>>,
}

impl TickerHandle {
    /// Stops the ticker and waits for the thread to exit.
    pub fn shutdown(&mut self) {
        {
            let mut stop = self.shared.stop.lock();
            *stop = true;
        }
        self.shared.wake.notify_all();

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Wheel ticker thread panicked");
            } else {
                info!("Wheel ticker stopped");
            }
        }
    }

    /// Returns `true` while the thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for TickerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for TickerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickerHandle")
            .field("running", &self.is_running())
            .finish()
    }
}

fn run_ticker(engine: &ReservationEngine, shared: &TickerShared, period: Duration) {
    let mut deadline = Instant::now() + period;
    loop {
        {
            let mut stop = shared.stop.lock();
            while !*stop {
                if shared.wake.wait_until(&mut stop, deadline).timed_out() {
                    break;
                }
            }
            if *stop {
                return;
            }
        }

        let report = engine.tick();
        if !report.is_empty() {
            debug!(
                visited = report.visited,
                completed = report.completed.len(),
                swept = report.swept,
                rescheduled = report.rescheduled,
                stale = report.stale,
                "Wheel tick"
            );
        }
        deadline += period;
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use devbroker_common::time::ManualClock;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    const T0: i64 = 1_000_000;

    struct Fixture {
        engine: Arc<ReservationEngine>,
        clock: Arc<ManualClock>,
        events: mpsc::UnboundedReceiver<EngineEvent>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(&EngineConfig {
                max_reservations: 100,
                wheel_slots: 60,
                tick_interval_ms: 1000,
                reservation_buckets: 64,
            })
        }

        fn with_config(config: &EngineConfig) -> Self {
            let registry = Arc::new(ResourceRegistry::new(16));
            for id in ["DEV001", "DEV002", "DEV003"] {
                registry.add_device(id, "scope", id).unwrap();
            }
            let clock = Arc::new(ManualClock::new(Timestamp::from_secs(T0)));
            let (tx, events) = mpsc::unbounded_channel();
            let engine = Arc::new(ReservationEngine::new(
                config,
                registry,
                Arc::clone(&clock) as Arc<dyn Clock>,
                tx,
            ));
            Self {
                engine,
                clock,
                events,
            }
        }

        fn at(&self, offset: i64) -> Timestamp {
            Timestamp::from_secs(T0 + offset)
        }

        /// One second of wall time followed by one wheel tick.
        fn step(&self) -> TickReport {
            self.step_by(1)
        }

        fn step_by(&self, secs: i64) -> TickReport {
            self.clock.advance(secs);
            self.engine.tick()
        }

        fn drain_events(&mut self) -> usize {
            let mut n = 0;
            while self.events.try_recv().is_ok() {
                n += 1;
            }
            n
        }

        fn status(&self, device: &str) -> DeviceStatus {
            self.engine.registry().get_device(device).unwrap().status
        }
    }

    #[test]
    fn test_create_marks_device() {
        let mut fx = Fixture::new();
        let id = fx
            .engine
            .create("DEV001", "alice", fx.at(0), fx.at(10), "scope work")
            .unwrap();
        assert_eq!(id, ReservationId::new(1));

        let device = fx.engine.registry().get_device("DEV001").unwrap();
        assert_eq!(device.status, DeviceStatus::Reserved);
        assert_eq!(device.active_reservation_id, Some(id));
        assert_eq!(device.reserved_by, "alice");
        assert_eq!(device.reservation_end_time, Some(fx.at(10)));

        let r = fx.engine.get(id).unwrap();
        assert_eq!(r.status, ReservationStatus::Approved);
        assert_eq!(r.created_at, fx.at(0));
        assert_eq!(fx.engine.wheel().len(), 1);
        assert_eq!(fx.drain_events(), 1);
    }

    #[test]
    fn test_create_validation_order() {
        let fx = Fixture::new();
        assert!(matches!(
            fx.engine.create("", "alice", fx.at(0), fx.at(1), ""),
            Err(ServerError::InvalidParameter { .. })
        ));
        assert!(matches!(
            fx.engine.create("DEV001", "", fx.at(0), fx.at(1), ""),
            Err(ServerError::InvalidParameter { .. })
        ));
        assert!(matches!(
            fx.engine.create("DEV001", "alice", fx.at(5), fx.at(5), ""),
            Err(ServerError::InvalidTime { .. })
        ));
        assert!(matches!(
            fx.engine.create("DEV001", "alice", fx.at(-1), fx.at(5), ""),
            Err(ServerError::InvalidTime { .. })
        ));
        // Time is checked before the device
        assert!(matches!(
            fx.engine.create("NOPE", "alice", fx.at(5), fx.at(1), ""),
            Err(ServerError::InvalidTime { .. })
        ));
        assert!(matches!(
            fx.engine.create("NOPE", "alice", fx.at(0), fx.at(1), ""),
            Err(ServerError::ResourceNotFound(_))
        ));
        assert_eq!(fx.engine.count(), 0);
    }

    #[test]
    fn test_maintenance_rejects() {
        let fx = Fixture::new();
        fx.engine
            .registry()
            .update_status("DEV003", DeviceStatus::Maintenance, None)
            .unwrap();
        assert!(matches!(
            fx.engine.create("DEV003", "alice", fx.at(0), fx.at(5), ""),
            Err(ServerError::ResourceInUse { .. })
        ));
    }

    #[test]
    fn test_conflict_and_adjacent_intervals() {
        let fx = Fixture::new();
        let first = fx
            .engine
            .create("DEV001", "alice", fx.at(10), fx.at(20), "")
            .unwrap();

        match fx.engine.create("DEV001", "bob", fx.at(15), fx.at(25), "") {
            Err(ServerError::ReservationConflict { existing, .. }) => assert_eq!(existing, first),
            other => panic!("expected conflict, got {other:?}"),
        }
        assert!(fx.engine.create("DEV001", "bob", fx.at(5), fx.at(11), "").is_err());
        assert!(fx.engine.create("DEV001", "bob", fx.at(12), fx.at(13), "").is_err());

        // Half-open intervals: touching ends do not overlap
        fx.engine.create("DEV001", "bob", fx.at(20), fx.at(30), "").unwrap();
        fx.engine.create("DEV001", "bob", fx.at(0), fx.at(10), "").unwrap();
        // Other devices are independent
        fx.engine.create("DEV002", "bob", fx.at(10), fx.at(20), "").unwrap();
        assert_eq!(fx.engine.count(), 4);
    }

    #[test]
    fn test_capacity_counts_cancelled_records() {
        let fx = Fixture::with_config(&EngineConfig {
            max_reservations: 2,
            wheel_slots: 60,
            tick_interval_ms: 1000,
            reservation_buckets: 8,
        });
        let a = fx.engine.create("DEV001", "alice", fx.at(0), fx.at(5), "").unwrap();
        fx.engine.create("DEV002", "alice", fx.at(0), fx.at(5), "").unwrap();
        assert!(fx.engine.cancel(a, "alice").unwrap());

        assert!(matches!(
            fx.engine.create("DEV003", "alice", fx.at(0), fx.at(5), ""),
            Err(ServerError::MaxLimitReached { limit: 2 })
        ));
        // Capacity is checked before the interval
        assert!(matches!(
            fx.engine.create("DEV003", "alice", fx.at(5), fx.at(0), ""),
            Err(ServerError::MaxLimitReached { .. })
        ));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut fx = Fixture::new();
        let id = fx
            .engine
            .create("DEV002", "alice", fx.at(0), fx.at(3600), "")
            .unwrap();
        fx.drain_events();

        assert!(fx.engine.cancel(id, "alice").unwrap());
        assert_eq!(fx.status("DEV002"), DeviceStatus::Available);
        assert_eq!(fx.engine.get(id).unwrap().status, ReservationStatus::Cancelled);
        assert_eq!(fx.drain_events(), 1);

        // Mark the device by hand to prove a repeated cancel touches nothing
        fx.engine
            .registry()
            .update_status("DEV002", DeviceStatus::Maintenance, None)
            .unwrap();
        assert!(!fx.engine.cancel(id, "alice").unwrap());
        assert!(!fx.engine.cancel(id, "bob").unwrap());
        assert_eq!(fx.status("DEV002"), DeviceStatus::Maintenance);
        assert_eq!(fx.drain_events(), 0);
    }

    #[test]
    fn test_cancel_errors() {
        let fx = Fixture::new();
        assert!(matches!(
            fx.engine.cancel(ReservationId::new(99), "alice"),
            Err(ServerError::ReservationNotFound(_))
        ));

        let id = fx.engine.create("DEV001", "alice", fx.at(0), fx.at(5), "").unwrap();
        assert!(matches!(
            fx.engine.cancel(id, "bob"),
            Err(ServerError::PermissionDenied { .. })
        ));
        assert_eq!(fx.engine.get(id).unwrap().status, ReservationStatus::Approved);
        assert_eq!(fx.status("DEV001"), DeviceStatus::Reserved);
    }

    #[test]
    fn test_cancelled_record_swept_at_its_bucket() {
        let fx = Fixture::new();
        let id = fx.engine.create("DEV001", "alice", fx.at(0), fx.at(3), "").unwrap();
        fx.engine.cancel(id, "alice").unwrap();

        assert_eq!(fx.step().swept, 0);
        assert_eq!(fx.step().swept, 0);
        assert!(fx.engine.get(id).is_some());

        let report = fx.step();
        assert_eq!(report.swept, 1);
        assert!(report.completed.is_empty());
        assert!(fx.engine.get(id).is_none());
        assert_eq!(fx.engine.count(), 0);
        assert!(fx.engine.wheel().is_empty());
    }

    #[test]
    fn test_expiry_within_one_tick_of_end() {
        let mut fx = Fixture::new();
        let id = fx.engine.create("DEV001", "alice", fx.at(0), fx.at(5), "").unwrap();
        fx.drain_events();

        for _ in 0..4 {
            assert!(fx.step().completed.is_empty());
            assert_eq!(fx.status("DEV001"), DeviceStatus::Reserved);
        }
        let report = fx.step();
        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.completed[0].id, id);
        assert_eq!(report.completed[0].status, ReservationStatus::Completed);
        assert_eq!(fx.status("DEV001"), DeviceStatus::Available);
        assert!(fx.engine.get(id).is_none());
        assert_eq!(fx.drain_events(), 1);
    }

    #[test]
    fn test_lagging_clock_rechecks_next_tick() {
        let fx = Fixture::new();
        let id = fx.engine.create("DEV001", "alice", fx.at(0), fx.at(2), "").unwrap();

        // The wheel reaches the node while the clock is still short of the end
        fx.engine.tick();
        let report = fx.engine.tick();
        assert!(report.completed.is_empty());
        assert_eq!(report.rescheduled, 1);
        assert!(fx.engine.get(id).is_some());

        fx.clock.advance(2);
        let report = fx.engine.tick();
        assert_eq!(report.completed.len(), 1);
    }

    #[test]
    fn test_wheel_wrap_expires_once() {
        let mut fx = Fixture::with_config(&EngineConfig {
            max_reservations: 10,
            wheel_slots: 8,
            tick_interval_ms: 1000,
            reservation_buckets: 8,
        });
        let remaining = 19;
        let id = fx
            .engine
            .create("DEV001", "alice", fx.at(0), fx.at(remaining), "")
            .unwrap();
        fx.drain_events();

        let mut completions = Vec::new();
        for tick in 1..=(8 + remaining) {
            let report = fx.step();
            if !report.completed.is_empty() {
                completions.push(tick);
            }
        }
        assert_eq!(completions, [remaining]);
        assert_eq!(fx.drain_events(), 1);
        assert!(fx.engine.get(id).is_none());
        assert!(fx.engine.wheel().is_empty());
    }

    #[test]
    fn test_device_marker_follows_earliest_approved() {
        let fx = Fixture::new();
        let later = fx.engine.create("DEV001", "bob", fx.at(100), fx.at(200), "").unwrap();
        let sooner = fx.engine.create("DEV001", "alice", fx.at(0), fx.at(10), "").unwrap();

        let device = fx.engine.registry().get_device("DEV001").unwrap();
        assert_eq!(device.active_reservation_id, Some(sooner));
        assert_eq!(fx.engine.get_active_for_device("DEV001").unwrap().id, sooner);

        fx.engine.cancel(sooner, "alice").unwrap();
        let device = fx.engine.registry().get_device("DEV001").unwrap();
        assert_eq!(device.status, DeviceStatus::Reserved);
        assert_eq!(device.active_reservation_id, Some(later));
        assert_eq!(device.reserved_by, "bob");

        fx.engine.cancel(later, "bob").unwrap();
        assert_eq!(fx.status("DEV001"), DeviceStatus::Available);
        assert!(fx.engine.get_active_for_device("DEV001").is_none());
    }

    #[test]
    fn test_stale_node_dropped() {
        let fx = Fixture::new();
        let id = fx.engine.create("DEV001", "alice", fx.at(0), fx.at(5), "").unwrap();
        let stale_generation = fx.engine.wheel().next_generation();
        fx.engine
            .wheel()
            .schedule(id, stale_generation, fx.at(1), fx.at(0))
            .unwrap();

        let report = fx.step();
        assert_eq!(report.stale, 1);
        assert_eq!(fx.engine.get(id).unwrap().status, ReservationStatus::Approved);
    }

    #[test]
    fn test_queries() {
        let fx = Fixture::new();
        let a = fx.engine.create("DEV001", "alice", fx.at(0), fx.at(5), "").unwrap();
        let b = fx.engine.create("DEV002", "bob", fx.at(0), fx.at(5), "").unwrap();
        let c = fx.engine.create("DEV002", "alice", fx.at(5), fx.at(9), "").unwrap();

        let ids: Vec<_> = fx.engine.list_for_user("alice").iter().map(|r| r.id).collect();
        assert_eq!(ids, [a, c]);
        let ids: Vec<_> = fx.engine.list_for_device("DEV002").iter().map(|r| r.id).collect();
        assert_eq!(ids, [b, c]);

        let summary = fx.engine.get(c).unwrap().to_summary();
        assert_eq!(summary.status, "Approved");
        assert_eq!(summary.end_time, fx.at(9));
    }

    #[test]
    fn test_ticker_thread_runs_and_stops() {
        let fx = Fixture::new();
        fx.engine.create("DEV001", "alice", fx.at(0), fx.at(1), "").unwrap();
        fx.clock.advance(5);

        let mut ticker = fx.engine.spawn_ticker(Duration::from_millis(5)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while fx.status("DEV001") != DeviceStatus::Available && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(fx.status("DEV001"), DeviceStatus::Available);

        assert!(ticker.is_running());
        ticker.shutdown();
        assert!(!ticker.is_running());
    }

    #[test]
    fn test_slow_tick_period_expires_within_one_period() {
        let fx = Fixture::with_config(&EngineConfig {
            max_reservations: 16,
            wheel_slots: 60,
            tick_interval_ms: 2000,
            reservation_buckets: 16,
        });
        assert_eq!(fx.engine.tick_period(), Duration::from_secs(2));

        let id = fx.engine.create("DEV001", "alice", fx.at(0), fx.at(3), "").unwrap();
        assert_eq!(fx.engine.get(id).unwrap().wheel_slot.bucket, 2);

        // t = 2: not over yet
        assert!(fx.step_by(2).completed.is_empty());
        assert_eq!(fx.status("DEV001"), DeviceStatus::Reserved);

        // t = 4: within one period of the end at t = 3
        let report = fx.step_by(2);
        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.completed[0].id, id);
        assert_eq!(fx.status("DEV001"), DeviceStatus::Available);
    }

    #[test]
    fn test_fast_tick_period_waits_for_end() {
        let fx = Fixture::with_config(&EngineConfig {
            max_reservations: 16,
            wheel_slots: 8,
            tick_interval_ms: 250,
            reservation_buckets: 16,
        });
        let id = fx.engine.create("DEV001", "alice", fx.at(0), fx.at(2), "").unwrap();

        // 8 ticks of 250ms, the clock only moves on whole seconds
        let mut completed_at = None;
        for tick in 1..=12 {
            if tick % 4 == 0 {
                fx.clock.advance(1);
            }
            if !fx.engine.tick().completed.is_empty() {
                completed_at = Some(tick);
                break;
            }
        }
        assert_eq!(completed_at, Some(8));
        assert!(fx.engine.get(id).is_none());
    }

    #[test]
    fn test_placement_not_overwritten_after_move() {
        let fx = Fixture::new();
        let id = fx.engine.create("DEV001", "alice", fx.at(0), fx.at(5), "").unwrap();
        let placed = fx.engine.get(id).unwrap().wheel_slot;
        assert_ne!(placed.bucket, WheelSlot::UNPLACED);

        // A late write from create must not clobber a bucket a tick chose
        let late = WheelSlot {
            bucket: placed.bucket + 1,
            generation: placed.generation,
        };
        assert!(!fx.engine.record_placement(id, late));
        assert_eq!(fx.engine.get(id).unwrap().wheel_slot, placed);
        assert!(!fx.engine.record_placement(ReservationId::new(99), late));
    }

    #[test]
    fn test_concurrent_create_cancel_and_tick() {
        let fx = Fixture::with_config(&EngineConfig {
            max_reservations: 1024,
            wheel_slots: 16,
            tick_interval_ms: 1000,
            reservation_buckets: 64,
        });
        let stop = Arc::new(AtomicBool::new(false));

        let ticker = {
            let engine = Arc::clone(&fx.engine);
            let clock = Arc::clone(&fx.clock);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    clock.advance(1);
                    engine.tick();
                    std::thread::yield_now();
                }
            })
        };

        let workers: Vec<_> = ["alice", "bob", "carol", "dave"]
            .into_iter()
            .enumerate()
            .map(|(n, user)| {
                let engine = Arc::clone(&fx.engine);
                let clock = Arc::clone(&fx.clock);
                std::thread::spawn(move || {
                    let mut mine = Vec::new();
                    for i in 0..200_i64 {
                        let offset = (i * 7 + n as i64 * 3) % 40;
                        let start = clock.now().add_secs(offset);
                        let end = start.add_secs(1 + i % 5);
                        match engine.create("DEV001", user, start, end, "") {
                            Ok(id) => mine.push(id),
                            Err(
                                ServerError::ReservationConflict { .. }
                                | ServerError::InvalidTime { .. },
                            ) => {}
                            Err(e) => panic!("unexpected create error: {e}"),
                        }
                        if i % 3 == 0 {
                            if let Some(id) = mine.pop() {
                                match engine.cancel(id, user) {
                                    Ok(_) | Err(ServerError::ReservationNotFound(_)) => {}
                                    Err(e) => panic!("unexpected cancel error: {e}"),
                                }
                            }
                        }
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        stop.store(true, Ordering::Relaxed);
        ticker.join().unwrap();

        let approved: Vec<_> = fx
            .engine
            .list_for_device("DEV001")
            .into_iter()
            .filter(|r| r.status == ReservationStatus::Approved)
            .collect();
        for (i, a) in approved.iter().enumerate() {
            for b in &approved[i + 1..] {
                assert!(!a.overlaps(b.start_time, b.end_time), "{a:?} overlaps {b:?}");
            }
        }

        let device = fx.engine.registry().get_device("DEV001").unwrap();
        assert_eq!(device.status == DeviceStatus::Reserved, !approved.is_empty());
        let earliest = approved.iter().min_by_key(|r| (r.start_time, r.id)).map(|r| r.id);
        assert_eq!(device.active_reservation_id, earliest);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Create { device: usize, user: usize, start: i64, len: i64 },
        Cancel { pick: usize, user: usize },
        Tick,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0..2usize, 0..3usize, 0..60i64, 1..20i64)
                .prop_map(|(device, user, start, len)| Op::Create { device, user, start, len }),
            1 => (0..64usize, 0..3usize).prop_map(|(pick, user)| Op::Cancel { pick, user }),
            1 => Just(Op::Tick),
        ]
    }

    proptest! {
        #[test]
        fn prop_no_overlapping_approved(ops in proptest::collection::vec(op(), 1..60)) {
            let fx = Fixture::new();
            let devices = ["DEV001", "DEV002"];
            let users = ["alice", "bob", "carol"];
            let mut created = Vec::new();

            for op in ops {
                match op {
                    Op::Create { device, user, start, len } => {
                        let now = fx.clock.now().secs_since(Timestamp::from_secs(T0));
                        let start = now + start;
                        let result = fx.engine.create(
                            devices[device], users[user], fx.at(start), fx.at(start + len), "",
                        );
                        match result {
                            Ok(id) => created.push(id),
                            Err(ServerError::ReservationConflict { existing, .. }) => {
                                let other = fx.engine.get(existing).unwrap();
                                prop_assert_eq!(other.status, ReservationStatus::Approved);
                                prop_assert!(other.overlaps(fx.at(start), fx.at(start + len)));
                            }
                            Err(e) => prop_assert!(false, "unexpected error {e}"),
                        }
                    }
                    Op::Cancel { pick, user } => {
                        if !created.is_empty() {
                            let id = created[pick % created.len()];
                            let _ = fx.engine.cancel(id, users[user]);
                        }
                    }
                    Op::Tick => {
                        fx.step();
                    }
                }

                for device in devices {
                    let approved: Vec<_> = fx
                        .engine
                        .list_for_device(device)
                        .into_iter()
                        .filter(|r| r.status == ReservationStatus::Approved)
                        .collect();
                    for (i, a) in approved.iter().enumerate() {
                        for b in &approved[i + 1..] {
                            prop_assert!(!a.overlaps(b.start_time, b.end_time));
                        }
                    }
                    let marked = fx.engine.registry().get_device(device).unwrap();
                    prop_assert_eq!(
                        marked.status == DeviceStatus::Reserved,
                        !approved.is_empty()
                    );
                }
            }
        }
    }
}
