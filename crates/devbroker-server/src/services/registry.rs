// ============================================
// File: crates/devbroker-server/src/services/registry.rs
// ============================================
//! # Resource Registry
//!
//! ## Creation Reason
//! Owns the catalogue of reservable devices and their current status,
//! so the reservation engine and the request handlers share one view of
//! what is free.
//!
//! ## Main Functionality
//! - `ResourceRegistry`: Device table on top of `HashIndex`
//! - `Device` / `DeviceStatus`: Device record and its status
//! - `ActiveReservation`: What a `Reserved` device points at
//!
//! ## Status Model
//! ```text
//!              update_status(Reserved, active)
//!   Available ─────────────────────────────────► Reserved
//!       ▲  ◄──────────────────────────────────────  │
//!       │        update_status(Available)           │
//!       ▼                                           │
//!  Maintenance ◄────────────────────────────────────┘
//! ```
//! `status == Reserved` exactly when `active_reservation_id` is set.
//!
//! ## ⚠️ Important Note for Next Developer
//! - `update_status` is unconditional; the engine decides transitions
//! - The registry never calls into the engine (lock order is
//!   engine → registry → index)
//! - `list_devices` returns copies; nothing outside holds a reference
//!   into the table
//!
//! ## Last Modified
//! v0.1.0 - Initial registry implementation

use std::fmt;

use parking_lot::Mutex;
use tracing::{debug, info};

use devbroker_common::index::HashIndex;
use devbroker_common::time::Timestamp;
use devbroker_common::types::ReservationId;
use devbroker_core::protocol::DeviceSummary;

use crate::config::DeviceConfig;
use crate::error::{Result, ServerError};

// ============================================
// DeviceStatus
// ============================================

/// Reservability of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceStatus {
    /// Free to reserve.
    Available,
    /// Held by an approved reservation.
    Reserved,
    /// Administratively withdrawn.
    Maintenance,
}

impl DeviceStatus {
    /// Returns the wire name of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::Reserved => "Reserved",
            Self::Maintenance => "Maintenance",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================
// Device
// ============================================

/// The reservation a `Reserved` device is marked with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveReservation {
    /// Reservation id
    pub id: ReservationId,
    /// When it ends
    pub end_time: Timestamp,
    /// Who holds it
    pub username: String,
}

/// A reservable device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Stable device id
    pub id: String,
    /// Display name
    pub name: String,
    /// Device type
    pub device_type: String,
    /// Current status
    pub status: DeviceStatus,
    /// Reservation holding the device, set only while `Reserved`
    pub active_reservation_id: Option<ReservationId>,
    /// End of that reservation
    pub reservation_end_time: Option<Timestamp>,
    /// Holder of that reservation, empty when none
    pub reserved_by: String,
}

impl Device {
    fn new(id: String, device_type: String, name: String) -> Self {
        Self {
            id,
            name,
            device_type,
            status: DeviceStatus::Available,
            active_reservation_id: None,
            reservation_end_time: None,
            reserved_by: String::new(),
        }
    }

    fn clear_reservation(&mut self) {
        self.active_reservation_id = None;
        self.reservation_end_time = None;
        self.reserved_by.clear();
    }

    /// Converts to the wire list entry.
    #[must_use]
    pub fn to_summary(&self) -> DeviceSummary {
        DeviceSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            device_type: self.device_type.clone(),
            status: self.status.as_str().to_string(),
            reservation_end_time: self
                .reservation_end_time
                .unwrap_or(Timestamp::from_secs(0)),
            reserved_by: self.reserved_by.clone(),
        }
    }
}

// ============================================
// ResourceRegistry
// ============================================

/// Device catalogue.
///
/// # Thread Safety
/// A registry-wide mutex serialises every operation, reads included, so
/// a status change and the read that follows it never interleave.
pub struct ResourceRegistry {
    devices: HashIndex<Device>,
    lock: Mutex<()>,
}

impl ResourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(bucket_count: usize) -> Self {
        Self {
            devices: HashIndex::new(bucket_count),
            lock: Mutex::new(()),
        }
    }

    /// Creates a registry holding the configured seed devices.
    ///
    /// # Errors
    /// `InvalidParameter` if a seed entry has an empty field.
    pub fn with_seed(bucket_count: usize, seed: &[DeviceConfig]) -> Result<Self> {
        let registry = Self::new(bucket_count);
        for device in seed {
            registry.add_device(&device.id, &device.device_type, &device.name)?;
        }
        info!(devices = registry.count(), "Device registry initialized");
        Ok(registry)
    }

    /// Adds a device, replacing any existing device with the same id.
    ///
    /// # Errors
    /// `InvalidParameter` if any argument is empty.
    pub fn add_device(&self, id: &str, device_type: &str, name: &str) -> Result<()> {
        for (field, value) in [("id", id), ("device_type", device_type), ("name", name)] {
            if value.is_empty() {
                return Err(ServerError::invalid_parameter(field, "cannot be empty"));
            }
        }

        let _guard = self.lock.lock();
        let device = Device::new(id.to_string(), device_type.to_string(), name.to_string());
        if self.devices.insert(id, device) {
            debug!(device_id = %id, device_type = %device_type, "Device added");
        } else {
            info!(device_id = %id, "Device replaced");
        }
        Ok(())
    }

    /// Removes a device.
    ///
    /// # Errors
    /// - `ResourceInUse` while the device is `Reserved`
    /// - `ResourceNotFound` if there is no such device
    pub fn remove_device(&self, id: &str) -> Result<()> {
        let _guard = self.lock.lock();
        match self.devices.with(id, |d| d.status) {
            None => Err(ServerError::ResourceNotFound(id.to_string())),
            Some(DeviceStatus::Reserved) => Err(ServerError::resource_in_use(
                id,
                "cannot remove a reserved device",
            )),
            Some(_) => {
                self.devices.delete(id);
                info!(device_id = %id, "Device removed");
                Ok(())
            }
        }
    }

    /// Sets a device's status.
    ///
    /// `Available` and `Maintenance` clear the reservation fields;
    /// `Reserved` copies them from `active`.
    ///
    /// # Errors
    /// - `ResourceNotFound` if there is no such device
    /// - `InvalidParameter` for `Reserved` without `active`
    pub fn update_status(
        &self,
        id: &str,
        status: DeviceStatus,
        active: Option<ActiveReservation>,
    ) -> Result<()> {
        if status == DeviceStatus::Reserved && active.is_none() {
            let _guard = self.lock.lock();
            if !self.devices.contains(id) {
                return Err(ServerError::ResourceNotFound(id.to_string()));
            }
            return Err(ServerError::invalid_parameter(
                "active",
                "Reserved requires an active reservation",
            ));
        }

        let _guard = self.lock.lock();
        self.devices
            .with_mut(id, |device| {
                device.status = status;
                match (status, active) {
                    (DeviceStatus::Reserved, Some(active)) => {
                        device.active_reservation_id = Some(active.id);
                        device.reservation_end_time = Some(active.end_time);
                        device.reserved_by = active.username;
                    }
                    _ => device.clear_reservation(),
                }
            })
            .ok_or_else(|| ServerError::ResourceNotFound(id.to_string()))?;

        debug!(device_id = %id, status = %status, "Device status updated");
        Ok(())
    }

    /// Returns up to `max_count` device copies sorted by id.
    #[must_use]
    pub fn list_devices(&self, max_count: usize) -> Vec<Device> {
        let _guard = self.lock.lock();
        let mut devices = Vec::with_capacity(self.devices.len());
        self.devices.for_each(|_, d| devices.push(d.clone()));
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices.truncate(max_count);
        devices
    }

    /// Returns `true` if the device exists and is `Available`.
    #[must_use]
    pub fn is_available(&self, id: &str) -> bool {
        let _guard = self.lock.lock();
        self.devices
            .with(id, |d| d.status == DeviceStatus::Available)
            .unwrap_or(false)
    }

    /// Returns a copy of one device.
    #[must_use]
    pub fn get_device(&self, id: &str) -> Option<Device> {
        let _guard = self.lock.lock();
        self.devices.get(id)
    }

    /// Returns the number of devices.
    #[must_use]
    pub fn count(&self) -> usize {
        let _guard = self.lock.lock();
        self.devices.len()
    }
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("devices", &self.devices.len())
            .finish()
    }
}

// ============================================
// Tests
// ============================================
