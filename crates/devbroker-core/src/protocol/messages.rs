// ============================================
// File: crates/devbroker-core/src/protocol/messages.rs
// ============================================
//! # Protocol Message Definitions
//!
//! ## Creation Reason
//! Defines the message envelope exchanged between DevBroker clients and
//! the server, the typed view of client requests, and the fixed-stride
//! layouts used for device and reservation lists.
//!
//! ## Main Functionality
//! - `MessageType`: Numeric message type identification
//! - `Message`: Envelope of type, one data string and ordered arguments
//! - `Request`: Typed, validated view of a client request
//! - `DeviceSummary` / `ReservationSummary`: List entries and their
//!   stride-6 / stride-7 argument layouts
//!
//! ## Field Limits
//! | Field | Max |
//! |-------|-----|
//! | argument | 256 bytes |
//! | data | 1024 bytes |
//! | argument count | 768 |
//!
//! ## Request / Response Pairs
//! | Request | Args | Response |
//! |---------|------|----------|
//! | Login | username, password | LoginOk (data = token) |
//! | Logout | | Logout |
//! | ListDevices | | DeviceList (stride 6) |
//! | Reserve | deviceId, start, end, reason? | ReserveOk (data = id) |
//! | Cancel | reservationId | CancelOk (data = id) |
//! | QueryDevice | deviceId | ReservationInfo (stride 7, 0 or 1 group) |
//! | ListReservations | | ReservationList (stride 7) |
//! | Heartbeat | | HeartbeatAck |
//!
//! Any request may instead be answered with `Error` (args[0] = code,
//! data = description). `StatusUpdate` is pushed unsolicited.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Type numbers are wire-visible: append new types, never renumber
//! - Stride layouts are consumed positionally by clients; do not reorder
//! - `Request::Login` holds a password; its `Debug` redacts it
//!
//! ## Last Modified
//! v0.1.0 - Initial message definitions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use devbroker_common::time::Timestamp;
use devbroker_common::types::{ErrorCode, ReservationId};

use crate::error::{CoreError, Result};

// ============================================
// Limits
// ============================================

/// Maximum length of one argument in bytes.
pub const MAX_ARG_LEN: usize = 256;

/// Maximum length of the data field in bytes.
pub const MAX_DATA_LEN: usize = 1024;

/// Maximum number of arguments in one message.
pub const MAX_ARG_COUNT: usize = 768;

/// Size of the fixed `type | argCount` header.
pub const HEADER_SIZE: usize = 8;

/// Size of every length prefix.
pub const LEN_PREFIX_SIZE: usize = 4;

/// Arguments per device in a device list.
pub const DEVICE_STRIDE: usize = 6;

/// Arguments per reservation in a reservation list.
pub const RESERVATION_STRIDE: usize = 7;

/// Most devices a single list message can carry.
pub const MAX_DEVICES_PER_MESSAGE: usize = MAX_ARG_COUNT / DEVICE_STRIDE;

/// Most reservations a single list message can carry.
pub const MAX_RESERVATIONS_PER_MESSAGE: usize = MAX_ARG_COUNT / RESERVATION_STRIDE;

// ============================================
// MessageType
// ============================================

/// Protocol message type identifier, sent as a big-endian `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum MessageType {
    /// Client login with username and password.
    Login = 1,
    /// Login accepted; data carries the session token.
    LoginOk = 2,
    /// Client logout (also echoed back as acknowledgement).
    Logout = 3,
    /// Request the device list.
    ListDevices = 4,
    /// Device list response.
    DeviceList = 5,
    /// Reserve a device for an interval.
    Reserve = 6,
    /// Reservation created.
    ReserveOk = 7,
    /// Cancel a reservation.
    Cancel = 8,
    /// Reservation cancelled.
    CancelOk = 9,
    /// Ask for a device's active reservation.
    QueryDevice = 10,
    /// Active reservation of a device.
    ReservationInfo = 11,
    /// Request the caller's reservations.
    ListReservations = 12,
    /// Caller's reservations.
    ReservationList = 13,
    /// Unsolicited device list push.
    StatusUpdate = 14,
    /// Request failed.
    Error = 15,
    /// Liveness probe.
    Heartbeat = 16,
    /// Liveness answer.
    HeartbeatAck = 17,
}

impl MessageType {
    /// Converts a raw value to a `MessageType`.
    #[must_use]
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Login),
            2 => Some(Self::LoginOk),
            3 => Some(Self::Logout),
            4 => Some(Self::ListDevices),
            5 => Some(Self::DeviceList),
            6 => Some(Self::Reserve),
            7 => Some(Self::ReserveOk),
            8 => Some(Self::Cancel),
            9 => Some(Self::CancelOk),
            10 => Some(Self::QueryDevice),
            11 => Some(Self::ReservationInfo),
            12 => Some(Self::ListReservations),
            13 => Some(Self::ReservationList),
            14 => Some(Self::StatusUpdate),
            15 => Some(Self::Error),
            16 => Some(Self::Heartbeat),
            17 => Some(Self::HeartbeatAck),
            _ => None,
        }
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// Returns the type name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Login => "Login",
            Self::LoginOk => "LoginOk",
            Self::Logout => "Logout",
            Self::ListDevices => "ListDevices",
            Self::DeviceList => "DeviceList",
            Self::Reserve => "Reserve",
            Self::ReserveOk => "ReserveOk",
            Self::Cancel => "Cancel",
            Self::CancelOk => "CancelOk",
            Self::QueryDevice => "QueryDevice",
            Self::ReservationInfo => "ReservationInfo",
            Self::ListReservations => "ListReservations",
            Self::ReservationList => "ReservationList",
            Self::StatusUpdate => "StatusUpdate",
            Self::Error => "Error",
            Self::Heartbeat => "Heartbeat",
            Self::HeartbeatAck => "HeartbeatAck",
        }
    }

    /// Checks if clients may send this type.
    #[must_use]
    pub const fn is_request(&self) -> bool {
        matches!(
            self,
            Self::Login
                | Self::Logout
                | Self::ListDevices
                | Self::Reserve
                | Self::Cancel
                | Self::QueryDevice
                | Self::ListReservations
                | Self::Heartbeat
        )
    }

    /// Checks if this request may be sent before logging in.
    #[must_use]
    pub const fn allowed_anonymous(&self) -> bool {
        matches!(self, Self::Login | Self::Heartbeat)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u32> for MessageType {
    type Error = u32;

    fn try_from(value: u32) -> std::result::Result<Self, u32> {
        Self::from_u32(value).ok_or(value)
    }
}

impl From<MessageType> for u32 {
    fn from(msg_type: MessageType) -> Self {
        msg_type.as_u32()
    }
}

// ============================================
// Message
// ============================================

/// Protocol message envelope.
///
/// # Wire Format (big-endian)
/// ```text
/// ┌──────────┬──────────┬─────────────────────────────┬──────────┬──────────┐
/// │ type u32 │ argc u32 │ (len u32 | bytes) * argc     │ len u32  │ data     │
/// └──────────┴──────────┴─────────────────────────────┴──────────┴──────────┘
/// ```
///
/// # Example
/// ```
/// use devbroker_core::protocol::{Message, MessageType};
///
/// let msg = Message::new(MessageType::Cancel).with_arg("42");
/// assert_eq!(msg.arg(0), Some("42"));
/// assert_eq!(msg.wire_size(), 8 + 4 + 2 + 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message type.
    pub msg_type: MessageType,
    /// Free-form data field.
    pub data: String,
    /// Ordered arguments.
    pub args: Vec<String>,
}

impl Message {
    /// Creates an empty message of the given type.
    #[must_use]
    pub const fn new(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            data: String::new(),
            args: Vec::new(),
        }
    }

    /// Sets the data field.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    /// Appends one argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Returns argument `index`, if present.
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Returns argument `index` or a `MissingArgument` error.
    pub fn required_arg(&self, index: usize) -> Result<&str> {
        self.arg(index).ok_or(CoreError::MissingArgument {
            msg_type: self.msg_type.name(),
            index,
        })
    }

    /// Parses argument `index`.
    pub fn parse_arg<T>(&self, index: usize, name: &'static str) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.required_arg(index)?
            .parse::<T>()
            .map_err(|e| CoreError::invalid_argument(name, e.to_string()))
    }

    /// Returns the encoded size in bytes.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE
            + self
                .args
                .iter()
                .map(|a| LEN_PREFIX_SIZE + a.len())
                .sum::<usize>()
            + LEN_PREFIX_SIZE
            + self.data.len()
    }

    /// Checks every field against the protocol limits.
    pub fn validate(&self) -> Result<()> {
        if self.args.len() > MAX_ARG_COUNT {
            return Err(CoreError::too_large("argCount", MAX_ARG_COUNT, self.args.len()));
        }
        if let Some(arg) = self.args.iter().find(|a| a.len() > MAX_ARG_LEN) {
            return Err(CoreError::too_large("arg", MAX_ARG_LEN, arg.len()));
        }
        if self.data.len() > MAX_DATA_LEN {
            return Err(CoreError::too_large("data", MAX_DATA_LEN, self.data.len()));
        }
        Ok(())
    }

    // ========================================
    // Client Requests
    // ========================================

    /// Builds a `Login` request.
    #[must_use]
    pub fn login(username: &str, password: &str) -> Self {
        Self::new(MessageType::Login).with_args([username, password])
    }

    /// Builds a `Reserve` request.
    #[must_use]
    pub fn reserve(device_id: &str, start: Timestamp, end: Timestamp, reason: &str) -> Self {
        Self::new(MessageType::Reserve).with_args([
            device_id.to_string(),
            start.to_string(),
            end.to_string(),
            reason.to_string(),
        ])
    }

    /// Builds a `Cancel` request.
    #[must_use]
    pub fn cancel(id: ReservationId) -> Self {
        Self::new(MessageType::Cancel).with_arg(id.to_string())
    }

    /// Builds a `QueryDevice` request.
    #[must_use]
    pub fn query_device(device_id: &str) -> Self {
        Self::new(MessageType::QueryDevice).with_arg(device_id)
    }

    // ========================================
    // Server Responses
    // ========================================

    /// Builds an `Error` response.
    #[must_use]
    pub fn error(code: ErrorCode, description: impl Into<String>) -> Self {
        let mut description: String = description.into();
        truncate_utf8(&mut description, MAX_DATA_LEN);
        Self::new(MessageType::Error)
            .with_arg(code.as_u32().to_string())
            .with_data(description)
    }

    /// Returns the error code of an `Error` message.
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        if self.msg_type != MessageType::Error {
            return None;
        }
        self.arg(0)?.parse::<u32>().ok().and_then(ErrorCode::from_u32)
    }

    /// Builds a device list message (`DeviceList` or `StatusUpdate`).
    ///
    /// Devices beyond `MAX_DEVICES_PER_MESSAGE` are left out.
    #[must_use]
    pub fn device_list(msg_type: MessageType, devices: &[DeviceSummary]) -> Self {
        let devices = &devices[..devices.len().min(MAX_DEVICES_PER_MESSAGE)];
        let mut msg = Self::new(msg_type).with_data(devices.len().to_string());
        msg.args.reserve(devices.len() * DEVICE_STRIDE);
        for device in devices {
            device.push_args(&mut msg.args);
        }
        msg
    }

    /// Builds a reservation list message (`ReservationList` or
    /// `ReservationInfo`).
    ///
    /// Reservations beyond `MAX_RESERVATIONS_PER_MESSAGE` are left out.
    #[must_use]
    pub fn reservation_list(msg_type: MessageType, reservations: &[ReservationSummary]) -> Self {
        let reservations = &reservations[..reservations.len().min(MAX_RESERVATIONS_PER_MESSAGE)];
        let mut msg = Self::new(msg_type).with_data(reservations.len().to_string());
        msg.args.reserve(reservations.len() * RESERVATION_STRIDE);
        for reservation in reservations {
            reservation.push_args(&mut msg.args);
        }
        msg
    }

    /// Parses the stride-6 device groups of this message.
    pub fn devices(&self) -> Result<Vec<DeviceSummary>> {
        strided(&self.args, DEVICE_STRIDE)?
            .map(DeviceSummary::from_args)
            .collect()
    }

    /// Parses the stride-7 reservation groups of this message.
    pub fn reservations(&self) -> Result<Vec<ReservationSummary>> {
        strided(&self.args, RESERVATION_STRIDE)?
            .map(ReservationSummary::from_args)
            .collect()
    }
}

fn strided(args: &[String], stride: usize) -> Result<std::slice::ChunksExact<'_, String>> {
    if args.len() % stride != 0 {
        return Err(CoreError::malformed(format!(
            "{} arguments is not a multiple of stride {stride}",
            args.len()
        )));
    }
    Ok(args.chunks_exact(stride))
}

/// Shortens `s` to at most `max` bytes on a char boundary.
pub(crate) fn truncate_utf8(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}

// ============================================
// List Entries
// ============================================

/// One device in a device list.
///
/// Layout: `[id, name, type, status, reservationEndTime, reservedBy]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    /// Device id
    pub id: String,
    /// Display name
    pub name: String,
    /// Device type
    pub device_type: String,
    /// `Available`, `Reserved` or `Maintenance`
    pub status: String,
    /// End of the active reservation, 0 when none
    pub reservation_end_time: Timestamp,
    /// Holder of the active reservation, empty when none
    pub reserved_by: String,
}

impl DeviceSummary {
    fn push_args(&self, args: &mut Vec<String>) {
        args.extend([
            self.id.clone(),
            self.name.clone(),
            self.device_type.clone(),
            self.status.clone(),
            self.reservation_end_time.to_string(),
            self.reserved_by.clone(),
        ]);
    }

    fn from_args(group: &[String]) -> Result<Self> {
        let reservation_end_time = group[4]
            .parse::<Timestamp>()
            .map_err(|e| CoreError::invalid_argument("reservationEndTime", e.to_string()))?;
        Ok(Self {
            id: group[0].clone(),
            name: group[1].clone(),
            device_type: group[2].clone(),
            status: group[3].clone(),
            reservation_end_time,
            reserved_by: group[5].clone(),
        })
    }
}

/// One reservation in a reservation list.
///
/// Layout: `[id, deviceId, username, start, end, status, reason]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationSummary {
    /// Reservation id
    pub id: ReservationId,
    /// Reserved device
    pub device_id: String,
    /// Owner
    pub username: String,
    /// Interval start
    pub start_time: Timestamp,
    /// Interval end (exclusive)
    pub end_time: Timestamp,
    /// `Approved`, `Cancelled` or `Completed`
    pub status: String,
    /// Free-form reason
    pub reason: String,
}

impl ReservationSummary {
    fn push_args(&self, args: &mut Vec<String>) {
        args.extend([
            self.id.to_string(),
            self.device_id.clone(),
            self.username.clone(),
            self.start_time.to_string(),
            self.end_time.to_string(),
            self.status.clone(),
            self.reason.clone(),
        ]);
    }

    fn from_args(group: &[String]) -> Result<Self> {
        let id = group[0]
            .parse::<ReservationId>()
            .map_err(|e| CoreError::invalid_argument("id", e.to_string()))?;
        let start_time = group[3]
            .parse::<Timestamp>()
            .map_err(|e| CoreError::invalid_argument("start", e.to_string()))?;
        let end_time = group[4]
            .parse::<Timestamp>()
            .map_err(|e| CoreError::invalid_argument("end", e.to_string()))?;
        Ok(Self {
            id,
            device_id: group[1].clone(),
            username: group[2].clone(),
            start_time,
            end_time,
            status: group[5].clone(),
            reason: group[6].clone(),
        })
    }
}

// ============================================
// Request
// ============================================

/// Typed view of a client request.
#[derive(Clone, PartialEq, Eq)]
pub enum Request {
    /// Authenticate.
    Login {
        /// Account name
        username: String,
        /// Clear-text password (the stream is assumed encrypted)
        password: String,
    },
    /// End the session.
    Logout,
    /// List devices.
    ListDevices,
    /// Reserve a device.
    Reserve {
        /// Target device
        device_id: String,
        /// Interval start
        start_time: Timestamp,
        /// Interval end (exclusive)
        end_time: Timestamp,
        /// Optional reason, empty when omitted
        reason: String,
    },
    /// Cancel a reservation.
    Cancel {
        /// Reservation to cancel
        reservation_id: ReservationId,
    },
    /// Query a device's active reservation.
    QueryDevice {
        /// Device to query
        device_id: String,
    },
    /// List the caller's reservations.
    ListReservations,
    /// Liveness probe.
    Heartbeat,
}

impl Request {
    /// Returns the message type this request was parsed from.
    #[must_use]
    pub const fn msg_type(&self) -> MessageType {
        match self {
            Self::Login { .. } => MessageType::Login,
            Self::Logout => MessageType::Logout,
            Self::ListDevices => MessageType::ListDevices,
            Self::Reserve { .. } => MessageType::Reserve,
            Self::Cancel { .. } => MessageType::Cancel,
            Self::QueryDevice { .. } => MessageType::QueryDevice,
            Self::ListReservations => MessageType::ListReservations,
            Self::Heartbeat => MessageType::Heartbeat,
        }
    }
}

impl TryFrom<&Message> for Request {
    type Error = CoreError;

    fn try_from(msg: &Message) -> Result<Self> {
        let request = match msg.msg_type {
            MessageType::Login => Self::Login {
                username: msg.required_arg(0)?.to_string(),
                password: msg.required_arg(1)?.to_string(),
            },
            MessageType::Logout => Self::Logout,
            MessageType::ListDevices => Self::ListDevices,
            MessageType::Reserve => Self::Reserve {
                device_id: msg.required_arg(0)?.to_string(),
                start_time: msg.parse_arg(1, "start")?,
                end_time: msg.parse_arg(2, "end")?,
                reason: msg.arg(3).unwrap_or_default().to_string(),
            },
            MessageType::Cancel => Self::Cancel {
                reservation_id: msg.parse_arg(0, "reservationId")?,
            },
            MessageType::QueryDevice => Self::QueryDevice {
                device_id: msg.required_arg(0)?.to_string(),
            },
            MessageType::ListReservations => Self::ListReservations,
            MessageType::Heartbeat => Self::Heartbeat,
            other => {
                return Err(CoreError::malformed(format!(
                    "{other} is not a client request"
                )))
            }
        };
        Ok(request)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Login { username, .. } => f
                .debug_struct("Login")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Self::Logout => f.write_str("Logout"),
            Self::ListDevices => f.write_str("ListDevices"),
            Self::Reserve {
                device_id,
                start_time,
                end_time,
                reason,
            } => f
                .debug_struct("Reserve")
                .field("device_id", device_id)
                .field("start_time", start_time)
                .field("end_time", end_time)
                .field("reason", reason)
                .finish(),
            Self::Cancel { reservation_id } => f
                .debug_struct("Cancel")
                .field("reservation_id", reservation_id)
                .finish(),
            Self::QueryDevice { device_id } => f
                .debug_struct("QueryDevice")
                .field("device_id", device_id)
                .finish(),
            Self::ListReservations => f.write_str("ListReservations"),
            Self::Heartbeat => f.write_str("Heartbeat"),
        }
    }
}

// ============================================
// Tests
// ============================================
