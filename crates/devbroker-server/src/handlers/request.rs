// ============================================
// File: crates/devbroker-server/src/handlers/request.rs
// ============================================
//! # Request Handler
//!
//! ## Creation Reason
//! Turns decoded client messages into calls on the services and the
//! results back into protocol responses.
//!
//! ## Main Functionality
//! - `RequestHandler`: Dispatch of every client request type
//! - `ConnectionContext`: Per-connection login state
//!
//! ## Request Processing
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  1. Parse Message → Request                                 │
//! │     (non-request type: protocol violation, close)           │
//! │     (missing/unparsable argument: InvalidParameter reply)   │
//! │                                                             │
//! │  2. Refresh the session (touch); a stale session drops the  │
//! │     connection back to anonymous                            │
//! │                                                             │
//! │  3. Reject anything but Login/Heartbeat when anonymous      │
//! │                                                             │
//! │  4. Call engine / registry / sessions                       │
//! │                                                             │
//! │  5. Success → response message                              │
//! │     Failure → Error { args[0] = code, data = text }         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! | Request            | Response                                  |
//! |--------------------|-------------------------------------------|
//! | `Login`            | `LoginOk`, data = session token (hex)     |
//! | `Logout`           | `Logout`                                  |
//! | `ListDevices`      | `DeviceList`, stride 6, data = count      |
//! | `Reserve`          | `ReserveOk`, data = reservation id        |
//! | `Cancel`           | `CancelOk`, data = id, args = [changed]   |
//! | `QueryDevice`      | `ReservationInfo`, stride 7, 0 or 1 group |
//! | `ListReservations` | `ReservationList`, stride 7               |
//! | `Heartbeat`        | `HeartbeatAck`                            |
//!
//! ## ⚠️ Important Note for Next Developer
//! - `handle` only returns `Err` when the connection must be closed;
//!   every other failure is an `Error` reply
//! - The engine trusts the username passed in here; never take it from
//!   the request arguments
//!
//! ## Last Modified
//! v0.1.0 - Initial request handler

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info};

use devbroker_common::types::{ReservationId, SessionToken};
use devbroker_common::time::Timestamp;
use devbroker_core::protocol::{Message, MessageType, Request};

use crate::error::{Result, ServerError};
use crate::services::{CredentialStore, ReservationEngine, ResourceRegistry, SessionRegistry};

// ============================================
// ConnectionContext
// ============================================

struct Authenticated {
    username: String,
    token: SessionToken,
}

/// Login state of one connection.
pub struct ConnectionContext {
    peer: SocketAddr,
    auth: Option<Authenticated>,
}

impl ConnectionContext {
    /// Creates an anonymous context.
    #[must_use]
    pub const fn new(peer: SocketAddr) -> Self {
        Self { peer, auth: None }
    }

    /// Returns the remote address.
    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Returns the logged-in username.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.auth.as_ref().map(|a| a.username.as_str())
    }

    /// Returns `true` once the connection has logged in.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.auth.is_some()
    }
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("peer", &self.peer)
            .field("username", &self.username())
            .finish()
    }
}

// ============================================
// RequestHandler
// ============================================

/// Dispatches client requests to the services.
///
/// # Thread Safety
/// Shared by all connection tasks; all state lives in the services or in
/// the caller's `ConnectionContext`.
pub struct RequestHandler {
    engine: Arc<ReservationEngine>,
    registry: Arc<ResourceRegistry>,
    sessions: Arc<SessionRegistry>,
    credentials: Arc<CredentialStore>,
    max_list: usize,
}

impl RequestHandler {
    /// Creates a handler.
    #[must_use]
    pub fn new(
        engine: Arc<ReservationEngine>,
        sessions: Arc<SessionRegistry>,
        credentials: Arc<CredentialStore>,
        max_list: usize,
    ) -> Self {
        Self {
            registry: Arc::clone(engine.registry()),
            engine,
            sessions,
            credentials,
            max_list,
        }
    }

    /// Handles one message from a client.
    ///
    /// # Returns
    /// The response to send, which is an `Error` message for request
    /// failures.
    ///
    /// # Errors
    /// Only errors that must close the connection (protocol violations).
    pub fn handle(&self, ctx: &mut ConnectionContext, msg: &Message) -> Result<Message> {
        let outcome = Request::try_from(msg)
            .map_err(ServerError::from)
            .and_then(|request| self.dispatch(ctx, request));

        match outcome {
            Ok(reply) => Ok(reply),
            Err(e) if e.closes_connection() => Err(e),
            Err(e) => {
                debug!(
                    peer = %ctx.peer,
                    username = ctx.username().unwrap_or("-"),
                    request = %msg.msg_type,
                    code = %e.code(),
                    error = %e,
                    "Request rejected"
                );
                Ok(Message::error(e.code(), e.to_string()))
            }
        }
    }

    /// Ends the connection's session, if any. Called once the connection
    /// is gone.
    pub fn disconnect(&self, ctx: &mut ConnectionContext) {
        if let Some(auth) = ctx.auth.take() {
            if self.sessions.end(&auth.username, &auth.token) {
                info!(username = %auth.username, peer = %ctx.peer, "Session closed with connection");
            }
        }
    }

    fn dispatch(&self, ctx: &mut ConnectionContext, request: Request) -> Result<Message> {
        if let Some(auth) = &ctx.auth {
            if !self.sessions.touch(&auth.username, &auth.token) {
                debug!(username = %auth.username, "Session no longer valid");
                ctx.auth = None;
            }
        }

        let msg_type = request.msg_type();
        if !msg_type.allowed_anonymous() && ctx.auth.is_none() {
            return Err(ServerError::NotAuthenticated);
        }

        match request {
            Request::Login { username, password } => self.login(ctx, &username, &password),
            Request::Logout => Ok(self.logout(ctx)),
            Request::ListDevices => Ok(self.list_devices()),
            Request::Reserve {
                device_id,
                start_time,
                end_time,
                reason,
            } => self.reserve(ctx, &device_id, start_time, end_time, &reason),
            Request::Cancel { reservation_id } => self.cancel(ctx, reservation_id),
            Request::QueryDevice { device_id } => self.query_device(&device_id),
            Request::ListReservations => Ok(self.list_reservations(ctx)),
            Request::Heartbeat => Ok(Message::new(MessageType::HeartbeatAck)),
        }
    }

    // ========================================
    // Session Requests
    // ========================================

    fn login(&self, ctx: &mut ConnectionContext, username: &str, password: &str) -> Result<Message> {
        if let Some(current) = ctx.username() {
            return Err(ServerError::SessionAlreadyExists(current.to_string()));
        }

        self.credentials.verify(username, password)?;
        let token = self.sessions.login(username, ctx.peer)?;
        let reply = Message::new(MessageType::LoginOk)
            .with_arg(username)
            .with_data(token.to_string());

        ctx.auth = Some(Authenticated {
            username: username.to_string(),
            token,
        });
        Ok(reply)
    }

    fn logout(&self, ctx: &mut ConnectionContext) -> Message {
        if let Some(auth) = ctx.auth.take() {
            self.sessions.end(&auth.username, &auth.token);
        }
        Message::new(MessageType::Logout)
    }

    // ========================================
    // Device Requests
    // ========================================

    fn list_devices(&self) -> Message {
        let devices: Vec<_> = self
            .registry
            .list_devices(self.max_list)
            .iter()
            .map(crate::services::Device::to_summary)
            .collect();
        Message::device_list(MessageType::DeviceList, &devices)
    }

    fn query_device(&self, device_id: &str) -> Result<Message> {
        if self.registry.get_device(device_id).is_none() {
            return Err(ServerError::ResourceNotFound(device_id.to_string()));
        }
        let active: Vec<_> = self
            .engine
            .get_active_for_device(device_id)
            .map(|r| r.to_summary())
            .into_iter()
            .collect();
        Ok(Message::reservation_list(MessageType::ReservationInfo, &active))
    }

    // ========================================
    // Reservation Requests
    // ========================================

    fn reserve(
        &self,
        ctx: &ConnectionContext,
        device_id: &str,
        start: Timestamp,
        end: Timestamp,
        reason: &str,
    ) -> Result<Message> {
        let username = ctx.username().ok_or(ServerError::NotAuthenticated)?;
        let id = self.engine.create(device_id, username, start, end, reason)?;
        Ok(Message::new(MessageType::ReserveOk).with_data(id.to_string()))
    }

    fn cancel(&self, ctx: &ConnectionContext, id: ReservationId) -> Result<Message> {
        let username = ctx.username().ok_or(ServerError::NotAuthenticated)?;
        let changed = self.engine.cancel(id, username)?;
        Ok(Message::new(MessageType::CancelOk)
            .with_arg(changed.to_string())
            .with_data(id.to_string()))
    }

    fn list_reservations(&self, ctx: &ConnectionContext) -> Message {
        let reservations: Vec<_> = ctx
            .username()
            .map(|u| self.engine.list_for_user(u))
            .unwrap_or_default()
            .iter()
            .map(crate::services::Reservation::to_summary)
            .collect();
        Message::reservation_list(MessageType::ReservationList, &reservations)
    }
}

impl fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandler")
            .field("engine", &self.engine)
            .field("sessions", &self.sessions)
            .field("max_list", &self.max_list)
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use devbroker_common::time::{Clock, ManualClock};
    use devbroker_common::types::ErrorCode;
    use std::time::Duration;
    use tokio::sync::mpsc;

    use crate::config::EngineConfig;

    const T0: i64 = 50_000;

    fn handler() -> (RequestHandler, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Timestamp::from_secs(T0)));
        let dyn_clock = Arc::clone(&clock) as Arc<dyn Clock>;
        let registry = Arc::new(ResourceRegistry::new(8));
        registry.add_device("DEV001", "scope", "Scope").unwrap();
        registry.add_device("DEV002", "psu", "Supply").unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let engine = Arc::new(ReservationEngine::new(
            &EngineConfig::default(),
            registry,
            Arc::clone(&dyn_clock),
            tx,
        ));
        let sessions = Arc::new(SessionRegistry::new(8, 8, Duration::from_secs(60), dyn_clock));
        let mut credentials = CredentialStore::default();
        credentials.insert("alice", "a-pass");
        credentials.insert("bob", "b-pass");

        (
            RequestHandler::new(engine, sessions, Arc::new(credentials), 100),
            clock,
        )
    }

    fn ctx() -> ConnectionContext {
        ConnectionContext::new("127.0.0.1:9000".parse().unwrap())
    }

    fn login(handler: &RequestHandler, user: &str, pass: &str) -> ConnectionContext {
        let mut ctx = ctx();
        let reply = handler.handle(&mut ctx, &Message::login(user, pass)).unwrap();
        assert_eq!(reply.msg_type, MessageType::LoginOk);
        ctx
    }

    fn at(offset: i64) -> Timestamp {
        Timestamp::from_secs(T0 + offset)
    }

    #[test]
    fn test_login_flow() {
        let (handler, _) = handler();
        let mut ctx = ctx();

        let reply = handler.handle(&mut ctx, &Message::login("alice", "wrong")).unwrap();
        assert_eq!(reply.error_code(), Some(ErrorCode::AuthenticationFailed));
        assert!(!ctx.is_authenticated());

        let reply = handler.handle(&mut ctx, &Message::login("alice", "a-pass")).unwrap();
        assert_eq!(reply.msg_type, MessageType::LoginOk);
        assert_eq!(reply.data.len(), 32);
        assert_eq!(ctx.username(), Some("alice"));

        // Second login on another connection is refused
        let mut other = super::ConnectionContext::new("127.0.0.1:9001".parse().unwrap());
        let reply = handler.handle(&mut other, &Message::login("alice", "a-pass")).unwrap();
        assert_eq!(reply.error_code(), Some(ErrorCode::SessionAlreadyExists));
    }

    #[test]
    fn test_anonymous_requests_rejected() {
        let (handler, _) = handler();
        let mut ctx = ctx();
        for msg in [
            Message::new(MessageType::ListDevices),
            Message::new(MessageType::ListReservations),
            Message::query_device("DEV001"),
            Message::cancel(ReservationId::new(1)),
        ] {
            let reply = handler.handle(&mut ctx, &msg).unwrap();
            assert_eq!(reply.error_code(), Some(ErrorCode::NotAuthenticated));
        }

        let reply = handler
            .handle(&mut ctx, &Message::new(MessageType::Heartbeat))
            .unwrap();
        assert_eq!(reply.msg_type, MessageType::HeartbeatAck);
    }

    #[test]
    fn test_reserve_query_cancel() {
        let (handler, _) = handler();
        let mut alice = login(&handler, "alice", "a-pass");

        let reply = handler
            .handle(&mut alice, &Message::reserve("DEV001", at(0), at(60), "scope"))
            .unwrap();
        assert_eq!(reply.msg_type, MessageType::ReserveOk);
        let id: ReservationId = reply.data.parse().unwrap();

        let reply = handler.handle(&mut alice, &Message::query_device("DEV001")).unwrap();
        assert_eq!(reply.msg_type, MessageType::ReservationInfo);
        let info = reply.reservations().unwrap();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].id, id);
        assert_eq!(info[0].reason, "scope");

        let reply = handler.handle(&mut alice, &Message::cancel(id)).unwrap();
        assert_eq!(reply.msg_type, MessageType::CancelOk);
        assert_eq!(reply.arg(0), Some("true"));

        let reply = handler.handle(&mut alice, &Message::cancel(id)).unwrap();
        assert_eq!(reply.msg_type, MessageType::CancelOk);
        assert_eq!(reply.arg(0), Some("false"));

        let reply = handler.handle(&mut alice, &Message::query_device("DEV001")).unwrap();
        assert_eq!(reply.data, "0");
        assert!(reply.args.is_empty());
    }

    #[test]
    fn test_error_replies() {
        let (handler, _) = handler();
        let mut alice = login(&handler, "alice", "a-pass");
        let mut bob = login(&handler, "bob", "b-pass");

        let reply = handler
            .handle(&mut alice, &Message::reserve("DEV001", at(0), at(10), ""))
            .unwrap();
        let id: ReservationId = reply.data.parse().unwrap();

        let cases = [
            (Message::reserve("DEV001", at(5), at(15), ""), ErrorCode::ReservationConflict),
            (Message::reserve("DEV002", at(5), at(1), ""), ErrorCode::ReservationInvalidTime),
            (Message::reserve("NOPE", at(5), at(10), ""), ErrorCode::ResourceNotFound),
            (Message::query_device("NOPE"), ErrorCode::ResourceNotFound),
            (Message::cancel(id), ErrorCode::ReservationPermissionDenied),
            (Message::cancel(ReservationId::new(999)), ErrorCode::ReservationNotFound),
            (
                Message::new(MessageType::Reserve).with_args(["DEV001", "soon", "later"]),
                ErrorCode::InvalidParameter,
            ),
            (Message::new(MessageType::Cancel), ErrorCode::InvalidParameter),
        ];
        for (msg, code) in cases {
            let reply = handler.handle(&mut bob, &msg).unwrap();
            assert_eq!(reply.error_code(), Some(code), "request {msg:?}");
        }
    }

    #[test]
    fn test_non_request_closes_connection() {
        let (handler, _) = handler();
        let mut ctx = ctx();
        let err = handler
            .handle(&mut ctx, &Message::new(MessageType::StatusUpdate))
            .unwrap_err();
        assert!(err.closes_connection());
        assert_eq!(err.code(), ErrorCode::ProtocolViolation);
    }

    #[test]
    fn test_list_devices_and_reservations() {
        let (handler, _) = handler();
        let mut alice = login(&handler, "alice", "a-pass");
        handler
            .handle(&mut alice, &Message::reserve("DEV002", at(0), at(10), ""))
            .unwrap();

        let reply = handler
            .handle(&mut alice, &Message::new(MessageType::ListDevices))
            .unwrap();
        assert_eq!(reply.msg_type, MessageType::DeviceList);
        assert_eq!(reply.data, "2");
        let devices = reply.devices().unwrap();
        assert_eq!(devices[1].id, "DEV002");
        assert_eq!(devices[1].status, "Reserved");
        assert_eq!(devices[1].reserved_by, "alice");
        assert_eq!(devices[1].reservation_end_time, at(10));

        let reply = handler
            .handle(&mut alice, &Message::new(MessageType::ListReservations))
            .unwrap();
        assert_eq!(reply.msg_type, MessageType::ReservationList);
        assert_eq!(reply.reservations().unwrap().len(), 1);
    }

    #[test]
    fn test_logout_and_disconnect_end_session() {
        let (handler, _) = handler();
        let mut alice = login(&handler, "alice", "a-pass");

        let reply = handler
            .handle(&mut alice, &Message::new(MessageType::Logout))
            .unwrap();
        assert_eq!(reply.msg_type, MessageType::Logout);
        assert!(!alice.is_authenticated());

        // The session is free again; a dropped connection frees it too
        let mut alice = login(&handler, "alice", "a-pass");
        handler.disconnect(&mut alice);
        login(&handler, "alice", "a-pass");
    }

    #[test]
    fn test_expired_session_loses_access() {
        let (handler, clock) = handler();
        let mut alice = login(&handler, "alice", "a-pass");

        clock.advance(61);
        assert_eq!(handler.sessions.cleanup_expired().len(), 1);

        let reply = handler
            .handle(&mut alice, &Message::new(MessageType::ListDevices))
            .unwrap();
        assert_eq!(reply.error_code(), Some(ErrorCode::NotAuthenticated));
        assert!(!alice.is_authenticated());
    }
}
