// ============================================
// File: crates/devbroker-server/src/handlers/broadcast.rs
// ============================================
//! # Connection Registry & Broadcaster
//!
//! ## Creation Reason
//! Pushes device status to every logged-in client when it changes, and
//! lets the server reach a connection by username (idle expiry).
//!
//! ## Main Functionality
//! - `ConnectionRegistry`: Live connections, id → outbound queue + user
//! - `Outbound`: What a connection task is asked to do
//! - `Broadcaster`: Task turning `EngineEvent`s into `StatusUpdate`s
//!
//! ## Fan-out
//! ```text
//! engine ──EngineEvent──► [mpsc] ──► Broadcaster
//!                                       │ coalesce queued events
//!                                       │ list_devices()
//!                                       ▼
//!                         StatusUpdate to each authenticated
//!                         connection's outbound queue
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Outbound queues are unbounded; the connection task owns the socket
//!   and does the actual write
//! - A burst of events yields one `StatusUpdate`, built after the burst
//!   was drained, so it always carries the latest state
//!
//! ## Last Modified
//! v0.1.0 - Initial broadcaster

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use devbroker_core::protocol::{Message, MessageType};

use crate::services::{EngineEvent, ResourceRegistry};

// ============================================
// Connection Registry
// ============================================

/// Instruction for a connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Send this message to the client.
    Message(Message),
    /// Send an error with this text, then close the connection.
    Close(String),
}

struct ConnectionEntry {
    peer: SocketAddr,
    username: Option<String>,
    tx: mpsc::UnboundedSender<Outbound>,
}

/// Live connections.
pub struct ConnectionRegistry {
    connections: DashMap<u64, ConnectionEntry>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a connection and returns its id and outbound queue.
    pub fn register(&self, peer: SocketAddr) -> (u64, mpsc::UnboundedReceiver<Outbound>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(
            id,
            ConnectionEntry {
                peer,
                username: None,
                tx,
            },
        );
        debug!(conn_id = id, peer = %peer, "Connection registered");
        (id, rx)
    }

    /// Removes a connection.
    pub fn unregister(&self, id: u64) -> bool {
        let removed = self.connections.remove(&id).is_some();
        if removed {
            debug!(conn_id = id, "Connection unregistered");
        }
        removed
    }

    /// Records who is logged in on a connection.
    pub fn set_user(&self, id: u64, username: Option<String>) {
        if let Some(mut entry) = self.connections.get_mut(&id) {
            entry.username = username;
        }
    }

    /// Queues `msg` for every authenticated connection.
    ///
    /// Returns the number of connections reached.
    pub fn send_to_authenticated(&self, msg: &Message) -> usize {
        let mut sent = 0;
        for entry in self.connections.iter() {
            if entry.username.is_none() {
                continue;
            }
            if entry.tx.send(Outbound::Message(msg.clone())).is_ok() {
                sent += 1;
            } else {
                warn!(conn_id = *entry.key(), peer = %entry.peer, "Dropped broadcast, connection gone");
            }
        }
        sent
    }

    /// Asks every connection of `username` to close.
    ///
    /// Returns the number of connections told.
    pub fn close_user(&self, username: &str, reason: &str) -> usize {
        let mut closed = 0;
        for entry in self.connections.iter() {
            if entry.username.as_deref() == Some(username)
                && entry.tx.send(Outbound::Close(reason.to_string())).is_ok()
            {
                closed += 1;
            }
        }
        closed
    }

    /// Returns the number of connections.
    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Returns the number of logged-in connections.
    #[must_use]
    pub fn authenticated_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|e| e.username.is_some())
            .count()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.count())
            .finish()
    }
}

// ============================================
// Broadcaster
// ============================================

/// Pushes `StatusUpdate` messages after engine changes.
#[derive(Debug)]
pub struct Broadcaster {
    registry: Arc<ResourceRegistry>,
    connections: Arc<ConnectionRegistry>,
    max_list: usize,
}

impl Broadcaster {
    /// Creates a broadcaster.
    #[must_use]
    pub const fn new(
        registry: Arc<ResourceRegistry>,
        connections: Arc<ConnectionRegistry>,
        max_list: usize,
    ) -> Self {
        Self {
            registry,
            connections,
            max_list,
        }
    }

    /// Builds a `StatusUpdate` from the current device list.
    #[must_use]
    pub fn status_update(&self) -> Message {
        let devices: Vec<_> = self
            .registry
            .list_devices(self.max_list)
            .iter()
            .map(crate::services::Device::to_summary)
            .collect();
        Message::device_list(MessageType::StatusUpdate, &devices)
    }

    /// Sends one `StatusUpdate` to every authenticated connection.
    pub fn broadcast(&self) -> usize {
        let sent = self.connections.send_to_authenticated(&self.status_update());
        debug!(recipients = sent, "Status update broadcast");
        sent
    }

    /// Runs until the event channel closes or shutdown is signalled.
    pub async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("Broadcaster started");
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(EngineEvent::DevicesChanged) = event else {
                        break;
                    };
                    let mut coalesced = 0usize;
                    while events.try_recv().is_ok() {
                        coalesced += 1;
                    }
                    if coalesced > 0 {
                        debug!(coalesced, "Coalesced engine events");
                    }
                    self.broadcast();
                }
                _ = shutdown.recv() => break,
            }
        }
        info!("Broadcaster stopped");
    }
}

// ============================================
// Tests
// ============================================
