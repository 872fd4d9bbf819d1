// ============================================
// File: crates/devbroker-server/src/server.rs
// ============================================
//! # Server Orchestrator
//!
//! ## Creation Reason
//! Builds the services from the configuration, wires them together and
//! owns the server lifecycle.
//!
//! ## Main Functionality
//! - `Server`: Component wiring and lifecycle
//! - Accept loop, one task per connection
//! - Wheel ticker thread, broadcaster and session cleanup tasks
//! - Graceful shutdown on Ctrl+C or [`Server::shutdown`]
//!
//! ## Server Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Server                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌────────────┐  ┌────────────┐  ┌──────────┐  ┌─────────┐  │
//! │  │ Accept     │  │ Connection │  │Broadcast │  │ Cleanup │  │
//! │  │ loop       │─►│ tasks (N)  │  │ task     │  │ task    │  │
//! │  └────────────┘  └─────┬──────┘  └────▲─────┘  └────┬────┘  │
//! │                        │              │ events      │       │
//! │                        ▼              │             ▼       │
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │ RequestHandler → ReservationEngine / SessionRegistry │   │
//! │  └─────────────────────────▲───────────────────────────┘   │
//! │                            │ tick()                        │
//! │                   ┌────────┴────────┐                      │
//! │                   │ wheel-ticker    │ (OS thread)          │
//! │                   └─────────────────┘                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The wheel ticker is a plain thread so a busy runtime never delays
//!   expiry
//! - Shutdown closes every connection (and so ends every session) before
//!   `run` returns
//!
//! ## Last Modified
//! v0.1.0 - Initial server implementation

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use devbroker_common::time::{Clock, SystemClock};
use devbroker_transport::tcp::TcpAcceptor;

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::handlers::{serve_connection, Broadcaster, ConnectionRegistry, RequestHandler};
use crate::services::{
    CredentialStore, EngineEvent, ReservationEngine, ResourceRegistry, SessionRegistry,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// ============================================
// Server
// ============================================

/// Device reservation broker.
///
/// # Lifecycle
/// 1. Create with `Server::new(config)`
/// 2. Start with `server.run().await`
/// 3. Shutdown via Ctrl+C or [`Server::shutdown`]
pub struct Server {
    /// Server configuration.
    config: ServerConfig,
    /// Reservation engine.
    engine: Arc<ReservationEngine>,
    /// Logged-in users.
    sessions: Arc<SessionRegistry>,
    /// Live connections.
    connections: Arc<ConnectionRegistry>,
    /// Request dispatch shared by all connections.
    handler: Arc<RequestHandler>,
    /// Engine events, taken by the broadcaster when the server starts.
    events: Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
    /// Shutdown signal sender.
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Creates a server on the wall clock.
    ///
    /// # Errors
    /// Returns error if the device seed or the user table is invalid.
    pub fn new(config: ServerConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a server on the given clock.
    ///
    /// # Errors
    /// Returns error if the device seed or the user table is invalid.
    pub fn with_clock(config: ServerConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let registry = Arc::new(ResourceRegistry::with_seed(
            config.registry.device_buckets,
            &config.devices,
        )?);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(ReservationEngine::new(
            &config.engine,
            registry,
            Arc::clone(&clock),
            events_tx,
        ));

        let sessions = Arc::new(SessionRegistry::new(
            config.sessions.session_buckets,
            config.sessions.max_sessions,
            config.idle_timeout(),
            clock,
        ));

        let credentials = Arc::new(CredentialStore::from_config(&config.users)?);
        if credentials.is_empty() {
            warn!("No users configured, every login will fail");
        }

        let handler = Arc::new(RequestHandler::new(
            Arc::clone(&engine),
            Arc::clone(&sessions),
            credentials,
            config.registry.max_list,
        ));

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            devices = engine.registry().count(),
            max_reservations = config.engine.max_reservations,
            max_sessions = config.sessions.max_sessions,
            "Services initialized"
        );

        Ok(Self {
            config,
            engine,
            sessions,
            connections: Arc::new(ConnectionRegistry::new()),
            handler,
            events: Mutex::new(Some(events_rx)),
            shutdown_tx,
        })
    }

    /// Binds the configured address and runs until shutdown.
    ///
    /// # Errors
    /// Returns error if the server fails to start.
    pub async fn run(&self) -> Result<()> {
        info!("Starting devbroker v{}", env!("CARGO_PKG_VERSION"));
        let acceptor = self.bind().await?;
        self.serve(acceptor).await
    }

    /// Binds the configured listen address.
    ///
    /// # Errors
    /// `StartupFailed` if the address cannot be bound.
    pub async fn bind(&self) -> Result<TcpAcceptor> {
        TcpAcceptor::bind_addr(self.config.listen_addr(), self.config.retry_policy())
            .await
            .map_err(|e| ServerError::startup_failed(format!("TCP bind failed: {e}")))
    }

    /// Serves clients from an already bound acceptor until shutdown.
    ///
    /// # Errors
    /// Returns error if a background worker cannot be started, or if the
    /// server was already started once.
    pub async fn serve(&self, acceptor: TcpAcceptor) -> Result<()> {
        let events = self
            .events
            .lock()
            .take()
            .ok_or_else(|| ServerError::startup_failed("server already started"))?;

        let mut ticker = self.engine.spawn_ticker(self.engine.tick_period())?;

        let tasks = [
            ("broadcast", self.spawn_broadcast_task(events)),
            ("cleanup", self.spawn_cleanup_task()),
        ];

        info!(addr = %acceptor.local_addr(), "Server started successfully");

        let mut clients = JoinSet::new();
        self.accept_loop(&acceptor, &mut clients).await;

        info!("Shutting down server...");
        let _ = self.shutdown_tx.send(());
        ticker.shutdown();

        let drain = async { while clients.join_next().await.is_some() {} };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!(remaining = clients.len(), "Connections did not close in time");
            clients.abort_all();
        }

        for (name, task) in tasks {
            match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
                Ok(Ok(())) => debug!("Task '{}' completed", name),
                Ok(Err(e)) => warn!("Task '{}' failed: {}", name, e),
                Err(_) => warn!("Task '{}' timed out during shutdown", name),
            }
        }

        info!(
            reservations = self.engine.count(),
            "Server shutdown complete"
        );
        Ok(())
    }

    /// Accepts clients until Ctrl+C or [`Self::shutdown`].
    async fn accept_loop(&self, acceptor: &TcpAcceptor, clients: &mut JoinSet<()>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Accept loop received shutdown signal");
                    break;
                }
                signal = &mut ctrl_c => {
                    match signal {
                        Ok(()) => info!("Received shutdown signal"),
                        Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
                    }
                    break;
                }
                accepted = acceptor.accept() => {
                    match accepted {
                        Ok(stream) => {
                            clients.spawn(serve_connection(
                                stream,
                                Arc::clone(&self.handler),
                                Arc::clone(&self.connections),
                                self.shutdown_tx.subscribe(),
                            ));
                        }
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
                Some(done) = clients.join_next(), if !clients.is_empty() => {
                    if let Err(e) = done {
                        error!("Connection task failed: {}", e);
                    }
                }
            }
        }
    }

    /// Spawns the status broadcast task.
    fn spawn_broadcast_task(&self, events: mpsc::UnboundedReceiver<EngineEvent>) -> JoinHandle<()> {
        let broadcaster = Broadcaster::new(
            Arc::clone(self.engine.registry()),
            Arc::clone(&self.connections),
            self.config.registry.max_list,
        );
        tokio::spawn(broadcaster.run(events, self.shutdown_tx.subscribe()))
    }

    /// Spawns the idle session cleanup task.
    fn spawn_cleanup_task(&self) -> JoinHandle<()> {
        let sessions = Arc::clone(&self.sessions);
        let connections = Arc::clone(&self.connections);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = self.config.cleanup_interval();

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(period);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Cleanup task received shutdown signal");
                        break;
                    }
                    _ = interval_timer.tick() => {
                        let expired = sessions.cleanup_expired();
                        for session in &expired {
                            let closed = connections.close_user(&session.username, "session expired");
                            info!(
                                username = %session.username,
                                connections = closed,
                                "Expired idle session"
                            );
                        }

                        debug!(
                            sessions = sessions.count(),
                            connections = connections.count(),
                            "Cleanup cycle complete"
                        );
                    }
                }
            }

            debug!("Cleanup task exiting");
        })
    }

    /// Triggers server shutdown programmatically.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Returns the configured listen address.
    #[must_use]
    pub const fn listen_addr(&self) -> SocketAddr {
        self.config.listen_addr()
    }

    /// Returns the reservation engine.
    #[must_use]
    pub const fn engine(&self) -> &Arc<ReservationEngine> {
        &self.engine
    }

    /// Returns the session registry.
    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Returns the live connection registry.
    #[must_use]
    pub const fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("listen_addr", &self.config.network.listen_addr)
            .field("devices", &self.engine.registry().count())
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceConfig, UserConfig};
    use crate::services::hash_password;
    use devbroker_core::protocol::{Message, MessageType};
    use devbroker_transport::tcp::FramedStream;
    use devbroker_transport::traits::MessageStream;
    use tokio::net::TcpStream;

    fn test_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.network.listen_addr = "127.0.0.1:0".parse().unwrap();
        config.engine.tick_interval_ms = 50;
        config.devices = vec![DeviceConfig {
            id: "DEV001".into(),
            name: "Bench scope".into(),
            device_type: "oscilloscope".into(),
        }];
        config.users = vec![UserConfig {
            username: "alice".into(),
            password_sha256: hash_password("wonderland"),
        }];
        config
    }

    #[test]
    fn test_new_rejects_bad_users() {
        let mut config = test_config();
        config.users[0].password_sha256 = "zz".into();
        assert!(Server::new(config).unwrap_err().is_config_error());
    }

    #[tokio::test]
    async fn test_serve_over_tcp() {
        let server = Arc::new(Server::new(test_config()).unwrap());
        let acceptor = server.bind().await.unwrap();
        let addr = acceptor.local_addr();

        let running = Arc::clone(&server);
        let task = tokio::spawn(async move { running.serve(acceptor).await });

        let socket = TcpStream::connect(addr).await.unwrap();
        let mut client = FramedStream::new(socket, addr, server.config.retry_policy());

        client.send(Message::login("alice", "wonderland")).await.unwrap();
        let reply = client.recv().await.unwrap().unwrap();
        assert_eq!(reply.msg_type, MessageType::LoginOk);
        assert_eq!(server.sessions().count(), 1);

        client
            .send(Message::new(MessageType::ListDevices))
            .await
            .unwrap();
        let reply = client.recv().await.unwrap().unwrap();
        assert_eq!(reply.msg_type, MessageType::DeviceList);
        assert_eq!(reply.devices().unwrap()[0].id, "DEV001");

        server.shutdown();
        task.await.unwrap().unwrap();
        assert!(server.sessions().is_empty());
        assert_eq!(server.connections().count(), 0);
    }

    #[tokio::test]
    async fn test_serve_twice_fails() {
        let server = Arc::new(Server::new(test_config()).unwrap());
        let acceptor = server.bind().await.unwrap();
        let running = Arc::clone(&server);
        let task = tokio::spawn(async move { running.serve(acceptor).await });

        // Give the first serve time to take the event channel.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = server.bind().await.unwrap();
        assert!(matches!(
            server.serve(second).await,
            Err(ServerError::StartupFailed { .. })
        ));

        server.shutdown();
        task.await.unwrap().unwrap();
    }
}
