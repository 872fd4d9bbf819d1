// ============================================
// File: crates/devbroker-server/src/handlers/connection.rs
// ============================================
//! # Connection Task
//!
//! ## Creation Reason
//! Drives one client connection: reads requests, writes responses and
//! forwards broadcasts, until the client leaves, the connection fails or
//! the server shuts down.
//!
//! ## Main Functionality
//! - `serve_connection`: The per-connection loop, one tokio task each
//!
//! ## Connection Loop
//! ```text
//!            ┌──────────── select! ─────────────┐
//!            ▼                ▼                 ▼
//!     stream.recv()    outbound.recv()    shutdown.recv()
//!            │                │                 │
//!     handler.handle   Message → send           └─► close
//!            │         Close   → error + close
//!     send reply
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Any transport error ends the connection; retries already happened
//!   inside the stream
//! - The session is ended on every exit path via `handler.disconnect`
//!
//! ## Last Modified
//! v0.1.0 - Initial connection task

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use devbroker_common::types::ErrorCode;
use devbroker_core::protocol::Message;
use devbroker_transport::traits::MessageStream;

use crate::handlers::broadcast::{ConnectionRegistry, Outbound};
use crate::handlers::request::{ConnectionContext, RequestHandler};

/// Serves one connection until it ends.
pub async fn serve_connection<S: MessageStream>(
    mut stream: S,
    handler: Arc<RequestHandler>,
    connections: Arc<ConnectionRegistry>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let peer = stream.peer_addr();
    let (conn_id, mut outbound) = connections.register(peer);
    let mut ctx = ConnectionContext::new(peer);
    info!(conn_id, peer = %peer, "Client connected");

    loop {
        tokio::select! {
            incoming = stream.recv() => {
                let msg = match incoming {
                    Ok(Some(msg)) => msg,
                    Ok(None) => {
                        debug!(conn_id, "Client closed the connection");
                        break;
                    }
                    Err(e) => {
                        warn!(conn_id, peer = %peer, error = %e, "Receive failed");
                        if e.is_protocol_violation() {
                            let _ = stream
                                .send(Message::error(ErrorCode::ProtocolViolation, e.to_string()))
                                .await;
                        }
                        break;
                    }
                };

                let user_before = ctx.username().map(str::to_string);
                let reply = match handler.handle(&mut ctx, &msg) {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!(conn_id, peer = %peer, error = %e, "Closing connection");
                        let _ = stream.send(Message::error(e.code(), e.to_string())).await;
                        break;
                    }
                };
                if ctx.username() != user_before.as_deref() {
                    connections.set_user(conn_id, ctx.username().map(str::to_string));
                }

                if let Err(e) = stream.send(reply).await {
                    warn!(conn_id, peer = %peer, error = %e, "Send failed");
                    break;
                }
            }
            out = outbound.recv() => {
                match out {
                    Some(Outbound::Message(msg)) => {
                        if let Err(e) = stream.send(msg).await {
                            warn!(conn_id, peer = %peer, error = %e, "Push failed");
                            break;
                        }
                    }
                    Some(Outbound::Close(reason)) => {
                        let _ = stream
                            .send(Message::error(ErrorCode::NotAuthenticated, reason))
                            .await;
                        break;
                    }
                    None => break,
                }
            }
            _ = shutdown.recv() => {
                debug!(conn_id, "Shutdown signalled");
                break;
            }
        }
    }

    handler.disconnect(&mut ctx);
    connections.unregister(conn_id);
    if let Err(e) = stream.shutdown().await {
        debug!(conn_id, error = %e, "Stream shutdown failed");
    }
    info!(conn_id, peer = %peer, "Client disconnected");
}

// ============================================
// Tests
// ============================================
