// ============================================
// File: crates/devbroker-transport/src/mock.rs
// ============================================
//! # Mock Message Stream
//!
//! ## Creation Reason
//! Provides an in-memory `MessageStream` for driving connection handling
//! in tests without sockets.
//!
//! ## Main Functionality
//! - `MockStream`: The server-side end, implements `MessageStream`
//! - `MockPeer`: The test's end; injects requests and reads replies
//! - Failure injection for the retry path
//!
//! ## Usage in Tests
//! ```
//! use devbroker_core::protocol::{Message, MessageType};
//! use devbroker_transport::mock::MockStream;
//! use devbroker_transport::traits::MessageStream;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (mut stream, mut peer) = MockStream::pair("127.0.0.1:5000".parse().unwrap());
//!
//! peer.send(Message::new(MessageType::Heartbeat));
//! let msg = stream.recv().await.unwrap().unwrap();
//! assert_eq!(msg.msg_type, MessageType::Heartbeat);
//!
//! stream.send(Message::new(MessageType::HeartbeatAck)).await.unwrap();
//! assert_eq!(peer.recv().await.unwrap().msg_type, MessageType::HeartbeatAck);
//! # }
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This is for testing only - do not use in production
//! - Messages are checked against the protocol limits on send, the same
//!   way the real codec would reject them
//!
//! ## Last Modified
//! v0.1.0 - Initial mock implementation

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use devbroker_core::protocol::Message;

use crate::error::{Result, TransportError};
use crate::traits::{with_retry, MessageStream, RetryPolicy};

// ============================================
// Shared State
// ============================================

#[derive(Debug, Default)]
struct MockState {
    /// Sends that will fail with a retryable timeout before succeeding
    transient_failures: AtomicU32,
    /// Total send attempts observed
    send_attempts: AtomicU32,
    /// Set once `shutdown` has run
    shut_down: AtomicBool,
}

// ============================================
// MockStream
// ============================================

/// Server-side end of an in-memory connection.
#[derive(Debug)]
pub struct MockStream {
    peer_addr: SocketAddr,
    inbound: mpsc::UnboundedReceiver<Message>,
    outbound: mpsc::UnboundedSender<Message>,
    policy: RetryPolicy,
    state: Arc<MockState>,
}

/// Test-side end of an in-memory connection.
#[derive(Debug)]
pub struct MockPeer {
    to_stream: Option<mpsc::UnboundedSender<Message>>,
    from_stream: mpsc::UnboundedReceiver<Message>,
    state: Arc<MockState>,
}

impl MockStream {
    /// Creates a connected stream/peer pair.
    #[must_use]
    pub fn pair(peer_addr: SocketAddr) -> (Self, MockPeer) {
        let (to_stream, inbound) = mpsc::unbounded_channel();
        let (outbound, from_stream) = mpsc::unbounded_channel();
        let state = Arc::new(MockState::default());

        let stream = Self {
            peer_addr,
            inbound,
            outbound,
            policy: RetryPolicy::new(3, Duration::from_millis(100)),
            state: Arc::clone(&state),
        };
        let peer = MockPeer {
            to_stream: Some(to_stream),
            from_stream,
            state,
        };
        (stream, peer)
    }

    /// Replaces the retry policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl MessageStream for MockStream {
    async fn recv(&mut self) -> Result<Option<Message>> {
        if self.state.shut_down.load(Ordering::Acquire) {
            return Err(TransportError::ShuttingDown);
        }
        Ok(self.inbound.recv().await)
    }

    async fn send(&mut self, msg: Message) -> Result<()> {
        if self.state.shut_down.load(Ordering::Acquire) {
            return Err(TransportError::ShuttingDown);
        }
        msg.validate()?;

        let state = &self.state;
        let outbound = &self.outbound;
        let peer = self.peer_addr;
        let msg = &msg;

        with_retry(self.policy, "send", || async move {
            state.send_attempts.fetch_add(1, Ordering::SeqCst);
            let injected = state
                .transient_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                return Err(TransportError::timeout("send"));
            }
            outbound
                .send(msg.clone())
                .map_err(|_| TransportError::SendFailed {
                    peer,
                    reason: "peer dropped".into(),
                })
        })
        .await
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.state.shut_down.store(true, Ordering::Release);
        Ok(())
    }
}

// ============================================
// MockPeer
// ============================================

impl MockPeer {
    /// Queues a message for the stream to receive.
    ///
    /// Returns `false` if the stream was dropped.
    pub fn send(&mut self, msg: Message) -> bool {
        self.to_stream
            .as_ref()
            .is_some_and(|tx| tx.send(msg).is_ok())
    }

    /// Waits for the next message the stream sent.
    ///
    /// `None` once the stream is dropped and drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.from_stream.recv().await
    }

    /// Returns a message the stream already sent, without waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.from_stream.try_recv().ok()
    }

    /// Drains everything the stream has sent so far.
    pub fn drain(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Ok(msg) = self.from_stream.try_recv() {
            messages.push(msg);
        }
        messages
    }

    /// Closes the client side; the stream's `recv` then yields `None`.
    pub fn close(&mut self) {
        self.to_stream = None;
    }

    /// Makes the next `count` send attempts fail with a retryable timeout.
    pub fn fail_next_sends(&self, count: u32) {
        self.state.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Returns the number of send attempts the stream made.
    #[must_use]
    pub fn send_attempts(&self) -> u32 {
        self.state.send_attempts.load(Ordering::SeqCst)
    }

    /// Returns `true` once the stream has been shut down.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.state.shut_down.load(Ordering::Acquire)
    }
}

// ============================================
// Tests
// ============================================
