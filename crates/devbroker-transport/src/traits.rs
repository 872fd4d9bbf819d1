// ============================================
// File: crates/devbroker-transport/src/traits.rs
// ============================================
//! # Transport Traits
//!
//! ## Creation Reason
//! Defines the message-level stream interface the connection loop talks
//! to, so it can run against TCP in production and an in-memory mock in
//! tests.
//!
//! ## Main Functionality
//! - `MessageStream`: Bidirectional stream of decoded `Message`s
//! - `RetryPolicy`: Bounded retry with a per-attempt timeout
//! - `with_retry`: Runs an operation under a `RetryPolicy`
//!
//! ## Design Philosophy
//! - Traits enable mock implementations for testing
//! - Async-first design with `async_trait`
//! - Transient failures are retried a bounded number of times, then
//!   surfaced as a hard failure
//!
//! ## ⚠️ Important Note for Next Developer
//! - `recv` must stay cancel-safe: the connection loop races it against
//!   the outbound queue in `tokio::select!`
//! - Never wrap `recv` in the I/O timeout, idle clients are legal
//!
//! ## Last Modified
//! v0.1.0 - Initial trait definitions

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use devbroker_core::protocol::Message;

use crate::error::{Result, TransportError};

// ============================================
// Constants
// ============================================

/// Default number of attempts for one send or receive.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Default per-attempt timeout.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================
// RetryPolicy
// ============================================

/// Bounded retry policy for stream I/O.
///
/// # Example
/// ```
/// use devbroker_transport::traits::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(3, Duration::from_millis(500));
/// assert_eq!(policy.attempts, 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one (at least 1).
    pub attempts: u32,
    /// Timeout applied to each attempt.
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Creates a policy; zero attempts is raised to one.
    #[must_use]
    pub fn new(attempts: u32, timeout: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            timeout,
        }
    }

    /// Decides whether `error`, seen on attempt number `attempt`
    /// (1-based), should be retried. Logs the retry.
    #[must_use]
    pub fn should_retry(&self, error: &TransportError, attempt: u32, operation: &str) -> bool {
        if !error.is_retryable() || attempt >= self.attempts {
            return false;
        }
        warn!(
            operation,
            attempt,
            max_attempts = self.attempts,
            error = %error,
            "Transient I/O failure, retrying"
        );
        true
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPTS, DEFAULT_IO_TIMEOUT)
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up.
///
/// Each attempt is bounded by `policy.timeout`; a timeout counts as a
/// retryable failure. `op` may only capture shared state; streams that
/// need `&mut self` per attempt drive `should_retry` themselves.
///
/// # Errors
/// The last error seen.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::timeout(operation)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if policy.should_retry(&e, attempt, operation) => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}

// ============================================
// MessageStream Trait
// ============================================

/// Abstract interface for a connection carrying protocol messages.
///
/// # Thread Safety
/// Implementations must be `Send` so each connection can live in its own
/// tokio task.
///
/// # Example
/// ```ignore
/// async fn echo<S: MessageStream>(stream: &mut S) -> Result<()> {
///     while let Some(msg) = stream.recv().await? {
///         stream.send(msg).await?;
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait MessageStream: Send {
    /// Receives the next message.
    ///
    /// # Returns
    /// `Ok(None)` when the peer closed the stream cleanly.
    ///
    /// # Errors
    /// Protocol violations and hard I/O failures.
    async fn recv(&mut self) -> Result<Option<Message>>;

    /// Sends one message, retrying transient failures.
    ///
    /// # Errors
    /// Returns error once the retry policy is exhausted.
    async fn send(&mut self, msg: Message) -> Result<()>;

    /// Returns the remote address.
    fn peer_addr(&self) -> SocketAddr;

    /// Flushes and closes the write side.
    ///
    /// # Errors
    /// Returns error if the final flush fails.
    async fn shutdown(&mut self) -> Result<()>;
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = with_retry(fast_policy(3), "send", || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TransportError::io(
                    "write",
                    io::Error::new(io::ErrorKind::Interrupted, "signal"),
                ))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = with_retry(fast_policy(3), "send", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::timeout("send"))
        })
        .await;

        assert!(matches!(result, Err(TransportError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = with_retry(fast_policy(3), "recv", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::ConnectionClosed)
        })
        .await;

        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_retryable() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = with_retry(fast_policy(2), "flush", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(TransportError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_policy_clamps_attempts() {
        assert_eq!(RetryPolicy::new(0, DEFAULT_IO_TIMEOUT).attempts, 1);
        assert_eq!(RetryPolicy::default().attempts, DEFAULT_ATTEMPTS);
    }
}
