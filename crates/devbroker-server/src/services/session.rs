// ============================================
// File: crates/devbroker-server/src/services/session.rs
// ============================================
//! # Session Registry
//!
//! ## Creation Reason
//! Tracks who is logged in. One session per username; the session index
//! itself is the uniqueness constraint.
//!
//! ## Main Functionality
//! - `Session`: Per-user login state
//! - `SessionRegistry`: Login, logout, activity tracking, idle expiry
//!
//! ## Session Lifecycle
//! ```text
//! login() ──► Active ──┬── end() ─────────────► Ended   (removed)
//!                      └── cleanup_expired() ──► Expired (removed)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Credentials are checked by the caller (`CredentialStore`) before
//!   `login`
//! - Every request should go through `touch`; a `false` result means the
//!   session expired or was replaced and the caller is no longer
//!   authenticated
//! - Tokens are zeroized when the session is dropped
//!
//! ## Last Modified
//! v0.1.0 - Initial session registry implementation

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use devbroker_common::index::HashIndex;
use devbroker_common::time::{Clock, Timestamp};
use devbroker_common::types::SessionToken;

use crate::error::{Result, ServerError};

// ============================================
// Session
// ============================================

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Logged in.
    Active,
    /// Idle past the timeout.
    Expired,
    /// Logged out.
    Ended,
}

/// A logged-in user.
#[derive(Debug, Clone)]
pub struct Session {
    /// Account name
    pub username: String,
    /// Address the login came from
    pub client_addr: SocketAddr,
    /// Token handed to the client
    pub token: SessionToken,
    /// Current state
    pub state: SessionState,
    /// Login time
    pub created_at: Timestamp,
    /// Last request time
    pub last_activity: Timestamp,
}

impl Session {
    /// Returns `true` if the session has been idle for longer than
    /// `timeout` at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp, timeout: Duration) -> bool {
        let timeout = i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX);
        now.secs_since(self.last_activity) > timeout
    }

    fn token_matches(&self, token: &SessionToken) -> bool {
        self.token.as_bytes()[..].ct_eq(&token.as_bytes()[..]).into()
    }
}

// ============================================
// SessionRegistry
// ============================================

/// Registry of logged-in users.
pub struct SessionRegistry {
    sessions: HashIndex<Session>,
    lock: Mutex<()>,
    max_sessions: usize,
    idle_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl SessionRegistry {
    /// Creates a registry.
    #[must_use]
    pub fn new(
        bucket_count: usize,
        max_sessions: usize,
        idle_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sessions = HashIndex::with_destructor(bucket_count, |username, session: Session| {
            debug!(username = %username, state = ?session.state, "Session released");
        });
        Self {
            sessions,
            lock: Mutex::new(()),
            max_sessions,
            idle_timeout,
            clock,
        }
    }

    /// Opens a session for an authenticated user.
    ///
    /// # Errors
    /// - `SessionAlreadyExists` if the user has an active session
    /// - `SessionLimitReached` if the registry is full
    pub fn login(&self, username: &str, client_addr: SocketAddr) -> Result<SessionToken> {
        let _guard = self.lock.lock();

        let existing = self.sessions.with(username, |s| s.state);
        if existing == Some(SessionState::Active) {
            return Err(ServerError::SessionAlreadyExists(username.to_string()));
        }
        if existing.is_none() && self.sessions.len() >= self.max_sessions {
            return Err(ServerError::SessionLimitReached {
                limit: self.max_sessions,
            });
        }

        let now = self.clock.now();
        let token = SessionToken::generate();
        self.sessions.insert(
            username,
            Session {
                username: username.to_string(),
                client_addr,
                token: token.clone(),
                state: SessionState::Active,
                created_at: now,
                last_activity: now,
            },
        );

        info!(username = %username, client = %client_addr, "Session created");
        Ok(token)
    }

    /// Ends `username`'s session if `token` still identifies it.
    pub fn end(&self, username: &str, token: &SessionToken) -> bool {
        let _guard = self.lock.lock();

        let owned = self
            .sessions
            .with_mut(username, |s| {
                let owned = s.token_matches(token);
                if owned {
                    s.state = SessionState::Ended;
                }
                owned
            })
            .unwrap_or(false);

        if owned {
            self.sessions.delete(username);
            info!(username = %username, "Session ended");
        }
        owned
    }

    /// Records activity on `username`'s session.
    ///
    /// Returns `false` if the session is gone, no longer active, or
    /// belongs to a different token.
    pub fn touch(&self, username: &str, token: &SessionToken) -> bool {
        let _guard = self.lock.lock();
        let now = self.clock.now();
        self.sessions
            .with_mut(username, |s| {
                if s.state != SessionState::Active || !s.token_matches(token) {
                    return false;
                }
                s.last_activity = now;
                true
            })
            .unwrap_or(false)
    }

    /// Marks sessions idle longer than the timeout as expired and removes
    /// them.
    ///
    /// Returns the expired sessions so their connections can be closed.
    pub fn cleanup_expired(&self) -> Vec<Session> {
        let _guard = self.lock.lock();
        let now = self.clock.now();

        let mut expired = Vec::new();
        self.sessions.for_each(|_, s| {
            if s.is_expired(now, self.idle_timeout) {
                expired.push(s.username.clone());
            }
        });

        let expired: Vec<Session> = expired
            .into_iter()
            .filter_map(|username| {
                let mut session = self.sessions.remove(&username)?;
                session.state = SessionState::Expired;
                debug!(
                    username = %username,
                    idle_secs = now.secs_since(session.last_activity),
                    "Session expired"
                );
                Some(session)
            })
            .collect();

        if !expired.is_empty() {
            info!("Cleaned up {} expired sessions", expired.len());
        }
        expired
    }

    /// Returns a copy of `username`'s session.
    #[must_use]
    pub fn get(&self, username: &str) -> Option<Session> {
        let _guard = self.lock.lock();
        self.sessions.get(username)
    }

    /// Returns the number of sessions.
    #[must_use]
    pub fn count(&self) -> usize {
        let _guard = self.lock.lock();
        self.sessions.len()
    }

    /// Returns `true` if nobody is logged in.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .field("max_sessions", &self.max_sessions)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use devbroker_common::time::ManualClock;

    fn setup(max: usize) -> (SessionRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Timestamp::from_secs(1000)));
        let registry = SessionRegistry::new(
            8,
            max,
            Duration::from_secs(30),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        (registry, clock)
    }

    fn addr() -> SocketAddr {
        "10.0.0.1:4000".parse().unwrap()
    }

    #[test]
    fn test_login_and_duplicate() {
        let (registry, _) = setup(4);
        let token = registry.login("alice", addr()).unwrap();
        assert_eq!(registry.count(), 1);

        let session = registry.get("alice").unwrap();
        assert_eq!(session.state, SessionState::Active);
        assert_eq!(session.token, token);
        assert_eq!(session.client_addr, addr());

        assert!(matches!(
            registry.login("alice", addr()),
            Err(ServerError::SessionAlreadyExists(_))
        ));
    }

    #[test]
    fn test_session_limit() {
        let (registry, _) = setup(1);
        registry.login("alice", addr()).unwrap();
        assert!(matches!(
            registry.login("bob", addr()),
            Err(ServerError::SessionLimitReached { limit: 1 })
        ));
    }

    #[test]
    fn test_end_requires_token() {
        let (registry, _) = setup(4);
        let token = registry.login("alice", addr()).unwrap();

        assert!(!registry.end("alice", &SessionToken::generate()));
        assert_eq!(registry.count(), 1);

        assert!(registry.end("alice", &token));
        assert!(registry.is_empty());
        assert!(!registry.end("alice", &token));

        // A fresh login is allowed after logout
        registry.login("alice", addr()).unwrap();
    }

    #[test]
    fn test_touch_keeps_session_alive() {
        let (registry, clock) = setup(4);
        let token = registry.login("alice", addr()).unwrap();

        clock.advance(25);
        assert!(registry.touch("alice", &token));
        clock.advance(25);
        assert!(registry.cleanup_expired().is_empty());

        clock.advance(10);
        let expired = registry.cleanup_expired();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].state, SessionState::Expired);
        assert!(registry.get("alice").is_none());
        assert!(!registry.touch("alice", &token));
    }

    #[test]
    fn test_touch_rejects_other_token() {
        let (registry, _) = setup(4);
        registry.login("alice", addr()).unwrap();
        assert!(!registry.touch("alice", &SessionToken::generate()));
        assert!(!registry.touch("bob", &SessionToken::generate()));
    }

    #[test]
    fn test_expiry_boundary() {
        let (registry, clock) = setup(4);
        registry.login("alice", addr()).unwrap();
        clock.advance(30);
        assert!(registry.cleanup_expired().is_empty());
        clock.advance(1);
        assert_eq!(registry.cleanup_expired().len(), 1);
    }
}
