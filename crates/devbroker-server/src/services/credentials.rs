// ============================================
// File: crates/devbroker-server/src/services/credentials.rs
// ============================================
//! # Credential Store
//!
//! ## Creation Reason
//! Checks login passwords against the SHA-256 digests listed under
//! `[[users]]` in the configuration.
//!
//! ## Main Functionality
//! - `CredentialStore`: username → password digest
//! - `hash_password`: Digest helper behind `devbroker hash-password`
//!
//! ## ⚠️ Important Note for Next Developer
//! - Comparisons are constant time, and unknown users are checked
//!   against a dummy digest so both failure paths cost the same
//! - Never log passwords or digests
//!
//! ## Last Modified
//! v0.1.0 - Initial credential store

use std::collections::HashMap;
use std::fmt;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use crate::config::UserConfig;
use crate::error::{Result, ServerError};

const DIGEST_SIZE: usize = 32;

/// Returns the hex SHA-256 digest of `password`.
///
/// # Example
/// ```
/// use devbroker_server::services::credentials::hash_password;
///
/// assert_eq!(hash_password("secret").len(), 64);
/// ```
#[must_use]
pub fn hash_password(password: &str) -> String {
    hex::encode(digest(password))
}

fn digest(password: &str) -> [u8; DIGEST_SIZE] {
    Sha256::digest(password.as_bytes()).into()
}

// ============================================
// CredentialStore
// ============================================

/// Username → password digest table.
#[derive(Default)]
pub struct CredentialStore {
    users: HashMap<String, [u8; DIGEST_SIZE]>,
}

impl CredentialStore {
    /// Builds the store from the configured users.
    ///
    /// # Errors
    /// `ConfigInvalid` if a digest is not 32 bytes of hex.
    pub fn from_config(users: &[UserConfig]) -> Result<Self> {
        let mut store = Self::default();
        for (i, user) in users.iter().enumerate() {
            let bytes = hex::decode(&user.password_sha256).map_err(|e| {
                ServerError::config_invalid(format!("users[{i}].password_sha256"), e.to_string())
            })?;
            let digest: [u8; DIGEST_SIZE] = bytes.try_into().map_err(|_| {
                ServerError::config_invalid(
                    format!("users[{i}].password_sha256"),
                    "must be a SHA-256 digest",
                )
            })?;
            store.users.insert(user.username.clone(), digest);
        }
        info!(users = store.users.len(), "Credential store loaded");
        Ok(store)
    }

    /// Adds or replaces a user with a clear-text password.
    pub fn insert(&mut self, username: impl Into<String>, password: &str) {
        self.users.insert(username.into(), digest(password));
    }

    /// Checks `password` for `username`.
    ///
    /// # Errors
    /// `AuthenticationFailed` for an unknown user or a wrong password.
    pub fn verify(&self, username: &str, password: &str) -> Result<()> {
        let presented = digest(password);
        let (expected, known) = match self.users.get(username) {
            Some(expected) => (*expected, true),
            None => ([0u8; DIGEST_SIZE], false),
        };

        let matches: bool = presented[..].ct_eq(&expected[..]).into();
        if matches && known {
            Ok(())
        } else {
            debug!(username = %username, "Authentication failed");
            Err(ServerError::AuthenticationFailed)
        }
    }

    /// Returns `true` if `username` is known.
    #[must_use]
    pub fn contains(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    /// Returns the number of users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Returns `true` if no user is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("users", &self.users.len())
            .finish()
    }
}

// ============================================
// Tests
// ============================================
