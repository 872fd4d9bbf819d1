// ============================================
// File: crates/devbroker-server/src/config.rs
// ============================================
//! # Server Configuration
//!
//! ## Creation Reason
//! Provides configuration management for the DevBroker server: listener,
//! engine sizing, session policy, the seed device set and the user list.
//!
//! ## Main Functionality
//! - `ServerConfig`: Main configuration structure
//! - TOML file loading and parsing
//! - Configuration validation
//! - Defaults that run a usable server without any file
//!
//! ## Configuration Sections
//! - `network`: TCP listen address, I/O retry policy
//! - `engine`: Reservation capacity, timer wheel size, tick period
//! - `registry`: Device table sizing, list cap
//! - `sessions`: Session capacity and idle expiry
//! - `logging`: Log level
//! - `devices`: Seed devices
//! - `users`: Accounts with SHA-256 password digests
//!
//! ## Example Configuration
//! ```toml
//! [network]
//! listen_addr = "0.0.0.0:7070"
//! send_attempts = 3
//! io_timeout_ms = 5000
//!
//! [engine]
//! max_reservations = 1000
//! wheel_slots = 3600
//! tick_interval_ms = 1000
//!
//! [[devices]]
//! id = "DEV001"
//! name = "Oscilloscope A"
//! device_type = "oscilloscope"
//!
//! [[users]]
//! username = "alice"
//! password_sha256 = "2bd806c97f0e00af1a1fc3328fa763a9269723c8db8fac4f93af71db186d6e90"
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - All config changes require server restart
//! - Validate config before server startup
//! - Device names and ids travel as protocol arguments, so they are held
//!   to the argument length limit here
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration implementation

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use devbroker_core::protocol::messages::{MAX_ARG_LEN, MAX_DEVICES_PER_MESSAGE};
use devbroker_transport::traits::RetryPolicy;

use crate::error::{Result, ServerError};

// ============================================
// ServerConfig
// ============================================

/// Main server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Network configuration.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Reservation engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Device registry configuration.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Session configuration.
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Seed devices.
    #[serde(default = "default_devices")]
    pub devices: Vec<DeviceConfig>,

    /// User accounts.
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

impl ServerConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    /// Returns error if file cannot be read, parsed or validated.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        info!("Loading configuration from: {}", path_str);

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ServerError::config_load(&path_str, e.to_string()))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ServerError::config_load(&path_str, e.to_string()))?;

        config.validate()?;

        info!(
            devices = config.devices.len(),
            users = config.users.len(),
            "Configuration loaded successfully"
        );
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// `ConfigInvalid` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        self.network.validate()?;
        self.engine.validate()?;
        self.registry.validate()?;
        self.sessions.validate()?;
        self.logging.validate()?;
        self.validate_devices()?;
        self.validate_users()?;
        Ok(())
    }

    fn validate_devices(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (i, device) in self.devices.iter().enumerate() {
            for (key, value) in [
                ("id", &device.id),
                ("name", &device.name),
                ("device_type", &device.device_type),
            ] {
                if value.is_empty() {
                    return Err(ServerError::config_invalid(
                        format!("devices[{i}].{key}"),
                        "cannot be empty",
                    ));
                }
                if value.len() > MAX_ARG_LEN {
                    return Err(ServerError::config_invalid(
                        format!("devices[{i}].{key}"),
                        format!("cannot exceed {MAX_ARG_LEN} bytes"),
                    ));
                }
            }
            if !seen.insert(device.id.as_str()) {
                return Err(ServerError::config_invalid(
                    format!("devices[{i}].id"),
                    format!("duplicate device id '{}'", device.id),
                ));
            }
        }
        Ok(())
    }

    fn validate_users(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (i, user) in self.users.iter().enumerate() {
            if user.username.is_empty() || user.username.len() > MAX_ARG_LEN {
                return Err(ServerError::config_invalid(
                    format!("users[{i}].username"),
                    format!("must be 1..={MAX_ARG_LEN} bytes"),
                ));
            }
            let digest_ok = user.password_sha256.len() == 64
                && user.password_sha256.bytes().all(|b| b.is_ascii_hexdigit());
            if !digest_ok {
                return Err(ServerError::config_invalid(
                    format!("users[{i}].password_sha256"),
                    "must be 64 hex characters",
                ));
            }
            if !seen.insert(user.username.as_str()) {
                return Err(ServerError::config_invalid(
                    format!("users[{i}].username"),
                    format!("duplicate user '{}'", user.username),
                ));
            }
        }
        Ok(())
    }

    /// Serializes configuration to TOML string.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    // ========================================
    // Derived Settings
    // ========================================

    /// Returns listen address.
    #[must_use]
    pub const fn listen_addr(&self) -> SocketAddr {
        self.network.listen_addr
    }

    /// Returns the transport retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.network.send_attempts,
            Duration::from_millis(self.network.io_timeout_ms),
        )
    }

    /// Returns the wheel tick period.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.engine.tick_interval_ms)
    }

    /// Returns the session idle timeout.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.sessions.idle_timeout_secs)
    }

    /// Returns the session cleanup period.
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.cleanup_interval_secs)
    }
}

impl FromStr for ServerConfig {
    type Err = ServerError;

    /// Parses and validates configuration from a TOML string.
    fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ServerError::config_load("<string>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

fn positive(field: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(ServerError::config_invalid(field, "must be greater than 0"));
    }
    Ok(())
}

// ============================================
// NetworkConfig
// ============================================

/// Network configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// TCP listen address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Attempts per send/receive before the connection is dropped.
    #[serde(default = "default_send_attempts")]
    pub send_attempts: u32,

    /// Timeout of one I/O attempt in milliseconds.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7070))
}

fn default_send_attempts() -> u32 {
    3
}

fn default_io_timeout_ms() -> u64 {
    5000
}

impl NetworkConfig {
    fn validate(&self) -> Result<()> {
        if self.listen_addr.port() == 0 {
            return Err(ServerError::config_invalid(
                "network.listen_addr",
                "port cannot be 0",
            ));
        }
        positive("network.send_attempts", u64::from(self.send_attempts))?;
        positive("network.io_timeout_ms", self.io_timeout_ms)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            send_attempts: default_send_attempts(),
            io_timeout_ms: default_io_timeout_ms(),
        }
    }
}

// ============================================
// EngineConfig
// ============================================

/// Reservation engine configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum reservation records, including cancelled ones awaiting
    /// their sweep.
    #[serde(default = "default_max_reservations")]
    pub max_reservations: usize,

    /// Timer wheel slots (one per tick).
    #[serde(default = "default_wheel_slots")]
    pub wheel_slots: usize,

    /// Tick period in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Buckets of the reservation index.
    #[serde(default = "default_reservation_buckets")]
    pub reservation_buckets: usize,
}

fn default_max_reservations() -> usize {
    1000
}

fn default_wheel_slots() -> usize {
    3600
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_reservation_buckets() -> usize {
    2048
}

impl EngineConfig {
    fn validate(&self) -> Result<()> {
        positive("engine.max_reservations", self.max_reservations as u64)?;
        positive("engine.wheel_slots", self.wheel_slots as u64)?;
        positive("engine.tick_interval_ms", self.tick_interval_ms)?;
        positive("engine.reservation_buckets", self.reservation_buckets as u64)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_reservations: default_max_reservations(),
            wheel_slots: default_wheel_slots(),
            tick_interval_ms: default_tick_interval_ms(),
            reservation_buckets: default_reservation_buckets(),
        }
    }
}

// ============================================
// RegistryConfig
// ============================================

/// Device registry configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Buckets of the device index.
    #[serde(default = "default_device_buckets")]
    pub device_buckets: usize,

    /// Most devices returned by one list or status update.
    #[serde(default = "default_max_list")]
    pub max_list: usize,
}

fn default_device_buckets() -> usize {
    128
}

fn default_max_list() -> usize {
    100
}

impl RegistryConfig {
    fn validate(&self) -> Result<()> {
        positive("registry.device_buckets", self.device_buckets as u64)?;
        if self.max_list == 0 || self.max_list > MAX_DEVICES_PER_MESSAGE {
            return Err(ServerError::config_invalid(
                "registry.max_list",
                format!("must be 1..={MAX_DEVICES_PER_MESSAGE}"),
            ));
        }
        Ok(())
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            device_buckets: default_device_buckets(),
            max_list: default_max_list(),
        }
    }
}

// ============================================
// SessionsConfig
// ============================================

/// Session configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Maximum concurrent sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Buckets of the session index.
    #[serde(default = "default_session_buckets")]
    pub session_buckets: usize,

    /// Idle time after which a session expires.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Period of the expiry sweep.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_max_sessions() -> usize {
    256
}

fn default_session_buckets() -> usize {
    512
}

fn default_idle_timeout_secs() -> u64 {
    1800
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

impl SessionsConfig {
    fn validate(&self) -> Result<()> {
        positive("sessions.max_sessions", self.max_sessions as u64)?;
        positive("sessions.session_buckets", self.session_buckets as u64)?;
        positive("sessions.idle_timeout_secs", self.idle_timeout_secs)?;
        positive("sessions.cleanup_interval_secs", self.cleanup_interval_secs)
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            session_buckets: default_session_buckets(),
            idle_timeout_secs: default_idle_timeout_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

// ============================================
// LoggingConfig
// ============================================

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LoggingConfig {
    fn validate(&self) -> Result<()> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.level.to_ascii_lowercase().as_str()) {
            return Err(ServerError::config_invalid(
                "logging.level",
                format!("'{}' is not one of {}", self.level, LEVELS.join(", ")),
            ));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================
// Devices & Users
// ============================================

/// One seed device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Stable device id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Device type.
    pub device_type: String,
}

impl DeviceConfig {
    fn new(id: &str, name: &str, device_type: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            device_type: device_type.to_string(),
        }
    }
}

fn default_devices() -> Vec<DeviceConfig> {
    vec![
        DeviceConfig::new("DEV001", "Oscilloscope A", "oscilloscope"),
        DeviceConfig::new("DEV002", "Logic Analyzer B", "logic-analyzer"),
        DeviceConfig::new("DEV003", "Spectrum Analyzer C", "spectrum-analyzer"),
        DeviceConfig::new("DEV004", "Power Supply D", "power-supply"),
        DeviceConfig::new("DEV005", "Signal Generator E", "signal-generator"),
    ]
}

/// One user account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    /// Account name.
    pub username: String,
    /// Hex SHA-256 of the password (see `devbroker hash-password`).
    pub password_sha256: String,
}

impl std::fmt::Debug for UserConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserConfig")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "2bd806c97f0e00af1a1fc3328fa763a9269723c8db8fac4f93af71db186d6e90";

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_addr().port(), 7070);
        assert_eq!(config.engine.wheel_slots, 3600);
        assert_eq!(config.retry_policy().attempts, 3);
    }

    #[test]
    fn test_empty_file_uses_seed_devices() {
        let config: ServerConfig = "".parse().unwrap();
        let ids: Vec<_> = config.devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["DEV001", "DEV002", "DEV003", "DEV004", "DEV005"]);
        assert!(config.users.is_empty());
    }

    #[test]
    fn test_full_config_format() {
        let toml = format!(
            r#"
            [network]
            listen_addr = "127.0.0.1:9000"
            send_attempts = 5
            io_timeout_ms = 250

            [engine]
            max_reservations = 50
            wheel_slots = 60
            tick_interval_ms = 100

            [sessions]
            idle_timeout_secs = 30

            [logging]
            level = "debug"

            [[devices]]
            id = "BENCH1"
            name = "Bench supply"
            device_type = "power-supply"

            [[users]]
            username = "alice"
            password_sha256 = "{DIGEST}"
            "#
        );

        let config: ServerConfig = toml.parse().unwrap();
        assert_eq!(config.listen_addr().port(), 9000);
        assert_eq!(config.retry_policy().attempts, 5);
        assert_eq!(config.retry_policy().timeout, Duration::from_millis(250));
        assert_eq!(config.engine.max_reservations, 50);
        assert_eq!(config.engine.reservation_buckets, 2048);
        assert_eq!(config.tick_interval(), Duration::from_millis(100));
        assert_eq!(config.idle_timeout(), Duration::from_secs(30));
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.users[0].username, "alice");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = "[engine]\nwheel_slots = 0".parse::<ServerConfig>().unwrap_err();
        assert!(err.to_string().contains("engine.wheel_slots"));

        let err = "[logging]\nlevel = \"loud\"".parse::<ServerConfig>().unwrap_err();
        assert!(err.is_config_error());

        let err = "[registry]\nmax_list = 500".parse::<ServerConfig>().unwrap_err();
        assert!(err.to_string().contains("registry.max_list"));
    }

    #[test]
    fn test_duplicate_device_rejected() {
        let toml = r#"
            [[devices]]
            id = "A"
            name = "one"
            device_type = "t"

            [[devices]]
            id = "A"
            name = "two"
            device_type = "t"
        "#;
        let err = toml.parse::<ServerConfig>().unwrap_err();
        assert!(err.to_string().contains("duplicate device id"));
    }

    #[test]
    fn test_bad_password_digest_rejected() {
        let toml = r#"
            [[users]]
            username = "bob"
            password_sha256 = "plaintext"
        "#;
        let err = toml.parse::<ServerConfig>().unwrap_err();
        assert!(err.to_string().contains("password_sha256"));
    }

    #[test]
    fn test_user_debug_hides_digest() {
        let user = UserConfig {
            username: "alice".into(),
            password_sha256: DIGEST.into(),
        };
        assert!(!format!("{user:?}").contains(DIGEST));
    }

    #[test]
    fn test_to_toml_roundtrip() {
        let config = ServerConfig::default();
        let reparsed: ServerConfig = config.to_toml().parse().unwrap();
        assert_eq!(reparsed.devices, config.devices);
    }
}
