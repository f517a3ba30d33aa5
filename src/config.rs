//! # Configuration Management
//!
//! Centralized configuration for channels, worker pools, handshake policy and
//! logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - TOML strings via `from_toml()`
//! - Environment variables via `from_env()` (prefix `SECURE_DATAGRAM_`)
//! - Direct instantiation with defaults and `default_with_overrides()`
//!
//! Durations are serialized as integer milliseconds.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Length of every salt/nonce, in bytes
pub const SALT_LEN: usize = 8;

/// Length of the encrypted-body header, in bytes
pub const HEADER_LEN: usize = 8;

/// Length of the encrypted-body MAC footer, in bytes
pub const FOOTER_LEN: usize = 8;

/// Random prefix mixed into every encrypted plaintext
pub const PAD_LEN: usize = 4;

/// Shortest accepted symmetric key
pub const MIN_KEY_LEN: usize = 12;

/// Longest accepted symmetric key
pub const MAX_KEY_LEN: usize = 64;

/// Largest plaintext the encryption engine accepts
pub const MAX_PLAINTEXT_SIZE: usize = 65_200;

/// Largest application payload carried by a Data packet
pub const MAX_DATA_PAYLOAD: usize = 1024;

/// Largest UDP datagram a slot must be able to hold
pub const MAX_DATAGRAM_SIZE: usize = 65_536;

/// Upper bound for `security.replay_window`
pub const MAX_REPLAY_WINDOW: usize = 4096;

/// Upper bound for `security.max_sessions`
pub const MAX_SESSIONS: usize = 1 << 20;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProtocolConfig {
    /// Socket and receive-buffer settings
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Elastic worker pool settings
    #[serde(default)]
    pub pool: PoolConfig,

    /// Handshake policy
    #[serde(default)]
    pub security: SecurityConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProtocolConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("SECURE_DATAGRAM_ADDRESS") {
            config.channel.address = addr;
        }

        if let Ok(capacity) = std::env::var("SECURE_DATAGRAM_BUFFER_CAPACITY") {
            if let Ok(val) = capacity.parse::<usize>() {
                config.channel.buffer_capacity = val;
            }
        }

        if let Ok(timeout) = std::env::var("SECURE_DATAGRAM_POLL_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.channel.poll_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(min) = std::env::var("SECURE_DATAGRAM_MIN_WORKERS") {
            if let Ok(val) = min.parse::<usize>() {
                config.pool.min_workers = val;
            }
        }

        if let Ok(max) = std::env::var("SECURE_DATAGRAM_MAX_WORKERS") {
            if let Ok(val) = max.parse::<usize>() {
                config.pool.max_workers = val;
            }
        }

        if let Ok(level) = std::env::var("SECURE_DATAGRAM_LOG_LEVEL") {
            config.logging.log_level = level.parse::<Level>().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid log level: {level}"))
            })?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.channel.validate());
        errors.extend(self.pool.validate());
        errors.extend(self.security.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Socket and receive-buffer configuration for one channel
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    /// Local bind address (e.g., "127.0.0.1:9000", port 0 for ephemeral)
    pub address: String,

    /// How long the receiver waits for a readable socket before re-checking its stop flag
    #[serde(with = "duration_serde")]
    pub poll_timeout: Duration,

    /// Number of slots in the ring buffer
    pub buffer_capacity: usize,

    /// Bytes per slot; datagrams longer than this are truncated by the OS
    pub slot_size: usize,

    /// Log the reason for every dropped datagram at debug level
    pub debug_drops: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:0"),
            poll_timeout: Duration::from_secs(1),
            buffer_capacity: 64,
            slot_size: MAX_DATAGRAM_SIZE,
            debug_drops: false,
        }
    }
}

impl ChannelConfig {
    /// Validate channel configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Channel address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid channel address format: '{}' (expected format: '0.0.0.0:9000')",
                self.address
            ));
        }

        if self.poll_timeout.is_zero() {
            errors.push("Poll timeout must be greater than 0".to_string());
        } else if self.poll_timeout > Duration::from_secs(30) {
            errors.push(format!(
                "Poll timeout too long: {:?} (maximum: 30s, shutdown waits on it)",
                self.poll_timeout
            ));
        }

        if self.buffer_capacity == 0 {
            errors.push("Buffer capacity must be greater than 0".to_string());
        } else if self.buffer_capacity > 65_536 {
            errors.push(format!(
                "Buffer capacity too large: {} (maximum: 65536)",
                self.buffer_capacity
            ));
        }

        if self.slot_size < 512 {
            errors.push(format!(
                "Slot size too small: {} bytes (minimum: 512)",
                self.slot_size
            ));
        } else if self.slot_size > MAX_DATAGRAM_SIZE {
            errors.push(format!(
                "Slot size too large: {} bytes (maximum: {MAX_DATAGRAM_SIZE})",
                self.slot_size
            ));
        }

        errors
    }
}

/// Elastic worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Workers started up front; the pool never shrinks below this
    pub min_workers: usize,

    /// Upper bound reached under backlog
    pub max_workers: usize,

    /// How long a worker waits for a notification before counting an idle attempt
    #[serde(with = "duration_serde")]
    pub wait_timeout: Duration,

    /// Consecutive idle waits after which a surplus worker exits
    pub max_idle_attempts: u32,

    /// Pending notifications above which a woken worker spawns a sibling
    pub backlog_threshold: usize,

    /// Bound on graceful shutdown before remaining workers are abandoned
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 8,
            wait_timeout: Duration::from_millis(500),
            max_idle_attempts: 10,
            backlog_threshold: 2,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    /// Validate pool configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.min_workers == 0 {
            errors.push("Minimum workers must be at least 1".to_string());
        }

        if self.max_workers < self.min_workers {
            errors.push(format!(
                "Maximum workers ({}) cannot be lower than minimum workers ({})",
                self.max_workers, self.min_workers
            ));
        } else if self.max_workers > 1024 {
            errors.push(format!(
                "Maximum workers too large: {} (maximum: 1024)",
                self.max_workers
            ));
        }

        if self.wait_timeout.is_zero() {
            errors.push("Worker wait timeout must be greater than 0".to_string());
        }

        if self.max_idle_attempts == 0 {
            errors.push("Max idle attempts must be at least 1".to_string());
        }

        if self.shutdown_timeout < self.wait_timeout {
            errors.push(format!(
                "Shutdown timeout ({:?}) should not be shorter than the worker wait timeout ({:?})",
                self.shutdown_timeout, self.wait_timeout
            ));
        }

        errors
    }
}

/// Handshake policy advertised by a server in its Olleh reply
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecurityConfig {
    /// Whether clients must send a login
    pub need_login: bool,

    /// Whether clients must send a password
    pub need_pass: bool,

    /// Recently accepted salts remembered per session for replay rejection
    pub replay_window: usize,

    /// Idle time after which the in-memory session store forgets a peer
    #[serde(with = "duration_serde")]
    pub session_ttl: Duration,

    /// Most sessions the in-memory store holds at once
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_max_sessions() -> usize {
    65_536
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            need_login: false,
            need_pass: false,
            replay_window: 64,
            session_ttl: Duration::from_secs(600),
            max_sessions: default_max_sessions(),
        }
    }
}

impl SecurityConfig {
    /// Validate session store limits
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        // 0 turns replay rejection off
        if self.replay_window > MAX_REPLAY_WINDOW {
            errors.push(format!(
                "Replay window too large: {} (maximum: {MAX_REPLAY_WINDOW})",
                self.replay_window
            ));
        }

        if self.session_ttl.is_zero() {
            errors.push("Session TTL must be greater than 0".to_string());
        }

        if self.max_sessions == 0 {
            errors.push("Max sessions must be at least 1".to_string());
        } else if self.max_sessions > MAX_SESSIONS {
            errors.push(format!(
                "Max sessions too large: {} (maximum: {MAX_SESSIONS})",
                self.max_sessions
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,

    /// Let `RUST_LOG` override `log_level` when set
    pub env_filter: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("secure-datagram"),
            log_level: Level::INFO,
            json_format: false,
            env_filter: true,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
