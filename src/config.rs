//! Trust-boundary configuration.
//!
//! Values come from `GG_TRUST_*` environment variables with defaults, or from
//! a TOML file. Invalid environment values fall back to defaults without
//! crashing; [`TrustConfig::validate`] then rejects settings that would
//! weaken the boundary.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `GG_TRUST_MAX_MESSAGE_BYTES` | 16777216 | Frame size cap (bytes) |
//! | `GG_TRUST_MIN_PROTOCOL_VERSION` | 2 | Downgrade floor |
//! | `GG_TRUST_SESSION_IDLE_TIMEOUT` | 1800 | Session idle timeout (secs) |
//! | `GG_TRUST_SESSION_MAX_LIFETIME` | 86400 | Session max lifetime (secs) |
//! | `GG_TRUST_AUTH_FAILED_ATTEMPT_LIMIT` | 5 | Failures before lockout |
//! | `GG_TRUST_AUTH_LOCKOUT_DURATION` | 30 | Lockout length (secs) |
//! | `GG_TRUST_AUTH_ATTEMPT_WINDOW` | 60 | Failure counting window (secs) |
//! | `GG_TRUST_SESSION_REQUEST_RATE_LIMIT` | 1000 | Requests per session per minute |
//! | `GG_TRUST_EXEMPT_REQUEST_RATE_LIMIT` | 600 | Health probes per identity per minute |
//! | `GG_TRUST_VALIDATION_FLOOR_MICROS` | 100 | Minimum `validate()` duration (µs, at most 10000) |
//! | `GG_TRUST_CLEANUP_INTERVAL` | 60 | Session reaper period (secs) |
//! | `GG_TRUST_KDF_ITERATIONS` | 600000 | PBKDF2 iterations |
//! | `GG_TRUST_NONCE_RETRY_LIMIT` | 3 | Nonce redraws before halting |
//! | `GG_TRUST_NONCE_LEDGER_CAPACITY` | 10000 | Nonces remembered |
//! | `GG_TRUST_SALT_PATH` | platform config dir | Installation salt file |
//! | `GG_TRUST_SOCKET_PATH` | /var/run/gg-trust/gg-trust.sock | IPC socket |
//! | `GG_TRUST_MAX_CONNECTIONS` | 64 | Concurrent IPC connections |
//! | `GG_TRUST_AUTH_TOKEN` | (none) | Handshake credential |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ipc::{CURRENT_PROTOCOL_VERSION, MIN_MAX_MESSAGE_BYTES};
use crate::security::{DEFAULT_KDF_ITERATIONS, DEFAULT_LEDGER_CAPACITY, MIN_KDF_ITERATIONS};

/// Default socket path for IPC communication.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/gg-trust/gg-trust.sock";

/// Upper bound on nonce redraws.
pub const MAX_NONCE_RETRY_LIMIT: u32 = 16;

/// Upper bound on the `validate()` timing floor, which blocks the calling
/// thread.
pub const MAX_VALIDATION_FLOOR: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(String),
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod micros {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_micros() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_micros)
    }
}

/// Framing limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtocolConfig {
    pub max_message_bytes: usize,
    pub min_protocol_version: u16,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: 16 * 1024 * 1024,
            min_protocol_version: 2,
        }
    }
}

/// Session and rate-limit policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    #[serde(rename = "session_idle_timeout_secs", with = "secs")]
    pub session_idle_timeout: Duration,
    #[serde(rename = "session_max_lifetime_secs", with = "secs")]
    pub session_max_lifetime: Duration,
    pub auth_failed_attempt_limit: u32,
    #[serde(rename = "auth_lockout_duration_secs", with = "secs")]
    pub auth_lockout_duration: Duration,
    #[serde(rename = "auth_attempt_window_secs", with = "secs")]
    pub auth_attempt_window: Duration,
    /// Requests per session per minute.
    pub session_request_rate_limit: u32,
    /// Auth-exempt requests (health probes) per identity per minute.
    pub exempt_request_rate_limit: u32,
    #[serde(rename = "validation_floor_micros", with = "micros")]
    pub validation_floor: Duration,
    #[serde(rename = "cleanup_interval_secs", with = "secs")]
    pub cleanup_interval: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_idle_timeout: Duration::from_secs(30 * 60),
            session_max_lifetime: Duration::from_secs(24 * 3600),
            auth_failed_attempt_limit: 5,
            auth_lockout_duration: Duration::from_secs(30),
            auth_attempt_window: Duration::from_secs(60),
            session_request_rate_limit: 1000,
            exempt_request_rate_limit: 600,
            validation_floor: Duration::from_micros(100),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Key derivation and nonce policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncryptionConfig {
    pub kdf_iterations: u32,
    pub nonce_retry_limit: u32,
    pub nonce_ledger_capacity: usize,
    /// Installation salt file; `None` uses the platform default.
    pub salt_path: Option<PathBuf>,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            nonce_retry_limit: 3,
            nonce_ledger_capacity: DEFAULT_LEDGER_CAPACITY,
            salt_path: None,
        }
    }
}

/// IPC listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            max_connections: 64,
        }
    }
}

/// Complete trust-boundary configuration.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrustConfig {
    pub protocol: ProtocolConfig,
    pub auth: AuthConfig,
    pub encryption: EncryptionConfig,
    pub server: ServerConfig,
    /// Handshake credential. Never serialized back out.
    #[serde(skip_serializing)]
    pub auth_token: String,
}

impl std::fmt::Debug for TrustConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustConfig")
            .field("protocol", &self.protocol)
            .field("auth", &self.auth)
            .field("encryption", &self.encryption)
            .field("server", &self.server)
            .field("auth_token", &"[REDACTED]")
            .finish()
    }
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u32` env var, returning `default` on missing or invalid.
fn parse_u32(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u32>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_u16(key: &str, default: u16) -> u16 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u16>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(parse_u64(key, default.as_secs()))
}

fn load_protocol_config() -> ProtocolConfig {
    let d = ProtocolConfig::default();
    ProtocolConfig {
        max_message_bytes: parse_usize("GG_TRUST_MAX_MESSAGE_BYTES", d.max_message_bytes),
        min_protocol_version: parse_u16("GG_TRUST_MIN_PROTOCOL_VERSION", d.min_protocol_version),
    }
}

fn load_auth_config() -> AuthConfig {
    let d = AuthConfig::default();
    AuthConfig {
        session_idle_timeout: parse_secs("GG_TRUST_SESSION_IDLE_TIMEOUT", d.session_idle_timeout),
        session_max_lifetime: parse_secs("GG_TRUST_SESSION_MAX_LIFETIME", d.session_max_lifetime),
        auth_failed_attempt_limit: parse_u32(
            "GG_TRUST_AUTH_FAILED_ATTEMPT_LIMIT",
            d.auth_failed_attempt_limit,
        ),
        auth_lockout_duration: parse_secs(
            "GG_TRUST_AUTH_LOCKOUT_DURATION",
            d.auth_lockout_duration,
        ),
        auth_attempt_window: parse_secs("GG_TRUST_AUTH_ATTEMPT_WINDOW", d.auth_attempt_window),
        session_request_rate_limit: parse_u32(
            "GG_TRUST_SESSION_REQUEST_RATE_LIMIT",
            d.session_request_rate_limit,
        ),
        exempt_request_rate_limit: parse_u32(
            "GG_TRUST_EXEMPT_REQUEST_RATE_LIMIT",
            d.exempt_request_rate_limit,
        ),
        validation_floor: Duration::from_micros(parse_u64(
            "GG_TRUST_VALIDATION_FLOOR_MICROS",
            d.validation_floor.as_micros() as u64,
        )),
        cleanup_interval: parse_secs("GG_TRUST_CLEANUP_INTERVAL", d.cleanup_interval),
    }
}

fn load_encryption_config() -> EncryptionConfig {
    let d = EncryptionConfig::default();
    EncryptionConfig {
        kdf_iterations: parse_u32("GG_TRUST_KDF_ITERATIONS", d.kdf_iterations),
        nonce_retry_limit: parse_u32("GG_TRUST_NONCE_RETRY_LIMIT", d.nonce_retry_limit),
        nonce_ledger_capacity: parse_usize(
            "GG_TRUST_NONCE_LEDGER_CAPACITY",
            d.nonce_ledger_capacity,
        ),
        salt_path: std::env::var_os("GG_TRUST_SALT_PATH").map(PathBuf::from),
    }
}

fn load_server_config() -> ServerConfig {
    let d = ServerConfig::default();
    ServerConfig {
        socket_path: std::env::var_os("GG_TRUST_SOCKET_PATH")
            .map(PathBuf::from)
            .unwrap_or(d.socket_path),
        max_connections: parse_usize("GG_TRUST_MAX_CONNECTIONS", d.max_connections),
    }
}

impl TrustConfig {
    /// Load from environment variables. Missing or unparsable values fall
    /// back to defaults; call [`validate`](Self::validate) before use.
    pub fn from_env() -> Self {
        Self {
            protocol: load_protocol_config(),
            auth: load_auth_config(),
            encryption: load_encryption_config(),
            server: load_server_config(),
            auth_token: std::env::var("GG_TRUST_AUTH_TOKEN").unwrap_or_default(),
        }
    }

    /// Parse TOML. Unknown keys are rejected; omitted keys take defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.message().to_string()))
    }

    /// Read a TOML file. `GG_TRUST_AUTH_TOKEN` fills in a missing credential.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;
        if config.auth_token.is_empty() {
            config.auth_token = std::env::var("GG_TRUST_AUTH_TOKEN").unwrap_or_default();
        }
        Ok(config)
    }

    /// Reject settings that would weaken the trust boundary.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.protocol;
        if p.max_message_bytes < MIN_MAX_MESSAGE_BYTES {
            return Err(invalid(
                "max_message_bytes",
                format!("must be at least {}", MIN_MAX_MESSAGE_BYTES),
            ));
        }
        if p.max_message_bytes > u32::MAX as usize {
            return Err(invalid("max_message_bytes", "must fit the u32 length prefix"));
        }
        if p.min_protocol_version == 0 || p.min_protocol_version > CURRENT_PROTOCOL_VERSION.0 {
            return Err(invalid(
                "min_protocol_version",
                format!("must be in 1..={}", CURRENT_PROTOCOL_VERSION.0),
            ));
        }

        let a = &self.auth;
        let nonzero_durations = [
            ("session_idle_timeout", a.session_idle_timeout),
            ("session_max_lifetime", a.session_max_lifetime),
            ("auth_lockout_duration", a.auth_lockout_duration),
            ("auth_attempt_window", a.auth_attempt_window),
            ("cleanup_interval", a.cleanup_interval),
        ];
        for (field, value) in nonzero_durations {
            if value.is_zero() {
                return Err(invalid(field, "must be non-zero"));
            }
        }
        let nonzero_limits = [
            ("auth_failed_attempt_limit", a.auth_failed_attempt_limit),
            ("session_request_rate_limit", a.session_request_rate_limit),
            ("exempt_request_rate_limit", a.exempt_request_rate_limit),
        ];
        for (field, value) in nonzero_limits {
            if value == 0 {
                return Err(invalid(field, "must be non-zero"));
            }
        }
        if a.validation_floor > MAX_VALIDATION_FLOOR {
            return Err(invalid(
                "validation_floor",
                format!("must be at most {}µs", MAX_VALIDATION_FLOOR.as_micros()),
            ));
        }

        let e = &self.encryption;
        if e.kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(invalid(
                "kdf_iterations",
                format!("must be at least {}", MIN_KDF_ITERATIONS),
            ));
        }
        if e.nonce_retry_limit > MAX_NONCE_RETRY_LIMIT {
            return Err(invalid(
                "nonce_retry_limit",
                format!("must be at most {}", MAX_NONCE_RETRY_LIMIT),
            ));
        }
        if e.nonce_ledger_capacity == 0 {
            return Err(invalid("nonce_ledger_capacity", "must be non-zero"));
        }

        if self.server.max_connections == 0 {
            return Err(invalid("max_connections", "must be non-zero"));
        }
        Ok(())
    }

    /// Env-style `KEY=value` lines; the credential is reported as set/unset.
    pub fn effective_lines(&self) -> Vec<String> {
        let salt = self
            .encryption
            .salt_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(platform default)".to_string());
        vec![
            format!("GG_TRUST_MAX_MESSAGE_BYTES={}", self.protocol.max_message_bytes),
            format!(
                "GG_TRUST_MIN_PROTOCOL_VERSION={}",
                self.protocol.min_protocol_version
            ),
            format!(
                "GG_TRUST_SESSION_IDLE_TIMEOUT={}",
                self.auth.session_idle_timeout.as_secs()
            ),
            format!(
                "GG_TRUST_SESSION_MAX_LIFETIME={}",
                self.auth.session_max_lifetime.as_secs()
            ),
            format!(
                "GG_TRUST_AUTH_FAILED_ATTEMPT_LIMIT={}",
                self.auth.auth_failed_attempt_limit
            ),
            format!(
                "GG_TRUST_AUTH_LOCKOUT_DURATION={}",
                self.auth.auth_lockout_duration.as_secs()
            ),
            format!(
                "GG_TRUST_AUTH_ATTEMPT_WINDOW={}",
                self.auth.auth_attempt_window.as_secs()
            ),
            format!(
                "GG_TRUST_SESSION_REQUEST_RATE_LIMIT={}",
                self.auth.session_request_rate_limit
            ),
            format!(
                "GG_TRUST_EXEMPT_REQUEST_RATE_LIMIT={}",
                self.auth.exempt_request_rate_limit
            ),
            format!(
                "GG_TRUST_VALIDATION_FLOOR_MICROS={}",
                self.auth.validation_floor.as_micros()
            ),
            format!(
                "GG_TRUST_CLEANUP_INTERVAL={}",
                self.auth.cleanup_interval.as_secs()
            ),
            format!("GG_TRUST_KDF_ITERATIONS={}", self.encryption.kdf_iterations),
            format!(
                "GG_TRUST_NONCE_RETRY_LIMIT={}",
                self.encryption.nonce_retry_limit
            ),
            format!(
                "GG_TRUST_NONCE_LEDGER_CAPACITY={}",
                self.encryption.nonce_ledger_capacity
            ),
            format!("GG_TRUST_SALT_PATH={}", salt),
            format!(
                "GG_TRUST_SOCKET_PATH={}",
                self.server.socket_path.display()
            ),
            format!("GG_TRUST_MAX_CONNECTIONS={}", self.server.max_connections),
            format!(
                "GG_TRUST_AUTH_TOKEN={}",
                if self.auth_token.is_empty() { "(unset)" } else { "(set)" }
            ),
        ]
    }
}
