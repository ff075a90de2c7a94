//! Security event logging for the trust boundary.
//!
//! SECURITY: Every line is structured key/value data for forensic analysis.
//! Callers pass identities, key ids and counters only; token, key, nonce and
//! plaintext bytes never reach this module.

use serde::{Deserialize, Serialize};

/// Security event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityEvent {
    /// Credential accepted and session issued.
    AuthSuccess,
    /// Credential rejected.
    AuthFailure,
    /// Identity crossed the failed-attempt threshold.
    Lockout,
    /// Attempt from an administratively locked identity.
    IdentityLocked,
    /// Request refused by a rate limiter.
    RateLimited,
    /// Session exceeded idle timeout or max lifetime.
    SessionExpired,
    /// Session explicitly revoked.
    SessionRevoked,
    /// Unknown session token presented.
    InvalidSession,
    /// Nonce draw collided with the ledger; retrying.
    NonceCollision,
    /// Nonce retries exhausted; encryption halted.
    NonceReuseDetected,
    /// Operator cleared a halted engine.
    NonceAlarmCleared,
    /// New active key promoted.
    KeyRotated,
    /// Blob failed authentication.
    DecryptionFailed,
    /// Frame or payload could not be parsed.
    ProtocolViolation,
    /// Frame declared a length above the configured maximum.
    OversizedFrame,
    /// Client asked for a version below the enforced minimum.
    DowngradeRejected,
}

impl SecurityEvent {
    /// Get the severity level for this event.
    pub fn severity(&self) -> SecuritySeverity {
        match self {
            Self::AuthSuccess => SecuritySeverity::Info,
            Self::AuthFailure => SecuritySeverity::Warning,
            Self::Lockout => SecuritySeverity::Error,
            Self::IdentityLocked => SecuritySeverity::Warning,
            Self::RateLimited => SecuritySeverity::Warning,
            Self::SessionExpired => SecuritySeverity::Info,
            Self::SessionRevoked => SecuritySeverity::Info,
            Self::InvalidSession => SecuritySeverity::Warning,
            Self::NonceCollision => SecuritySeverity::Error,
            Self::NonceReuseDetected => SecuritySeverity::Critical,
            Self::NonceAlarmCleared => SecuritySeverity::Warning,
            Self::KeyRotated => SecuritySeverity::Info,
            Self::DecryptionFailed => SecuritySeverity::Error,
            Self::ProtocolViolation => SecuritySeverity::Warning,
            Self::OversizedFrame => SecuritySeverity::Warning,
            Self::DowngradeRejected => SecuritySeverity::Error,
        }
    }

    /// Get a string representation of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthSuccess => "auth_success",
            Self::AuthFailure => "auth_failure",
            Self::Lockout => "lockout",
            Self::IdentityLocked => "identity_locked",
            Self::RateLimited => "rate_limited",
            Self::SessionExpired => "session_expired",
            Self::SessionRevoked => "session_revoked",
            Self::InvalidSession => "invalid_session",
            Self::NonceCollision => "nonce_collision",
            Self::NonceReuseDetected => "nonce_reuse_detected",
            Self::NonceAlarmCleared => "nonce_alarm_cleared",
            Self::KeyRotated => "key_rotated",
            Self::DecryptionFailed => "decryption_failed",
            Self::ProtocolViolation => "protocol_violation",
            Self::OversizedFrame => "oversized_frame",
            Self::DowngradeRejected => "downgrade_rejected",
        }
    }

    /// Whether the event records an operation that went through.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::AuthSuccess | Self::SessionRevoked | Self::KeyRotated | Self::NonceAlarmCleared
        )
    }
}

/// Severity levels for security events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SecuritySeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl SecuritySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

/// Log a security event with structured data.
///
/// # Example
/// ```
/// use gg_trust::telemetry::{log_security_event, SecurityEvent};
///
/// log_security_event(
///     SecurityEvent::AuthFailure,
///     "Invalid credential",
///     &[("identity", "uid:1000"), ("failed_count", "3")],
/// );
/// ```
pub fn log_security_event(event: SecurityEvent, message: &str, details: &[(&str, &str)]) {
    let details_str = details
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ");
    let event_type = event.as_str();
    let severity = event.severity().as_str();

    match event.severity() {
        SecuritySeverity::Debug => {
            tracing::debug!(target: "security", event_type, severity, details = %details_str, "{}", message)
        }
        SecuritySeverity::Info => {
            tracing::info!(target: "security", event_type, severity, details = %details_str, "{}", message)
        }
        SecuritySeverity::Warning => {
            tracing::warn!(target: "security", event_type, severity, details = %details_str, "{}", message)
        }
        SecuritySeverity::Error | SecuritySeverity::Critical => {
            tracing::error!(target: "security", event_type, severity, details = %details_str, "{}", message)
        }
    }
}
