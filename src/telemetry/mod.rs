//! Telemetry for the trust-boundary core.
//!
//! Structured logging, security event lines, spans and counters.
//! All output is local (stderr, file, or an embedding recorder).

mod logging;
mod metrics;
pub mod security_log;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{
    record_auth_failure, record_auth_success, record_decryption_failure, record_frame_rejected,
    record_key_rotation, record_lockout, record_nonce_collision, record_rate_limited,
    record_session_expired,
};
pub use security_log::{log_security_event, SecurityEvent, SecuritySeverity};
pub use spans::{FrameSpan, SpanExt};
