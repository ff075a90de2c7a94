//! Structured audit records for security-relevant events.
//!
//! Every trust-boundary decision worth keeping (auth outcome, lockout, nonce
//! alarm, key rotation, decryption failure, protocol violation) goes through
//! an [`AuditTrail`]. The trail writes a `security` tracing line and hands an
//! [`AuditEvent`] to an [`AuditSink`]. Emission is fire-and-forget: sinks
//! cannot fail the operation that produced the event.
//!
//! Records carry identities, key ids and counters. Token, key, nonce and
//! plaintext bytes are never passed in.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::telemetry::{log_security_event, SecurityEvent, SecuritySeverity};

/// Audit event categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditCategory {
    /// Credential checks and lockouts
    Authentication,
    /// Session lifecycle and per-session limits
    Session,
    /// Key derivation, rotation, encrypt/decrypt
    Encryption,
    /// Framing and version negotiation
    Protocol,
}

impl AuditCategory {
    fn for_event(event: SecurityEvent) -> Self {
        match event {
            SecurityEvent::AuthSuccess
            | SecurityEvent::AuthFailure
            | SecurityEvent::Lockout
            | SecurityEvent::IdentityLocked => Self::Authentication,
            SecurityEvent::RateLimited
            | SecurityEvent::SessionExpired
            | SecurityEvent::SessionRevoked
            | SecurityEvent::InvalidSession => Self::Session,
            SecurityEvent::NonceCollision
            | SecurityEvent::NonceReuseDetected
            | SecurityEvent::NonceAlarmCleared
            | SecurityEvent::KeyRotated
            | SecurityEvent::DecryptionFailed => Self::Encryption,
            SecurityEvent::ProtocolViolation
            | SecurityEvent::OversizedFrame
            | SecurityEvent::DowngradeRejected => Self::Protocol,
        }
    }
}

impl std::fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditCategory::Authentication => write!(f, "AUTHENTICATION"),
            AuditCategory::Session => write!(f, "SESSION"),
            AuditCategory::Encryption => write!(f, "ENCRYPTION"),
            AuditCategory::Protocol => write!(f, "PROTOCOL"),
        }
    }
}

/// Audit event structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Random 128-bit hex identifier
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: SecuritySeverity,
    pub category: AuditCategory,
    pub event: SecurityEvent,
    /// Human-readable message
    pub message: String,
    /// Component that emitted the event
    pub source: String,
    /// Caller identity, if one is known
    pub actor: Option<String>,
    pub metadata: HashMap<String, String>,
    pub success: bool,
}

impl AuditEvent {
    pub fn builder() -> AuditEventBuilder {
        AuditEventBuilder::default()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_log_string(&self) -> String {
        format!(
            "[{}] {} [{}] {} - {} (actor={:?}, success={})",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.severity.as_str(),
            self.category,
            self.event.as_str(),
            self.message,
            self.actor,
            self.success
        )
    }
}

/// Builder for audit events
#[derive(Debug, Default)]
pub struct AuditEventBuilder {
    event: Option<SecurityEvent>,
    message: Option<String>,
    source: Option<String>,
    actor: Option<String>,
    metadata: HashMap<String, String>,
}

impl AuditEventBuilder {
    /// Sets the event; severity, category and success follow from it.
    pub fn event(mut self, event: SecurityEvent) -> Self {
        self.event = Some(event);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<AuditEvent, &'static str> {
        let event = self.event.ok_or("event is required")?;
        Ok(AuditEvent {
            id: generate_event_id(),
            timestamp: Utc::now(),
            severity: event.severity(),
            category: AuditCategory::for_event(event),
            event,
            message: self.message.ok_or("message is required")?,
            source: self.source.ok_or("source is required")?,
            actor: self.actor,
            metadata: self.metadata,
            success: event.is_success(),
        })
    }
}

fn generate_event_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes[..]);
    hex::encode(bytes)
}

/// Destination for audit events. Implementations must not block for long;
/// persistence belongs to whatever sits behind the sink.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Discards events. The tracing line is still written by [`AuditTrail`].
#[derive(Debug, Default)]
pub struct NullSink;

impl AuditSink for NullSink {
    fn record(&self, _event: AuditEvent) {}
}

/// Bounded in-memory sink; oldest events are dropped first.
pub struct MemoryAuditLog {
    events: Mutex<VecDeque<AuditEvent>>,
    max_events: usize,
}

impl MemoryAuditLog {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            max_events: max_events.max(1),
        }
    }

    /// Snapshot of retained events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn by_event(&self, event: SecurityEvent) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event == event)
            .cloned()
            .collect()
    }

    pub fn count(&self, event: SecurityEvent) -> usize {
        self.events.lock().iter().filter(|e| e.event == event).count()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for MemoryAuditLog {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl AuditSink for MemoryAuditLog {
    fn record(&self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Cheap-to-clone handle pairing the security log with an audit sink.
#[derive(Clone)]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Trail that only writes tracing lines.
    pub fn tracing_only() -> Self {
        Self::new(Arc::new(NullSink))
    }

    /// Emit one event. A `("identity", ..)` detail becomes the record's actor.
    pub fn emit(
        &self,
        event: SecurityEvent,
        source: &str,
        message: &str,
        details: &[(&str, &str)],
    ) {
        log_security_event(event, message, details);

        let mut builder = AuditEvent::builder()
            .event(event)
            .source(source)
            .message(message);
        for (key, value) in details {
            if *key == "identity" {
                builder = builder.actor(*value);
            } else {
                builder = builder.metadata(*key, *value);
            }
        }
        if let Ok(record) = builder.build() {
            self.sink.record(record);
        }
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::tracing_only()
    }
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrail").finish_non_exhaustive()
    }
}
