//! Credential checks, session issuance and session validation.
//!
//! SECURITY: This module enforces that only authenticated callers can
//! reach the inference backend. All non-exempt requests MUST carry a valid,
//! unexpired, non-rate-limited session.
//!
//! - The expected credential is held only as a SHA-256 digest; candidates
//!   are hashed and compared in constant time
//! - Sessions are stored under the digest of their token, never the token
//! - `validate()` pads every outcome to the same minimum duration

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroize;

use super::auth_session::{
    ExpiryReason, IdentityRateState, RequestWindow, Session, SessionKey, REQUEST_WINDOW,
};
pub use super::auth_session::{SessionToken, SESSION_TOKEN_BYTES};
use crate::clock::{Clock, SystemClock};
use crate::config::AuthConfig;
use crate::security::{AuditTrail, SecretMaterial};
use crate::telemetry::{self, SecurityEvent};

const AUDIT_SOURCE: &str = "session_auth";

/// Remaining floor time above which `validate()` sleeps instead of spinning.
const SPIN_THRESHOLD: Duration = Duration::from_micros(200);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid handshake token")]
    InvalidToken,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session expired")]
    SessionExpired,

    #[error("Rate limited")]
    RateLimited,

    #[error("Identity locked")]
    Locked,
}

enum Verdict {
    Valid,
    Missing,
    Expired(ExpiryReason, String),
    Limited(String),
}

/// Session authenticator.
///
/// Every map is a `DashMap`: entries for different tokens or identities
/// live on different shards and never block each other, while updates to
/// one entry are serialized by its shard lock.
pub struct SessionAuth {
    expected_digest: SecretMaterial,
    sessions: DashMap<SessionKey, Session>,
    identities: DashMap<String, IdentityRateState>,
    exempt: DashMap<String, RequestWindow>,
    locked: DashSet<String>,
    config: AuthConfig,
    clock: Arc<dyn Clock>,
    audit: AuditTrail,
}

impl SessionAuth {
    /// Create an authenticator that accepts `credential`.
    pub fn new(credential: &SecretMaterial, config: AuthConfig) -> Self {
        let digest: [u8; 32] = Sha256::digest(credential.expose()).into();
        Self {
            expected_digest: SecretMaterial::new(digest.to_vec()),
            sessions: DashMap::new(),
            identities: DashMap::new(),
            exempt: DashMap::new(),
            locked: DashSet::new(),
            config,
            clock: Arc::new(SystemClock),
            audit: AuditTrail::tracing_only(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_audit(mut self, audit: AuditTrail) -> Self {
        self.audit = audit;
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Check a handshake credential and issue a session for `identity`.
    pub fn authenticate(&self, candidate: &str, identity: &str) -> Result<SessionToken, AuthError> {
        if self.locked.contains(identity) {
            self.audit.emit(
                SecurityEvent::IdentityLocked,
                AUDIT_SOURCE,
                "Authentication attempt from locked identity",
                &[("identity", identity)],
            );
            return Err(AuthError::Locked);
        }

        let now = self.clock.now();
        let locked_out = self
            .identities
            .get(identity)
            .is_some_and(|state| state.is_locked_out(now));
        if locked_out {
            telemetry::record_rate_limited("auth");
            self.audit.emit(
                SecurityEvent::RateLimited,
                AUDIT_SOURCE,
                "Authentication refused during lockout",
                &[("identity", identity), ("scope", "auth")],
            );
            return Err(AuthError::RateLimited);
        }

        let mut digest: [u8; 32] = Sha256::digest(candidate.as_bytes()).into();
        let matched = self.expected_digest.ct_eq(&digest);
        digest.zeroize();

        if !matched {
            return Err(self.record_failure(identity, now));
        }

        let token = SessionToken::generate();
        self.sessions
            .insert(token.store_key(), Session::new(identity, now));
        self.identities.remove(identity);

        telemetry::record_auth_success();
        self.audit.emit(
            SecurityEvent::AuthSuccess,
            AUDIT_SOURCE,
            "Session issued",
            &[("identity", identity)],
        );
        Ok(token)
    }

    fn record_failure(&self, identity: &str, now: Instant) -> AuthError {
        let (failed_count, lockout_started) = {
            let mut state = self
                .identities
                .entry(identity.to_string())
                .or_insert_with(|| IdentityRateState::new(now));
            let started = state.record_failure(
                now,
                self.config.auth_failed_attempt_limit,
                self.config.auth_attempt_window,
                self.config.auth_lockout_duration,
            );
            (state.failed_count, started)
        };

        let count = failed_count.to_string();
        telemetry::record_auth_failure();
        self.audit.emit(
            SecurityEvent::AuthFailure,
            AUDIT_SOURCE,
            "Invalid handshake credential",
            &[("identity", identity), ("failed_count", count.as_str())],
        );
        if lockout_started {
            let secs = self.config.auth_lockout_duration.as_secs().to_string();
            telemetry::record_lockout();
            self.audit.emit(
                SecurityEvent::Lockout,
                AUDIT_SOURCE,
                "Identity locked out after repeated failures",
                &[("identity", identity), ("lockout_secs", secs.as_str())],
            );
        }
        AuthError::InvalidToken
    }

    /// Validate a session and count one request against its budget.
    ///
    /// Every outcome takes at least `validation_floor` of wall-clock time.
    pub fn validate(&self, token: &SessionToken) -> Result<(), AuthError> {
        let started = Instant::now();
        let result = self.validate_key(&token.store_key());
        self.wait_for_floor(started);
        result
    }

    /// [`validate`](Self::validate) for the external hex form. Unparsable
    /// input is `SessionNotFound` and is padded like any other miss.
    pub fn validate_hex(&self, token: &str) -> Result<(), AuthError> {
        let started = Instant::now();
        let result = match SessionToken::from_hex(token) {
            Some(parsed) => self.validate_key(&parsed.store_key()),
            None => {
                self.report_missing();
                Err(AuthError::SessionNotFound)
            }
        };
        self.wait_for_floor(started);
        result
    }

    fn validate_key(&self, key: &SessionKey) -> Result<(), AuthError> {
        let now = self.clock.now();
        let idle = self.config.session_idle_timeout;
        let lifetime = self.config.session_max_lifetime;

        // The shard guard must be gone before any removal below.
        let verdict = match self.sessions.get_mut(key) {
            None => Verdict::Missing,
            Some(mut session) => {
                if let Some(reason) = session.expiry(now, idle, lifetime) {
                    Verdict::Expired(reason, session.identity.clone())
                } else if !session.window.try_acquire(
                    now,
                    self.config.session_request_rate_limit,
                    REQUEST_WINDOW,
                ) {
                    Verdict::Limited(session.identity.clone())
                } else {
                    session.last_activity = now;
                    Verdict::Valid
                }
            }
        };

        match verdict {
            Verdict::Valid => Ok(()),
            Verdict::Missing => {
                self.report_missing();
                Err(AuthError::SessionNotFound)
            }
            Verdict::Expired(reason, identity) => {
                self.sessions
                    .remove_if(key, |_, s| s.expiry(now, idle, lifetime).is_some());
                telemetry::record_session_expired();
                self.audit.emit(
                    SecurityEvent::SessionExpired,
                    AUDIT_SOURCE,
                    "Session expired",
                    &[("identity", identity.as_str()), ("reason", reason.as_str())],
                );
                Err(AuthError::SessionExpired)
            }
            Verdict::Limited(identity) => {
                telemetry::record_rate_limited("session");
                self.audit.emit(
                    SecurityEvent::RateLimited,
                    AUDIT_SOURCE,
                    "Session request budget exhausted",
                    &[("identity", identity.as_str()), ("scope", "session")],
                );
                Err(AuthError::RateLimited)
            }
        }
    }

    fn report_missing(&self) {
        self.audit.emit(
            SecurityEvent::InvalidSession,
            AUDIT_SOURCE,
            "Unknown session token presented",
            &[],
        );
    }

    fn wait_for_floor(&self, started: Instant) {
        let floor = self.config.validation_floor;
        loop {
            let elapsed = started.elapsed();
            if elapsed >= floor {
                return;
            }
            let remaining = floor - elapsed;
            if remaining > SPIN_THRESHOLD {
                std::thread::sleep(remaining - SPIN_THRESHOLD);
            } else {
                std::hint::spin_loop();
            }
        }
    }

    /// Charge one auth-exempt request (health probe) to `identity`.
    pub fn check_exempt(&self, identity: &str) -> Result<(), AuthError> {
        if self.locked.contains(identity) {
            return Err(AuthError::Locked);
        }
        let now = self.clock.now();
        let locked_out = self
            .identities
            .get(identity)
            .is_some_and(|state| state.is_locked_out(now));

        let admitted = !locked_out && {
            let mut window = self
                .exempt
                .entry(identity.to_string())
                .or_insert_with(|| RequestWindow::new(now));
            window.try_acquire(now, self.config.exempt_request_rate_limit, REQUEST_WINDOW)
        };
        if admitted {
            return Ok(());
        }

        telemetry::record_rate_limited("exempt");
        self.audit.emit(
            SecurityEvent::RateLimited,
            AUDIT_SOURCE,
            "Exempt request budget exhausted",
            &[("identity", identity), ("scope", "exempt")],
        );
        Err(AuthError::RateLimited)
    }

    /// End a session. Idempotent; returns whether a session was removed.
    pub fn revoke(&self, token: &SessionToken) -> bool {
        match self.sessions.remove(&token.store_key()) {
            Some((_, session)) => {
                self.audit.emit(
                    SecurityEvent::SessionRevoked,
                    AUDIT_SOURCE,
                    "Session revoked",
                    &[("identity", session.identity.as_str())],
                );
                true
            }
            None => false,
        }
    }

    /// Drop every session. Returns how many were removed.
    pub fn revoke_all(&self) -> usize {
        let mut removed = 0usize;
        self.sessions.retain(|_, _| {
            removed += 1;
            false
        });
        if removed > 0 {
            let count = removed.to_string();
            self.audit.emit(
                SecurityEvent::SessionRevoked,
                AUDIT_SOURCE,
                "All sessions revoked",
                &[("count", count.as_str())],
            );
        }
        removed
    }

    /// Administratively lock `identity` and revoke its sessions. Returns the
    /// number of sessions revoked.
    pub fn lock_identity(&self, identity: &str) -> usize {
        self.locked.insert(identity.to_string());
        let mut revoked = 0usize;
        self.sessions.retain(|_, s| {
            let keep = s.identity != identity;
            if !keep {
                revoked += 1;
            }
            keep
        });
        tracing::warn!(identity = %identity, revoked, "Identity locked");
        revoked
    }

    /// Lift an administrative lock. Returns whether one was present.
    pub fn unlock_identity(&self, identity: &str) -> bool {
        let removed = self.locked.remove(identity).is_some();
        if removed {
            tracing::info!(identity = %identity, "Identity unlocked");
        }
        removed
    }

    pub fn is_locked(&self, identity: &str) -> bool {
        self.locked.contains(identity)
    }

    /// Failures currently counted against `identity`.
    pub fn failed_attempts(&self, identity: &str) -> u32 {
        self.identities
            .get(identity)
            .map(|state| state.failed_count)
            .unwrap_or(0)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Reclaim expired sessions and stale limiter state. Correctness never
    /// depends on this; expiry is also checked on every access.
    pub fn reap_expired(&self) -> usize {
        let now = self.clock.now();
        let idle = self.config.session_idle_timeout;
        let lifetime = self.config.session_max_lifetime;

        let mut expired = 0usize;
        self.sessions.retain(|_, s| {
            let keep = s.expiry(now, idle, lifetime).is_none();
            if !keep {
                expired += 1;
            }
            keep
        });
        for _ in 0..expired {
            telemetry::record_session_expired();
        }

        let mut stale = 0usize;
        let window = self.config.auth_attempt_window;
        self.identities.retain(|_, state| {
            let keep = !state.is_stale(now, window);
            if !keep {
                stale += 1;
            }
            keep
        });
        self.exempt.retain(|_, w| {
            let keep = !w.is_idle(now, REQUEST_WINDOW);
            if !keep {
                stale += 1;
            }
            keep
        });

        if expired + stale > 0 {
            tracing::debug!(expired, stale, "Reaped session state");
        }
        expired + stale
    }

    /// Run [`reap_expired`](Self::reap_expired) every `cleanup_interval`
    /// until `shutdown` fires.
    pub fn spawn_reaper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let auth = Arc::clone(self);
        let period = self.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => {
                        tracing::debug!("session reaper: shutdown signal received");
                        break;
                    }
                    _ = ticker.tick() => {
                        auth.reap_expired();
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for SessionAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionAuth")
            .field("sessions", &self.sessions.len())
            .field("tracked_identities", &self.identities.len())
            .field("locked_identities", &self.locked.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
