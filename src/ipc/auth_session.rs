//! Session records and rate-limit bookkeeping for [`super::SessionAuth`].

use std::time::{Duration, Instant};

use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::security::constant_time_eq;

/// Length of the per-session and exempt request windows.
pub(super) const REQUEST_WINDOW: Duration = Duration::from_secs(60);

/// Raw session token length in bytes.
pub const SESSION_TOKEN_BYTES: usize = 32;

/// Store key: SHA-256 of the raw token, so raw tokens are never retained.
pub(super) type SessionKey = [u8; 32];

/// Opaque session token: 32 CSPRNG bytes, shown externally as 64 lowercase
/// hex characters. Wiped on drop; `Debug` is redacted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionToken([u8; SESSION_TOKEN_BYTES]);

impl SessionToken {
    pub(super) fn generate() -> Self {
        let mut bytes = [0u8; SESSION_TOKEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse the external form. Anything other than exactly 64 lowercase hex
    /// characters is rejected.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != SESSION_TOKEN_BYTES * 2
            || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return None;
        }
        let mut bytes = [0u8; SESSION_TOKEN_BYTES];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_TOKEN_BYTES] {
        &self.0
    }

    pub(super) fn store_key(&self) -> SessionKey {
        Sha256::digest(self.0).into()
    }
}

impl PartialEq for SessionToken {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(&self.0, &other.0)
    }
}

impl Eq for SessionToken {}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken([REDACTED])")
    }
}

/// Sliding-window request counter: the previous window's count weighted by
/// its remaining overlap, plus the current window's count.
#[derive(Debug, Clone)]
pub(super) struct RequestWindow {
    window_start: Instant,
    current: u32,
    previous: u32,
}

impl RequestWindow {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            current: 0,
            previous: 0,
        }
    }

    fn roll(&mut self, now: Instant, window: Duration) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= window * 2 {
            self.previous = 0;
            self.current = 0;
            self.window_start = now;
        } else if elapsed >= window {
            self.previous = self.current;
            self.current = 0;
            self.window_start += window;
        }
    }

    /// Count one request if it fits under `limit`. Rejected requests are not
    /// counted.
    pub fn try_acquire(&mut self, now: Instant, limit: u32, window: Duration) -> bool {
        self.roll(now, window);
        let elapsed = now.saturating_duration_since(self.window_start);
        let overlap = 1.0 - elapsed.as_secs_f64() / window.as_secs_f64();
        let estimate = f64::from(self.previous) * overlap.max(0.0) + f64::from(self.current);
        if estimate + 1.0 > f64::from(limit) {
            return false;
        }
        self.current += 1;
        true
    }

    /// No requests counted in the last two windows.
    pub fn is_idle(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.window_start) >= window * 2
    }
}

/// Why a session is no longer usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ExpiryReason {
    Idle,
    Lifetime,
}

impl ExpiryReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle_timeout",
            Self::Lifetime => "max_lifetime",
        }
    }
}

/// Internal session state.
pub(super) struct Session {
    pub identity: String,
    pub created_at: Instant,
    pub last_activity: Instant,
    pub window: RequestWindow,
}

impl Session {
    pub fn new(identity: &str, now: Instant) -> Self {
        Self {
            identity: identity.to_string(),
            created_at: now,
            last_activity: now,
            window: RequestWindow::new(now),
        }
    }

    pub fn expiry(
        &self,
        now: Instant,
        idle_timeout: Duration,
        max_lifetime: Duration,
    ) -> Option<ExpiryReason> {
        if now.saturating_duration_since(self.created_at) > max_lifetime {
            Some(ExpiryReason::Lifetime)
        } else if now.saturating_duration_since(self.last_activity) > idle_timeout {
            Some(ExpiryReason::Idle)
        } else {
            None
        }
    }
}

/// Failed-attempt tracking for one client identity.
#[derive(Debug, Clone)]
pub(super) struct IdentityRateState {
    pub failed_count: u32,
    window_start: Instant,
    lockout_until: Option<Instant>,
}

impl IdentityRateState {
    pub fn new(now: Instant) -> Self {
        Self {
            failed_count: 0,
            window_start: now,
            lockout_until: None,
        }
    }

    pub fn is_locked_out(&self, now: Instant) -> bool {
        self.lockout_until.is_some_and(|until| now < until)
    }

    /// Record one failure. Returns true when this failure starts a lockout.
    pub fn record_failure(
        &mut self,
        now: Instant,
        limit: u32,
        window: Duration,
        lockout: Duration,
    ) -> bool {
        if now.saturating_duration_since(self.window_start) > window {
            self.failed_count = 0;
            self.window_start = now;
        }
        self.failed_count += 1;
        if self.failed_count >= limit && !self.is_locked_out(now) {
            self.lockout_until = Some(now + lockout);
            return true;
        }
        false
    }

    /// Nothing left worth remembering.
    pub fn is_stale(&self, now: Instant, window: Duration) -> bool {
        !self.is_locked_out(now) && now.saturating_duration_since(self.window_start) > window
    }
}
