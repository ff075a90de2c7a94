//! Counters for trust-boundary outcomes via the `metrics` facade.
//!
//! No recorder is installed by this crate; the embedding process decides
//! where counters go. Without a recorder every call is a no-op.

use metrics::counter;

pub fn record_auth_success() {
    counter!("gg_trust_auth_success_total").increment(1);
}

pub fn record_auth_failure() {
    counter!("gg_trust_auth_failures_total").increment(1);
}

pub fn record_lockout() {
    counter!("gg_trust_lockouts_total").increment(1);
}

pub fn record_rate_limited(scope: &'static str) {
    counter!("gg_trust_rate_limited_total", "scope" => scope).increment(1);
}

pub fn record_session_expired() {
    counter!("gg_trust_sessions_expired_total").increment(1);
}

pub fn record_nonce_collision() {
    counter!("gg_trust_nonce_collisions_total").increment(1);
}

pub fn record_key_rotation() {
    counter!("gg_trust_key_rotations_total").increment(1);
}

pub fn record_decryption_failure() {
    counter!("gg_trust_decryption_failures_total").increment(1);
}

pub fn record_frame_rejected(reason: &'static str) {
    counter!("gg_trust_frames_rejected_total", "reason" => reason).increment(1);
}
