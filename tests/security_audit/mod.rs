//! Security Audit Test Suite for the gg-trust boundary
//!
//! Adversarial scenarios against the trust boundary. These tests simulate
//! hostile callers to confirm the defenses hold under attack, not just
//! under normal use.
//!
//! ## Test Categories
//!
//! - **auth_attacks**: Credential guessing, token forgery and session abuse
//! - **crypto_tests**: Tampering, key confusion and nonce reuse
//! - **ipc_fuzzing**: Malformed frames and payloads
//! - **timing_tests**: Validation timing across outcomes
//!
//! ## Security Boundaries Tested
//!
//! 1. Handshake authentication (SHA-256 digest, constant-time compare)
//! 2. Session lifecycle (idle timeout, max lifetime, revocation)
//! 3. Blob encryption (AES-256-GCM, header bound as associated data)
//! 4. Frame validation before allocation

mod auth_attacks;
mod crypto_tests;
mod ipc_fuzzing;
mod timing_tests;
