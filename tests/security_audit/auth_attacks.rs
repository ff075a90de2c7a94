//! Authentication Attack Tests
//!
//! Credential guessing, token forgery and session abuse.

use std::sync::Arc;
use std::time::Duration;

use gg_trust::clock::ManualClock;
use gg_trust::config::AuthConfig;
use gg_trust::ipc::{AuthError, SessionAuth, SessionToken, SESSION_TOKEN_BYTES};
use gg_trust::security::SecretMaterial;

const CREDENTIAL: &str = "correct-token";

fn auth() -> (SessionAuth, Arc<ManualClock>) {
    let clock = ManualClock::shared();
    let config = AuthConfig {
        validation_floor: Duration::ZERO,
        ..AuthConfig::default()
    };
    let auth = SessionAuth::new(&SecretMaterial::from_slice(CREDENTIAL.as_bytes()), config)
        .with_clock(clock.clone());
    (auth, clock)
}

/// Empty credential is rejected.
#[test]
fn reject_empty_token() {
    let (auth, _) = auth();
    assert_eq!(auth.authenticate("", "uid:1"), Err(AuthError::InvalidToken));
}

/// Prefixes and extensions of the real credential are rejected.
#[test]
fn reject_near_miss_tokens() {
    let (auth, _) = auth();
    for guess in ["correct-toke", "correct-token ", "Correct-token", "correct-token\0"] {
        assert_eq!(
            auth.authenticate(guess, &format!("uid:{}", guess.len())),
            Err(AuthError::InvalidToken),
            "accepted {:?}",
            guess
        );
    }
}

/// Very long credential is rejected without panicking.
#[test]
fn reject_huge_token() {
    let (auth, _) = auth();
    let huge = "A".repeat(1024 * 1024);
    assert_eq!(auth.authenticate(&huge, "uid:1"), Err(AuthError::InvalidToken));
}

/// Forged session tokens are unknown.
#[test]
fn forged_session_tokens_rejected() {
    let (auth, _) = auth();
    let _real = auth.authenticate(CREDENTIAL, "uid:1").unwrap();

    for forged in [
        "0".repeat(SESSION_TOKEN_BYTES * 2),
        "f".repeat(SESSION_TOKEN_BYTES * 2),
        "../../etc/passwd".to_string(),
        String::new(),
    ] {
        assert_eq!(auth.validate_hex(&forged), Err(AuthError::SessionNotFound));
    }
}

/// A valid token with one altered character is unknown.
#[test]
fn single_character_mutation_rejected() {
    let (auth, _) = auth();
    let token = auth.authenticate(CREDENTIAL, "uid:1").unwrap().to_hex();

    let mut chars: Vec<char> = token.chars().collect();
    chars[0] = if chars[0] == '0' { '1' } else { '0' };
    let mutated: String = chars.into_iter().collect();

    assert_eq!(auth.validate_hex(&mutated), Err(AuthError::SessionNotFound));
    assert!(auth.validate_hex(&token).is_ok());
}

/// Non-canonical encodings of a real token are not accepted.
#[test]
fn non_canonical_encodings_rejected() {
    let (auth, _) = auth();
    let token = auth.authenticate(CREDENTIAL, "uid:1").unwrap().to_hex();

    assert_eq!(
        auth.validate_hex(&token.to_uppercase()),
        Err(AuthError::SessionNotFound)
    );
    assert_eq!(
        auth.validate_hex(&format!(" {}", token)),
        Err(AuthError::SessionNotFound)
    );
    assert_eq!(
        auth.validate_hex(&format!("{}00", token)),
        Err(AuthError::SessionNotFound)
    );
}

/// Brute force is cut off after the attempt limit, for every guess.
#[test]
fn brute_force_is_throttled() {
    let (auth, _) = auth();
    let mut invalid = 0;
    let mut limited = 0;
    for i in 0..100 {
        match auth.authenticate(&format!("guess-{}", i), "uid:666") {
            Err(AuthError::InvalidToken) => invalid += 1,
            Err(AuthError::RateLimited) => limited += 1,
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!(invalid, 5);
    assert_eq!(limited, 95);
}

/// Rotating identities does not lift another identity's lockout.
#[test]
fn lockout_survives_other_identities_succeeding() {
    let (auth, _) = auth();
    for _ in 0..5 {
        let _ = auth.authenticate("bad", "uid:1");
    }
    auth.authenticate(CREDENTIAL, "uid:2").unwrap();

    assert_eq!(auth.authenticate(CREDENTIAL, "uid:1"), Err(AuthError::RateLimited));
}

/// Lockout ends exactly when its duration has elapsed.
#[test]
fn lockout_boundary() {
    let (auth, clock) = auth();
    for _ in 0..5 {
        let _ = auth.authenticate("bad", "uid:1");
    }

    clock.advance(Duration::from_secs(29));
    assert_eq!(auth.authenticate(CREDENTIAL, "uid:1"), Err(AuthError::RateLimited));

    clock.advance(Duration::from_secs(1));
    assert!(auth.authenticate(CREDENTIAL, "uid:1").is_ok());
}

/// A stolen token dies with the max lifetime no matter how busy it is.
#[test]
fn stolen_token_cannot_be_kept_alive() {
    let (auth, clock) = auth();
    let token = auth.authenticate(CREDENTIAL, "uid:1").unwrap();

    for _ in 0..(24 * 2) {
        clock.advance(Duration::from_secs(30 * 60));
        assert!(auth.validate(&token).is_ok());
    }
    clock.advance(Duration::from_secs(1));
    assert_eq!(auth.validate(&token), Err(AuthError::SessionExpired));
}

/// Revoked tokens stay dead even if presented again.
#[test]
fn revoked_token_not_resurrected() {
    let (auth, _) = auth();
    let token = auth.authenticate(CREDENTIAL, "uid:1").unwrap();
    let hex = token.to_hex();
    auth.revoke(&token);

    let reparsed = SessionToken::from_hex(&hex).unwrap();
    assert_eq!(auth.validate(&reparsed), Err(AuthError::SessionNotFound));
}

/// Request flood on one session is capped.
#[test]
fn session_request_flood_capped() {
    let (auth, _) = auth();
    let token = auth.authenticate(CREDENTIAL, "uid:1").unwrap();

    let admitted = (0..1500).filter(|_| auth.validate(&token).is_ok()).count();

    assert_eq!(admitted, 1000);
}

/// Health probes cannot be used to dodge a lockout.
#[test]
fn exempt_path_respects_lockout() {
    let (auth, _) = auth();
    for _ in 0..5 {
        let _ = auth.authenticate("bad", "uid:1");
    }

    assert_eq!(auth.check_exempt("uid:1"), Err(AuthError::RateLimited));
    assert!(auth.check_exempt("uid:2").is_ok());
}
