//! Validation Timing Tests
//!
//! `validate` pads every outcome to the same floor so response time does not
//! tell a caller whether a token exists, expired, or was never issued.

use std::time::{Duration, Instant};

use gg_trust::clock::ManualClock;
use gg_trust::config::AuthConfig;
use gg_trust::ipc::{AuthError, SessionAuth, SessionToken};
use gg_trust::security::SecretMaterial;

const FLOOR: Duration = Duration::from_millis(2);

fn padded_auth() -> (SessionAuth, std::sync::Arc<ManualClock>) {
    let clock = ManualClock::shared();
    let config = AuthConfig {
        validation_floor: FLOOR,
        ..AuthConfig::default()
    };
    let auth = SessionAuth::new(&SecretMaterial::from_slice(b"token"), config)
        .with_clock(clock.clone());
    (auth, clock)
}

fn timed<T>(f: impl FnOnce() -> T) -> (T, Duration) {
    let started = Instant::now();
    let out = f();
    (out, started.elapsed())
}

/// Valid, unknown, expired and unparsable tokens all take at least the floor.
#[test]
fn every_outcome_meets_the_floor() {
    let (auth, clock) = padded_auth();
    let valid = auth.authenticate("token", "uid:1").unwrap();
    let expiring = auth.authenticate("token", "uid:2").unwrap();
    let unknown = SessionToken::from_hex(&"7".repeat(64)).unwrap();

    let (result, elapsed) = timed(|| auth.validate(&valid));
    assert!(result.is_ok());
    assert!(elapsed >= FLOOR, "valid took {:?}", elapsed);

    let (result, elapsed) = timed(|| auth.validate(&unknown));
    assert_eq!(result, Err(AuthError::SessionNotFound));
    assert!(elapsed >= FLOOR, "unknown took {:?}", elapsed);

    let (result, elapsed) = timed(|| auth.validate_hex("not-hex"));
    assert_eq!(result, Err(AuthError::SessionNotFound));
    assert!(elapsed >= FLOOR, "unparsable took {:?}", elapsed);

    clock.advance(Duration::from_secs(31 * 60));
    let (result, elapsed) = timed(|| auth.validate(&expiring));
    assert_eq!(result, Err(AuthError::SessionExpired));
    assert!(elapsed >= FLOOR, "expired took {:?}", elapsed);
}

/// Averaged over many calls, a hit and a miss land close together.
#[test]
fn hit_and_miss_means_are_close() {
    let (auth, _) = padded_auth();
    let valid = auth.authenticate("token", "uid:1").unwrap();
    let unknown = SessionToken::from_hex(&"a".repeat(64)).unwrap();
    const ROUNDS: u32 = 50;

    let (_, hits) = timed(|| {
        for _ in 0..ROUNDS {
            let _ = auth.validate(&valid);
        }
    });
    let (_, misses) = timed(|| {
        for _ in 0..ROUNDS {
            let _ = auth.validate(&unknown);
        }
    });

    let (hit, miss) = (hits / ROUNDS, misses / ROUNDS);
    let gap = if hit > miss { hit - miss } else { miss - hit };
    // Both sit on the floor; the gap is scheduler noise.
    assert!(gap < FLOOR * 2, "hit {:?} vs miss {:?}", hit, miss);
}
