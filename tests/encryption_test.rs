//! Integration tests for model blob encryption and key rotation.

use std::sync::Arc;

use gg_trust::security::{
    AuditTrail, CryptoError, EncryptedBlob, EncryptionEngine, FixedNonceSource, KeyRegistry,
    KeyStatus, MemoryAuditLog, NonceLedger, SecretMaterial, HEADER_LEN, KEY_SIZE, NONCE_SIZE,
    TAG_SIZE,
};
use gg_trust::telemetry::SecurityEvent;

fn shared_parts() -> (Arc<KeyRegistry>, Arc<NonceLedger>) {
    let registry = KeyRegistry::new(SecretMaterial::random(KEY_SIZE)).unwrap();
    (Arc::new(registry), Arc::new(NonceLedger::default()))
}

#[test]
fn encrypt_decrypt_preserves_plaintext() {
    let engine = EncryptionEngine::from_key(SecretMaterial::random(KEY_SIZE)).unwrap();
    let plaintext = vec![0x5au8; 64 * 1024];

    let blob = engine.encrypt(&plaintext).unwrap();

    assert_eq!(blob.encoded_len(), HEADER_LEN + plaintext.len() + TAG_SIZE);
    assert_ne!(blob.ciphertext(), plaintext.as_slice());
    assert_eq!(engine.decrypt(&blob.to_bytes()).unwrap(), plaintext);
}

#[test]
fn empty_plaintext_is_supported() {
    let engine = EncryptionEngine::from_key(SecretMaterial::random(KEY_SIZE)).unwrap();

    let blob = engine.encrypt(b"").unwrap();

    assert_eq!(blob.encoded_len(), HEADER_LEN + TAG_SIZE);
    assert!(engine.decrypt(&blob.to_bytes()).unwrap().is_empty());
}

#[test]
fn every_bit_flip_is_detected() {
    let engine = EncryptionEngine::from_key(SecretMaterial::random(KEY_SIZE)).unwrap();
    let bytes = engine.encrypt(b"model weights").unwrap().to_bytes();

    // Header flips may be caught by the parser before the AEAD runs.
    for index in 0..HEADER_LEN {
        let mut tampered = bytes.clone();
        tampered[index] ^= 0x01;
        assert!(
            engine.decrypt(&tampered).is_err(),
            "header flip at byte {} was accepted",
            index
        );
    }

    for index in HEADER_LEN..bytes.len() {
        for bit in 0..8 {
            let mut tampered = bytes.clone();
            tampered[index] ^= 1 << bit;
            assert!(
                matches!(engine.decrypt(&tampered), Err(CryptoError::DecryptionFailed)),
                "flip of bit {} at byte {} was not a uniform failure",
                bit,
                index
            );
        }
    }
}

#[test]
fn every_length_round_trips_under_every_key() {
    let (registry, ledger) = shared_parts();
    let engine = EncryptionEngine::new(Arc::clone(&registry), ledger);
    let lengths: Vec<usize> = (0..=64)
        .chain([127, 128, 129, 255, 256, 257, 4095, 4096, 4097])
        .collect();

    let mut sealed = Vec::new();
    for round in 0..4 {
        if round > 0 {
            engine.rotate().unwrap();
        }
        let key_id = engine.active_key_id();
        for &len in &lengths {
            let plaintext: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(31) ^ round).collect();
            let blob = engine.encrypt_with_key(key_id, &plaintext).unwrap();
            assert_eq!(blob.key_id(), key_id);
            sealed.push((key_id, plaintext, blob.to_bytes()));
        }
    }

    // All but the last key are Retired by now; every blob still opens.
    assert_eq!(sealed.len(), 4 * lengths.len());
    for (key_id, plaintext, bytes) in &sealed {
        assert_eq!(
            &engine.decrypt(bytes).unwrap(),
            plaintext,
            "length {} under key {}",
            plaintext.len(),
            key_id
        );
    }
}

#[test]
fn tampered_ciphertext_fails_uniformly() {
    let engine = EncryptionEngine::from_key(SecretMaterial::random(KEY_SIZE)).unwrap();
    let mut bytes = engine.encrypt(b"model weights").unwrap().to_bytes();
    bytes[HEADER_LEN] ^= 0x80;

    assert!(matches!(engine.decrypt(&bytes), Err(CryptoError::DecryptionFailed)));
}

#[test]
fn wrong_key_fails_like_tampering() {
    let sealer = EncryptionEngine::from_key(SecretMaterial::random(KEY_SIZE)).unwrap();
    let opener = EncryptionEngine::from_key(SecretMaterial::random(KEY_SIZE)).unwrap();
    let bytes = sealer.encrypt(b"secret").unwrap().to_bytes();

    assert!(matches!(opener.decrypt(&bytes), Err(CryptoError::DecryptionFailed)));
}

#[test]
fn truncated_blob_is_malformed() {
    let engine = EncryptionEngine::from_key(SecretMaterial::random(KEY_SIZE)).unwrap();
    let bytes = engine.encrypt(b"abc").unwrap().to_bytes();

    assert!(matches!(
        engine.decrypt(&bytes[..HEADER_LEN]),
        Err(CryptoError::Malformed(_))
    ));
    assert!(matches!(
        EncryptedBlob::from_bytes(&bytes[..bytes.len() - 1]),
        Err(CryptoError::Malformed(_))
    ));
}

#[test]
fn rotation_keeps_old_blobs_readable() {
    let (registry, ledger) = shared_parts();
    let engine = EncryptionEngine::new(Arc::clone(&registry), ledger);

    let before = engine.encrypt(b"sealed under key one").unwrap();
    assert_eq!(before.key_id(), 1);

    assert_eq!(engine.rotate().unwrap(), 2);
    let after = engine.encrypt(b"sealed under key two").unwrap();

    assert_eq!(after.key_id(), 2);
    assert_eq!(registry.status(1), Some(KeyStatus::Retired));
    assert_eq!(registry.status(2), Some(KeyStatus::Active));
    assert_eq!(
        engine.decrypt(&before.to_bytes()).unwrap(),
        b"sealed under key one"
    );
    assert!(matches!(
        engine.encrypt_with_key(1, b"x"),
        Err(CryptoError::KeyRetired(1))
    ));
}

#[test]
fn stale_blob_is_reencrypted_under_active_key() {
    let (registry, ledger) = shared_parts();
    let engine = EncryptionEngine::new(registry, ledger);
    let old = engine.encrypt(b"weights").unwrap().to_bytes();
    engine.rotate().unwrap();

    let migrated = engine.reencrypt_if_stale(&old).unwrap().unwrap();

    assert_eq!(migrated.key_id(), 2);
    assert_eq!(engine.decrypt(&migrated.to_bytes()).unwrap(), b"weights");
    assert!(engine
        .reencrypt_if_stale(&migrated.to_bytes())
        .unwrap()
        .is_none());
}

#[test]
fn unknown_key_id_is_reported() {
    let engine = EncryptionEngine::from_key(SecretMaterial::random(KEY_SIZE)).unwrap();
    let mut bytes = engine.encrypt(b"x").unwrap().to_bytes();
    // key_id lives at bytes 7..11
    bytes[7..11].copy_from_slice(&9u32.to_be_bytes());

    assert!(matches!(engine.decrypt(&bytes), Err(CryptoError::KeyNotFound(9))));
}

#[test]
fn short_keys_are_refused() {
    assert!(matches!(
        EncryptionEngine::from_key(SecretMaterial::random(16)),
        Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: 16
        })
    ));

    let (registry, _) = shared_parts();
    assert!(registry.rotate_to(SecretMaterial::random(31)).is_err());
    assert_eq!(registry.active_key_id(), 1);
}

#[test]
fn repeated_nonce_halts_encryption() {
    let log = Arc::new(MemoryAuditLog::default());
    let engine = EncryptionEngine::from_key(SecretMaterial::random(KEY_SIZE))
        .unwrap()
        .with_nonce_source(Arc::new(FixedNonceSource::new([7u8; NONCE_SIZE])))
        .with_audit(AuditTrail::new(log.clone()));

    let first = engine.encrypt(b"one").unwrap();
    assert_eq!(first.nonce(), &[7u8; NONCE_SIZE]);

    assert!(matches!(
        engine.encrypt(b"two"),
        Err(CryptoError::NonceReuseDetected)
    ));
    assert!(engine.is_halted());
    assert_eq!(log.count(SecurityEvent::NonceReuseDetected), 1);

    // Halted engines still decrypt.
    assert_eq!(engine.decrypt(&first.to_bytes()).unwrap(), b"one");
}

#[test]
fn ledger_is_shared_across_engines() {
    let (registry, ledger) = shared_parts();
    let stuck = Arc::new(FixedNonceSource::new([3u8; NONCE_SIZE]));
    let first = EncryptionEngine::new(Arc::clone(&registry), Arc::clone(&ledger))
        .with_nonce_source(stuck.clone());
    let second = EncryptionEngine::new(registry, Arc::clone(&ledger)).with_nonce_source(stuck);

    first.encrypt(b"a").unwrap();

    assert!(matches!(
        second.encrypt(b"b"),
        Err(CryptoError::NonceReuseDetected)
    ));
    assert!(second.is_halted());
    assert!(!first.is_halted());
    assert!(ledger.contains(&[3u8; NONCE_SIZE]));
}

#[test]
fn cleared_alarm_resumes_encryption() {
    let engine = EncryptionEngine::from_key(SecretMaterial::random(KEY_SIZE))
        .unwrap()
        .with_nonce_source(Arc::new(FixedNonceSource::new([9u8; NONCE_SIZE])));
    engine.encrypt(b"a").unwrap();
    let _ = engine.encrypt(b"b");
    assert!(engine.is_halted());

    engine.clear_nonce_alarm();

    assert!(!engine.is_halted());
    // The stuck source still collides, so the engine halts again.
    assert!(matches!(
        engine.encrypt(b"c"),
        Err(CryptoError::NonceReuseDetected)
    ));
}

#[test]
fn nonces_are_unique_across_threads() {
    let (registry, ledger) = shared_parts();
    let engine = Arc::new(EncryptionEngine::new(registry, Arc::clone(&ledger)));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                (0..100)
                    .map(|_| *engine.encrypt(b"x").unwrap().nonce())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut nonces = std::collections::HashSet::new();
    for handle in handles {
        nonces.extend(handle.join().unwrap());
    }
    assert_eq!(nonces.len(), 400);
    assert_eq!(ledger.len(), 400);
}

#[test]
fn file_round_trip_and_migration() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, ledger) = shared_parts();
    let engine = EncryptionEngine::new(registry, ledger);
    let plain = dir.path().join("model.bin");
    let sealed = dir.path().join("model.enc");
    let opened = dir.path().join("model.out");
    std::fs::write(&plain, b"gguf bytes").unwrap();

    engine.encrypt_file(&plain, &sealed).unwrap();
    assert!(!engine.migrate_file(&sealed).unwrap());

    engine.rotate().unwrap();
    assert!(engine.migrate_file(&sealed).unwrap());
    assert_eq!(
        EncryptedBlob::from_bytes(&std::fs::read(&sealed).unwrap())
            .unwrap()
            .key_id(),
        2
    );

    engine.decrypt_file(&sealed, &opened).unwrap();
    assert_eq!(std::fs::read(&opened).unwrap(), b"gguf bytes");
}
