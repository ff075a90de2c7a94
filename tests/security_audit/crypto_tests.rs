//! Cryptographic Implementation Penetration Tests
//!
//! Tampering, key confusion and nonce reuse against the blob format.

use std::collections::HashSet;
use std::sync::Arc;

use gg_trust::security::{
    BlobHeader, CryptoError, EncryptionEngine, FixedNonceSource, KeyRegistry, NonceLedger,
    SecretMaterial, BLOB_FORMAT_VERSION, HEADER_LEN, KEY_SIZE, NONCE_SIZE,
};

fn create_test_key() -> SecretMaterial {
    SecretMaterial::new((0..KEY_SIZE as u8).collect())
}

fn engine() -> EncryptionEngine {
    EncryptionEngine::from_key(create_test_key()).unwrap()
}

/// Same plaintext never produces the same ciphertext.
#[test]
fn semantic_security_different_ciphertexts() {
    let engine = engine();
    let plaintext = b"Same message encrypted multiple times";
    let mut ciphertexts = HashSet::new();
    for _ in 0..100 {
        ciphertexts.insert(engine.encrypt(plaintext).unwrap().ciphertext().to_vec());
    }
    assert_eq!(ciphertexts.len(), 100, "All ciphertexts should be unique");
}

/// Nonces never repeat.
#[test]
fn nonce_uniqueness() {
    let engine = engine();
    let mut nonces = HashSet::new();
    for _ in 0..1000 {
        nonces.insert(*engine.encrypt(b"Test").unwrap().nonce());
    }
    assert_eq!(nonces.len(), 1000, "All nonces should be unique");
}

/// Tag verification rejects a single flipped bit anywhere in the tag.
#[test]
fn authentication_tag_bit_flips() {
    let engine = engine();
    let bytes = engine.encrypt(b"payload").unwrap().to_bytes();
    let tag_start = bytes.len() - 16;
    for index in tag_start..bytes.len() {
        for bit in 0..8 {
            let mut tampered = bytes.clone();
            tampered[index] ^= 1 << bit;
            assert!(matches!(
                engine.decrypt(&tampered),
                Err(CryptoError::DecryptionFailed)
            ));
        }
    }
}

/// Swapping the key id to another valid key fails authentication.
#[test]
fn key_id_substitution_detected() {
    let registry = Arc::new(KeyRegistry::new(create_test_key()).unwrap());
    let engine = EncryptionEngine::new(Arc::clone(&registry), Arc::new(NonceLedger::default()));
    let mut bytes = engine.encrypt(b"sealed under key 1").unwrap().to_bytes();
    registry.rotate().unwrap();

    bytes[7..11].copy_from_slice(&2u32.to_be_bytes());

    assert!(matches!(engine.decrypt(&bytes), Err(CryptoError::DecryptionFailed)));
}

/// Header nonce replaced with another blob's nonce fails.
#[test]
fn nonce_substitution_detected() {
    let engine = engine();
    let a = engine.encrypt(b"first").unwrap();
    let b = engine.encrypt(b"other").unwrap();
    let mut bytes = a.to_bytes();

    bytes[11..11 + NONCE_SIZE].copy_from_slice(b.nonce());

    assert!(matches!(engine.decrypt(&bytes), Err(CryptoError::DecryptionFailed)));
}

/// Splicing the body of one blob onto another's header fails.
#[test]
fn ciphertext_splicing_detected() {
    let engine = engine();
    let a = engine.encrypt(b"aaaaaaaa").unwrap().to_bytes();
    let b = engine.encrypt(b"bbbbbbbb").unwrap().to_bytes();

    let mut spliced = a[..HEADER_LEN].to_vec();
    spliced.extend_from_slice(&b[HEADER_LEN..]);

    assert!(matches!(engine.decrypt(&spliced), Err(CryptoError::DecryptionFailed)));
}

/// Declared length cannot drive an oversized read.
#[test]
fn declared_length_mismatch_rejected() {
    let engine = engine();
    let mut bytes = engine.encrypt(b"abc").unwrap().to_bytes();
    bytes[HEADER_LEN - 8..HEADER_LEN].copy_from_slice(&u64::MAX.to_be_bytes());

    assert!(matches!(engine.decrypt(&bytes), Err(CryptoError::Malformed(_))));
}

/// Older or newer blob versions are refused rather than guessed at.
#[test]
fn foreign_versions_rejected() {
    let engine = engine();
    let bytes = engine.encrypt(b"abc").unwrap().to_bytes();
    for version in [0u16, 1, 2, BLOB_FORMAT_VERSION + 1] {
        let mut patched = bytes.clone();
        patched[5..7].copy_from_slice(&version.to_be_bytes());
        assert!(matches!(
            BlobHeader::parse(&patched),
            Err(CryptoError::Malformed(_))
        ));
    }
}

/// Decryption errors do not reveal which part failed or any key material.
#[test]
fn decryption_errors_are_opaque() {
    let sealer = engine();
    let opener = EncryptionEngine::from_key(SecretMaterial::random(KEY_SIZE)).unwrap();
    let bytes = sealer.encrypt(b"plaintext-marker").unwrap().to_bytes();

    let wrong_key = opener.decrypt(&bytes).unwrap_err().to_string();
    let mut tampered = bytes.clone();
    tampered[HEADER_LEN] ^= 1;
    let bad_tag = sealer.decrypt(&tampered).unwrap_err().to_string();

    assert_eq!(wrong_key, bad_tag);
    assert!(!wrong_key.contains("plaintext-marker"));
    assert!(!wrong_key.contains(&hex::encode(&bytes[11..11 + NONCE_SIZE])));
}

/// A stuck RNG halts encryption instead of reusing a nonce.
#[test]
fn stuck_rng_never_reuses_nonce() {
    let engine = engine().with_nonce_source(Arc::new(FixedNonceSource::new([0u8; NONCE_SIZE])));
    let mut produced = 0;
    for _ in 0..10 {
        if engine.encrypt(b"x").is_ok() {
            produced += 1;
        }
    }
    assert_eq!(produced, 1);
    assert!(engine.is_halted());
}

/// Key debug output never shows key bytes.
#[test]
fn key_material_redacted_in_debug() {
    let key = create_test_key();
    let rendered = format!("{:?}", key);
    assert!(!rendered.contains(&hex::encode(key.expose())));
    assert!(!rendered.contains("[0, 1, 2"));
}
