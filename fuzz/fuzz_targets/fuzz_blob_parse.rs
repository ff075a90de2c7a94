//! Fuzz target for encrypted blob parsing and decryption.
//!
//! Tests that arbitrary byte sequences are rejected cleanly: no panics, and
//! nothing forged ever authenticates.

#![no_main]

use gg_trust::security::{EncryptedBlob, EncryptionEngine, SecretMaterial, KEY_SIZE};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = EncryptedBlob::from_bytes(data);

    let engine = match EncryptionEngine::from_key(SecretMaterial::new(vec![0x42; KEY_SIZE])) {
        Ok(engine) => engine,
        Err(_) => return,
    };
    assert!(engine.decrypt(data).is_err());
});
