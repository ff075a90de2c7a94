// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Encryption CLI subcommands: encrypt, decrypt, self-test.
//!
//! Files are sealed under the installation root key (key_id 1), derived
//! from the installation salt and the machine identifier.

use std::path::Path;

use super::EXIT_CONFIG_ERROR;
use crate::config::TrustConfig;
use crate::security::{
    default_salt_path, installation_root_key, run_power_on_self_tests, CryptoError,
    EncryptionEngine,
};

/// Engine over the installation root key.
pub fn installation_engine(config: &TrustConfig) -> Result<EncryptionEngine, CryptoError> {
    let salt_path = match &config.encryption.salt_path {
        Some(path) => path.clone(),
        None => default_salt_path()?,
    };
    let root_key = installation_root_key(&salt_path, config.encryption.kdf_iterations)?;
    Ok(EncryptionEngine::from_key(root_key)?.with_retry_limit(config.encryption.nonce_retry_limit))
}

fn engine_or_exit(config: &TrustConfig) -> Result<EncryptionEngine, i32> {
    if let Err(e) = config.validate() {
        eprintln!("ERROR: {}", e);
        return Err(EXIT_CONFIG_ERROR);
    }
    installation_engine(config).map_err(|e| {
        eprintln!("ERROR: {}", e);
        1
    })
}

pub fn run_encrypt(config: &TrustConfig, input: &Path, output: &Path) -> i32 {
    let engine = match engine_or_exit(config) {
        Ok(engine) => engine,
        Err(code) => return code,
    };
    match engine.encrypt_file(input, output) {
        Ok(()) => {
            println!("Encrypted {} -> {}", input.display(), output.display());
            0
        }
        Err(e) => {
            eprintln!("ERROR: {}", e);
            1
        }
    }
}

pub fn run_decrypt(config: &TrustConfig, input: &Path, output: &Path) -> i32 {
    let engine = match engine_or_exit(config) {
        Ok(engine) => engine,
        Err(code) => return code,
    };
    match engine.decrypt_file(input, output) {
        Ok(()) => {
            println!("Decrypted {} -> {}", input.display(), output.display());
            0
        }
        Err(e) => {
            eprintln!("ERROR: {}", e);
            1
        }
    }
}

/// Run the power-on self-tests and report.
pub fn run_self_test() -> i32 {
    match run_power_on_self_tests() {
        Ok(results) => {
            println!("AES-256-GCM KAT:  {}", pass(results.aes_gcm_passed));
            println!("PBKDF2 KAT:       {}", pass(results.pbkdf2_passed));
            println!("RNG health:       {}", pass(results.rng_passed));
            println!("Integrity:        {}", pass(results.integrity_passed));
            0
        }
        Err(e) => {
            eprintln!("Self-test FAILED: {}", e);
            1
        }
    }
}

fn pass(ok: bool) -> &'static str {
    if ok {
        "PASSED"
    } else {
        "FAILED"
    }
}
