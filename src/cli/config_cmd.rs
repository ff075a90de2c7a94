// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Config CLI subcommands: show, defaults, validate.
//!
//! These commands read configuration directly from environment variables
//! (or `--file`) without requiring an IPC connection to a running server.

use std::path::Path;

use super::EXIT_CONFIG_ERROR;
use crate::config::{ConfigError, TrustConfig};

/// Load from `file` when given, otherwise from the environment.
pub fn load(file: Option<&Path>) -> Result<TrustConfig, ConfigError> {
    match file {
        Some(path) => TrustConfig::from_file(path),
        None => Ok(TrustConfig::from_env()),
    }
}

/// Print effective config as key-value pairs to stdout.
pub fn run_show(file: Option<&Path>) -> i32 {
    match load(file) {
        Ok(cfg) => {
            print_config(&cfg);
            0
        }
        Err(e) => {
            eprintln!("ERROR: {}", e);
            EXIT_CONFIG_ERROR
        }
    }
}

/// Print default config values (no env overrides) to stdout.
pub fn run_defaults() {
    print_config(&TrustConfig::default());
}

/// Validate configuration.
///
/// Returns 0 if valid, 1 if a setting is rejected, 2 if it cannot be loaded.
pub fn run_validate(file: Option<&Path>) -> i32 {
    let cfg = match load(file) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return EXIT_CONFIG_ERROR;
        }
    };

    if let Err(e) = cfg.validate() {
        eprintln!("INVALID: {}", e);
        return 1;
    }
    if cfg.auth_token.is_empty() {
        eprintln!("WARNING: GG_TRUST_AUTH_TOKEN is not set; serve will refuse to start");
    }
    println!("Configuration is valid.");
    0
}

fn print_config(cfg: &TrustConfig) {
    for line in cfg.effective_lines() {
        println!("{}", line);
    }
}
