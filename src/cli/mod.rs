// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI subcommands for `gg-trust-cli`.
//!
//! None of these talk to a running server; they read configuration from the
//! environment (or a TOML file) and act locally.
//!
//! ## Usage
//!
//! ```bash
//! gg-trust-cli config show              # Effective configuration
//! gg-trust-cli config validate --file c.toml
//! gg-trust-cli encrypt model.bin model.enc
//! gg-trust-cli self-test                # Cryptographic known-answer tests
//! ```

pub mod config_cmd;
pub mod crypt_cmd;

use std::path::PathBuf;

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: i32 = 2;

/// Value following `flag` in `args`, if present.
pub fn flag_value(args: &[String], flag: &str) -> Option<PathBuf> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
}
