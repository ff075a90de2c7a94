//! gg-trust entry point.
//!
//! Bootstraps the trust boundary with:
//! - Cryptographic power-on self-tests (fail-fast)
//! - Configuration loading and validation
//! - Installation-bound root key derivation
//! - IPC listener setup
//! - Signal handling for graceful shutdown
//!
//! ## CLI Subcommands
//!
//! - `gg-trust-cli` or `gg-trust-cli serve` - Run IPC server (default)
//! - `gg-trust-cli config show|defaults|validate [--file PATH]`
//! - `gg-trust-cli encrypt <IN> <OUT>` / `decrypt <IN> <OUT>`
//! - `gg-trust-cli self-test`

use std::path::Path;
use std::process::ExitCode;

use gg_trust::cli::{config_cmd, crypt_cmd, flag_value, EXIT_CONFIG_ERROR};
use gg_trust::telemetry::{init_logging, LogConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("serve");

    if let Err(e) = init_logging(&LogConfig::from_env()) {
        eprintln!("Logging setup failed: {}", e);
        return ExitCode::from(EXIT_CONFIG_ERROR as u8);
    }

    match command {
        "serve" | "" => exit(run_serve(&args).await),
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            let file = flag_value(&args, "--file");
            match subcommand {
                "show" => exit(config_cmd::run_show(file.as_deref())),
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => exit(config_cmd::run_validate(file.as_deref())),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_usage();
                    ExitCode::FAILURE
                }
            }
        }
        "encrypt" | "decrypt" => {
            let (Some(input), Some(output)) = (args.get(2), args.get(3)) else {
                eprintln!("Usage: gg-trust-cli {} <INPUT> <OUTPUT> [--file CONFIG]", command);
                return ExitCode::FAILURE;
            };
            let config = match config_cmd::load(flag_value(&args, "--file").as_deref()) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    return exit(EXIT_CONFIG_ERROR);
                }
            };
            let (input, output) = (Path::new(input), Path::new(output));
            if command == "encrypt" {
                exit(crypt_cmd::run_encrypt(&config, input, output))
            } else {
                exit(crypt_cmd::run_decrypt(&config, input, output))
            }
        }
        "self-test" => exit(crypt_cmd::run_self_test()),
        "help" | "--help" | "-h" => {
            print_usage();
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("gg-trust {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn exit(code: i32) -> ExitCode {
    ExitCode::from(code.clamp(0, 255) as u8)
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "gg-trust - Trust boundary for local inference v{}

USAGE:
    gg-trust-cli [COMMAND] [OPTIONS]

COMMANDS:
    serve                 Run the IPC server (default when no command given)
    config show           Print effective configuration
    config defaults       Print default configuration
    config validate       Validate configuration (exit 0 if valid)
    encrypt <IN> <OUT>    Seal a file under the installation key
    decrypt <IN> <OUT>    Open a sealed file
    self-test             Run cryptographic known-answer tests
    version               Show version information
    help                  Show this help message

OPTIONS:
    --file PATH    Load configuration from a TOML file instead of the environment

ENVIRONMENT:
    GG_TRUST_AUTH_TOKEN   Handshake credential (required for serve)
    GG_TRUST_SOCKET_PATH  IPC socket path (default: /var/run/gg-trust/gg-trust.sock)
    GG_TRUST_LOG          Log filter (default: info)
    GG_TRUST_LOG_FORMAT   json | pretty (default: json)
    GG_TRUST_LOG_FILE     Append JSON logs to this file instead of stderr

EXIT CODES:
    0  Success
    1  Failure
    2  Configuration error
",
        version
    );
}

#[cfg(unix)]
async fn run_serve(args: &[String]) -> i32 {
    use std::sync::Arc;

    use gg_trust::backend::DetachedBackend;
    use gg_trust::{RuntimeError, TrustRuntime};

    let config = match config_cmd::load(flag_value(args, "--file").as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return EXIT_CONFIG_ERROR;
        }
    };

    let runtime = match TrustRuntime::bootstrap(config) {
        Ok(runtime) => Arc::new(runtime),
        Err(e @ (RuntimeError::Config(_) | RuntimeError::MissingCredential)) => {
            eprintln!("ERROR: {}", e);
            return EXIT_CONFIG_ERROR;
        }
        Err(e) => {
            eprintln!("Startup failed: {}", e);
            return 1;
        }
    };
    runtime.spawn_session_reaper();

    let mut server = {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move { runtime.serve(Arc::new(DetachedBackend)).await })
    };

    // Wait for Ctrl+C or a server failure, then shut down.
    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!(error = %e, "Signal handler failed");
            }
            tracing::info!("Shutdown signal received");
            None
        }
        result = &mut server => Some(result),
    };

    runtime.shutdown().await;
    let outcome = match outcome {
        Some(result) => result,
        None => server.await,
    };

    match outcome {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            eprintln!("Server error: {}", e);
            1
        }
        Err(e) => {
            eprintln!("Server task failed: {}", e);
            1
        }
    }
}

#[cfg(not(unix))]
async fn run_serve(_args: &[String]) -> i32 {
    eprintln!("serve requires a Unix domain socket platform");
    1
}
