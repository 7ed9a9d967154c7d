//! museum-auth - command-line host for the museum app's session.
//!
//! Drives the same session manager the app screens use: reconcile stored
//! credentials, log in with an authorization code, log out, and refresh
//! tokens in the background.

mod commands;

use std::io;
use std::path::Path;

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use museum_auth_core::Config;

use commands::Command;

/// Log file name in the data directory
const LOG_FILE: &str = "museum-auth.log";

const USAGE: &str = "\
Usage: museum-auth <command>

Commands:
  status                        Reconcile stored credentials and print the session state
  login <code> [redirect_uri]   Exchange an authorization code for a session
  logout                        Sign out (always clears local credentials)
  refresh                       Silently renew the stored access token
  whoami                        Print the stored user
  tokens                        Print whether tokens are stored and when they expire
  watch                         Print login-state changes until Ctrl-C

Environment:
  RUST_LOG                  Log filter (default: warn)
  MUSEUM_API_BASE_URL       Identity endpoint base URL
  MUSEUM_STORAGE            keyring | encrypted_file | memory
  MUSEUM_STORE_PASSPHRASE   Passphrase for the encrypted credential file";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr and, when the data directory is available, to a file.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) if std::fs::create_dir_all(dir).is_ok() => {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };
    if matches!(command, Command::Help) {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load()?;
    let log_dir = config.data_dir().ok();
    let log_guard = init_tracing(log_dir.as_deref());
    info!(api = %config.api_base_url, storage = ?config.storage, "museum-auth starting");

    let succeeded = commands::run(command, &config).await?;

    info!(succeeded, "museum-auth finished");
    // Flush the file writer before a non-zero exit skips destructors.
    drop(log_guard);
    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}
