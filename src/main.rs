//! PostgreSQL Backup Tool
//!
//! Dumps a database into one compressed artifact, uploads it, and removes
//! the local copy. Run `pgsnapshot` (or `pgsnapshot backup`) for a backup,
//! `pgsnapshot check` to verify database and storage access only.

// pgsnapshot/src/main.rs
mod backup;
mod config;
mod errors;
mod utils;

use std::env;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::{error, info};

use config::BackupConfig;
use errors::BackupError;

/// Main entry point for the backup tool
#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is normal in production.
    let _ = dotenv::dotenv();

    let config = match BackupConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = utils::init_logger(config.log_level) {
        eprintln!("Error: failed to install logger: {e}");
        return ExitCode::FAILURE;
    }

    match run_app(&config).await {
        Ok(()) => {
            info!("operation completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let kind = e
                .downcast_ref::<BackupError>()
                .map_or("unknown", BackupError::kind);
            error!(kind, "{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_app(config: &BackupConfig) -> Result<()> {
    let choice = env::args().nth(1).unwrap_or_else(|| "backup".to_string());

    match choice.trim() {
        "backup" => {
            info!(config = ?config, "starting backup process");
            let report = backup::run_backup_flow(config)
                .await
                .context("Backup process failed")?;
            info!(location = %report.object_location, "backup stored");
        }
        "check" => {
            info!("checking database and storage access");
            backup::run_check_flow(config)
                .await
                .context("Preflight check failed")?;
        }
        other => {
            anyhow::bail!("Invalid operation '{other}'. Expected 'backup' or 'check'.");
        }
    }
    Ok(())
}
