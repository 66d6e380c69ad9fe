pub mod setting;
pub mod sequences;

use std::path::PathBuf;

use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

use crate::errors::{BackupError, Result};

/// Finds `name` (e.g. `pg_dump`) in the system PATH.
pub fn find_executable(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|e| {
        BackupError::dump(format!(
            "{name} executable not found in PATH ({e}). Please ensure PostgreSQL client tools are installed and in your PATH."
        ))
    })
}

/// Installs the global stdout logger. Dependency targets stay at `WARN`
/// unless tracing everything.
pub fn init_logger(level: Level) -> std::result::Result<(), TryInitError> {
    let dependency_level = if level == Level::TRACE { level } else { Level::WARN };
    let filter = Targets::new()
        .with_default(level)
        .with_target("sqlx", dependency_level)
        .with_target("aws_config", dependency_level)
        .with_target("aws_smithy_runtime", dependency_level)
        .with_target("hyper", dependency_level);

    let layer = tracing_subscriber::fmt::layer().with_target(false);

    tracing_subscriber::registry().with(layer).with(filter).try_init()
}
