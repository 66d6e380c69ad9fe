use std::path::PathBuf;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database connection failed: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("No accessible tables found. Check database permissions.")]
    NoAccessibleTables,

    #[error("Dump failed{}: {message}", .table.as_ref().map(|t| format!(" for table {t}")).unwrap_or_default())]
    Dump {
        table: Option<String>,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Backup artifact {} is only {size_bytes} bytes (minimum {minimum_bytes})", .path.display())]
    ArtifactTooSmall {
        path: PathBuf,
        size_bytes: u64,
        minimum_bytes: u64,
    },

    #[error("Transfer of {key} to {destination} failed: {message}")]
    Transfer {
        destination: String,
        key: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Failed to remove staging file {}: {source}", .path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    pub fn connection(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        BackupError::Connection {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn dump(message: impl Into<String>) -> Self {
        BackupError::Dump {
            table: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn table_dump(table: impl Into<String>, source: impl Into<BoxError>) -> Self {
        let source = source.into();
        BackupError::Dump {
            table: Some(table.into()),
            message: source.to_string(),
            source: Some(source),
        }
    }

    pub fn transfer(
        destination: impl Into<String>,
        key: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        let source = source.into();
        BackupError::Transfer {
            destination: destination.into(),
            key: key.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Short, stable name of the error kind, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            BackupError::Config(_) => "config",
            BackupError::Connection { .. } => "connection",
            BackupError::NoAccessibleTables => "no_accessible_tables",
            BackupError::Dump { .. } => "dump",
            BackupError::ArtifactTooSmall { .. } => "artifact_too_small",
            BackupError::Transfer { .. } => "transfer",
            BackupError::Cleanup { .. } => "cleanup",
            BackupError::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
