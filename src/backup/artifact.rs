// pgsnapshot/src/backup/artifact.rs
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, warn};

use super::archive::ArtifactFormat;
use crate::errors::BackupError;

/// The single file a backup run produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub filename: String,
    pub local_path: PathBuf,
}

impl BackupArtifact {
    pub fn new(
        scratch_dir: &Path,
        prefix: &str,
        timestamp: DateTime<Utc>,
        format: ArtifactFormat,
    ) -> Self {
        let filename = artifact_filename(prefix, timestamp, format);
        BackupArtifact {
            local_path: scratch_dir.join(&filename),
            filename,
        }
    }
}

/// `{prefix}backup-{timestamp}.{ext}` with `:` and `.` in the timestamp
/// replaced by `-`, e.g. `nightly-backup-2024-01-02T03-04-05-000Z.gz`.
///
/// The prefix gets the same treatment (plus path separators) so the only
/// dots left are the extension separators.
pub fn artifact_filename(prefix: &str, timestamp: DateTime<Utc>, format: ArtifactFormat) -> String {
    let prefix = prefix.replace([':', '.', '/', '\\'], "-");
    let stamp = timestamp
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("{prefix}backup-{stamp}.{}", format.extension())
}

/// Removes the staging file when dropped, whatever the outcome of the run.
pub struct StagingGuard {
    path: PathBuf,
}

impl StagingGuard {
    pub fn new(path: &Path) -> Self {
        StagingGuard {
            path: path.to_path_buf(),
        }
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        remove_staging_file(&self.path);
    }
}

/// Deletes a staging or partial file. A missing file is fine; any other failure is logged and
/// swallowed so it never replaces the error that ended the run.
pub fn remove_staging_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed staging file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            let err = BackupError::Cleanup {
                path: path.to_path_buf(),
                source: e,
            };
            warn!(kind = err.kind(), error = %err, "cleanup failed");
        }
    }
}
