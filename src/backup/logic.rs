// pgsnapshot/src/backup/logic.rs
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::archive::{ArtifactFormat, ArtifactWriter};
use super::artifact::{BackupArtifact, StagingGuard};
use super::catalog::TableRef;
use super::db_dump::{DumpSource, DumpSummary};
use super::storage::ObjectStore;
use crate::config::BackupConfig;
use crate::errors::{BackupError, Result};

/// The knobs the pipeline itself cares about.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub scratch_dir: PathBuf,
    pub filename_prefix: String,
    pub format: ArtifactFormat,
    pub min_artifact_bytes: u64,
}

impl From<&BackupConfig> for PipelineOptions {
    fn from(config: &BackupConfig) -> Self {
        PipelineOptions {
            scratch_dir: config.scratch_dir.clone(),
            filename_prefix: config.filename_prefix.clone(),
            format: config.format,
            min_artifact_bytes: config.min_artifact_bytes,
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub source: &'static str,
    pub object_key: String,
    pub object_location: String,
    pub size_bytes: u64,
    pub tables_dumped: usize,
    pub tables_skipped: Vec<String>,
    pub elapsed_ms: u64,
}

/// Runs one backup: discover tables, dump into a compressed staging file,
/// check its size, upload it. The staging file is removed on every path out
/// of this function.
pub async fn run_pipeline(
    source: &dyn DumpSource,
    store: &dyn ObjectStore,
    options: &PipelineOptions,
    started_at: DateTime<Utc>,
) -> Result<RunReport> {
    let clock = Instant::now();

    let tables = source.discover().await?;
    if tables.is_empty() {
        return Err(BackupError::NoAccessibleTables);
    }
    info!(tables = tables.len(), source = source.name(), "discovered tables");

    tokio::fs::create_dir_all(&options.scratch_dir).await?;
    let artifact = BackupArtifact::new(
        &options.scratch_dir,
        &options.filename_prefix,
        started_at,
        options.format,
    );

    let writer = ArtifactWriter::create(&artifact.local_path, options.format).await?;
    let _staging = StagingGuard::new(&artifact.local_path);
    info!(path = %artifact.local_path.display(), "staging artifact");

    let (summary, size_bytes) = produce(source, &tables, writer).await?;
    if !summary.tables_skipped.is_empty() {
        warn!(skipped = ?summary.tables_skipped, "backup is missing tables");
    }

    if size_bytes < options.min_artifact_bytes {
        return Err(BackupError::ArtifactTooSmall {
            path: artifact.local_path.clone(),
            size_bytes,
            minimum_bytes: options.min_artifact_bytes,
        });
    }

    let object_key = store.object_key(&artifact.filename);
    let object_location = store.upload(&object_key, &artifact.local_path).await?;

    let report = RunReport {
        started_at,
        source: source.name(),
        object_key,
        object_location,
        size_bytes,
        tables_dumped: summary.tables_dumped,
        tables_skipped: summary.tables_skipped,
        elapsed_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
    };
    info!(
        location = %report.object_location,
        size_bytes = report.size_bytes,
        tables = report.tables_dumped,
        skipped = report.tables_skipped.len(),
        elapsed_ms = report.elapsed_ms,
        "backup uploaded"
    );
    Ok(report)
}

/// Dumps and seals the artifact. The writer is consumed here so its file
/// handles are closed before the staging guard runs.
async fn produce(
    source: &dyn DumpSource,
    tables: &[TableRef],
    mut writer: ArtifactWriter,
) -> Result<(DumpSummary, u64)> {
    let summary = source.dump(tables, &mut writer).await?;
    let uncompressed = writer.bytes_written();
    let peak_buffered = writer.peak_buffered();
    let size_bytes = writer.finish().await?;
    info!(uncompressed, peak_buffered, size_bytes, "artifact sealed");
    Ok((summary, size_bytes))
}

/// Writes the run report as pretty JSON.
pub async fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let json = serde_json::to_vec_pretty(report).map_err(std::io::Error::from)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}
