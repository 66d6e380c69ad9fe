pub(crate) mod archive; // Compressed staging file writer
pub(crate) mod artifact; // Artifact naming and staging cleanup
pub(crate) mod catalog; // Table discovery and DDL rendering
mod client_dump; // Client-library dump source
pub(crate) mod db_dump; // DumpSource trait and the pg_dump source
mod logic; // Pipeline orchestration
pub(crate) mod s3_upload; // S3 object store
pub(crate) mod script; // Phase-ordered SQL script
pub(crate) mod storage; // ObjectStore trait and local store

use chrono::Utc;
use tracing::info;

use crate::config::{BackupConfig, DumpMethod};
use crate::errors::Result;
use client_dump::CatalogSource;
use db_dump::{DumpSource, PgDumpSource};
pub use logic::RunReport;

/// Public entry point for one backup run.
pub async fn run_backup_flow(config: &BackupConfig) -> Result<RunReport> {
    let started_at = Utc::now();
    let source = build_source(config);
    let store = storage::build_store(&config.storage).await?;
    info!(
        target_db = %config.database.target(),
        source = source.name(),
        destination = %store.destination(),
        format = config.format.extension(),
        "starting backup"
    );

    let options = logic::PipelineOptions::from(config);
    let report = logic::run_pipeline(source.as_ref(), store.as_ref(), &options, started_at).await?;

    if let Some(path) = &config.report_file {
        logic::write_report(path, &report).await?;
        info!(path = %path.display(), "wrote run report");
    }
    Ok(report)
}

/// Preflight: database privileges and visible tables, then the storage
/// destination. Nothing is dumped or uploaded.
pub async fn run_check_flow(config: &BackupConfig) -> Result<()> {
    let tables = catalog::discover_tables(&config.database).await?;
    info!(tables = tables.len(), "database check passed");

    if matches!(config.dump_method, DumpMethod::PgDump) {
        let pg_dump = crate::utils::find_executable("pg_dump")?;
        info!(executable = %pg_dump.display(), "found pg_dump");
    }

    let store = storage::build_store(&config.storage).await?;
    store.check().await?;
    info!(destination = %store.destination(), "storage check passed");
    Ok(())
}

fn build_source(config: &BackupConfig) -> Box<dyn DumpSource> {
    match config.dump_method {
        DumpMethod::PgDump => Box::new(PgDumpSource::new(config.database.clone())),
        DumpMethod::Client => Box::new(CatalogSource::new(
            config.database.clone(),
            config.on_table_error,
            config.include_sequences,
        )),
    }
}
