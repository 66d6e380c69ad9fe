// pgsnapshot/src/backup/db_dump.rs
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::archive::ArtifactWriter;
use super::catalog::{TableRef, discover_table_access, quote_ident};
use crate::config::DatabaseConfig;
use crate::errors::{BackupError, Result};
use crate::utils::find_executable;

const READ_CHUNK: usize = 64 * 1024;

/// What a dump produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpSummary {
    pub tables_dumped: usize,
    pub tables_skipped: Vec<String>,
}

/// Producer of the database's logical contents.
#[async_trait]
pub trait DumpSource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Lists the tables `dump` will cover.
    async fn discover(&self) -> Result<Vec<TableRef>>;

    /// Writes schema, then data, then (optionally) sequence state for
    /// `tables` into `sink`. Every write is awaited before the next chunk is
    /// produced.
    async fn dump(&self, tables: &[TableRef], sink: &mut ArtifactWriter) -> Result<DumpSummary>;
}

/// Shells out to `pg_dump` in plain-SQL format and streams its stdout.
///
/// `pg_dump` is a single process, so any failure fails the whole dump.
pub struct PgDumpSource {
    database: DatabaseConfig,
    pg_dump_path: Option<PathBuf>,
    // Filled by `discover`; tables pg_dump must be told to leave out.
    unreadable: Mutex<Vec<TableRef>>,
}

impl PgDumpSource {
    pub fn new(database: DatabaseConfig) -> Self {
        PgDumpSource {
            database,
            pg_dump_path: None,
            unreadable: Mutex::new(Vec::new()),
        }
    }

    /// Uses a specific `pg_dump` binary instead of searching PATH.
    #[cfg(test)]
    pub fn with_executable(mut self, path: PathBuf) -> Self {
        self.pg_dump_path = Some(path);
        self
    }

    /// A full logical dump when every user table is readable. Otherwise the
    /// dump is limited to the schemas holding readable tables, minus the
    /// unreadable ones, so types, functions and the schemas themselves are
    /// still included.
    fn command(&self, pg_dump: &Path, tables: &[TableRef], unreadable: &[TableRef]) -> Command {
        let mut command = Command::new(pg_dump);
        command
            .arg("--format=plain")
            .arg("--no-owner")
            .arg("--no-privileges")
            .arg("--no-password")
            .arg("--host")
            .arg(&self.database.host)
            .arg("--port")
            .arg(self.database.port.to_string())
            .arg("--username")
            .arg(&self.database.username)
            .arg("--dbname")
            .arg(&self.database.database);

        if !unreadable.is_empty() {
            let schemas: BTreeSet<&str> = tables.iter().map(|t| t.schema.as_str()).collect();
            for schema in &schemas {
                command.arg("--schema").arg(quote_ident(schema));
            }
            for table in unreadable.iter().filter(|t| schemas.contains(t.schema.as_str())) {
                command.arg("--exclude-table").arg(table.qualified());
            }
        }

        // Credentials and TLS settings go to the child only.
        for (key, value) in self.database.libpq_env() {
            command.env(key, value);
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl DumpSource for PgDumpSource {
    fn name(&self) -> &'static str {
        "pg_dump"
    }

    async fn discover(&self) -> Result<Vec<TableRef>> {
        let access = discover_table_access(&self.database).await?;
        *self.unreadable.lock().await = access.unreadable;
        Ok(access.readable)
    }

    async fn dump(&self, tables: &[TableRef], sink: &mut ArtifactWriter) -> Result<DumpSummary> {
        let pg_dump = match &self.pg_dump_path {
            Some(path) => path.clone(),
            None => find_executable("pg_dump")?,
        };
        let unreadable = self.unreadable.lock().await.clone();
        if !unreadable.is_empty() {
            warn!(
                excluded = ?unreadable.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "excluding tables the backup user cannot read"
            );
        }
        info!(
            executable = %pg_dump.display(),
            target_db = %self.database.target(),
            tables = tables.len(),
            "running pg_dump"
        );

        let mut child = self.command(&pg_dump, tables, &unreadable).spawn().map_err(|e| BackupError::Dump {
            table: None,
            message: format!("Failed to execute {}", pg_dump.display()),
            source: Some(e.into()),
        })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackupError::dump("pg_dump stdout was not captured"))?;
        // Drained concurrently so a chatty pg_dump cannot block on a full pipe.
        let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(read_to_string(stderr)));

        let streamed = stream_into(&mut stdout, sink).await;
        drop(stdout);

        if let Err(e) = streamed {
            // kill() also reaps the child.
            if let Err(kill_err) = child.kill().await {
                warn!(error = %kill_err, "failed to stop pg_dump");
            }
            return Err(e.into());
        }

        let status = child.wait().await.map_err(|e| BackupError::Dump {
            table: None,
            message: "Failed to wait for pg_dump".to_string(),
            source: Some(e.into()),
        })?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(BackupError::dump(format!(
                "pg_dump failed with status {status}: {}",
                stderr.trim()
            )));
        }
        if !stderr.trim().is_empty() {
            warn!(stderr = %stderr.trim(), "pg_dump reported warnings");
        }

        debug!(bytes = sink.bytes_written(), "pg_dump finished");
        Ok(DumpSummary {
            tables_dumped: tables.len(),
            tables_skipped: Vec::new(),
        })
    }
}

/// Copies `reader` into `sink` one chunk at a time, awaiting each write.
async fn stream_into<R>(reader: &mut R, sink: &mut ArtifactWriter) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        sink.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}

async fn read_to_string<R>(mut reader: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        warn!(error = %e, "failed to read pg_dump stderr");
    }
    String::from_utf8_lossy(&buf).into_owned()
}
