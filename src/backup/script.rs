// pgsnapshot/src/backup/script.rs
//! Ordered SQL script on top of an `ArtifactWriter`.

use std::io;

use tracing::debug;

use super::archive::ArtifactWriter;
use crate::errors::{BackupError, Result};

/// Terminates a `COPY ... FROM stdin` block.
pub const COPY_TERMINATOR: &str = "\\.";

/// Sections of the script, in the only order they may be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Preamble,
    Schema,
    Data,
    Constraints,
    Sequences,
    Trailer,
}

impl Phase {
    fn banner(&self) -> &'static str {
        match self {
            Phase::Preamble => "PREAMBLE",
            Phase::Schema => "SCHEMA",
            Phase::Data => "TABLE DATA",
            Phase::Constraints => "CONSTRAINTS AND INDEXES",
            Phase::Sequences => "SEQUENCE STATE",
            Phase::Trailer => "END",
        }
    }
}

/// Writes statements phase by phase and refuses to step back to an earlier
/// phase, so schema always precedes data and sequence state follows it.
pub struct SqlScript<'w> {
    writer: &'w mut ArtifactWriter,
    phase: Phase,
}

impl<'w> SqlScript<'w> {
    pub fn new(writer: &'w mut ArtifactWriter) -> Self {
        SqlScript {
            writer,
            phase: Phase::Preamble,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub async fn enter(&mut self, phase: Phase) -> Result<()> {
        if phase < self.phase {
            return Err(BackupError::dump(format!(
                "cannot write {:?} section after {:?} section",
                phase, self.phase
            )));
        }
        if phase != self.phase {
            debug!(from = ?self.phase, to = ?phase, "script phase");
            self.phase = phase;
            self.writer
                .write_line(&format!("\n--\n-- {}\n--\n", phase.banner()))
                .await?;
        }
        Ok(())
    }

    pub async fn statement(&mut self, sql: &str) -> io::Result<()> {
        self.writer.write_line(sql).await
    }

    pub async fn comment(&mut self, text: &str) -> io::Result<()> {
        self.writer.write_line(&format!("-- {text}")).await
    }

    /// Raw COPY payload; rows already end in `\n`.
    pub async fn copy_rows(&mut self, rows: &[u8]) -> io::Result<()> {
        self.writer.write_all(rows).await
    }

    pub async fn end_copy(&mut self) -> io::Result<()> {
        self.writer.write_line(COPY_TERMINATOR).await?;
        self.writer.write_line("").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::archive::ArtifactFormat;
    use crate::backup::catalog::{ColumnDef, TableRef, TableSchema};
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn users() -> TableSchema {
        TableSchema {
            table: TableRef::new("public", "users"),
            columns: vec![ColumnDef {
                name: "id".into(),
                data_type: "integer".into(),
                not_null: true,
                default_expr: None,
                generated: false,
                identity: None,
            }],
            constraints: vec![],
            indexes: vec![],
            partition_key: None,
            partition_of: None,
        }
    }

    #[tokio::test]
    async fn test_schema_precedes_rows_in_compressed_output() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("script.gz");
        let mut writer = ArtifactWriter::create(&path, ArtifactFormat::Gzip).await?;

        let schema = users();
        {
            let mut script = SqlScript::new(&mut writer);
            script.enter(Phase::Schema).await?;
            script.statement(&schema.render_create_table()).await?;
            script.enter(Phase::Data).await?;
            script.statement(&schema.render_copy_header()).await?;
            script.copy_rows(b"1\n2\n").await?;
            script.end_copy().await?;
            script.enter(Phase::Trailer).await?;
        }
        writer.finish().await?;

        let mut text = String::new();
        GzDecoder::new(std::fs::File::open(&path)?).read_to_string(&mut text)?;
        let create_at = text.find("CREATE TABLE \"public\".\"users\"").expect("schema present");
        let copy_at = text.find("COPY \"public\".\"users\"").expect("copy header present");
        let row_at = text.find("\n1\n2\n\\.\n").expect("rows present");
        assert!(create_at < copy_at);
        assert!(copy_at < row_at);
        Ok(())
    }

    #[tokio::test]
    async fn test_phases_cannot_go_backwards() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("script.sql");
        let mut writer = ArtifactWriter::create(&path, ArtifactFormat::Sql).await?;
        let mut script = SqlScript::new(&mut writer);

        script.enter(Phase::Data).await?;
        script.enter(Phase::Data).await?;
        let err = script.enter(Phase::Schema).await.unwrap_err();
        assert!(matches!(err, BackupError::Dump { .. }));
        assert_eq!(script.phase(), Phase::Data);
        Ok(())
    }
}
