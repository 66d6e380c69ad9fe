// pgsnapshot/src/backup/client_dump.rs
use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use sqlx::PgConnection;
use tracing::{debug, info, warn};

use super::archive::ArtifactWriter;
use super::catalog::{
    ConstraintKind, TableRef, TableSchema, UserType, discover_tables, fetch_table_schema,
    fetch_user_types, quote_ident,
};
use super::db_dump::{DumpSource, DumpSummary};
use super::script::{Phase, SqlScript};
use crate::config::{DatabaseConfig, TableErrorPolicy};
use crate::errors::{BackupError, Result};
use crate::utils::sequences::{SequenceState, fetch_sequences};
use crate::utils::setting::{close_quietly, connect};

const SAVEPOINT: &str = "pgsnapshot_table";

/// Dumps through the client library: DDL rendered from the catalog, rows
/// streamed with `COPY ... TO STDOUT`, all inside one read-only snapshot.
pub struct CatalogSource {
    database: DatabaseConfig,
    on_table_error: TableErrorPolicy,
    include_sequences: bool,
}

impl CatalogSource {
    pub fn new(
        database: DatabaseConfig,
        on_table_error: TableErrorPolicy,
        include_sequences: bool,
    ) -> Self {
        CatalogSource {
            database,
            on_table_error,
            include_sequences,
        }
    }

    /// Applies the per-table policy to a failure.
    fn table_failed(
        &self,
        table: &TableRef,
        error: sqlx::Error,
        summary: &mut DumpSummary,
    ) -> Result<()> {
        match self.on_table_error {
            TableErrorPolicy::Abort => Err(BackupError::table_dump(table.to_string(), error)),
            TableErrorPolicy::Skip => {
                warn!(table = %table, error = %error, "skipping table");
                summary.tables_skipped.push(table.to_string());
                Ok(())
            }
        }
    }

    /// Applies the policy to a catalog read that is not tied to one table.
    fn section_failed<T>(&self, what: &str, error: sqlx::Error) -> Result<Vec<T>> {
        match self.on_table_error {
            TableErrorPolicy::Abort => Err(BackupError::Dump {
                table: None,
                message: format!("Failed to read {what}: {error}"),
                source: Some(error.into()),
            }),
            TableErrorPolicy::Skip => {
                warn!(error = %error, "omitting {what}");
                Ok(Vec::new())
            }
        }
    }

    async fn dump_snapshot(
        &self,
        conn: &mut PgConnection,
        tables: &[TableRef],
        sink: &mut ArtifactWriter,
    ) -> Result<DumpSummary> {
        execute(conn, "BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY").await?;

        let mut summary = DumpSummary::default();

        let mut schemas = Vec::with_capacity(tables.len());
        for table in tables {
            execute(conn, &format!("SAVEPOINT {SAVEPOINT}")).await?;
            match fetch_table_schema(conn, table).await {
                Ok(schema) => {
                    execute(conn, &format!("RELEASE SAVEPOINT {SAVEPOINT}")).await?;
                    schemas.push(schema);
                }
                Err(e) => {
                    execute(conn, &format!("ROLLBACK TO SAVEPOINT {SAVEPOINT}")).await?;
                    self.table_failed(table, e, &mut summary)?;
                }
            }
        }

        let types = self.user_types(conn).await?;
        let sequences = if self.include_sequences {
            self.sequences(conn).await?
        } else {
            Vec::new()
        };

        let mut script = SqlScript::new(sink);
        write_preamble(&mut script, &self.database.database).await?;
        write_schema(&mut script, &schemas, &types, &sequences).await?;

        script.enter(Phase::Data).await?;
        summary.tables_dumped += schemas.iter().filter(|s| s.is_partitioned()).count();
        for schema in copy_targets(&schemas) {
            // A failed COPY leaves the connection unusable, so access is
            // checked first where a failure can still be rolled back.
            execute(conn, &format!("SAVEPOINT {SAVEPOINT}")).await?;
            if let Err(e) = check_readable(conn, schema).await {
                execute(conn, &format!("ROLLBACK TO SAVEPOINT {SAVEPOINT}")).await?;
                self.table_failed(&schema.table, e, &mut summary)?;
                continue;
            }
            execute(conn, &format!("RELEASE SAVEPOINT {SAVEPOINT}")).await?;

            let bytes = copy_table(conn, &mut script, schema).await?;
            summary.tables_dumped += 1;
            debug!(table = %schema.table, bytes, "copied table data");
        }

        write_constraints(&mut script, &schemas).await?;

        if !sequences.is_empty() {
            script.enter(Phase::Sequences).await?;
            for sequence in &sequences {
                for statement in sequence.render_restore() {
                    script.statement(&statement).await?;
                }
            }
        }

        script.enter(Phase::Trailer).await?;
        script.statement("COMMIT;").await?;

        // Read-only snapshot: nothing to commit.
        if let Err(e) = execute(conn, "ROLLBACK").await {
            warn!(error = %e, "failed to end snapshot transaction");
        }

        info!(
            tables = summary.tables_dumped,
            skipped = summary.tables_skipped.len(),
            types = types.len(),
            sequences = sequences.len(),
            "catalog dump finished"
        );
        Ok(summary)
    }

    async fn sequences(&self, conn: &mut PgConnection) -> Result<Vec<SequenceState>> {
        execute(conn, &format!("SAVEPOINT {SAVEPOINT}")).await?;
        match fetch_sequences(conn).await {
            Ok(sequences) => {
                execute(conn, &format!("RELEASE SAVEPOINT {SAVEPOINT}")).await?;
                Ok(sequences)
            }
            Err(e) => {
                execute(conn, &format!("ROLLBACK TO SAVEPOINT {SAVEPOINT}")).await?;
                self.section_failed("sequence state", e)
            }
        }
    }

    async fn user_types(&self, conn: &mut PgConnection) -> Result<Vec<UserType>> {
        execute(conn, &format!("SAVEPOINT {SAVEPOINT}")).await?;
        match fetch_user_types(conn).await {
            Ok(types) => {
                execute(conn, &format!("RELEASE SAVEPOINT {SAVEPOINT}")).await?;
                Ok(types)
            }
            Err(e) => {
                execute(conn, &format!("ROLLBACK TO SAVEPOINT {SAVEPOINT}")).await?;
                self.section_failed("user-defined types", e)
            }
        }
    }
}

#[async_trait]
impl DumpSource for CatalogSource {
    fn name(&self) -> &'static str {
        "client"
    }

    async fn discover(&self) -> Result<Vec<TableRef>> {
        discover_tables(&self.database).await
    }

    async fn dump(&self, tables: &[TableRef], sink: &mut ArtifactWriter) -> Result<DumpSummary> {
        let mut conn = connect(&self.database).await?;
        let result = self.dump_snapshot(&mut conn, tables, sink).await;
        close_quietly(conn).await;
        result
    }
}

async fn execute(conn: &mut PgConnection, sql: &str) -> Result<()> {
    sqlx::query(sql)
        .execute(&mut *conn)
        .await
        .map(|_| ())
        .map_err(|e| BackupError::connection(format!("'{sql}' failed"), e))
}

async fn check_readable(
    conn: &mut PgConnection,
    schema: &TableSchema,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(&schema.readable_check_statement())
        .execute(&mut *conn)
        .await
        .map(|_| ())
}

/// Tables whose rows are copied. Partitioned tables hold none; their rows
/// are copied from each partition.
fn copy_targets(schemas: &[TableSchema]) -> impl Iterator<Item = &TableSchema> {
    schemas.iter().filter(|s| !s.is_partitioned())
}

/// Tables in creation order, each paired with whether it is created as a
/// partition of its parent. A partition whose parent is not in the dump is
/// created as a plain table.
fn creation_order(schemas: &[TableSchema]) -> Vec<(&TableSchema, bool)> {
    let by_name: HashMap<&TableRef, &TableSchema> = schemas.iter().map(|s| (&s.table, s)).collect();
    let depth = |schema: &TableSchema| {
        let mut depth = 0;
        let mut current: &TableSchema = schema;
        while let Some(parent) = current
            .partition_of
            .as_ref()
            .and_then(|p| by_name.get(&p.parent).copied())
        {
            depth += 1;
            current = parent;
            if depth > schemas.len() {
                break;
            }
        }
        depth
    };
    let mut ordered: Vec<(usize, &TableSchema)> = schemas.iter().map(|s| (depth(s), s)).collect();
    ordered.sort_by_key(|(depth, _)| *depth);
    ordered
        .into_iter()
        .map(|(depth, schema)| (schema, depth > 0))
        .collect()
}

async fn write_preamble(script: &mut SqlScript<'_>, database: &str) -> Result<()> {
    script.comment("PostgreSQL database dump").await?;
    script.comment(&format!("Database: {database}")).await?;
    script.statement("SET client_encoding = 'UTF8';").await?;
    script.statement("SET standard_conforming_strings = on;").await?;
    script.statement("SET check_function_bodies = false;").await?;
    script.statement("BEGIN;").await?;
    Ok(())
}

/// Schemas, then user types, then sequences, then tables. Sequences owned
/// by an identity column are created by their table.
async fn write_schema(
    script: &mut SqlScript<'_>,
    schemas: &[TableSchema],
    types: &[UserType],
    sequences: &[SequenceState],
) -> Result<()> {
    script.enter(Phase::Schema).await?;

    let namespaces: BTreeSet<&str> = schemas
        .iter()
        .map(|s| s.table.schema.as_str())
        .chain(types.iter().map(|t| t.schema.as_str()))
        .chain(sequences.iter().map(|s| s.schema.as_str()))
        .filter(|ns| *ns != "public")
        .collect();
    for namespace in namespaces {
        script
            .statement(&format!("CREATE SCHEMA IF NOT EXISTS {};", quote_ident(namespace)))
            .await?;
    }

    for user_type in types {
        script.statement(&user_type.render_create()).await?;
    }
    for sequence in sequences.iter().filter(|s| !s.identity_owned) {
        script.statement(&sequence.render_create()).await?;
    }
    for (schema, attached) in creation_order(schemas) {
        let ddl = match schema.render_create_partition() {
            Some(partition) if attached => partition,
            _ => schema.render_create_table(),
        };
        script.statement(&ddl).await?;
        script.statement("").await?;
    }
    Ok(())
}

/// Primary keys, unique and check constraints first, then standalone
/// indexes, then foreign keys once every referenced key exists.
async fn write_constraints(script: &mut SqlScript<'_>, schemas: &[TableSchema]) -> Result<()> {
    script.enter(Phase::Constraints).await?;
    for kind in [ConstraintKind::PrimaryKey, ConstraintKind::Unique, ConstraintKind::Check] {
        for schema in schemas {
            for statement in schema.render_constraints(&kind) {
                script.statement(&statement).await?;
            }
        }
    }
    for schema in schemas {
        for index in &schema.indexes {
            script.statement(&format!("{index};")).await?;
        }
    }
    for schema in schemas {
        for statement in schema.render_constraints(&ConstraintKind::ForeignKey) {
            script.statement(&statement).await?;
        }
    }
    Ok(())
}

/// Streams one table's rows. Any server error here is fatal: the
/// connection cannot run another statement after a failed COPY.
async fn copy_table(
    conn: &mut PgConnection,
    script: &mut SqlScript<'_>,
    schema: &TableSchema,
) -> Result<u64> {
    let rows = conn
        .copy_out_raw(&schema.copy_out_statement())
        .await
        .map_err(|e| BackupError::table_dump(schema.table.to_string(), e))?;
    stream_rows(script, schema, rows).await
}

/// Writes a COPY block, pulling one chunk at a time and writing it before
/// the next is requested.
async fn stream_rows<S, B>(script: &mut SqlScript<'_>, schema: &TableSchema, mut rows: S) -> Result<u64>
where
    S: Stream<Item = std::result::Result<B, sqlx::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    script.statement(&schema.render_copy_header()).await?;

    let mut bytes = 0u64;
    while let Some(chunk) = rows.next().await {
        let chunk = chunk.map_err(|e| BackupError::table_dump(schema.table.to_string(), e))?;
        let chunk = chunk.as_ref();
        script.copy_rows(chunk).await?;
        bytes += chunk.len() as u64;
    }

    script.end_copy().await?;
    Ok(bytes)
}
