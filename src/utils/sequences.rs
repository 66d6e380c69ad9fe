// pgsnapshot/src/utils/sequences.rs
use sqlx::{PgConnection, Row};
use tracing::debug;

use crate::backup::catalog::{SYSTEM_SCHEMAS, is_system_schema, quote_ident, quote_literal};

/// Snapshot of one sequence: enough to recreate it and put it back where
/// it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceState {
    pub schema: String,
    pub name: String,
    pub data_type: String,
    pub start_value: i64,
    pub min_value: i64,
    pub max_value: i64,
    pub increment_by: i64,
    pub cycle: bool,
    /// `None` until `nextval` has been called at least once.
    pub last_value: Option<i64>,
    /// Backs an identity column, so the table creates it.
    pub identity_owned: bool,
}

impl SequenceState {
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }

    /// Created ahead of the tables so column defaults calling `nextval`
    /// resolve.
    pub fn render_create(&self) -> String {
        format!(
            "CREATE SEQUENCE IF NOT EXISTS {} AS {} START WITH {} {};",
            self.qualified(),
            self.data_type,
            self.start_value,
            self.render_options()
        )
    }

    /// Statements run after the data load to restore increment, bounds,
    /// cycle behaviour and the current position.
    pub fn render_restore(&self) -> Vec<String> {
        let alter = format!("ALTER SEQUENCE {} {};", self.qualified(), self.render_options());
        let setval = match self.last_value {
            Some(last) => format!(
                "SELECT pg_catalog.setval({}, {}, true);",
                quote_literal(&self.qualified()),
                last
            ),
            None => format!(
                "SELECT pg_catalog.setval({}, {}, false);",
                quote_literal(&self.qualified()),
                self.start_value
            ),
        };
        vec![alter, setval]
    }

    fn render_options(&self) -> String {
        format!(
            "INCREMENT BY {} MINVALUE {} MAXVALUE {} {}",
            self.increment_by,
            self.min_value,
            self.max_value,
            if self.cycle { "CYCLE" } else { "NO CYCLE" }
        )
    }
}

/// Reads every user sequence the session can see. `last_value` is `NULL`
/// for sequences the user cannot read or that were never used.
pub async fn fetch_sequences(
    conn: &mut PgConnection,
) -> std::result::Result<Vec<SequenceState>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT schemaname::text AS schema_name,
                sequencename::text AS sequence_name,
                data_type::text AS data_type,
                start_value, min_value, max_value, increment_by, cycle, last_value,
                EXISTS (
                    SELECT 1 FROM pg_catalog.pg_depend d
                    WHERE d.classid = 'pg_catalog.pg_class'::regclass
                      AND d.objid = (quote_ident(schemaname) || '.' || quote_ident(sequencename))::regclass
                      AND d.deptype = 'i') AS identity_owned
         FROM pg_catalog.pg_sequences
         WHERE schemaname::text <> ALL($1)
         ORDER BY schemaname, sequencename",
    )
    .bind(SYSTEM_SCHEMAS)
    .fetch_all(&mut *conn)
    .await?;

    let mut sequences = Vec::with_capacity(rows.len());
    for row in rows {
        let schema: String = row.try_get("schema_name")?;
        if is_system_schema(&schema) {
            continue;
        }
        sequences.push(SequenceState {
            schema,
            name: row.try_get("sequence_name")?,
            data_type: row.try_get("data_type")?,
            start_value: row.try_get("start_value")?,
            min_value: row.try_get("min_value")?,
            max_value: row.try_get("max_value")?,
            increment_by: row.try_get("increment_by")?,
            cycle: row.try_get("cycle")?,
            last_value: row.try_get("last_value")?,
            identity_owned: row.try_get("identity_owned")?,
        });
    }

    debug!(count = sequences.len(), "fetched sequence state");
    Ok(sequences)
}
