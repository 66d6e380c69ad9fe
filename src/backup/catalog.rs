// pgsnapshot/src/backup/catalog.rs
//! Catalog queries and the SQL rendered from them.

use std::fmt;

use sqlx::{PgConnection, Row};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::errors::{BackupError, Result};
use crate::utils::setting::{close_quietly, connect, report_privileges};

/// Schemas that never contain user data.
pub const SYSTEM_SCHEMAS: &[&str] = &["pg_catalog", "information_schema", "pg_toast"];

pub fn is_system_schema(schema: &str) -> bool {
    SYSTEM_SCHEMAS.contains(&schema)
        || schema.starts_with("pg_temp_")
        || schema.starts_with("pg_toast_temp_")
}

/// Double-quotes an identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Single-quotes a string literal, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        TableRef {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// `"schema"."name"`
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// `GENERATED ALWAYS` rather than `BY DEFAULT`.
    pub always: bool,
    /// Backing sequence, already quoted by the server.
    pub sequence: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
    pub not_null: bool,
    pub default_expr: Option<String>,
    /// Stored generated column; `default_expr` holds the generation expression.
    pub generated: bool,
    pub identity: Option<Identity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    Check,
    ForeignKey,
}

impl ConstraintKind {
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "p" => Some(ConstraintKind::PrimaryKey),
            "u" => Some(ConstraintKind::Unique),
            "c" => Some(ConstraintKind::Check),
            "f" => Some(ConstraintKind::ForeignKey),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintDef {
    pub name: String,
    pub kind: ConstraintKind,
    pub definition: String,
}

/// Where a partition hangs in its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionOf {
    pub parent: TableRef,
    /// `FOR VALUES ...` or `DEFAULT`.
    pub bound: String,
}

/// Everything needed to recreate one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: TableRef,
    pub columns: Vec<ColumnDef>,
    /// Local constraints only; inherited ones come back with the parent.
    pub constraints: Vec<ConstraintDef>,
    pub indexes: Vec<String>,
    /// `RANGE (created_at)` and the like, for partitioned tables.
    pub partition_key: Option<String>,
    pub partition_of: Option<PartitionOf>,
}

impl TableSchema {
    /// A partitioned table holds no rows of its own.
    pub fn is_partitioned(&self) -> bool {
        self.partition_key.is_some()
    }

    /// Columns that carry data in a COPY; generated columns are recomputed
    /// on restore.
    pub fn copy_columns(&self) -> Vec<&ColumnDef> {
        self.columns.iter().filter(|c| !c.generated).collect()
    }

    /// Standalone `CREATE TABLE` with every column spelled out.
    pub fn render_create_table(&self) -> String {
        let mut ddl = format!("CREATE TABLE {} (\n", self.table.qualified());
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                ddl.push_str(",\n");
            }
            ddl.push_str(&format!("    {} {}", quote_ident(&column.name), column.data_type));
            match (&column.default_expr, column.generated) {
                (Some(expr), true) => ddl.push_str(&format!(" GENERATED ALWAYS AS ({expr}) STORED")),
                (Some(expr), false) => ddl.push_str(&format!(" DEFAULT {expr}")),
                (None, _) => {}
            }
            if let Some(identity) = &column.identity {
                let when = if identity.always { "ALWAYS" } else { "BY DEFAULT" };
                ddl.push_str(&format!(" GENERATED {when} AS IDENTITY"));
                if let Some(sequence) = &identity.sequence {
                    ddl.push_str(&format!(" (SEQUENCE NAME {sequence})"));
                }
            }
            if column.not_null {
                ddl.push_str(" NOT NULL");
            }
        }
        ddl.push_str("\n)");
        self.push_partition_key(&mut ddl);
        ddl.push(';');
        ddl
    }

    /// `CREATE TABLE ... PARTITION OF`; columns come from the parent.
    /// `None` for tables that are not partitions.
    pub fn render_create_partition(&self) -> Option<String> {
        let partition = self.partition_of.as_ref()?;
        let mut ddl = format!(
            "CREATE TABLE {} PARTITION OF {}\n    {}",
            self.table.qualified(),
            partition.parent.qualified(),
            partition.bound
        );
        self.push_partition_key(&mut ddl);
        ddl.push(';');
        Some(ddl)
    }

    fn push_partition_key(&self, ddl: &mut String) {
        if let Some(key) = &self.partition_key {
            ddl.push_str(&format!(" PARTITION BY {key}"));
        }
    }

    /// Header line that opens this table's COPY block.
    pub fn render_copy_header(&self) -> String {
        format!(
            "COPY {} ({}) FROM stdin;",
            self.table.qualified(),
            self.quoted_copy_columns()
        )
    }

    /// Statement the server runs to stream this table's rows.
    pub fn copy_out_statement(&self) -> String {
        format!(
            "COPY {} ({}) TO STDOUT",
            self.table.qualified(),
            self.quoted_copy_columns()
        )
    }

    /// Reads no rows but fails the same way the COPY would if the table or
    /// one of its columns cannot be read.
    pub fn readable_check_statement(&self) -> String {
        format!(
            "SELECT {} FROM {} LIMIT 0",
            self.quoted_copy_columns(),
            self.table.qualified()
        )
    }

    /// `ALTER TABLE` statements for every constraint of `kind`. On a
    /// partitioned table they cascade to the partitions.
    pub fn render_constraints(&self, kind: &ConstraintKind) -> Vec<String> {
        let only = if self.is_partitioned() { "" } else { "ONLY " };
        self.constraints
            .iter()
            .filter(|c| &c.kind == kind)
            .map(|c| {
                format!(
                    "ALTER TABLE {only}{} ADD CONSTRAINT {} {};",
                    self.table.qualified(),
                    quote_ident(&c.name),
                    c.definition
                )
            })
            .collect()
    }

    fn quoted_copy_columns(&self) -> String {
        self.copy_columns()
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserTypeKind {
    Enum {
        labels: Vec<String>,
    },
    Domain {
        base_type: String,
        default_expr: Option<String>,
        not_null: bool,
        /// `(name, CHECK (...))` pairs.
        checks: Vec<(String, String)>,
    },
}

/// An enum or domain defined outside the system schemas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserType {
    pub schema: String,
    pub name: String,
    pub kind: UserTypeKind,
}

impl UserType {
    pub fn render_create(&self) -> String {
        let qualified = format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name));
        match &self.kind {
            UserTypeKind::Enum { labels } => {
                let labels = labels.iter().map(|l| quote_literal(l)).collect::<Vec<_>>();
                format!("CREATE TYPE {qualified} AS ENUM ({});", labels.join(", "))
            }
            UserTypeKind::Domain {
                base_type,
                default_expr,
                not_null,
                checks,
            } => {
                let mut ddl = format!("CREATE DOMAIN {qualified} AS {base_type}");
                if let Some(expr) = default_expr {
                    ddl.push_str(&format!(" DEFAULT {expr}"));
                }
                if *not_null {
                    ddl.push_str(" NOT NULL");
                }
                for (name, check) in checks {
                    ddl.push_str(&format!(" CONSTRAINT {} {check}", quote_ident(name)));
                }
                ddl.push(';');
                ddl
            }
        }
    }
}

/// User tables split by whether the session may `SELECT` from them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableAccess {
    pub readable: Vec<TableRef>,
    /// Tables and sequences the session cannot read.
    pub unreadable: Vec<TableRef>,
}

/// Connects, logs the session's privileges, and lists every table the
/// current user can `SELECT` outside the system schemas. The connection is
/// closed before returning.
pub async fn discover_tables(database: &DatabaseConfig) -> Result<Vec<TableRef>> {
    Ok(discover_table_access(database).await?.readable)
}

/// Like [`discover_tables`], but also returns what could not be read.
pub async fn discover_table_access(database: &DatabaseConfig) -> Result<TableAccess> {
    let mut conn = connect(database).await?;
    let result = async {
        report_privileges(&mut conn).await?;
        table_access(&mut conn).await
    }
    .await;
    close_quietly(conn).await;
    result
}

pub async fn table_access(conn: &mut PgConnection) -> Result<TableAccess> {
    let rows = sqlx::query(
        "SELECT n.nspname::text AS schema_name,
                c.relname::text AS table_name,
                c.relkind IN ('r', 'p') AS is_table,
                has_table_privilege(c.oid, 'SELECT') AS readable
         FROM pg_catalog.pg_class c
         JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
         WHERE c.relkind IN ('r', 'p', 'S')
           AND n.nspname::text <> ALL($1)
         ORDER BY 1, 2",
    )
    .bind(SYSTEM_SCHEMAS)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| BackupError::connection("Failed to list accessible tables", e))?;

    let mut access = TableAccess::default();
    for row in rows {
        let unexpected = |e: sqlx::Error| BackupError::connection("Unexpected pg_class row", e);
        let schema: String = row.try_get("schema_name").map_err(unexpected)?;
        let name: String = row.try_get("table_name").map_err(unexpected)?;
        let is_table: bool = row.try_get("is_table").map_err(unexpected)?;
        let readable: bool = row.try_get("readable").map_err(unexpected)?;
        if is_system_schema(&schema) {
            continue;
        }
        match (readable, is_table) {
            (true, true) => access.readable.push(TableRef::new(schema, name)),
            (true, false) => {}
            (false, _) => access.unreadable.push(TableRef::new(schema, name)),
        }
    }

    info!(
        count = access.readable.len(),
        unreadable = access.unreadable.len(),
        "found accessible tables"
    );
    debug!(tables = ?access.readable.iter().map(ToString::to_string).collect::<Vec<_>>(), "accessible tables");
    Ok(access)
}

/// Reads columns, local constraints, standalone indexes and partitioning of
/// one table.
pub async fn fetch_table_schema(
    conn: &mut PgConnection,
    table: &TableRef,
) -> std::result::Result<TableSchema, sqlx::Error> {
    let qualified = table.qualified();

    let relation = sqlx::query(
        "SELECT CASE WHEN c.relkind = 'p'
                     THEN pg_catalog.pg_get_partkeydef(c.oid) END AS partition_key,
                CASE WHEN c.relispartition
                     THEN pg_catalog.pg_get_expr(c.relpartbound, c.oid) END AS partition_bound,
                pn.nspname::text AS parent_schema,
                p.relname::text AS parent_name
         FROM pg_catalog.pg_class c
         LEFT JOIN pg_catalog.pg_inherits h
                ON h.inhrelid = c.oid AND c.relispartition
         LEFT JOIN pg_catalog.pg_class p ON p.oid = h.inhparent
         LEFT JOIN pg_catalog.pg_namespace pn ON pn.oid = p.relnamespace
         WHERE c.oid = $1::regclass",
    )
    .bind(&qualified)
    .fetch_one(&mut *conn)
    .await?;

    let partition_key: Option<String> = relation.try_get("partition_key")?;
    let partition_of = match (
        relation.try_get::<Option<String>, _>("partition_bound")?,
        relation.try_get::<Option<String>, _>("parent_schema")?,
        relation.try_get::<Option<String>, _>("parent_name")?,
    ) {
        (Some(bound), Some(schema), Some(name)) => Some(PartitionOf {
            parent: TableRef::new(schema, name),
            bound,
        }),
        _ => None,
    };

    let column_rows = sqlx::query(
        "SELECT a.attname::text AS column_name,
                pg_catalog.format_type(a.atttypid, a.atttypmod) AS data_type,
                a.attnotnull AS not_null,
                pg_catalog.pg_get_expr(d.adbin, d.adrelid) AS default_expr,
                (a.attgenerated = 's') AS generated,
                a.attidentity::text AS identity,
                CASE WHEN a.attidentity <> ''
                     THEN pg_catalog.pg_get_serial_sequence($1, a.attname::text) END
                    AS identity_sequence
         FROM pg_catalog.pg_attribute a
         LEFT JOIN pg_catalog.pg_attrdef d
                ON d.adrelid = a.attrelid AND d.adnum = a.attnum
         WHERE a.attrelid = $1::regclass
           AND a.attnum > 0
           AND NOT a.attisdropped
         ORDER BY a.attnum",
    )
    .bind(&qualified)
    .fetch_all(&mut *conn)
    .await?;

    let mut columns = Vec::with_capacity(column_rows.len());
    for row in column_rows {
        let identity = match row.try_get::<String, _>("identity")?.as_str() {
            "a" => Some(true),
            "d" => Some(false),
            _ => None,
        };
        columns.push(ColumnDef {
            name: row.try_get("column_name")?,
            data_type: row.try_get("data_type")?,
            not_null: row.try_get("not_null")?,
            default_expr: row.try_get("default_expr")?,
            generated: row.try_get("generated")?,
            identity: match identity {
                Some(always) => Some(Identity {
                    always,
                    sequence: row.try_get("identity_sequence")?,
                }),
                None => None,
            },
        });
    }

    // Constraints cloned from a parent come back when the parent's are added.
    let constraint_rows = sqlx::query(
        "SELECT conname::text AS name,
                contype::text AS kind,
                pg_catalog.pg_get_constraintdef(oid, true) AS definition
         FROM pg_catalog.pg_constraint
         WHERE conrelid = $1::regclass
           AND contype IN ('p', 'u', 'c', 'f')
           AND coninhcount = 0
           AND conparentid = 0
         ORDER BY conname",
    )
    .bind(&qualified)
    .fetch_all(&mut *conn)
    .await?;

    let mut constraints = Vec::with_capacity(constraint_rows.len());
    for row in constraint_rows {
        let code: String = row.try_get("kind")?;
        if let Some(kind) = ConstraintKind::from_code(&code) {
            constraints.push(ConstraintDef {
                name: row.try_get("name")?,
                kind,
                definition: row.try_get("definition")?,
            });
        }
    }

    // Indexes that back a constraint are recreated by the constraint itself,
    // and partition indexes attached to a parent index by the parent's.
    let mut indexes = sqlx::query_scalar::<_, String>(
        "SELECT pg_catalog.pg_get_indexdef(i.indexrelid)
         FROM pg_catalog.pg_index i
         WHERE i.indrelid = $1::regclass
           AND NOT EXISTS (
                 SELECT 1 FROM pg_catalog.pg_constraint c
                 WHERE c.conindid = i.indexrelid)
           AND NOT EXISTS (
                 SELECT 1 FROM pg_catalog.pg_inherits h
                 WHERE h.inhrelid = i.indexrelid)
         ORDER BY i.indexrelid",
    )
    .bind(&qualified)
    .fetch_all(&mut *conn)
    .await?;
    if partition_key.is_some() {
        for index in &mut indexes {
            *index = cascade_index(index);
        }
    }

    Ok(TableSchema {
        table: table.clone(),
        columns,
        constraints,
        indexes,
        partition_key,
        partition_of,
    })
}

/// The server prints a partitioned table's index as `ON ONLY`, which would
/// leave it invalid after restore.
fn cascade_index(definition: &str) -> String {
    definition.replacen(" ON ONLY ", " ON ", 1)
}

/// Reads enums and domains outside the system schemas, leaving out types
/// that belong to an extension. Enums come first so domains over them
/// resolve.
pub async fn fetch_user_types(
    conn: &mut PgConnection,
) -> std::result::Result<Vec<UserType>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT n.nspname::text AS schema_name,
                t.typname::text AS type_name,
                t.typtype::text AS kind,
                ARRAY(SELECT e.enumlabel::text
                      FROM pg_catalog.pg_enum e
                      WHERE e.enumtypid = t.oid
                      ORDER BY e.enumsortorder) AS labels,
                CASE WHEN t.typtype = 'd'
                     THEN pg_catalog.format_type(t.typbasetype, t.typtypmod) END AS base_type,
                t.typdefault AS default_expr,
                t.typnotnull AS not_null,
                ARRAY(SELECT c.conname::text
                      FROM pg_catalog.pg_constraint c
                      WHERE c.contypid = t.oid AND c.contype = 'c'
                      ORDER BY c.conname) AS check_names,
                ARRAY(SELECT pg_catalog.pg_get_constraintdef(c.oid, true)
                      FROM pg_catalog.pg_constraint c
                      WHERE c.contypid = t.oid AND c.contype = 'c'
                      ORDER BY c.conname) AS check_definitions
         FROM pg_catalog.pg_type t
         JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace
         WHERE t.typtype IN ('e', 'd')
           AND n.nspname::text <> ALL($1)
           AND NOT EXISTS (
                 SELECT 1 FROM pg_catalog.pg_depend d
                 WHERE d.classid = 'pg_catalog.pg_type'::regclass
                   AND d.objid = t.oid
                   AND d.deptype = 'e')
         ORDER BY t.typtype = 'd', t.oid",
    )
    .bind(SYSTEM_SCHEMAS)
    .fetch_all(&mut *conn)
    .await?;

    let mut types = Vec::with_capacity(rows.len());
    for row in rows {
        let schema: String = row.try_get("schema_name")?;
        if is_system_schema(&schema) {
            continue;
        }
        let code: String = row.try_get("kind")?;
        let kind = if code == "e" {
            UserTypeKind::Enum {
                labels: row.try_get("labels")?,
            }
        } else {
            let names: Vec<String> = row.try_get("check_names")?;
            let definitions: Vec<String> = row.try_get("check_definitions")?;
            UserTypeKind::Domain {
                base_type: row.try_get("base_type")?,
                default_expr: row.try_get("default_expr")?,
                not_null: row.try_get("not_null")?,
                checks: names.into_iter().zip(definitions).collect(),
            }
        };
        types.push(UserType {
            schema,
            name: row.try_get("type_name")?,
            kind,
        });
    }

    debug!(count = types.len(), "fetched user types");
    Ok(types)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, data_type: &str) -> ColumnDef {
        ColumnDef {
            name: name.into(),
            data_type: data_type.into(),
            not_null: false,
            default_expr: None,
            generated: false,
            identity: None,
        }
    }

    fn orders() -> TableSchema {
        TableSchema {
            table: TableRef::new("sales", "Orders"),
            columns: vec![
                ColumnDef {
                    not_null: true,
                    default_expr: Some("nextval('sales.\"Orders_id_seq\"'::regclass)".into()),
                    ..column("id", "integer")
                },
                column("note \"x\"", "text"),
                ColumnDef {
                    default_expr: Some("(id * 100)".into()),
                    generated: true,
                    ..column("total_cents", "bigint")
                },
            ],
            constraints: vec![
                ConstraintDef {
                    name: "orders_pkey".into(),
                    kind: ConstraintKind::PrimaryKey,
                    definition: "PRIMARY KEY (id)".into(),
                },
                ConstraintDef {
                    name: "orders_customer_fk".into(),
                    kind: ConstraintKind::ForeignKey,
                    definition: "FOREIGN KEY (id) REFERENCES sales.customers(id)".into(),
                },
            ],
            indexes: vec![],
            partition_key: None,
            partition_of: None,
        }
    }

    fn events() -> TableSchema {
        TableSchema {
            table: TableRef::new("public", "events"),
            columns: vec![column("id", "bigint"), column("created_at", "date")],
            constraints: vec![ConstraintDef {
                name: "events_pkey".into(),
                kind: ConstraintKind::PrimaryKey,
                definition: "PRIMARY KEY (id, created_at)".into(),
            }],
            indexes: vec![],
            partition_key: Some("RANGE (created_at)".into()),
            partition_of: None,
        }
    }

    fn events_2024() -> TableSchema {
        TableSchema {
            table: TableRef::new("public", "events_2024"),
            partition_key: None,
            partition_of: Some(PartitionOf {
                parent: TableRef::new("public", "events"),
                bound: "FOR VALUES FROM ('2024-01-01') TO ('2025-01-01')".into(),
            }),
            constraints: vec![],
            ..events()
        }
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(TableRef::new("public", "Users").to_string(), "\"public\".\"Users\"");
    }

    #[test]
    fn test_system_schema_denylist() {
        assert!(is_system_schema("pg_catalog"));
        assert!(is_system_schema("information_schema"));
        assert!(is_system_schema("pg_toast"));
        assert!(is_system_schema("pg_temp_3"));
        assert!(is_system_schema("pg_toast_temp_3"));
        assert!(!is_system_schema("public"));
        assert!(!is_system_schema("pg_partman"));
    }

    #[test]
    fn test_create_table_rendering() {
        assert_eq!(
            orders().render_create_table(),
            "CREATE TABLE \"sales\".\"Orders\" (\n\
             \x20   \"id\" integer DEFAULT nextval('sales.\"Orders_id_seq\"'::regclass) NOT NULL,\n\
             \x20   \"note \"\"x\"\"\" text,\n\
             \x20   \"total_cents\" bigint GENERATED ALWAYS AS ((id * 100)) STORED\n\
             );"
        );
        assert_eq!(orders().render_create_partition(), None);
    }

    #[test]
    fn test_identity_columns_keep_their_sequence() {
        let mut schema = orders();
        schema.columns[0] = ColumnDef {
            not_null: true,
            identity: Some(Identity {
                always: true,
                sequence: Some("sales.\"Orders_id_seq\"".into()),
            }),
            ..column("id", "integer")
        };
        schema.columns[1].identity = Some(Identity {
            always: false,
            sequence: None,
        });

        let ddl = schema.render_create_table();
        assert!(ddl.contains(
            "\"id\" integer GENERATED ALWAYS AS IDENTITY (SEQUENCE NAME sales.\"Orders_id_seq\") NOT NULL,"
        ));
        assert!(ddl.contains("\"note \"\"x\"\"\" text GENERATED BY DEFAULT AS IDENTITY,"));
        assert!(!ddl.contains("DEFAULT nextval"));
    }

    #[test]
    fn test_copy_skips_generated_columns() {
        let schema = orders();
        assert_eq!(
            schema.render_copy_header(),
            "COPY \"sales\".\"Orders\" (\"id\", \"note \"\"x\"\"\") FROM stdin;"
        );
        assert_eq!(
            schema.copy_out_statement(),
            "COPY \"sales\".\"Orders\" (\"id\", \"note \"\"x\"\"\") TO STDOUT"
        );
        assert_eq!(
            schema.readable_check_statement(),
            "SELECT \"id\", \"note \"\"x\"\"\" FROM \"sales\".\"Orders\" LIMIT 0"
        );
    }

    #[test]
    fn test_constraints_filtered_by_kind() {
        let schema = orders();
        assert_eq!(
            schema.render_constraints(&ConstraintKind::PrimaryKey),
            vec!["ALTER TABLE ONLY \"sales\".\"Orders\" ADD CONSTRAINT \"orders_pkey\" PRIMARY KEY (id);"]
        );
        assert_eq!(schema.render_constraints(&ConstraintKind::ForeignKey).len(), 1);
        assert!(schema.render_constraints(&ConstraintKind::Check).is_empty());
    }

    #[test]
    fn test_partitioned_table_rendering() {
        let parent = events();
        assert!(parent.is_partitioned());
        assert!(parent.render_create_table().ends_with("\n) PARTITION BY RANGE (created_at);"));
        assert_eq!(
            parent.render_constraints(&ConstraintKind::PrimaryKey),
            vec!["ALTER TABLE \"public\".\"events\" ADD CONSTRAINT \"events_pkey\" PRIMARY KEY (id, created_at);"]
        );

        let child = events_2024();
        assert!(!child.is_partitioned());
        assert_eq!(
            child.render_create_partition().as_deref(),
            Some(
                "CREATE TABLE \"public\".\"events_2024\" PARTITION OF \"public\".\"events\"\n    \
                 FOR VALUES FROM ('2024-01-01') TO ('2025-01-01');"
            )
        );
    }

    #[test]
    fn test_sub_partition_keeps_its_own_key() {
        let mut child = events_2024();
        child.partition_key = Some("LIST (id)".into());
        assert!(
            child
                .render_create_partition()
                .is_some_and(|ddl| ddl.ends_with("TO ('2025-01-01') PARTITION BY LIST (id);"))
        );
    }

    #[test]
    fn test_partitioned_index_cascades() {
        assert_eq!(
            cascade_index("CREATE INDEX events_created_idx ON ONLY public.events USING btree (created_at)"),
            "CREATE INDEX events_created_idx ON public.events USING btree (created_at)"
        );
    }

    #[test]
    fn test_enum_and_domain_rendering() {
        let mood = UserType {
            schema: "public".into(),
            name: "mood".into(),
            kind: UserTypeKind::Enum {
                labels: vec!["sad".into(), "it's ok".into()],
            },
        };
        assert_eq!(
            mood.render_create(),
            "CREATE TYPE \"public\".\"mood\" AS ENUM ('sad', 'it''s ok');"
        );

        let price = UserType {
            schema: "sales".into(),
            name: "price".into(),
            kind: UserTypeKind::Domain {
                base_type: "numeric(10,2)".into(),
                default_expr: Some("0".into()),
                not_null: true,
                checks: vec![("price_positive".into(), "CHECK (VALUE >= 0::numeric)".into())],
            },
        };
        assert_eq!(
            price.render_create(),
            "CREATE DOMAIN \"sales\".\"price\" AS numeric(10,2) DEFAULT 0 NOT NULL \
             CONSTRAINT \"price_positive\" CHECK (VALUE >= 0::numeric);"
        );
    }
}
