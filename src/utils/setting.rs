use sqlx::{Connection, PgConnection, Row};
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::errors::{BackupError, Result};

/// Opens a single connection using the explicit credentials in `database`.
pub async fn connect(database: &DatabaseConfig) -> Result<PgConnection> {
    let conn = PgConnection::connect_with(&database.connect_options())
        .await
        .map_err(|e| {
            BackupError::connection(format!("Failed to connect to {}", database.target()), e)
        })?;
    info!(target_db = %database.target(), "connected to database");
    Ok(conn)
}

/// Closes the connection, logging instead of failing if the server is
/// already gone.
pub async fn close_quietly(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        warn!(error = %e, "failed to close database connection cleanly");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegeReport {
    pub current_user: String,
    pub current_database: String,
    pub can_connect: bool,
    pub can_use_public: bool,
}

/// Logs who we are connected as and what the session may touch.
pub async fn report_privileges(conn: &mut PgConnection) -> Result<PrivilegeReport> {
    let row = sqlx::query(
        "SELECT current_user::text AS user_name,
                current_database()::text AS database_name,
                has_database_privilege(current_user, current_database(), 'CONNECT') AS can_connect,
                COALESCE((SELECT has_schema_privilege(current_user, n.oid, 'USAGE')
                          FROM pg_catalog.pg_namespace n
                          WHERE n.nspname = 'public'), false) AS can_use_public",
    )
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| BackupError::connection("Failed to read session privileges", e))?;

    let report = (|| -> std::result::Result<PrivilegeReport, sqlx::Error> {
        Ok(PrivilegeReport {
            current_user: row.try_get("user_name")?,
            current_database: row.try_get("database_name")?,
            can_connect: row.try_get("can_connect")?,
            can_use_public: row.try_get("can_use_public")?,
        })
    })()
    .map_err(|e| BackupError::connection("Unexpected privilege row", e))?;

    info!(
        user = %report.current_user,
        database = %report.current_database,
        can_connect = report.can_connect,
        can_use_public = report.can_use_public,
        "session privileges"
    );
    if !report.can_use_public {
        warn!(user = %report.current_user, "user has no USAGE on schema public");
    }
    Ok(report)
}
