//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS subscribers (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                sender TEXT NOT NULL,
                keep INTEGER NOT NULL DEFAULT 0,
                unsubscribed_at TEXT,
                unsubscribe_method TEXT,
                unsubscribe_link TEXT,
                active_method TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (account_id, sender)
            );
            CREATE INDEX IF NOT EXISTS idx_subscribers_account ON subscribers(account_id);

            CREATE TABLE IF NOT EXISTS method_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subscriber_id TEXT NOT NULL REFERENCES subscribers(id),
                source_message_id TEXT NOT NULL,
                observed_at TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                method TEXT NOT NULL,
                UNIQUE (subscriber_id, source_message_id, observed_at)
            );
            CREATE INDEX IF NOT EXISTS idx_method_history_subscriber
                ON method_history(subscriber_id);
        "#,
    },
    Migration {
        version: 2,
        name: "unsubscribe_attempts",
        sql: r#"
            CREATE TABLE IF NOT EXISTS unsubscribe_attempts (
                id TEXT PRIMARY KEY,
                subscriber_id TEXT NOT NULL REFERENCES subscribers(id),
                method_used TEXT NOT NULL,
                target TEXT NOT NULL,
                status TEXT NOT NULL,
                attempted_at TEXT NOT NULL,
                response_code INTEGER,
                error_message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_attempts_subscriber
                ON unsubscribe_attempts(subscriber_id);
            CREATE INDEX IF NOT EXISTS idx_attempts_status
                ON unsubscribe_attempts(subscriber_id, status);
        "#,
    },
];

/// Run all pending migrations.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    tracing::debug!(
        version = get_current_version(conn).await?,
        "Database migrations complete"
    );
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row.get::<i64>(0).map_err(|e| {
            DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
        }),
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
