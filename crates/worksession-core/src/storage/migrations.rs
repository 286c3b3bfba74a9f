//! Database schema migrations for worksession.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Schema version after all migrations have run.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Returns 0 if no version is set (fresh database).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            tracing::warn!(error = %e, "failed to read schema_version");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: key-value store and the session history ledger.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS kv (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS session_history (
            id           TEXT PRIMARY KEY,
            task_id      TEXT NOT NULL,
            planned_ms   INTEGER NOT NULL,
            worked_ms    INTEGER NOT NULL,
            created_at   TEXT NOT NULL,
            completed_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_history_task ON session_history(task_id);
        CREATE INDEX IF NOT EXISTS idx_history_completed_at ON session_history(completed_at);",
    )?;
    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: completion kind on history rows and the pending alert table.
///
/// Rows written before v2 get their kind from whether the plan was worked in full.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "ALTER TABLE session_history ADD COLUMN completion TEXT NOT NULL DEFAULT 'ended_early';

        UPDATE session_history SET completion = 'expired' WHERE worked_ms >= planned_ms;

        CREATE TABLE IF NOT EXISTS scheduled_alerts (
            id      TEXT PRIMARY KEY,
            fire_at TEXT NOT NULL,
            title   TEXT NOT NULL,
            body    TEXT NOT NULL
        );",
    )?;
    set_schema_version(&tx, 2)?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_from_scratch() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), CURRENT_SCHEMA_VERSION);

        let alerts: i32 = conn
            .query_row("SELECT COUNT(*) FROM scheduled_alerts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(alerts, 0);
    }

    #[test]
    fn migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn v2_backfills_completion_kind() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema_version_table(&conn).unwrap();
        migrate_v1(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO session_history VALUES ('a', 't', 1000, 1000, '2024-01-01T00:00:00Z', '2024-01-01T00:00:01Z');
             INSERT INTO session_history VALUES ('b', 't', 1000, 400, '2024-01-01T00:00:00Z', '2024-01-01T00:00:01Z');",
        )
        .unwrap();

        migrate(&conn).unwrap();

        let kind = |id: &str| -> String {
            conn.query_row(
                "SELECT completion FROM session_history WHERE id = ?1",
                [id],
                |r| r.get(0),
            )
            .unwrap()
        };
        assert_eq!(kind("a"), "expired");
        assert_eq!(kind("b"), "ended_early");
    }
}
