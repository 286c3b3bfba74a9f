//! SQLite storage for everything the timer keeps across processes.
//!
//! Provides persistent storage for:
//! - Key-value store (the session snapshot lives here)
//! - The session history ledger and focus statistics
//! - Completion alerts waiting to be delivered

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use super::{data_dir, migrations};
use crate::error::DatabaseError;
use crate::notify::ScheduledAlert;
use crate::session::{CompletionKind, WorkSession};

/// A finished session as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub task_id: String,
    pub planned_ms: u64,
    pub worked_ms: u64,
    pub completion: CompletionKind,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_fulfilled(&self) -> bool {
        self.worked_ms >= self.planned_ms
    }
}

/// Which sessions count toward focus time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusPolicy {
    /// Count the worked time of sessions that ended before their plan ran out.
    pub count_partial_sessions: bool,
}

impl Default for FocusPolicy {
    fn default() -> Self {
        Self {
            count_partial_sessions: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct FocusStats {
    pub total_sessions: u64,
    pub fulfilled_sessions: u64,
    pub focus_ms: u64,
    pub today_sessions: u64,
    pub today_focus_ms: u64,
}

/// SQLite database shared by the snapshot store, the alert scheduler and
/// the history ledger. Clones share one connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn read_blob(conn: &Connection, key: &str) -> rusqlite::Result<Option<Vec<u8>>> {
    let value = conn
        .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get::<_, Value>(0)
        })
        .optional()?;
    Ok(match value {
        Some(Value::Text(s)) => Some(s.into_bytes()),
        Some(Value::Blob(b)) => Some(b),
        Some(_) | None => None,
    })
}

fn write_blob(conn: &Connection, key: &str, blob: Option<&[u8]>) -> rusqlite::Result<()> {
    let Some(blob) = blob else {
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        return Ok(());
    };
    let value = match std::str::from_utf8(blob) {
        Ok(s) => Value::Text(s.to_string()),
        Err(_) => Value::Blob(blob.to_vec()),
    };
    conn.execute(
        "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

fn completion_str(kind: CompletionKind) -> &'static str {
    match kind {
        CompletionKind::Expired => "expired",
        CompletionKind::EndedEarly => "ended_early",
    }
}

impl Database {
    /// Open the database at `<data_dir>/worksession.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, DatabaseError> {
        let dir = data_dir()?;
        Self::open_at(&dir.join("worksession.db"))
    }

    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DatabaseError> {
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Key-value ────────────────────────────────────────────────────

    /// Raw bytes under `key`, whether stored as text or blob.
    pub fn kv_get_blob(&self, key: &str) -> Result<Option<Vec<u8>>, rusqlite::Error> {
        read_blob(&self.conn(), key)
    }

    /// Replace the bytes under `key` only if they still equal `expected`
    /// (`None` meaning no row). `new = None` deletes the row.
    ///
    /// Returns `false` without writing when another writer changed the row.
    pub fn kv_swap_blob(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> Result<bool, rusqlite::Error> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if read_blob(&tx, key)?.as_deref() != expected {
            return Ok(false);
        }
        write_blob(&tx, key, new)?;
        tx.commit()?;
        Ok(true)
    }

    // ── History ledger ───────────────────────────────────────────────

    /// Record a completed session. Recording the same session twice keeps
    /// one row.
    pub fn record_session(&self, session: &WorkSession) -> Result<SessionRecord, rusqlite::Error> {
        let completed_at = session.completed_at.unwrap_or_else(Utc::now);
        let completion = session.completion.unwrap_or(if session.is_fulfilled() {
            CompletionKind::Expired
        } else {
            CompletionKind::EndedEarly
        });
        let record = SessionRecord {
            id: session.id.to_string(),
            task_id: session.task_id.clone(),
            planned_ms: session.planned_ms,
            worked_ms: session.accumulated_ms,
            completion,
            created_at: session.created_at,
            completed_at,
        };
        self.conn().execute(
            "INSERT OR REPLACE INTO session_history
                (id, task_id, planned_ms, worked_ms, created_at, completed_at, completion)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.task_id,
                record.planned_ms,
                record.worked_ms,
                ts(record.created_at),
                ts(record.completed_at),
                completion_str(record.completion),
            ],
        )?;
        Ok(record)
    }

    /// Most recent first. `task_id` narrows to one task.
    pub fn list_sessions(
        &self,
        task_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SessionRecord>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, task_id, planned_ms, worked_ms, completion, created_at, completed_at
             FROM session_history
             WHERE ?1 IS NULL OR task_id = ?1
             ORDER BY completed_at DESC
             LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![task_id, limit], |row| {
            let completion: String = row.get(4)?;
            let created: String = row.get(5)?;
            let completed: String = row.get(6)?;
            Ok(SessionRecord {
                id: row.get(0)?,
                task_id: row.get(1)?,
                planned_ms: row.get(2)?,
                worked_ms: row.get(3)?,
                completion: if completion == "expired" {
                    CompletionKind::Expired
                } else {
                    CompletionKind::EndedEarly
                },
                created_at: parse_ts(5, &created)?,
                completed_at: parse_ts(6, &completed)?,
            })
        })?;
        let records: Result<Vec<_>, _> = rows.collect();
        records
    }

    pub fn remove_session(&self, id: &str) -> Result<bool, rusqlite::Error> {
        let n = self
            .conn()
            .execute("DELETE FROM session_history WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    /// Total worked time recorded against one task.
    pub fn task_worked_ms(&self, task_id: &str) -> Result<u64, rusqlite::Error> {
        self.conn().query_row(
            "SELECT COALESCE(SUM(worked_ms), 0) FROM session_history WHERE task_id = ?1",
            params![task_id],
            |row| row.get(0),
        )
    }

    /// Aggregate focus time. "Today" starts at UTC midnight of `now`.
    pub fn focus_stats(
        &self,
        policy: FocusPolicy,
        now: DateTime<Utc>,
    ) -> Result<FocusStats, rusqlite::Error> {
        let today = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|d| ts(d.and_utc()))
            .unwrap_or_default();
        let counted = if policy.count_partial_sessions {
            "1 = 1"
        } else {
            "completion = 'expired'"
        };
        let sql = format!(
            "SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN worked_ms >= planned_ms THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN {counted} THEN worked_ms ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN completed_at >= ?1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN completed_at >= ?1 AND {counted} THEN worked_ms ELSE 0 END), 0)
             FROM session_history"
        );
        self.conn().query_row(&sql, params![today], |row| {
            Ok(FocusStats {
                total_sessions: row.get(0)?,
                fulfilled_sessions: row.get(1)?,
                focus_ms: row.get(2)?,
                today_sessions: row.get(3)?,
                today_focus_ms: row.get(4)?,
            })
        })
    }

    // ── Scheduled alerts ─────────────────────────────────────────────

    pub fn upsert_alert(&self, alert: &ScheduledAlert) -> Result<(), rusqlite::Error> {
        self.conn().execute(
            "INSERT OR REPLACE INTO scheduled_alerts (id, fire_at, title, body)
             VALUES (?1, ?2, ?3, ?4)",
            params![alert.id, ts(alert.fire_at), alert.title, alert.body],
        )?;
        Ok(())
    }

    pub fn delete_alert(&self, id: &str) -> Result<bool, rusqlite::Error> {
        let n = self
            .conn()
            .execute("DELETE FROM scheduled_alerts WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    pub fn pending_alerts(&self) -> Result<Vec<ScheduledAlert>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id, fire_at, title, body FROM scheduled_alerts ORDER BY fire_at")?;
        let rows = stmt.query_map([], |row| {
            let fire_at: String = row.get(1)?;
            Ok(ScheduledAlert {
                id: row.get(0)?,
                fire_at: parse_ts(1, &fire_at)?,
                title: row.get(2)?,
                body: row.get(3)?,
            })
        })?;
        let alerts: Result<Vec<_>, _> = rows.collect();
        alerts
    }

    /// Remove and return every alert whose fire time has passed.
    pub fn take_due_alerts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledAlert>, rusqlite::Error> {
        let due: Vec<ScheduledAlert> = self
            .pending_alerts()?
            .into_iter()
            .filter(|a| a.fire_at <= now)
            .collect();
        for alert in &due {
            self.delete_alert(&alert.id)?;
        }
        Ok(due)
    }
}
