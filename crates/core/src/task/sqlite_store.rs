//! SQLite-backed task store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{Task, TaskError, TaskKey, TaskStatus, TaskStore};

/// SQLite-backed task store.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

impl SqliteTaskStore {
    /// Create a new SQLite task store, creating the database file and
    /// tables if needed.
    pub fn new(path: &Path) -> Result<Self, TaskError> {
        let conn = Connection::open(path).map_err(|e| TaskError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite task store (useful for testing).
    pub fn in_memory() -> Result<Self, TaskError> {
        let conn = Connection::open_in_memory().map_err(|e| TaskError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), TaskError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                run_id TEXT NOT NULL,
                segment_id INTEGER NOT NULL,
                stage TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                not_before TEXT,
                last_error TEXT,
                fingerprint TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (run_id, segment_id, stage)
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_run ON tasks(run_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_updated_at ON tasks(updated_at);
            "#,
        )
        .map_err(|e| TaskError::Database(e.to_string()))?;

        // Migration: add last_error column if it doesn't exist
        let _ = conn.execute("ALTER TABLE tasks ADD COLUMN last_error TEXT", []);

        Ok(())
    }

    fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
        let run_id: String = row.get(0)?;
        let segment_id: u32 = row.get(1)?;
        let stage: String = row.get(2)?;
        let ordinal: u32 = row.get(3)?;
        let status_json: String = row.get(4)?;
        let attempts: u32 = row.get(5)?;
        let not_before_str: Option<String> = row.get(6)?;
        let last_error: Option<String> = row.get(7)?;
        let fingerprint: String = row.get(8)?;
        let updated_at_str: String = row.get(9)?;

        // A status column that fails to parse is corruption, not a
        // fresh task; surface it instead of silently re-executing.
        let status: TaskStatus = serde_json::from_str(&status_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?;

        let not_before = not_before_str.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        });

        let updated_at = DateTime::parse_from_rfc3339(&updated_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Task {
            run_id,
            key: TaskKey::new(segment_id, stage),
            ordinal,
            status,
            attempts,
            not_before,
            last_error,
            fingerprint,
            updated_at,
        })
    }

    fn fetch(
        conn: &Connection,
        run_id: &str,
        key: &TaskKey,
    ) -> Result<Option<Task>, TaskError> {
        let result = conn.query_row(
            "SELECT run_id, segment_id, stage, ordinal, status, attempts, not_before, last_error, fingerprint, updated_at FROM tasks WHERE run_id = ? AND segment_id = ? AND stage = ?",
            params![run_id, key.segment_id, key.stage],
            Self::row_to_task,
        );

        match result {
            Ok(task) => Ok(Some(task)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(TaskError::Database(e.to_string())),
        }
    }
}

impl TaskStore for SqliteTaskStore {
    fn upsert(&self, task: &Task) -> Result<(), TaskError> {
        let conn = self.conn.lock().unwrap();

        let status_json = serde_json::to_string(&task.status)
            .map_err(|e| TaskError::Database(e.to_string()))?;

        // Status, attempts and error fields survive only as long as the
        // fingerprint does; a changed fingerprint means different
        // inputs, so the old progress (and its spent retry budget) no
        // longer applies.
        conn.execute(
            r#"
            INSERT INTO tasks (run_id, segment_id, stage, ordinal, status, attempts, not_before, last_error, fingerprint, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(run_id, segment_id, stage) DO UPDATE SET
                ordinal = excluded.ordinal,
                status = CASE WHEN tasks.fingerprint = excluded.fingerprint
                    THEN tasks.status ELSE excluded.status END,
                attempts = CASE WHEN tasks.fingerprint = excluded.fingerprint
                    THEN tasks.attempts ELSE excluded.attempts END,
                not_before = CASE WHEN tasks.fingerprint = excluded.fingerprint
                    THEN tasks.not_before ELSE excluded.not_before END,
                last_error = CASE WHEN tasks.fingerprint = excluded.fingerprint
                    THEN tasks.last_error ELSE excluded.last_error END,
                fingerprint = excluded.fingerprint,
                updated_at = excluded.updated_at
            "#,
            params![
                task.run_id,
                task.key.segment_id,
                task.key.stage,
                task.ordinal,
                status_json,
                task.attempts,
                task.not_before.map(|t| t.to_rfc3339()),
                task.last_error,
                task.fingerprint,
                task.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| TaskError::Database(e.to_string()))?;

        Ok(())
    }

    fn get(&self, run_id: &str, key: &TaskKey) -> Result<Option<Task>, TaskError> {
        let conn = self.conn.lock().unwrap();
        Self::fetch(&conn, run_id, key)
    }

    fn list_run(&self, run_id: &str) -> Result<Vec<Task>, TaskError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(
                "SELECT run_id, segment_id, stage, ordinal, status, attempts, not_before, last_error, fingerprint, updated_at FROM tasks WHERE run_id = ? ORDER BY ordinal ASC, segment_id ASC",
            )
            .map_err(|e| TaskError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![run_id], Self::row_to_task)
            .map_err(|e| TaskError::Database(e.to_string()))?;

        let mut tasks = Vec::new();
        for row_result in rows {
            let task = row_result.map_err(|e| TaskError::Database(e.to_string()))?;
            tasks.push(task);
        }

        Ok(tasks)
    }

    fn update_status(
        &self,
        run_id: &str,
        key: &TaskKey,
        status: TaskStatus,
    ) -> Result<Task, TaskError> {
        let conn = self.conn.lock().unwrap();

        let current = Self::fetch(&conn, run_id, key)?.ok_or_else(|| TaskError::NotFound {
            run_id: run_id.to_string(),
            key: key.clone(),
        })?;

        let now = Utc::now();
        let status_json =
            serde_json::to_string(&status).map_err(|e| TaskError::Database(e.to_string()))?;

        conn.execute(
            "UPDATE tasks SET status = ?, updated_at = ? WHERE run_id = ? AND segment_id = ? AND stage = ?",
            params![status_json, now.to_rfc3339(), run_id, key.segment_id, key.stage],
        )
        .map_err(|e| TaskError::Database(e.to_string()))?;

        Ok(Task {
            status,
            updated_at: now,
            ..current
        })
    }

    fn record_attempt(
        &self,
        run_id: &str,
        key: &TaskKey,
        attempts: u32,
        not_before: Option<DateTime<Utc>>,
        last_error: &str,
    ) -> Result<Task, TaskError> {
        let conn = self.conn.lock().unwrap();

        let current = Self::fetch(&conn, run_id, key)?.ok_or_else(|| TaskError::NotFound {
            run_id: run_id.to_string(),
            key: key.clone(),
        })?;

        let now = Utc::now();

        conn.execute(
            "UPDATE tasks SET attempts = ?, not_before = ?, last_error = ?, updated_at = ? WHERE run_id = ? AND segment_id = ? AND stage = ?",
            params![
                attempts,
                not_before.map(|t| t.to_rfc3339()),
                last_error,
                now.to_rfc3339(),
                run_id,
                key.segment_id,
                key.stage,
            ],
        )
        .map_err(|e| TaskError::Database(e.to_string()))?;

        Ok(Task {
            attempts,
            not_before,
            last_error: Some(last_error.to_string()),
            updated_at: now,
            ..current
        })
    }

    fn count_by_status(&self, run_id: &str, status_type: &str) -> Result<i64, TaskError> {
        let conn = self.conn.lock().unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE run_id = ? AND json_extract(status, '$.type') = ?",
                params![run_id, status_type],
                |row| row.get(0),
            )
            .map_err(|e| TaskError::Database(e.to_string()))?;

        Ok(count)
    }
}
