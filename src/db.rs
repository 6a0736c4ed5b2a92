//! SQLite persistence for sessions, messages and tool executions

#[cfg(test)]
mod proptests;
mod schema;

pub use schema::*;

use crate::config::Config;
use crate::llm::Role;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Tool execution not found: {0}")]
    ExecutionNotFound(String),
    #[error("Tool execution {id} is already {status}")]
    ExecutionAlreadyFinished { id: String, status: ExecutionStatus },
    #[error("Database lock poisoned")]
    Poisoned,
    #[error("Database task failed: {0}")]
    Task(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// How long a statement waits for another process's write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SESSION_COLUMNS: &str = "id, user_id, title, metadata, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, session_id, sequence_id, role, content, content_json, \
                               created_at, tokens_in, tokens_out, cost_estimate";
const EXECUTION_COLUMNS: &str = "id, message_id, tool_name, input_json, output_json, status, \
                                 started_at, finished_at, error_message";

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open the configured database file, creating its directory.
    ///
    /// Pending executions are failed only when `recover_pending` is set.
    /// Several processes may share one file, and a record that is pending
    /// here can belong to a turn that is still running elsewhere.
    pub fn open_configured(config: &Config) -> DbResult<Self> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        tracing::info!(path = %config.db_path.display(), "Opening database");
        let db = Self::open(&config.db_path)?;

        if config.recover_pending {
            let recovered = db.fail_pending_tool_executions("interrupted by restart")?;
            if recovered > 0 {
                tracing::warn!(count = recovered, "Marked interrupted tool executions as failed");
            }
        }
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> DbResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // ==================== Session Operations ====================

    /// Return the session with `id`, creating it with `defaults` if absent.
    ///
    /// Concurrent callers with the same id all see the same row; defaults
    /// from the losing callers are discarded.
    pub fn resolve_or_create_session(
        &self,
        id: &str,
        defaults: &SessionDefaults,
    ) -> DbResult<Session> {
        let conn = self.lock()?;
        let now = timestamp(Utc::now());
        let metadata = defaults
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let inserted = conn.execute(
            "INSERT INTO sessions (id, user_id, title, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(id) DO NOTHING",
            params![id, defaults.user_id, defaults.title, metadata, now],
        )?;
        if inserted > 0 {
            tracing::info!(session_id = %id, "Created session");
        }

        query_session(&conn, id)?.ok_or_else(|| DbError::SessionNotFound(id.to_string()))
    }

    pub fn get_session(&self, id: &str) -> DbResult<Option<Session>> {
        let conn = self.lock()?;
        query_session(&conn, id)
    }

    // ==================== Message Operations ====================

    /// Append a message, assigning its id and the next sequence number,
    /// and touch the session's `updated_at`.
    pub fn append_message(&self, message: &NewMessage) -> DbResult<Message> {
        let mut conn = self.lock()?;
        // Take the write lock up front so a concurrent writer waits on
        // `busy_timeout` instead of failing the read-to-write upgrade
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?1)",
            params![message.session_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(DbError::SessionNotFound(message.session_id.clone()));
        }

        let sequence_id: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM messages WHERE session_id = ?1",
            params![message.session_id],
            |row| row.get(0),
        )?;

        let id = uuid::Uuid::new_v4().to_string();
        let created_at = stored_precision(message.created_at.unwrap_or_else(Utc::now));
        let content_json = message
            .content_json
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        tx.execute(
            "INSERT INTO messages (id, session_id, sequence_id, role, content, content_json,
                                   created_at, tokens_in, tokens_out, cost_estimate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id,
                message.session_id,
                sequence_id,
                message.role.as_str(),
                message.content,
                content_json,
                timestamp(created_at),
                message.tokens_in,
                message.tokens_out,
                message.cost_estimate,
            ],
        )?;
        tx.execute(
            "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
            params![timestamp(Utc::now()), message.session_id],
        )?;
        tx.commit()?;

        Ok(Message {
            id,
            session_id: message.session_id.clone(),
            sequence_id,
            role: message.role,
            content: message.content.clone(),
            content_json: message.content_json.clone(),
            created_at,
            tokens_in: message.tokens_in,
            tokens_out: message.tokens_out,
            cost_estimate: message.cost_estimate,
        })
    }

    /// Most recent messages first, at most `limit`
    pub fn list_messages(&self, session_id: &str, limit: usize) -> DbResult<Vec<Message>> {
        let conn = self.lock()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE session_id = ?1
             ORDER BY sequence_id DESC
             LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![session_id, limit], message_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Tool Execution Operations ====================

    /// Insert a `pending` record
    pub fn create_tool_execution(&self, execution: &NewToolExecution) -> DbResult<ToolExecution> {
        let conn = self.lock()?;
        let id = uuid::Uuid::new_v4().to_string();
        let started_at = stored_precision(Utc::now());

        conn.execute(
            "INSERT INTO tool_executions (id, message_id, tool_name, input_json, status, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                execution.message_id,
                execution.tool_name,
                serde_json::to_string(&execution.input_json)?,
                ExecutionStatus::Pending.as_str(),
                timestamp(started_at),
            ],
        )?;

        Ok(ToolExecution {
            id,
            message_id: execution.message_id.clone(),
            tool_name: execution.tool_name.clone(),
            input_json: execution.input_json.clone(),
            output_json: None,
            status: ExecutionStatus::Pending,
            started_at,
            finished_at: None,
            error_message: None,
        })
    }

    /// Move a non-terminal record to `outcome`. Terminal records are left
    /// untouched and reported as `ExecutionAlreadyFinished`.
    pub fn update_tool_execution(
        &self,
        id: &str,
        outcome: &ExecutionOutcome,
    ) -> DbResult<ToolExecution> {
        let conn = self.lock()?;
        let (output_json, error_message) = match outcome {
            ExecutionOutcome::Completed { output } => (Some(serde_json::to_string(output)?), None),
            ExecutionOutcome::Failed { error } => (None, Some(error.as_str())),
        };

        let updated = conn.execute(
            "UPDATE tool_executions
             SET status = ?1, output_json = ?2, error_message = ?3, finished_at = ?4
             WHERE id = ?5 AND status NOT IN ('completed', 'failed')",
            params![
                outcome.status().as_str(),
                output_json,
                error_message,
                timestamp(Utc::now()),
                id,
            ],
        )?;

        let current =
            query_execution(&conn, id)?.ok_or_else(|| DbError::ExecutionNotFound(id.to_string()))?;
        if updated == 0 {
            return Err(DbError::ExecutionAlreadyFinished {
                id: id.to_string(),
                status: current.status,
            });
        }
        Ok(current)
    }

    pub fn get_tool_execution(&self, id: &str) -> DbResult<ToolExecution> {
        let conn = self.lock()?;
        query_execution(&conn, id)?.ok_or_else(|| DbError::ExecutionNotFound(id.to_string()))
    }

    /// Executions requested by one user message, in start order
    pub fn list_tool_executions(&self, message_id: &str) -> DbResult<Vec<ToolExecution>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM tool_executions
             WHERE message_id = ?1
             ORDER BY started_at ASC, rowid ASC"
        ))?;

        let rows = stmt.query_map(params![message_id], execution_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Fail every non-terminal execution with `reason`.
    ///
    /// Only safe when no other process is running turns against this
    /// file; see `open_configured`.
    pub fn fail_pending_tool_executions(&self, reason: &str) -> DbResult<usize> {
        let conn = self.lock()?;
        let count = conn.execute(
            "UPDATE tool_executions
             SET status = 'failed', error_message = ?1, finished_at = ?2
             WHERE status IN ('pending', 'running')",
            params![reason, timestamp(Utc::now())],
        )?;
        Ok(count)
    }
}

fn query_session(conn: &Connection, id: &str) -> DbResult<Option<Session>> {
    conn.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
        params![id],
        session_from_row,
    )
    .optional()
    .map_err(DbError::from)
}

fn query_execution(conn: &Connection, id: &str) -> DbResult<Option<ToolExecution>> {
    conn.query_row(
        &format!("SELECT {EXECUTION_COLUMNS} FROM tool_executions WHERE id = ?1"),
        params![id],
        execution_from_row,
    )
    .optional()
    .map_err(DbError::from)
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        metadata: json_column(row, 3)?,
        created_at: datetime_column(row, 4)?,
        updated_at: datetime_column(row, 5)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(3)?;
    let role = Role::parse(&role).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, format!("unknown role: {role}").into())
    })?;

    Ok(Message {
        id: row.get(0)?,
        session_id: row.get(1)?,
        sequence_id: row.get(2)?,
        role,
        content: row.get(4)?,
        content_json: json_column(row, 5)?,
        created_at: datetime_column(row, 6)?,
        tokens_in: row.get(7)?,
        tokens_out: row.get(8)?,
        cost_estimate: row.get(9)?,
    })
}

fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<ToolExecution> {
    let status: String = row.get(5)?;
    let status = ExecutionStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(5, Type::Text, format!("unknown status: {status}").into())
    })?;

    Ok(ToolExecution {
        id: row.get(0)?,
        message_id: row.get(1)?,
        tool_name: row.get(2)?,
        input_json: json_column(row, 3)?.unwrap_or(Value::Null),
        output_json: json_column(row, 4)?,
        status,
        started_at: datetime_column(row, 6)?,
        finished_at: optional_datetime_column(row, 7)?,
        error_message: row.get(8)?,
    })
}

fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Value>> {
    let Some(text) = row.get::<_, Option<String>>(idx)? else {
        return Ok(None);
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Fixed-width RFC 3339 so text ordering matches time ordering
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Drop the digits `timestamp` does not keep, so returned rows equal
/// reloaded ones
fn stored_precision(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.trunc_subsecs(6)
}

fn datetime_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    parse_datetime(idx, &text)
}

fn optional_datetime_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|text| parse_datetime(idx, &text))
        .transpose()
}

fn parse_datetime(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
