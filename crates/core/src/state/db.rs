//! # Conduit Database
//!
//! SQLite-backed `PipelineStore`. All chats, stages and messages live in
//! `.conduit/conduit.db`; chat creation and deletion run in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use super::model::{
    Chat, ChatId, ChatWithStages, Message, NewStage, Role, Stage, StageId, StageStatus,
    StageUpdate,
};
use super::store::{ChatStore, MessageStore, StageStore};
use crate::error::{Error, Result};

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 2;

const STAGE_COLUMNS: &str = "id, chat_id, name, position, status, description, \
     requirements_summary, next_stage_id, pipeline_endpoint, created_at, updated_at";

/// Durable store for all pipeline state
pub struct PipelineDb {
    conn: Arc<Mutex<Connection>>,
}

impl PipelineDb {
    /// Open or create the database at `.conduit/conduit.db`
    pub fn open() -> Result<Self> {
        Self::open_at(".conduit/conduit.db")
    }

    /// Open database at a specific path (useful for testing)
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Storage(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let conn = Connection::open(path.as_ref())?;
        Self::with_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        // Cascades and successor links rely on enforced foreign keys
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::Storage(format!("Lock error: {}", e)))
    }

    /// Run schema migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.lock()?;

        // Create version tracking table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        // Get current version
        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

        // Run migrations incrementally, each step with its version row
        if current_version < 1 {
            Self::migrate_step(&conn, 1, Self::migrate_v1)?;
        }
        if current_version < 2 {
            Self::migrate_step(&conn, 2, Self::migrate_v2)?;
        }

        tracing::debug!("PipelineDb ready at schema version {}", SCHEMA_VERSION);
        Ok(())
    }

    /// Apply one migration and record its version atomically
    fn migrate_step(
        conn: &Connection,
        version: i32,
        migrate: fn(&Connection) -> Result<()>,
    ) -> Result<()> {
        let tx = conn.unchecked_transaction()?;
        migrate(&tx)?;
        tx.execute(
            "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
            [version],
        )?;
        tx.commit()?;
        tracing::debug!(version, "Applied migration");
        Ok(())
    }

    /// Migration to version 1 - chats, stages, messages
    fn migrate_v1(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                description TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS stages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                position INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'not_started',
                description TEXT,
                requirements_summary TEXT,
                next_stage_id INTEGER,
                pipeline_endpoint TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                stage_id INTEGER NOT NULL REFERENCES stages(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_stages_chat ON stages(chat_id, position);
            CREATE INDEX IF NOT EXISTS idx_messages_stage ON messages(stage_id, id);
            "#,
        )?;
        Ok(())
    }

    /// Migration to version 2 - rewrite legacy status and role spellings
    fn migrate_v2(conn: &Connection) -> Result<()> {
        let mut rewritten = 0;
        for (legacy, status) in StageStatus::LEGACY_SPELLINGS {
            rewritten += conn.execute(
                "UPDATE stages SET status = ?1 WHERE status = ?2",
                params![status.as_str(), legacy],
            )?;
        }
        rewritten += conn.execute(
            "UPDATE messages SET role = 'agent' WHERE role = 'assistant'",
            [],
        )?;

        if rewritten > 0 {
            tracing::info!(rows = rewritten, "Normalized legacy status spellings");
        }
        Ok(())
    }

    fn load_chat(conn: &Connection, chat_id: ChatId) -> Result<Chat> {
        conn.query_row(
            "SELECT id, description, created_at FROM chats WHERE id = ?1",
            params![chat_id],
            row_to_chat,
        )
        .optional()?
        .ok_or(Error::not_found("chat", chat_id))
    }

    fn load_stage(conn: &Connection, stage_id: StageId) -> Result<Stage> {
        conn.query_row(
            &format!("SELECT {STAGE_COLUMNS} FROM stages WHERE id = ?1"),
            params![stage_id],
            row_to_stage,
        )
        .optional()?
        .ok_or(Error::not_found("stage", stage_id))
    }

    fn load_stages(conn: &Connection, chat_id: ChatId) -> Result<Vec<Stage>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {STAGE_COLUMNS} FROM stages WHERE chat_id = ?1 ORDER BY position, id"
        ))?;
        let stages = stmt
            .query_map(params![chat_id], row_to_stage)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stages)
    }

    fn stage_exists(conn: &Connection, stage_id: StageId) -> Result<()> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM stages WHERE id = ?1",
                params![stage_id],
                |row| row.get(0),
            )
            .optional()?;
        found.map(|_| ()).ok_or(Error::not_found("stage", stage_id))
    }

    /// Insert a stage at the tail of a chat and link the previous tail to it
    fn push_stage(tx: &Transaction<'_>, chat_id: ChatId, new: &NewStage) -> Result<StageId> {
        let (count, tail): (u32, Option<StageId>) = tx.query_row(
            r#"
            SELECT COUNT(*),
                   (SELECT id FROM stages WHERE chat_id = ?1 ORDER BY position DESC, id DESC LIMIT 1)
            FROM stages WHERE chat_id = ?1
            "#,
            params![chat_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let now = timestamp(Utc::now());
        tx.execute(
            r#"
            INSERT INTO stages (chat_id, name, position, status, description,
                                pipeline_endpoint, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            "#,
            params![
                chat_id,
                new.name,
                count,
                StageStatus::NotStarted.as_str(),
                new.description,
                new.pipeline_endpoint,
                now,
            ],
        )?;
        let stage_id = tx.last_insert_rowid();

        // Link the previous tail to the new stage
        if let Some(tail) = tail {
            tx.execute(
                "UPDATE stages SET next_stage_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![stage_id, now, tail],
            )?;
        }

        Ok(stage_id)
    }
}

#[async_trait]
impl ChatStore for PipelineDb {
    async fn create_chat(
        &self,
        description: Option<String>,
        stages: Vec<NewStage>,
    ) -> Result<ChatWithStages> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO chats (description, created_at) VALUES (?1, ?2)",
            params![description, timestamp(Utc::now())],
        )?;
        let chat_id = tx.last_insert_rowid();

        // Stages in order, each linked from its predecessor
        for new in &stages {
            Self::push_stage(&tx, chat_id, new)?;
        }

        // Reload so callers see exactly what was stored
        let chat = Self::load_chat(&tx, chat_id)?;
        let stages = Self::load_stages(&tx, chat_id)?;
        tx.commit()?;

        Ok(ChatWithStages { chat, stages })
    }

    async fn get_chat(&self, chat_id: ChatId) -> Result<Chat> {
        let conn = self.lock()?;
        Self::load_chat(&conn, chat_id)
    }

    async fn list_chats(&self) -> Result<Vec<Chat>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, description, created_at FROM chats")?;
        let chats = stmt
            .query_map([], row_to_chat)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chats)
    }

    async fn update_chat(&self, chat_id: ChatId, description: Option<String>) -> Result<Chat> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "UPDATE chats SET description = ?1 WHERE id = ?2",
            params![description, chat_id],
        )?;
        if affected == 0 {
            return Err(Error::not_found("chat", chat_id));
        }
        Self::load_chat(&conn, chat_id)
    }

    async fn delete_chat(&self, chat_id: ChatId) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        // Children first, then the chat itself
        let messages = tx.execute(
            "DELETE FROM messages WHERE stage_id IN (SELECT id FROM stages WHERE chat_id = ?1)",
            params![chat_id],
        )?;
        let stages = tx.execute("DELETE FROM stages WHERE chat_id = ?1", params![chat_id])?;
        let chats = tx.execute("DELETE FROM chats WHERE id = ?1", params![chat_id])?;

        if chats == 0 {
            // Nothing to commit; dropping the transaction rolls back
            return Err(Error::not_found("chat", chat_id));
        }
        tx.commit()?;

        tracing::debug!(chat_id, stages, messages, "Deleted chat");
        Ok(())
    }
}

#[async_trait]
impl StageStore for PipelineDb {
    async fn create_stage(&self, chat_id: ChatId, stage: NewStage) -> Result<Stage> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        Self::load_chat(&tx, chat_id)?;
        let stage_id = Self::push_stage(&tx, chat_id, &stage)?;
        let stage = Self::load_stage(&tx, stage_id)?;
        tx.commit()?;

        Ok(stage)
    }

    async fn get_stage(&self, stage_id: StageId) -> Result<Stage> {
        let conn = self.lock()?;
        Self::load_stage(&conn, stage_id)
    }

    async fn update_stage(&self, stage_id: StageId, update: StageUpdate) -> Result<Stage> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        // Merge onto the current row
        let mut stage = Self::load_stage(&tx, stage_id)?;
        stage.apply(&update);

        tx.execute(
            r#"
            UPDATE stages
            SET name = ?1, status = ?2, description = ?3, requirements_summary = ?4,
                pipeline_endpoint = ?5, updated_at = ?6
            WHERE id = ?7
            "#,
            params![
                stage.name,
                stage.status.as_str(),
                stage.description,
                stage.requirements_summary,
                stage.pipeline_endpoint,
                timestamp(stage.updated_at),
                stage_id,
            ],
        )?;

        // Return the row as stored, at stored timestamp precision
        let stage = Self::load_stage(&tx, stage_id)?;
        tx.commit()?;

        Ok(stage)
    }

    async fn list_stages(&self, chat_id: ChatId) -> Result<Vec<Stage>> {
        let conn = self.lock()?;
        Self::load_chat(&conn, chat_id)?;
        Self::load_stages(&conn, chat_id)
    }
}

#[async_trait]
impl MessageStore for PipelineDb {
    async fn append_message(
        &self,
        stage_id: StageId,
        role: Role,
        content: String,
    ) -> Result<Message> {
        let conn = self.lock()?;
        Self::stage_exists(&conn, stage_id)?;

        let now = stored_now();
        conn.execute(
            "INSERT INTO messages (stage_id, role, content, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![stage_id, role.as_str(), content, timestamp(now)],
        )?;

        Ok(Message {
            id: conn.last_insert_rowid(),
            stage_id,
            role,
            content,
            timestamp: now,
        })
    }

    async fn list_messages(&self, stage_id: StageId) -> Result<Vec<Message>> {
        let conn = self.lock()?;
        Self::stage_exists(&conn, stage_id)?;

        let mut stmt = conn.prepare(
            "SELECT id, stage_id, role, content, timestamp FROM messages \
             WHERE stage_id = ?1 ORDER BY id",
        )?;
        let messages = stmt
            .query_map(params![stage_id], row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }
}

/// Current time truncated to what `timestamp` keeps
fn stored_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_text<T>(row: &Row, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            Box::new(Error::Storage(format!("unrecognized value '{}'", raw))),
        )
    })
}

fn row_to_chat(row: &Row) -> rusqlite::Result<Chat> {
    Ok(Chat {
        id: row.get(0)?,
        description: row.get(1)?,
        created_at: parse_timestamp(row, 2)?,
    })
}

fn row_to_stage(row: &Row) -> rusqlite::Result<Stage> {
    Ok(Stage {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        name: row.get(2)?,
        position: row.get(3)?,
        status: parse_text(row, 4, StageStatus::parse)?,
        description: row.get(5)?,
        requirements_summary: row.get(6)?,
        next_stage_id: row.get(7)?,
        pipeline_endpoint: row.get(8)?,
        created_at: parse_timestamp(row, 9)?,
        updated_at: parse_timestamp(row, 10)?,
    })
}

fn row_to_message(row: &Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        stage_id: row.get(1)?,
        role: parse_text(row, 2, Role::parse)?,
        content: row.get(3)?,
        timestamp: parse_timestamp(row, 4)?,
    })
}
