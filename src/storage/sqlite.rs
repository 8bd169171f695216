use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

use super::{FeedbackRecord, Session, SessionMessage, Storage, StrategyOutcome, StrategyRecord};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::provider::MessageRole;

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create a private in-memory database.
    ///
    /// The pool holds a single connection that never expires, since every
    /// new connection would see an empty database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_json(value: Option<&serde_json::Value>) -> Option<String> {
    value.map(|m| serde_json::to_string(m).unwrap_or_default())
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_session(&self, session: &Session) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, created_at, updated_at, metadata)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .bind(to_json(session.metadata.as_ref()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_session(&self, id: &str) -> StorageResult<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, created_at, updated_at, metadata
            FROM sessions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn update_session(&self, session: &Session) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET updated_at = ?, metadata = ?
            WHERE id = ?
            "#,
        )
        .bind(session.updated_at.to_rfc3339())
        .bind(to_json(session.metadata.as_ref()))
        .bind(&session.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::SessionNotFound {
                session_id: session.id.clone(),
            });
        }

        Ok(())
    }

    async fn delete_session(&self, id: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn append_message(&self, message: &SessionMessage) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO messages (id, session_id, role, content, created_at)
            SELECT ?, id, ?, ?, ? FROM sessions WHERE id = ?
            "#,
        )
        .bind(&message.id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at.to_rfc3339())
        .bind(&message.session_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::SessionNotFound {
                session_id: message.session_id.clone(),
            });
        }

        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(message.created_at.to_rfc3339())
            .bind(&message.session_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_messages(&self, session_id: &str) -> StorageResult<Vec<SessionMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, role, content, created_at
            FROM messages
            WHERE session_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SessionMessage::try_from).collect()
    }

    async fn get_recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<SessionMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, role, content, created_at
            FROM (
                SELECT id, session_id, role, content, created_at, rowid AS seq
                FROM messages
                WHERE session_id = ?
                ORDER BY created_at DESC, rowid DESC
                LIMIT ?
            )
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(session_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SessionMessage::try_from).collect()
    }

    async fn upsert_strategy(&self, outcome: &StrategyOutcome) -> StorageResult<StrategyRecord> {
        // Counters are incremented relative to the stored row so concurrent
        // writers to the same key never lose an update.
        let row: StrategyRow = sqlx::query_as(
            r#"
            INSERT INTO strategies
                (problem_type, approach, success_count, failure_count, avg_confidence, last_used_at, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (problem_type, approach) DO UPDATE SET
                avg_confidence = (strategies.avg_confidence * (strategies.success_count + strategies.failure_count)
                                  + excluded.avg_confidence)
                                 / (strategies.success_count + strategies.failure_count + 1),
                success_count = strategies.success_count + excluded.success_count,
                failure_count = strategies.failure_count + excluded.failure_count,
                last_used_at = excluded.last_used_at,
                metadata = COALESCE(excluded.metadata, strategies.metadata)
            RETURNING problem_type, approach, success_count, failure_count, avg_confidence, last_used_at, metadata
            "#,
        )
        .bind(&outcome.problem_type)
        .bind(&outcome.approach)
        .bind(i64::from(outcome.success))
        .bind(i64::from(!outcome.success))
        .bind(outcome.confidence.clamp(0.0, 1.0))
        .bind(Utc::now().to_rfc3339())
        .bind(to_json(outcome.metadata.as_ref()))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn list_strategies(&self) -> StorageResult<Vec<StrategyRecord>> {
        let rows: Vec<StrategyRow> = sqlx::query_as(
            r#"
            SELECT problem_type, approach, success_count, failure_count, avg_confidence, last_used_at, metadata
            FROM strategies
            ORDER BY problem_type, approach
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn insert_feedback(&self, feedback: &FeedbackRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO feedback (id, conversation_id, message_id, rating, is_positive, comment, created_at, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&feedback.id)
        .bind(&feedback.conversation_id)
        .bind(&feedback.message_id)
        .bind(i64::from(feedback.rating))
        .bind(feedback.is_positive)
        .bind(&feedback.comment)
        .bind(feedback.created_at.to_rfc3339())
        .bind(to_json(feedback.metadata.as_ref()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_feedback(&self) -> StorageResult<Vec<FeedbackRecord>> {
        let rows: Vec<FeedbackRow> = sqlx::query_as(
            r#"
            SELECT id, conversation_id, message_id, rating, is_positive, comment, created_at, metadata
            FROM feedback
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    created_at: String,
    updated_at: String,
    metadata: Option<String>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
            metadata: row.metadata.and_then(|s| serde_json::from_str(&s).ok()),
        }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    session_id: String,
    role: String,
    content: String,
    created_at: String,
}

impl TryFrom<MessageRow> for SessionMessage {
    type Error = StorageError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let role = MessageRole::from_str(&row.role).map_err(|message| StorageError::Query { message })?;
        Ok(Self {
            id: row.id,
            session_id: row.session_id,
            role,
            content: row.content,
            created_at: parse_timestamp(&row.created_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct StrategyRow {
    problem_type: String,
    approach: String,
    success_count: i64,
    failure_count: i64,
    avg_confidence: f64,
    last_used_at: String,
    metadata: Option<String>,
}

impl From<StrategyRow> for StrategyRecord {
    fn from(row: StrategyRow) -> Self {
        Self {
            problem_type: row.problem_type,
            approach: row.approach,
            success_count: row.success_count,
            failure_count: row.failure_count,
            avg_confidence: row.avg_confidence,
            last_used_at: parse_timestamp(&row.last_used_at),
            metadata: row.metadata.and_then(|s| serde_json::from_str(&s).ok()),
        }
    }
}

#[derive(sqlx::FromRow)]
struct FeedbackRow {
    id: String,
    conversation_id: String,
    message_id: String,
    rating: i64,
    is_positive: bool,
    comment: Option<String>,
    created_at: String,
    metadata: Option<String>,
}

impl From<FeedbackRow> for FeedbackRecord {
    fn from(row: FeedbackRow) -> Self {
        Self {
            id: row.id,
            conversation_id: row.conversation_id,
            message_id: row.message_id,
            rating: row.rating.clamp(1, 5) as u8,
            is_positive: row.is_positive,
            comment: row.comment,
            created_at: parse_timestamp(&row.created_at),
            metadata: row.metadata.and_then(|s| serde_json::from_str(&s).ok()),
        }
    }
}
