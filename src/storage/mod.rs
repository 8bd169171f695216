//! Storage layer for conversations, strategies and feedback.
//!
//! This module provides SQLite-based storage for chat sessions and their
//! messages, the strategy outcome aggregates used by the learning store, and
//! append-only user feedback.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;
use crate::provider::MessageRole;

/// A conversation that groups related messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session was last updated.
    pub updated_at: DateTime<Utc>,
    /// Optional metadata for the session.
    pub metadata: Option<serde_json::Value>,
}

/// A single message within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    /// Unique message identifier.
    pub id: String,
    /// Parent session ID.
    pub session_id: String,
    /// Who wrote the message.
    pub role: MessageRole,
    /// The message text.
    pub content: String,
    /// When the message was stored.
    pub created_at: DateTime<Utc>,
}

/// One outcome to fold into a strategy aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyOutcome {
    /// Problem classification the strategy was used for.
    pub problem_type: String,
    /// Description of the pipeline that ran.
    pub approach: String,
    /// Whether the run succeeded.
    pub success: bool,
    /// Confidence of the final answer, already clamped to [0, 1].
    pub confidence: f64,
    /// Replaces the stored metadata when present.
    pub metadata: Option<serde_json::Value>,
}

/// Aggregated outcomes of one (problem type, approach) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecord {
    /// Problem classification.
    pub problem_type: String,
    /// Pipeline description.
    pub approach: String,
    /// Number of successful runs.
    pub success_count: i64,
    /// Number of failed runs.
    pub failure_count: i64,
    /// Running mean of confidence over all runs.
    pub avg_confidence: f64,
    /// When the strategy was last used.
    pub last_used_at: DateTime<Utc>,
    /// Metadata of the latest run.
    pub metadata: Option<serde_json::Value>,
}

/// User rating of an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    /// Unique feedback identifier.
    pub id: String,
    /// Conversation the rated answer belongs to.
    pub conversation_id: String,
    /// The rated message.
    pub message_id: String,
    /// Rating from 1 to 5.
    pub rating: u8,
    /// Rating of 4 or more.
    pub is_positive: bool,
    /// Optional free-text comment.
    pub comment: Option<String>,
    /// When the feedback was given.
    pub created_at: DateTime<Utc>,
    /// Optional metadata.
    pub metadata: Option<serde_json::Value>,
}

impl Session {
    /// Create a new session with a random id
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    /// Create a new session with a caller-chosen id
    pub fn with_id(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            metadata: None,
        }
    }

    /// Set metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMessage {
    /// Create a new message
    pub fn new(session_id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

impl StrategyRecord {
    /// Composite identifier of the strategy.
    pub fn key(&self) -> (&str, &str) {
        (&self.problem_type, &self.approach)
    }

    /// Total number of recorded runs
    pub fn total_uses(&self) -> i64 {
        self.success_count + self.failure_count
    }

    /// Share of successful runs, zero before the first run.
    pub fn success_rate(&self) -> f64 {
        match self.total_uses() {
            0 => 0.0,
            total => self.success_count as f64 / total as f64,
        }
    }
}

impl FeedbackRecord {
    /// Create a new feedback entry; positivity follows the rating
    pub fn new(
        conversation_id: impl Into<String>,
        message_id: impl Into<String>,
        rating: u8,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            message_id: message_id.into(),
            rating,
            is_positive: rating >= 4,
            comment: None,
            created_at: Utc::now(),
            metadata: None,
        }
    }

    /// Attach a comment
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Attach metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Storage trait for database operations.
///
/// Strategy upserts must be atomic per (problem type, approach) so that
/// concurrent writers never lose an update.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    // Session operations

    /// Create a new session.
    async fn create_session(&self, session: &Session) -> StorageResult<()>;
    /// Get a session by ID.
    async fn get_session(&self, id: &str) -> StorageResult<Option<Session>>;
    /// Update an existing session.
    async fn update_session(&self, session: &Session) -> StorageResult<()>;
    /// Delete a session and its messages.
    async fn delete_session(&self, id: &str) -> StorageResult<()>;

    // Message operations

    /// Append a message to its session.
    async fn append_message(&self, message: &SessionMessage) -> StorageResult<()>;
    /// Messages of a session, oldest first.
    async fn get_messages(&self, session_id: &str) -> StorageResult<Vec<SessionMessage>>;

    /// Get the last `limit` messages of a session, oldest first
    async fn get_recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<SessionMessage>>;

    // Strategy operations

    /// Fold an outcome into its aggregate and return the updated record.
    async fn upsert_strategy(&self, outcome: &StrategyOutcome) -> StorageResult<StrategyRecord>;
    /// Every stored strategy aggregate.
    async fn list_strategies(&self) -> StorageResult<Vec<StrategyRecord>>;

    // Feedback operations

    /// Append a feedback entry.
    async fn insert_feedback(&self, feedback: &FeedbackRecord) -> StorageResult<()>;
    /// Every feedback entry, oldest first.
    async fn list_feedback(&self) -> StorageResult<Vec<FeedbackRecord>>;
}
