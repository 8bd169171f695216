use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Model provider error: {0}")]
    Model(#[from] ModelError),

    #[error("Knowledge store error: {0}")]
    Knowledge(#[from] KnowledgeError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Pipeline error: {0}")]
    Stage(#[from] StageError),

    #[error("Learning store error: {0}")]
    Learning(#[from] LearningError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Model provider errors
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model provider unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited: {message}")]
    RateLimited { message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Knowledge store errors
#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("Embedding failed: {message}")]
    Embedding { message: String },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Knowledge operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Tool invocation errors
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {tool_name}")]
    NotFound { tool_name: String },

    #[error("Invalid arguments for {tool_name}: {message}")]
    InvalidArguments { tool_name: String, message: String },

    #[error("Tool {tool_name} failed: {message}")]
    Execution { tool_name: String, message: String },

    #[error("Tool {tool_name} timed out after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },
}

/// Strategy and feedback store errors
#[derive(Debug, Error)]
pub enum LearningError {
    #[error("Invalid rating {rating}: must be between 1 and 5")]
    InvalidRating { rating: u8 },
}

/// Errors raised by a specialized agent
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Model call failed: {0}")]
    Model(#[from] ModelError),

    #[error("Tool failed: {0}")]
    Tool(#[from] ToolError),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

/// User-visible failure category for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The model provider could not be reached or kept failing.
    ModelUnavailable,
    /// A deadline or per-call timeout expired.
    Timeout,
    /// The provider rejected the call for rate limiting.
    RateLimited,
    /// The request itself was unusable.
    InvalidInput,
    /// Anything else.
    Internal,
}

impl ErrorCategory {
    /// Get the category name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::ModelUnavailable => "model_unavailable",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::InvalidInput => "invalid_input",
            ErrorCategory::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ModelError> for ErrorCategory {
    fn from(err: &ModelError) -> Self {
        match err {
            ModelError::Timeout { .. } => ErrorCategory::Timeout,
            ModelError::RateLimited { .. } | ModelError::Api { status: 429, .. } => {
                ErrorCategory::RateLimited
            }
            ModelError::Unavailable { .. } | ModelError::Http(_) | ModelError::Api { .. } => {
                ErrorCategory::ModelUnavailable
            }
            ModelError::InvalidResponse { .. } => ErrorCategory::Internal,
        }
    }
}

impl From<&AgentError> for ErrorCategory {
    fn from(err: &AgentError) -> Self {
        match err {
            AgentError::Model(e) => e.into(),
            AgentError::Tool(ToolError::Timeout { .. }) => ErrorCategory::Timeout,
            AgentError::Tool(_) => ErrorCategory::Internal,
            AgentError::InvalidInput { .. } => ErrorCategory::InvalidInput,
        }
    }
}

/// Pipeline stage errors, decided by the orchestrator
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Stage {stage} failed ({category}): {message}")]
    Fatal {
        stage: String,
        category: ErrorCategory,
        message: String,
    },

    #[error("Stage {stage} degraded: {message}")]
    Recoverable { stage: String, message: String },
}

impl StageError {
    /// The failure category surfaced to callers.
    pub fn category(&self) -> ErrorCategory {
        match self {
            StageError::Fatal { category, .. } => *category,
            StageError::Recoverable { .. } => ErrorCategory::Internal,
        }
    }

    /// Whether the request had to be aborted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StageError::Fatal { .. })
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for model provider operations
pub type ModelResult<T> = Result<T, ModelError>;

/// Result type alias for knowledge store operations
pub type KnowledgeResult<T> = Result<T, KnowledgeError>;

/// Result type alias for tool operations
pub type ToolResult<T> = Result<T, ToolError>;

/// Result type alias for learning store operations
pub type LearningResult<T> = Result<T, LearningError>;

/// Result type alias for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

/// Result type alias for pipeline stages
pub type StageResult<T> = Result<T, StageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::Internal {
            message: "unexpected".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error: unexpected");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::SessionNotFound {
            session_id: "sess-123".to_string(),
        };
        assert_eq!(err.to_string(), "Session not found: sess-123");

        let err = StorageError::Migration {
            message: "version mismatch".to_string(),
        };
        assert_eq!(err.to_string(), "Migration failed: version mismatch");
    }

    #[test]
    fn test_model_error_display() {
        let err = ModelError::Unavailable {
            message: "server down".to_string(),
            retries: 3,
        };
        assert_eq!(
            err.to_string(),
            "Model provider unavailable: server down (retries: 3)"
        );

        let err = ModelError::Api {
            status: 401,
            message: "unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 401 - unauthorized");

        let err = ModelError::Timeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "Request timeout after 5000ms");
    }

    #[test]
    fn test_tool_error_display() {
        let err = ToolError::NotFound {
            tool_name: "teleport".to_string(),
        };
        assert_eq!(err.to_string(), "Tool not found: teleport");

        let err = ToolError::InvalidArguments {
            tool_name: "calculator".to_string(),
            message: "missing expression".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid arguments for calculator: missing expression"
        );

        let err = ToolError::Timeout {
            tool_name: "execute_code".to_string(),
            timeout_ms: 250,
        };
        assert_eq!(err.to_string(), "Tool execute_code timed out after 250ms");
    }

    #[test]
    fn test_knowledge_error_display() {
        let err = KnowledgeError::DimensionMismatch {
            expected: 384,
            actual: 12,
        };
        assert_eq!(
            err.to_string(),
            "Embedding dimension mismatch: expected 384, got 12"
        );
    }

    #[test]
    fn test_stage_error_display_and_category() {
        let err = StageError::Fatal {
            stage: "reasoning".to_string(),
            category: ErrorCategory::ModelUnavailable,
            message: "no response".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Stage reasoning failed (model_unavailable): no response"
        );
        assert!(err.is_fatal());
        assert_eq!(err.category(), ErrorCategory::ModelUnavailable);

        let err = StageError::Recoverable {
            stage: "planning".to_string(),
            message: "timeout".to_string(),
        };
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_category_from_model_error() {
        let cat: ErrorCategory = (&ModelError::Timeout { timeout_ms: 1 }).into();
        assert_eq!(cat, ErrorCategory::Timeout);

        let cat: ErrorCategory = (&ModelError::Api {
            status: 429,
            message: "slow down".to_string(),
        })
            .into();
        assert_eq!(cat, ErrorCategory::RateLimited);

        let cat: ErrorCategory = (&ModelError::Api {
            status: 503,
            message: "overloaded".to_string(),
        })
            .into();
        assert_eq!(cat, ErrorCategory::ModelUnavailable);

        let cat: ErrorCategory = (&AgentError::InvalidInput {
            message: "empty".to_string(),
        })
            .into();
        assert_eq!(cat, ErrorCategory::InvalidInput);
    }

    #[test]
    fn test_error_conversions() {
        let storage_err = StorageError::Query {
            message: "test".to_string(),
        };
        let app_err: AppError = storage_err.into();
        assert!(matches!(app_err, AppError::Storage(_)));

        let tool_err = ToolError::NotFound {
            tool_name: "x".to_string(),
        };
        let agent_err: AgentError = tool_err.into();
        assert!(matches!(agent_err, AgentError::Tool(_)));

        let model_err = ModelError::Timeout { timeout_ms: 10 };
        let app_err: AppError = model_err.into();
        assert!(app_err.to_string().contains("Request timeout after 10ms"));
    }
}
