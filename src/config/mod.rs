use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub model: ModelConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub orchestrator: OrchestratorConfig,
    pub knowledge: KnowledgeConfig,
    pub tools: ToolsConfig,
}

/// Model provider configuration (any OpenAI-compatible endpoint)
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Pipeline switches and limits
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub enable_reflection: bool,
    pub enable_tools: bool,
    pub enable_rag: bool,
    /// Overall per-request deadline.
    pub request_deadline_ms: u64,
    pub retrieval_top_k: usize,
    /// Stored messages loaded as history for a session request.
    pub max_history_messages: usize,
}

/// Chunking and embedding configuration
#[derive(Debug, Clone)]
pub struct KnowledgeConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_dimension: usize,
    /// Remote embedding model; `None` selects the local hashing embedder.
    pub embedding_model: Option<String>,
    pub timeout_ms: u64,
}

/// Built-in tool limits
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    pub timeout_ms: u64,
    pub code_exec_timeout_ms: u64,
    pub code_exec_max_steps: u64,
    pub web_fetch_enabled: bool,
    pub web_fetch_max_bytes: usize,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let model = ModelConfig {
            api_key: env::var("MODEL_API_KEY").map_err(|_| AppError::Config {
                message: "MODEL_API_KEY is required".to_string(),
            })?,
            base_url: env::var("MODEL_BASE_URL")
                .unwrap_or_else(|_| "https://api.groq.com/openai".to_string()),
            model: env::var("MODEL_NAME").unwrap_or_else(|_| "llama-3.3-70b-versatile".to_string()),
            temperature: env_or("MODEL_TEMPERATURE", 0.7),
            max_tokens: env_or("MODEL_MAX_TOKENS", 2048),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/orchestrator.db".to_string()),
            ),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: env_or("REQUEST_TIMEOUT_MS", 30000),
            max_retries: env_or("MAX_RETRIES", 3),
            retry_delay_ms: env_or("RETRY_DELAY_MS", 1000),
        };

        let defaults = OrchestratorConfig::default();
        let orchestrator = OrchestratorConfig {
            enable_reflection: env_flag("ENABLE_REFLECTION", defaults.enable_reflection),
            enable_tools: env_flag("ENABLE_TOOLS", defaults.enable_tools),
            enable_rag: env_flag("ENABLE_RAG", defaults.enable_rag),
            request_deadline_ms: env_or("REQUEST_DEADLINE_MS", defaults.request_deadline_ms),
            retrieval_top_k: env_or("RETRIEVAL_TOP_K", defaults.retrieval_top_k),
            max_history_messages: env_or(
                "MAX_CONVERSATION_HISTORY",
                defaults.max_history_messages,
            ),
        };

        let defaults = KnowledgeConfig::default();
        let knowledge = KnowledgeConfig {
            chunk_size: env_or("CHUNK_SIZE", defaults.chunk_size),
            chunk_overlap: env_or("CHUNK_OVERLAP", defaults.chunk_overlap),
            embedding_dimension: env_or("EMBEDDING_DIMENSION", defaults.embedding_dimension),
            embedding_model: env::var("EMBEDDING_MODEL").ok().filter(|s| !s.is_empty()),
            timeout_ms: env_or("KNOWLEDGE_TIMEOUT_MS", defaults.timeout_ms),
        };

        let defaults = ToolsConfig::default();
        let tools = ToolsConfig {
            timeout_ms: env_or("TOOL_TIMEOUT_MS", defaults.timeout_ms),
            code_exec_timeout_ms: env_or("CODE_EXEC_TIMEOUT_MS", defaults.code_exec_timeout_ms),
            code_exec_max_steps: env_or("CODE_EXEC_MAX_STEPS", defaults.code_exec_max_steps),
            web_fetch_enabled: env_flag("WEB_FETCH_ENABLED", defaults.web_fetch_enabled),
            web_fetch_max_bytes: env_or("WEB_FETCH_MAX_BYTES", defaults.web_fetch_max_bytes),
        };

        if knowledge.chunk_overlap >= knowledge.chunk_size {
            return Err(AppError::Config {
                message: format!(
                    "CHUNK_OVERLAP ({}) must be smaller than CHUNK_SIZE ({})",
                    knowledge.chunk_overlap, knowledge.chunk_size
                ),
            });
        }

        Ok(Config {
            model,
            database,
            logging,
            request,
            orchestrator,
            knowledge,
            tools,
        })
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enable_reflection: true,
            enable_tools: true,
            enable_rag: true,
            request_deadline_ms: 120_000,
            retrieval_top_k: 5,
            max_history_messages: 50,
        }
    }
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 50,
            embedding_dimension: 384,
            embedding_model: None,
            timeout_ms: 10_000,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            code_exec_timeout_ms: 5_000,
            code_exec_max_steps: 100_000,
            web_fetch_enabled: false,
            web_fetch_max_bytes: 64 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let request = RequestConfig::default();
        assert_eq!(request.timeout_ms, 30000);
        assert_eq!(request.max_retries, 3);

        let knowledge = KnowledgeConfig::default();
        assert_eq!(knowledge.chunk_size, 512);
        assert_eq!(knowledge.chunk_overlap, 50);
        assert!(knowledge.embedding_model.is_none());

        let orchestrator = OrchestratorConfig::default();
        assert!(orchestrator.enable_reflection);
        assert_eq!(orchestrator.retrieval_top_k, 5);
        assert_eq!(orchestrator.max_history_messages, 50);

        let tools = ToolsConfig::default();
        assert!(!tools.web_fetch_enabled);
    }
}
