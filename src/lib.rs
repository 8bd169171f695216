//! # Agent Orchestrator
//!
//! A multi-agent orchestration engine that answers a request by running a
//! fixed "think, plan, act, reflect" pipeline of specialized agents over any
//! OpenAI-compatible model backend.
//!
//! ## Features
//!
//! - **Reasoning**: Deterministic classification and decomposition plus model analysis
//! - **Planning**: Numbered action plans built on the reasoning output
//! - **Tool Use**: Calculator, sandboxed code execution, search and web fetch, run concurrently
//! - **Reflection**: Structured critique with a single improvement pass
//! - **Retrieval**: Chunking, embedding and cosine-similarity search over a shared knowledge store
//! - **Strategy Learning**: Success rates per problem type and approach, persisted in SQLite
//!
//! ## Architecture
//!
//! ```text
//! request → Orchestrator → [Knowledge Store] → Reasoning → [Tools] → Planning
//!                                  → Synthesis → [Reflection] → response
//!                                        ↓
//!                          Strategy Learning Store (SQLite)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use agent_orchestrator::agents::{AgentContext, AgentCore};
//! use agent_orchestrator::orchestrator::{NoopSink, Orchestrator};
//! use agent_orchestrator::provider::{GenerationConfig, HttpModelProvider};
//! use agent_orchestrator::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let provider = HttpModelProvider::new(&config.model, config.request.clone())?;
//!     let core = AgentCore::new(Arc::new(provider), GenerationConfig::default());
//!     let orchestrator = Orchestrator::new(core, config.orchestrator.clone());
//!     let response = orchestrator
//!         .process("What is Python?", AgentContext::default(), &NoopSink)
//!         .await?;
//!     println!("{}", response.content);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Specialized agents and their shared data model.
pub mod agents;
/// Configuration management.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Document chunking, embedding and vector retrieval.
pub mod knowledge;
/// Strategy outcome and feedback aggregation.
pub mod learning;
/// Pipeline that coordinates the agents for one request.
pub mod orchestrator;
/// System prompts for each agent.
pub mod prompts;
/// Model provider abstraction and the HTTP backend.
pub mod provider;
/// SQLite storage layer for persistence.
pub mod storage;
/// Tool registry and built-in tools.
pub mod tools;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use orchestrator::{NoopSink, Orchestrator, ThoughtSink};
