use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use agent_orchestrator::{
    agents::{AgentContext, AgentCore, Thought},
    config::{Config, LogFormat},
    knowledge::{Embedder, HashingEmbedder, HttpEmbedder, KnowledgeStore, Metadata},
    learning::{RetryPolicy, StrategyStore},
    orchestrator::Orchestrator,
    provider::{GenerationConfig, HttpModelProvider},
    storage::{SqliteStorage, Storage},
    tools::{KnowledgeSearchBackend, ToolRegistry},
};

#[derive(Parser)]
#[command(name = "agent-orchestrator", version, about = "Multi-agent reasoning pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a request with the full agent pipeline
    Ask {
        /// The request text
        input: String,
        /// Continue a stored conversation
        #[arg(long)]
        session: Option<String>,
        /// Index these files before answering
        #[arg(long = "knowledge")]
        knowledge: Vec<PathBuf>,
        /// Print thoughts to stderr as they happen
        #[arg(long)]
        stream: bool,
        /// Print the whole response as JSON
        #[arg(long)]
        json: bool,
        /// Skip the reflection stage
        #[arg(long)]
        no_reflection: bool,
        /// Skip the tool stage
        #[arg(long)]
        no_tools: bool,
    },
    /// Chunk and index files, optionally running a test query
    Ingest {
        files: Vec<PathBuf>,
        /// Query to run against the indexed files
        #[arg(long)]
        query: Option<String>,
    },
    /// Show learned strategy statistics
    Insights {
        /// Limit statistics to one problem type
        #[arg(long)]
        problem_type: Option<String>,
    },
    /// Rate an answer from 1 to 5
    Feedback {
        #[arg(long)]
        conversation: String,
        #[arg(long)]
        message: String,
        #[arg(long)]
        rating: u8,
        #[arg(long)]
        comment: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "Agent orchestrator starting...");

    match cli.command {
        Command::Ask {
            input,
            session,
            knowledge,
            stream,
            json,
            no_reflection,
            no_tools,
        } => {
            config.orchestrator.enable_reflection &= !no_reflection;
            config.orchestrator.enable_tools &= !no_tools;
            let app = App::build(&config).await?;
            for path in &knowledge {
                app.ingest(path).await?;
            }
            app.ask(&input, session.as_deref(), stream, json).await?;
        }
        Command::Ingest { files, query } => {
            let app = App::build(&config).await?;
            for path in &files {
                app.ingest(path).await?;
            }
            if let Some(query) = query {
                let hits = app
                    .knowledge
                    .search(&query, config.orchestrator.retrieval_top_k, None)
                    .await?;
                for hit in hits {
                    println!("{:.3}\t{}", hit.score, hit.chunk.content);
                }
            }
        }
        Command::Insights { problem_type } => {
            let app = App::build(&config).await?;
            let insights = app.learning.get_insights().await;
            let stats = app.learning.problem_type_stats(problem_type.as_deref()).await;
            println!("{}", serde_json::to_string_pretty(&insights)?);
            println!("{}", serde_json::to_string_pretty(&stats)?);
            if let Some(pt) = problem_type {
                for suggestion in app.learning.suggest_improvements(&pt).await {
                    println!("- {}", suggestion);
                }
            }
        }
        Command::Feedback {
            conversation,
            message,
            rating,
            comment,
        } => {
            let app = App::build(&config).await?;
            let feedback = app
                .learning
                .record_feedback(&conversation, &message, rating, comment, None)
                .await?;
            println!("{}", serde_json::to_string_pretty(&feedback)?);
        }
    }

    Ok(())
}

/// Everything a subcommand may need, wired from configuration.
struct App {
    orchestrator: Orchestrator,
    knowledge: Arc<KnowledgeStore>,
    learning: Arc<StrategyStore>,
}

impl App {
    async fn build(config: &Config) -> anyhow::Result<Self> {
        // Initialize storage
        let storage: Arc<dyn Storage> = match SqliteStorage::new(&config.database).await {
            Ok(s) => {
                info!(path = %config.database.path.display(), "Database initialized");
                Arc::new(s)
            }
            Err(e) => {
                error!(error = %e, "Failed to initialize database");
                return Err(e.into());
            }
        };

        // Initialize model provider
        let provider = match HttpModelProvider::new(&config.model, config.request.clone()) {
            Ok(p) => {
                info!(base_url = %config.model.base_url, model = %config.model.model, "Model provider initialized");
                Arc::new(p)
            }
            Err(e) => {
                error!(error = %e, "Failed to initialize model provider");
                return Err(e.into());
            }
        };

        let dimension = config.knowledge.embedding_dimension;
        let embedder: Arc<dyn Embedder> = match &config.knowledge.embedding_model {
            Some(model) => Arc::new(HttpEmbedder::new(
                &config.model,
                &config.request,
                model.clone(),
                dimension,
            )?),
            None => Arc::new(HashingEmbedder::new(dimension)),
        };
        let knowledge = Arc::new(KnowledgeStore::new(embedder, config.knowledge.clone()));

        let learning = Arc::new(
            StrategyStore::new()
                .with_storage(Arc::clone(&storage))
                .with_retry(RetryPolicy {
                    max_retries: config.request.max_retries,
                    base_delay_ms: config.request.retry_delay_ms,
                }),
        );
        learning.load().await?;

        let registry = ToolRegistry::with_builtins(
            &config.tools,
            Some(Arc::new(KnowledgeSearchBackend::new(Arc::clone(&knowledge)))),
        )?;
        info!(tools = ?registry.names(), "Tool registry initialized");

        let generation = GenerationConfig::default()
            .with_temperature(config.model.temperature)
            .with_max_tokens(config.model.max_tokens);
        let orchestrator = Orchestrator::new(AgentCore::new(provider, generation), config.orchestrator.clone())
            .with_tools(Arc::new(registry))
            .with_knowledge(Arc::clone(&knowledge))
            .with_learning(Arc::clone(&learning))
            .with_storage(storage);

        Ok(Self {
            orchestrator,
            knowledge,
            learning,
        })
    }

    async fn ingest(&self, path: &Path) -> anyhow::Result<()> {
        let text = tokio::fs::read_to_string(path).await?;
        let source = path.display().to_string();
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), serde_json::Value::String(source.clone()));

        let ids = self.knowledge.add_document(&text, &metadata, Some(&source)).await?;
        info!(path = %source, chunks = ids.len(), "Ingested document");
        eprintln!("Indexed {} chunk(s) from {}", ids.len(), source);
        Ok(())
    }

    async fn ask(&self, input: &str, session: Option<&str>, stream: bool, json: bool) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel::<Thought>(64);
        let printer = tokio::spawn(async move {
            while let Some(thought) = rx.recv().await {
                if stream {
                    eprintln!("[{}] {}", thought.agent_role, thought.content);
                }
            }
        });

        let result = match session {
            Some(id) => self.orchestrator.process_in_session(id, input, &tx).await,
            None => self
                .orchestrator
                .process(input, AgentContext::default(), &tx)
                .await
                .map_err(Into::into),
        };
        drop(tx);
        let _ = printer.await;
        self.orchestrator.flush_learning().await;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "Request failed");
                return Err(e.into());
            }
        };

        if json {
            println!("{}", serde_json::to_string_pretty(&response)?);
        } else {
            println!("{}", response.content);
        }
        Ok(())
    }
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
