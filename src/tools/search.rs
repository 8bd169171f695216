use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{Tool, ToolCategory, ToolOutput, ToolSpec};
use crate::error::{ToolError, ToolResult};
use crate::knowledge::KnowledgeStore;

const DEFAULT_MAX_RESULTS: usize = 5;
const MAX_RESULTS_CAP: usize = 20;

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// Pluggable source of search results.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Backend name, reported in tool metadata.
    fn name(&self) -> &'static str;

    /// Run a query, returning at most `max_results` hits.
    async fn search(&self, query: &str, max_results: usize) -> ToolResult<Vec<SearchResult>>;
}

/// Search backed by the local knowledge store.
pub struct KnowledgeSearchBackend {
    store: Arc<KnowledgeStore>,
}

impl KnowledgeSearchBackend {
    /// Wrap a knowledge store
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SearchBackend for KnowledgeSearchBackend {
    fn name(&self) -> &'static str {
        "knowledge"
    }

    async fn search(&self, query: &str, max_results: usize) -> ToolResult<Vec<SearchResult>> {
        let hits = self
            .store
            .search(query, max_results, None)
            .await
            .map_err(|e| ToolError::Execution {
                tool_name: "search".to_string(),
                message: e.to_string(),
            })?;

        Ok(hits
            .into_iter()
            .enumerate()
            .map(|(i, hit)| SearchResult {
                title: hit
                    .chunk
                    .source_id
                    .clone()
                    .unwrap_or_else(|| format!("Document {}", i + 1)),
                snippet: hit.chunk.content,
                url: None,
                score: Some(hit.score),
            })
            .collect())
    }
}

/// Information search over a configurable backend.
pub struct Search {
    spec: ToolSpec,
    backend: Option<Arc<dyn SearchBackend>>,
}

impl Search {
    /// Create the tool; without a backend every call reports `not_configured`.
    pub fn new(backend: Option<Arc<dyn SearchBackend>>) -> Self {
        Self {
            spec: ToolSpec::new(
                "search",
                "Search for information on a topic and return the most relevant snippets.",
                ToolCategory::Information,
            )
            .with_param("query", "string", "Search query", true)
            .with_param("max_results", "integer", "Maximum number of results (default 5)", false),
            backend,
        }
    }
}

#[async_trait]
impl Tool for Search {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value) -> ToolOutput {
        let Some(backend) = &self.backend else {
            return ToolOutput::not_configured("Search");
        };
        let Some(query) = args["query"].as_str() else {
            return ToolOutput::failure("missing query");
        };
        let max_results = args["max_results"]
            .as_u64()
            .map(|n| (n as usize).clamp(1, MAX_RESULTS_CAP))
            .unwrap_or(DEFAULT_MAX_RESULTS);

        match backend.search(query, max_results).await {
            Ok(mut results) => {
                results.truncate(max_results);
                debug!(backend = backend.name(), results = results.len(), "Search complete");
                ToolOutput::success(json!({
                    "query": query,
                    "results": results,
                }))
                .with_metadata("backend", backend.name())
                .with_metadata("count", results.len())
            }
            Err(e) => ToolOutput::failure(format!("Search failed: {}", e)),
        }
    }
}
