//! Specialized agents.
//!
//! Every agent implements [`Agent::process`] and returns an [`AgentResponse`]
//! carrying its content, the [`Thought`]s it produced in order, any
//! [`Action`]s it took and a confidence in `[0, 1]`:
//! - [`ReasoningAgent`]: classification, decomposition and analysis
//! - [`PlanningAgent`]: numbered action plans
//! - [`ReflectionAgent`]: structured critique of a draft answer
//! - [`ToolUserAgent`]: tool detection, concurrent execution and synthesis
//!
//! All agents share model access through [`AgentCore`].

mod planning;
mod reasoning;
mod reflection;
mod tool_user;

pub use planning::{plan_steps, PlanningAgent};
pub use reasoning::{classify, decompose, Decomposition, DecompositionDetail, ProblemKind, ReasoningAgent};
pub use reflection::{Critique, ReflectionAgent};
pub use tool_user::{
    detect_tools, has_computational_cue, ArgumentExtractor, CalculatorArgs, CodeArgs, SearchArgs,
    ToolNeed, ToolUserAgent, WebFetchArgs,
};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AgentResult;
use crate::provider::{GenerationConfig, Message, ModelProvider};

// ============================================================================
// Shared Utilities
// ============================================================================

/// Serialize a value into a metadata entry, with warning on failure.
pub(crate) fn to_metadata_value<T: Serialize>(value: &T, context: &str) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        warn!(
            error = %e,
            context = %context,
            "Failed to serialize value for response metadata"
        );
        serde_json::json!({
            "serialization_error": e.to_string(),
            "context": context
        })
    })
}

/// Extract JSON from a completion string, handling markdown code blocks.
///
/// Attempts extraction in this order:
/// 1. Raw JSON
/// 2. ```json ... ``` code blocks
/// 3. ``` ... ``` code blocks
pub(crate) fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed);
    }

    if completion.contains("```json") {
        return completion
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ```json block but content was empty or malformed".to_string());
    }

    if completion.contains("```") {
        return completion
            .split("```")
            .nth(1)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ``` block but content was empty or malformed".to_string());
    }

    Err(format!(
        "No JSON found in response. First 100 chars: '{}'",
        completion.chars().take(100).collect::<String>()
    ))
}

/// First `max_chars` characters of `text`, with `...` when cut.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

// ============================================================================
// Data model
// ============================================================================

/// Agent roles in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Orchestrator,
    Reasoning,
    Planning,
    Reflection,
    ToolUser,
}

impl AgentRole {
    /// Get the role name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Orchestrator => "orchestrator",
            AgentRole::Reasoning => "reasoning",
            AgentRole::Planning => "planning",
            AgentRole::Reflection => "reflection",
            AgentRole::ToolUser => "tool_user",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call lifecycle of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Analyzing,
    ExecutingActions,
    Generating,
    Done,
}

impl AgentState {
    /// Get the state name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::Analyzing => "analyzing",
            AgentState::ExecutingActions => "executing_actions",
            AgentState::Generating => "generating",
            AgentState::Done => "done",
        }
    }
}

/// An audit-trail record of an intermediate reasoning step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    pub id: String,
    pub agent_role: AgentRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Thought {
    /// Create a thought stamped with the current time
    pub fn new(agent_role: AgentRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// A tool invocation taken by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub action_type: String,
    pub parameters: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Action {
    fn new(action_type: impl Into<String>, parameters: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action_type: action_type.into(),
            parameters,
            result: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Whether the action produced a result without error.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Response from an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub content: String,
    pub thoughts: Vec<Thought>,
    pub actions: Vec<Action>,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub metadata: HashMap<String, Value>,
}

impl AgentResponse {
    /// Create a response; confidence is clamped to `[0, 1]`.
    pub fn new(content: impl Into<String>, confidence: f64) -> Self {
        Self {
            content: content.into(),
            thoughts: Vec::new(),
            actions: Vec::new(),
            confidence: clamp_unit(confidence),
            metadata: HashMap::new(),
        }
    }

    /// Set the thoughts
    pub fn with_thoughts(mut self, thoughts: Vec<Thought>) -> Self {
        self.thoughts = thoughts;
        self
    }

    /// Set the actions
    pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = actions;
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Inputs shared with an agent beyond the request text.
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    /// Retrieved knowledge, already formatted as document blocks.
    pub knowledge: Option<String>,
    /// Earlier turns of the conversation, oldest first.
    pub history: Vec<Message>,
    pub reasoning: Option<String>,
    pub decomposition: Option<Decomposition>,
    pub plan: Option<String>,
    pub tool_results: Option<String>,
    pub original_task: Option<String>,
}

impl AgentContext {
    /// Set retrieved knowledge
    pub fn with_knowledge(mut self, knowledge: impl Into<String>) -> Self {
        self.knowledge = Some(knowledge.into());
        self
    }

    /// Set conversation history
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    /// Set the task being answered
    pub fn with_original_task(mut self, task: impl Into<String>) -> Self {
        self.original_task = Some(task.into());
        self
    }
}

// ============================================================================
// Agent trait and shared infrastructure
// ============================================================================

/// A component that turns an input and context into an [`AgentResponse`].
#[async_trait]
pub trait Agent: Send + Sync {
    /// Role recorded on every thought the agent produces.
    fn role(&self) -> AgentRole;

    /// Process `input` with `context`.
    async fn process(&self, input: &str, context: &AgentContext) -> AgentResult<AgentResponse>;
}

/// Model access shared by all agents.
#[derive(Clone)]
pub struct AgentCore {
    provider: Arc<dyn ModelProvider>,
    generation: GenerationConfig,
}

impl AgentCore {
    /// Create a core with the given provider and sampling defaults.
    pub fn new(provider: Arc<dyn ModelProvider>, generation: GenerationConfig) -> Self {
        Self {
            provider,
            generation,
        }
    }

    /// Get a reference to the model provider.
    #[inline]
    pub fn provider(&self) -> &Arc<dyn ModelProvider> {
        &self.provider
    }

    /// Generate with `system` as the system prompt.
    pub async fn generate(&self, system: &str, prompt: &str) -> AgentResult<String> {
        let config = self.generation.clone().with_system(system);
        let text = self.provider.generate(prompt, &config).await?;
        Ok(text)
    }
}

/// Thoughts and state of a single `process` call.
pub(crate) struct AgentRun {
    role: AgentRole,
    state: AgentState,
    thoughts: Vec<Thought>,
}

impl AgentRun {
    pub(crate) fn new(role: AgentRole) -> Self {
        Self {
            role,
            state: AgentState::Idle,
            thoughts: Vec::new(),
        }
    }

    /// Move to `next`; the transition is recorded on the next thought.
    pub(crate) fn transition(&mut self, next: AgentState) {
        debug!(role = %self.role, from = self.state.as_str(), to = next.as_str(), "Agent state change");
        self.state = next;
    }

    pub(crate) fn think(&mut self, content: impl Into<String>) {
        let thought = Thought::new(self.role, content).with_metadata("state", self.state.as_str());
        debug!(role = %self.role, thought = %thought.content, "Thought");
        self.thoughts.push(thought);
    }

    pub(crate) fn finish(mut self, content: impl Into<String>) -> Vec<Thought> {
        self.transition(AgentState::Done);
        self.think(content);
        self.thoughts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json_from_completion(r#" {"a":1} "#).unwrap(), r#"{"a":1}"#);
        assert_eq!(
            extract_json_from_completion("text\n```json\n{\"a\":1}\n```\nmore").unwrap(),
            "{\"a\":1}"
        );
        assert_eq!(extract_json_from_completion("```\n[1]\n```").unwrap(), "[1]");
        assert!(extract_json_from_completion("no json here").is_err());
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo...");
    }

    #[test]
    fn test_response_confidence_is_clamped() {
        assert_eq!(AgentResponse::new("x", 1.7).confidence, 1.0);
        assert_eq!(AgentResponse::new("x", -0.2).confidence, 0.0);
        assert_eq!(AgentResponse::new("x", f64::NAN).confidence, 0.0);
    }

    #[test]
    fn test_run_records_states() {
        let mut run = AgentRun::new(AgentRole::Planning);
        run.transition(AgentState::Analyzing);
        run.think("first");
        run.transition(AgentState::Generating);
        let thoughts = run.finish("done");

        let states: Vec<&str> = thoughts
            .iter()
            .map(|t| t.metadata["state"].as_str().unwrap())
            .collect();
        assert_eq!(states, vec!["analyzing", "done"]);
        assert!(thoughts.iter().all(|t| t.agent_role == AgentRole::Planning));
    }

    #[test]
    fn test_role_names() {
        assert_eq!(AgentRole::ToolUser.as_str(), "tool_user");
        assert_eq!(
            serde_json::to_value(AgentRole::ToolUser).unwrap(),
            serde_json::json!("tool_user")
        );
    }
}
