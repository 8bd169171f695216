//! Multi-agent orchestrator.
//!
//! One request runs one fixed pipeline:
//!
//! ```text
//! retrieval? -> reasoning -> tools? -> planning -> synthesis -> reflection? -> learning (background)
//! ```
//!
//! Every thought is forwarded to a [`ThoughtSink`] in the order it was
//! produced. Only a failed or unfinished reasoning stage aborts the request;
//! every later stage degrades to the best content available and is listed in
//! the `degraded_stages` metadata. An overall deadline bounds the whole run.

mod sink;

pub use sink::{NoopSink, ThoughtSink};

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout_at;
use tracing::{error, info, warn};

use crate::agents::{
    to_metadata_value, truncate_chars, Agent, AgentContext, AgentCore, AgentResponse, AgentRole,
    Decomposition, PlanningAgent, ReasoningAgent, ReflectionAgent, Thought, ToolUserAgent,
};
use crate::config::OrchestratorConfig;
use crate::error::{AppError, AppResult, ErrorCategory, StageError, StageResult};
use crate::knowledge::{format_context, KnowledgeStore, DEFAULT_CONTEXT_SEPARATOR};
use crate::learning::StrategyStore;
use crate::prompts::ORCHESTRATOR_PROMPT;
use crate::provider::{Message, MessageRole};
use crate::storage::{Session, SessionMessage, Storage};
use crate::tools::ToolRegistry;

/// Prior confidence recorded for every completed run.
const FULL_CONFIDENCE: f64 = 0.95;
/// Knowledge included in the synthesis prompt, in characters.
const SYNTHESIS_KNOWLEDGE_CHARS: usize = 2000;

// ============================================================================
// Run Trace
// ============================================================================

/// Thoughts and degradations collected during one request.
struct Trace<'a> {
    sink: &'a dyn ThoughtSink,
    thoughts: Vec<Thought>,
    degraded: Vec<String>,
    deadline_exceeded: bool,
}

impl<'a> Trace<'a> {
    fn new(sink: &'a dyn ThoughtSink) -> Self {
        Self {
            sink,
            thoughts: Vec::new(),
            degraded: Vec::new(),
            deadline_exceeded: false,
        }
    }

    async fn note(&mut self, stage: &str, content: impl Into<String>) {
        let thought = Thought::new(AgentRole::Orchestrator, content).with_metadata("stage", stage);
        self.sink.emit(&thought).await;
        self.thoughts.push(thought);
    }

    async fn extend(&mut self, thoughts: Vec<Thought>) {
        for thought in thoughts {
            self.sink.emit(&thought).await;
            self.thoughts.push(thought);
        }
    }

    async fn degrade(&mut self, stage: &str, message: impl Into<String>) {
        let err = StageError::Recoverable {
            stage: stage.to_string(),
            message: message.into(),
        };
        warn!(stage, error = %err, "Stage degraded");
        self.degraded.push(stage.to_string());
        self.note(stage, err.to_string()).await;
    }

    async fn expire(&mut self, stage: &str) {
        self.deadline_exceeded = true;
        self.degrade(stage, "request deadline exceeded, returning best partial answer")
            .await;
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Coordinates the specialized agents, knowledge and learning stores.
pub struct Orchestrator {
    core: AgentCore,
    reasoning: ReasoningAgent,
    planning: PlanningAgent,
    reflection: ReflectionAgent,
    tool_user: Option<ToolUserAgent>,
    knowledge: Option<Arc<KnowledgeStore>>,
    learning: Option<Arc<StrategyStore>>,
    storage: Option<Arc<dyn Storage>>,
    config: OrchestratorConfig,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Create an orchestrator whose agents share `core`
    pub fn new(core: AgentCore, config: OrchestratorConfig) -> Self {
        Self {
            reasoning: ReasoningAgent::new(core.clone()),
            planning: PlanningAgent::new(core.clone()),
            reflection: ReflectionAgent::new(core.clone()),
            tool_user: None,
            core,
            knowledge: None,
            learning: None,
            storage: None,
            config,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Enable the tool stage with `registry`
    pub fn with_tools(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.tool_user = Some(ToolUserAgent::new(self.core.clone(), registry));
        self
    }

    /// Use a customized tool user agent
    pub fn with_tool_user(mut self, agent: ToolUserAgent) -> Self {
        self.tool_user = Some(agent);
        self
    }

    /// Enable retrieval from `store`
    pub fn with_knowledge(mut self, store: Arc<KnowledgeStore>) -> Self {
        self.knowledge = Some(store);
        self
    }

    /// Record strategy outcomes in `store`
    pub fn with_learning(mut self, store: Arc<StrategyStore>) -> Self {
        self.learning = Some(store);
        self
    }

    /// Persist conversations in `storage`
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Pipeline configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Learning store, if configured
    pub fn learning(&self) -> Option<&Arc<StrategyStore>> {
        self.learning.as_ref()
    }

    /// Run the full pipeline for `input`.
    pub async fn process(
        &self,
        input: &str,
        context: AgentContext,
        sink: &dyn ThoughtSink,
    ) -> StageResult<AgentResponse> {
        let start = Instant::now();
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.request_deadline_ms);
        let mut trace = Trace::new(sink);
        let mut context = context;
        if context.original_task.is_none() {
            context.original_task = Some(input.to_string());
        }

        trace
            .note("start", format!("Processing request: {}", truncate_chars(input, 100)))
            .await;

        // Stage 1: retrieval
        let rag_used = self.retrieve(input, &mut context, deadline, &mut trace).await;

        // Stage 2: reasoning
        trace
            .note("reasoning", "Engaging reasoning agent for structured analysis")
            .await;
        let reasoning = match timeout_at(deadline, self.reasoning.process(input, &context)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                let err = StageError::Fatal {
                    stage: "reasoning".to_string(),
                    category: ErrorCategory::from(&e),
                    message: e.to_string(),
                };
                error!(error = %err, "Request aborted");
                return Err(err);
            }
            Err(_) => {
                let err = StageError::Fatal {
                    stage: "reasoning".to_string(),
                    category: ErrorCategory::Timeout,
                    message: format!(
                        "request deadline of {}ms exceeded before reasoning completed",
                        self.config.request_deadline_ms
                    ),
                };
                error!(error = %err, "Request aborted");
                return Err(err);
            }
        };

        let problem_type = reasoning
            .metadata
            .get("input_type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let decomposition = Decomposition::from_metadata(&reasoning.metadata);
        let reasoning_content = reasoning.content;
        trace.extend(reasoning.thoughts).await;
        trace
            .note("reasoning", format!("Reasoning complete: classified as {}", problem_type))
            .await;
        context.reasoning = Some(reasoning_content.clone());
        context.decomposition = decomposition.clone();

        // Stage 3: tools
        let mut actions = Vec::new();
        let mut tools_used: Vec<String> = Vec::new();
        let mut tool_content: Option<String> = None;
        let needs_tools = decomposition.as_ref().is_some_and(|d| d.requires_tools);
        if let Some(tool_user) = self
            .tool_user
            .as_ref()
            .filter(|_| self.config.enable_tools && needs_tools)
        {
            trace
                .note("tools", "Task requires tools - engaging tool user agent")
                .await;
            match timeout_at(deadline, tool_user.process(input, &context)).await {
                Ok(Ok(response)) => {
                    let summary = response
                        .metadata
                        .get("tool_summary")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    if !response.actions.is_empty() {
                        tools_used = response
                            .metadata
                            .get("tools_used")
                            .and_then(|v| serde_json::from_value(v.clone()).ok())
                            .unwrap_or_default();
                    }
                    trace.extend(response.thoughts).await;
                    if !response.actions.is_empty() {
                        trace
                            .note("tools", format!("Executed {} tool(s)", response.actions.len()))
                            .await;
                        context.tool_results = Some(summary);
                        tool_content = Some(response.content);
                    }
                    actions = response.actions;
                }
                Ok(Err(e)) => trace.degrade("tools", e.to_string()).await,
                Err(_) => trace.expire("tools").await,
            }
        }

        // Stage 4: planning
        let mut plan: Option<String> = None;
        if !trace.deadline_exceeded {
            trace.note("planning", "Engaging planning agent for action plan").await;
            match timeout_at(deadline, self.planning.process(input, &context)).await {
                Ok(Ok(response)) => {
                    trace.extend(response.thoughts).await;
                    plan = Some(response.content);
                }
                Ok(Err(e)) => trace.degrade("planning", e.to_string()).await,
                Err(_) => trace.expire("planning").await,
            }
        }
        context.plan = plan.clone();

        // Stage 5: synthesis
        let fallback = || {
            fallback_answer(
                &reasoning_content,
                tool_content.as_deref(),
                context.tool_results.as_deref(),
            )
        };
        let draft = if trace.deadline_exceeded {
            fallback()
        } else {
            trace
                .note("synthesis", "Synthesizing final response from all agent outputs")
                .await;
            let prompt = synthesis_prompt(
                input,
                &reasoning_content,
                plan.as_deref(),
                context.knowledge.as_deref(),
                tool_content.as_deref(),
                context.tool_results.as_deref(),
            );
            match timeout_at(deadline, self.core.generate(ORCHESTRATOR_PROMPT, &prompt)).await {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    trace.degrade("synthesis", e.to_string()).await;
                    fallback()
                }
                Err(_) => {
                    trace.expire("synthesis").await;
                    fallback()
                }
            }
        };

        // Stage 6: reflection
        let mut content = draft;
        let mut reflection_used = false;
        let mut improved = false;
        if self.config.enable_reflection && !trace.deadline_exceeded {
            trace
                .note("reflection", "Engaging reflection agent for quality improvement")
                .await;
            match timeout_at(deadline, self.reflection.process(&content, &context)).await {
                Ok(Ok(response)) => {
                    reflection_used = true;
                    let needs_improvement = response
                        .metadata
                        .get("needs_improvement")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    trace.extend(response.thoughts).await;

                    if needs_improvement {
                        trace
                            .note("improvement", "Applying improvements from reflection")
                            .await;
                        let prompt = format!(
                            "Original Response:\n{}\n\nFeedback:\n{}\n\n\
                             Improve the original response based on the feedback. \
                             Keep what works well and address the concerns raised.",
                            content, response.content
                        );
                        match timeout_at(deadline, self.core.generate(ORCHESTRATOR_PROMPT, &prompt))
                            .await
                        {
                            Ok(Ok(text)) if !text.trim().is_empty() => {
                                content = text;
                                improved = true;
                            }
                            Ok(Ok(_)) => {
                                trace.degrade("improvement", "model returned an empty answer").await
                            }
                            Ok(Err(e)) => trace.degrade("improvement", e.to_string()).await,
                            Err(_) => trace.expire("improvement").await,
                        }
                    }
                }
                Ok(Err(e)) => trace.degrade("reflection", e.to_string()).await,
                Err(_) => trace.expire("reflection").await,
            }
        }

        trace.note("complete", "Multi-agent processing complete").await;

        // Stage 7: learning
        let mut approach = "Multi-agent: reasoning + planning".to_string();
        if !tools_used.is_empty() {
            approach.push_str(&format!(" + tools({})", tools_used.join(", ")));
        }
        if rag_used {
            approach.push_str(" + RAG");
        }
        if reflection_used {
            approach.push_str(" + reflection");
        }

        let Trace {
            thoughts,
            degraded,
            deadline_exceeded,
            ..
        } = trace;

        let suggestions = match &self.learning {
            Some(store) => {
                let suggestions = store.suggest_improvements(&problem_type).await;
                let metadata = json!({
                    "tools_used": tools_used,
                    "rag_used": rag_used,
                    "reflection_used": reflection_used,
                    "degraded_stages": degraded,
                    "deadline_exceeded": deadline_exceeded,
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                });
                self.spawn_record(store, &problem_type, &approach, metadata).await;
                suggestions
            }
            None => Vec::new(),
        };

        info!(
            problem_type = %problem_type,
            approach = %approach,
            degraded = ?degraded,
            deadline_exceeded,
            actions = actions.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Request complete"
        );

        Ok(AgentResponse::new(content, FULL_CONFIDENCE)
            .with_thoughts(thoughts)
            .with_actions(actions)
            .with_metadata("problem_type", problem_type)
            .with_metadata("approach", approach)
            .with_metadata("rag_used", rag_used)
            .with_metadata("tools_used", tools_used)
            .with_metadata("reflection_used", reflection_used)
            .with_metadata("improved", improved)
            .with_metadata("degraded_stages", degraded)
            .with_metadata("deadline_exceeded", deadline_exceeded)
            .with_metadata("learning_suggestions", suggestions)
            .with_metadata("reasoning", reasoning_content)
            .with_metadata("plan", plan)
            .with_metadata(
                "decomposition",
                to_metadata_value(&decomposition, "orchestrator.decomposition"),
            ))
    }

    /// Fill `context.knowledge` from the knowledge store. Returns whether
    /// knowledge is available to the later stages.
    async fn retrieve(
        &self,
        input: &str,
        context: &mut AgentContext,
        deadline: tokio::time::Instant,
        trace: &mut Trace<'_>,
    ) -> bool {
        if context.knowledge.is_some() {
            return true;
        }
        let Some(store) = self.knowledge.as_ref().filter(|_| self.config.enable_rag) else {
            return false;
        };

        trace
            .note("retrieval", "Retrieving relevant knowledge from database")
            .await;
        match timeout_at(deadline, store.search(input, self.config.retrieval_top_k, None)).await {
            Ok(Ok(hits)) if hits.is_empty() => {
                trace
                    .note("retrieval", "No relevant documents found in knowledge base")
                    .await;
                false
            }
            Ok(Ok(hits)) => {
                context.knowledge = Some(format_context(&hits, DEFAULT_CONTEXT_SEPARATOR));
                trace
                    .note("retrieval", format!("Retrieved {} relevant documents", hits.len()))
                    .await;
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Knowledge retrieval failed");
                trace.degraded.push("retrieval".to_string());
                trace
                    .note("retrieval", format!("RAG retrieval failed: {}", e))
                    .await;
                false
            }
            Err(_) => {
                warn!("Knowledge retrieval hit the request deadline");
                trace.deadline_exceeded = true;
                trace.degraded.push("retrieval".to_string());
                trace
                    .note("retrieval", "RAG retrieval failed: request deadline exceeded")
                    .await;
                false
            }
        }
    }

    async fn spawn_record(
        &self,
        store: &Arc<StrategyStore>,
        problem_type: &str,
        approach: &str,
        metadata: Value,
    ) {
        let store = Arc::clone(store);
        let problem_type = problem_type.to_string();
        let approach = approach.to_string();
        let handle = tokio::spawn(async move {
            store
                .record_strategy(&problem_type, &approach, true, FULL_CONFIDENCE, Some(metadata))
                .await;
        });

        let mut pending = self.pending.lock().await;
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Wait for every background strategy recording to finish.
    pub async fn flush_learning(&self) {
        let handles = std::mem::take(&mut *self.pending.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Strategy recording task failed");
            }
        }
    }

    /// Run the pipeline inside a stored conversation.
    ///
    /// The session is created when missing. The most recent
    /// `max_history_messages` earlier messages become the history; the user and assistant messages are appended once the
    /// request succeeds. The response metadata carries `session_id` and the
    /// assistant `message_id` for later feedback.
    pub async fn process_in_session(
        &self,
        session_id: &str,
        input: &str,
        sink: &dyn ThoughtSink,
    ) -> AppResult<AgentResponse> {
        let storage = self.storage.as_ref().ok_or_else(|| AppError::Config {
            message: "session storage is not configured".to_string(),
        })?;

        if storage.get_session(session_id).await?.is_none() {
            storage.create_session(&Session::with_id(session_id)).await?;
            info!(session_id = %session_id, "Created session");
        }

        let history: Vec<Message> = storage
            .get_recent_messages(session_id, self.config.max_history_messages)
            .await?
            .into_iter()
            .map(|m| Message {
                role: m.role,
                content: m.content,
            })
            .collect();

        let context = AgentContext::default().with_history(history);
        let response = self.process(input, context, sink).await?;

        let user = SessionMessage::new(session_id, MessageRole::User, input);
        let assistant = SessionMessage::new(session_id, MessageRole::Assistant, &response.content);
        storage.append_message(&user).await?;
        storage.append_message(&assistant).await?;

        Ok(response
            .with_metadata("session_id", session_id)
            .with_metadata("message_id", assistant.id))
    }
}

fn synthesis_prompt(
    task: &str,
    reasoning: &str,
    plan: Option<&str>,
    knowledge: Option<&str>,
    tool_content: Option<&str>,
    tool_summary: Option<&str>,
) -> String {
    let mut prompt = format!(
        "Task: {}\n\nReasoning Analysis:\n{}\n\nAction Plan:\n{}\n",
        task,
        reasoning,
        plan.unwrap_or("(no plan available)")
    );
    if let Some(knowledge) = knowledge {
        prompt.push_str(&format!(
            "\nRetrieved Knowledge:\n{}\n",
            truncate_chars(knowledge, SYNTHESIS_KNOWLEDGE_CHARS)
        ));
    }
    if tool_content.is_some() || tool_summary.is_some() {
        prompt.push_str("\nTool Execution Results:\n");
        if let Some(summary) = tool_summary {
            prompt.push_str(summary);
            prompt.push('\n');
        }
        if let Some(content) = tool_content {
            prompt.push_str(content);
            prompt.push('\n');
        }
    }
    prompt.push_str(
        "\nBased on the above analysis, plan, and available information, provide a comprehensive \
         response to the task.\nBe clear, thorough, and actionable. Integrate all sources of \
         information coherently.",
    );
    prompt
}

/// Best answer available without a synthesis call.
fn fallback_answer(reasoning: &str, tool_content: Option<&str>, tool_summary: Option<&str>) -> String {
    let mut answer = reasoning.to_string();
    if let Some(summary) = tool_summary.filter(|s| !s.is_empty()) {
        answer.push_str("\n\nTool results:\n");
        answer.push_str(summary);
    } else if let Some(content) = tool_content {
        answer.push_str("\n\n");
        answer.push_str(content);
    }
    answer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolsConfig;
    use crate::error::ModelError;
    use crate::prompts::{PLANNING_PROMPT, REASONING_PROMPT, REFLECTION_PROMPT};
    use crate::provider::{GenerationConfig, MockModelProvider};
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    const NO_IMPROVEMENT: &str =
        r#"{"needs_improvement": false, "reason": "complete", "critique": "Clear and correct."}"#;
    const NEEDS_IMPROVEMENT: &str =
        r#"{"needs_improvement": true, "reason": "too short", "critique": "Add an example."}"#;

    fn routed_provider(reflection: &'static str, fail_planning: bool) -> MockModelProvider {
        let mut provider = MockModelProvider::new();
        provider
            .expect_generate()
            .returning(move |prompt: &str, config: &GenerationConfig| {
                let system = config.system.as_deref().unwrap_or_default();
                if system == REASONING_PROMPT {
                    Ok("Python is a programming language.".to_string())
                } else if system == PLANNING_PROMPT {
                    if fail_planning {
                        Err(ModelError::RateLimited {
                            message: "slow down".to_string(),
                        })
                    } else {
                        Ok("1. Define Python\n2. Give an example".to_string())
                    }
                } else if system == REFLECTION_PROMPT {
                    Ok(reflection.to_string())
                } else if prompt.starts_with("Original Response:") {
                    Ok("Improved answer with an example.".to_string())
                } else {
                    Ok(format!("Final answer.\n{}", prompt))
                }
            });
        provider
    }

    fn orchestrator(provider: MockModelProvider) -> Orchestrator {
        let core = AgentCore::new(Arc::new(provider), GenerationConfig::default());
        let registry = ToolRegistry::with_builtins(&ToolsConfig::default(), None).unwrap();
        Orchestrator::new(core, OrchestratorConfig::default()).with_tools(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_question_skips_tools() {
        let orchestrator = orchestrator(routed_provider(NO_IMPROVEMENT, false));
        let response = orchestrator
            .process("What is Python?", AgentContext::default(), &NoopSink)
            .await
            .unwrap();

        assert!(response.actions.is_empty());
        assert!(!response.content.is_empty());
        assert_eq!(response.metadata["problem_type"], "question");
        assert_eq!(response.metadata["rag_used"], false);
        assert_eq!(response.metadata["reflection_used"], true);
        assert_eq!(response.metadata["improved"], false);
        assert_eq!(
            response.metadata["approach"],
            "Multi-agent: reasoning + planning + reflection"
        );
        assert_eq!(response.confidence, FULL_CONFIDENCE);
        assert_eq!(
            response.thoughts.first().map(|t| t.content.as_str()),
            Some("Processing request: What is Python?")
        );
        assert_eq!(
            response.thoughts.last().map(|t| t.content.as_str()),
            Some("Multi-agent processing complete")
        );
    }

    #[tokio::test]
    async fn test_sink_sees_thoughts_in_order() {
        let orchestrator = orchestrator(routed_provider(NO_IMPROVEMENT, false));
        let (tx, mut rx) = mpsc::channel(256);
        let response = orchestrator
            .process("What is Python?", AgentContext::default(), &tx)
            .await
            .unwrap();
        drop(tx);

        let mut streamed = Vec::new();
        while let Some(thought) = rx.recv().await {
            streamed.push(thought.id);
        }
        let returned: Vec<String> = response.thoughts.iter().map(|t| t.id.clone()).collect();
        assert_eq!(streamed, returned);
    }

    #[tokio::test]
    async fn test_reasoning_failure_is_fatal() {
        let mut provider = MockModelProvider::new();
        provider.expect_generate().returning(|_, _| {
            Err(ModelError::Unavailable {
                message: "connection refused".to_string(),
                retries: 3,
            })
        });

        let err = orchestrator(provider)
            .process("What is Python?", AgentContext::default(), &NoopSink)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.category(), ErrorCategory::ModelUnavailable);
    }

    #[tokio::test]
    async fn test_planning_failure_degrades() {
        let store = Arc::new(StrategyStore::new());
        let orchestrator =
            orchestrator(routed_provider(NO_IMPROVEMENT, true)).with_learning(Arc::clone(&store));
        let response = orchestrator
            .process("What is Python?", AgentContext::default(), &NoopSink)
            .await
            .unwrap();

        assert_eq!(response.metadata["degraded_stages"], json!(["planning"]));
        assert_eq!(response.metadata["plan"], Value::Null);
        assert_eq!(response.confidence, FULL_CONFIDENCE);
        assert!(response.content.contains("(no plan available)"));

        orchestrator.flush_learning().await;
        let record = store
            .get_strategy("question", "Multi-agent: reasoning + planning + reflection")
            .await
            .unwrap();
        assert_eq!((record.success_count, record.failure_count), (1, 0));
        assert!((record.avg_confidence - FULL_CONFIDENCE).abs() < 1e-9);
        let metadata = record.metadata.unwrap();
        assert_eq!(metadata["degraded_stages"], json!(["planning"]));
        assert_eq!(metadata["deadline_exceeded"], false);
    }

    #[tokio::test]
    async fn test_reflection_triggers_one_improvement() {
        let orchestrator = orchestrator(routed_provider(NEEDS_IMPROVEMENT, false));
        let response = orchestrator
            .process("What is Python?", AgentContext::default(), &NoopSink)
            .await
            .unwrap();

        assert_eq!(response.content, "Improved answer with an example.");
        assert_eq!(response.metadata["improved"], true);
        assert!(response
            .thoughts
            .iter()
            .any(|t| t.content == "Applying improvements from reflection"));
    }

    #[tokio::test]
    async fn test_calculation_runs_tools() {
        let orchestrator = orchestrator(routed_provider(NO_IMPROVEMENT, false));
        let response = orchestrator
            .process("Calculate 25 * 4 + 100", AgentContext::default(), &NoopSink)
            .await
            .unwrap();

        assert_eq!(response.actions.len(), 1);
        assert_eq!(response.actions[0].action_type, "tool_calculator");
        assert_eq!(response.metadata["tools_used"], json!(["calculator"]));
        assert!(response.content.contains("200"));
    }

    #[tokio::test]
    async fn test_learning_is_recorded_in_background() {
        let store = Arc::new(StrategyStore::new());
        let orchestrator =
            orchestrator(routed_provider(NO_IMPROVEMENT, false)).with_learning(Arc::clone(&store));

        let response = orchestrator
            .process("What is Python?", AgentContext::default(), &NoopSink)
            .await
            .unwrap();
        assert_eq!(
            response.metadata["learning_suggestions"],
            json!(["No data yet for question problems"])
        );

        orchestrator.flush_learning().await;
        let record = store
            .get_strategy("question", "Multi-agent: reasoning + planning + reflection")
            .await
            .unwrap();
        assert_eq!(record.success_count, 1);
        assert!((record.avg_confidence - FULL_CONFIDENCE).abs() < 1e-9);
    }

    #[test]
    fn test_fallback_prefers_raw_tool_output() {
        assert_eq!(
            fallback_answer("analysis", Some("explained"), Some("Tool 'calculator' result: 200")),
            "analysis\n\nTool results:\nTool 'calculator' result: 200"
        );
        assert_eq!(fallback_answer("analysis", None, None), "analysis");
    }
}
