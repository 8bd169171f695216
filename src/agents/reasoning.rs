use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{
    has_computational_cue, to_metadata_value, truncate_chars, Agent, AgentContext, AgentCore,
    AgentResponse, AgentRole, AgentRun, AgentState,
};
use crate::error::{AgentError, AgentResult};
use crate::prompts::REASONING_PROMPT;

const QUESTION_WORDS: [&str; 12] = [
    "what", "why", "how", "when", "where", "who", "which", "can", "should", "is", "are", "does",
];
const PROBLEM_WORDS: [&str; 8] = ["solve", "fix", "debug", "error", "issue", "problem", "wrong", "broken"];
const TASK_WORDS: [&str; 8] = ["create", "build", "implement", "make", "develop", "design", "write", "add"];

/// Knowledge is cut to this many characters in the reasoning prompt.
const KNOWLEDGE_PROMPT_CHARS: usize = 1000;
/// Most recent history messages included in the reasoning prompt.
const HISTORY_PROMPT_MESSAGES: usize = 6;

/// Kind of request, decided from lexical cues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    Question,
    Problem,
    Task,
    Analysis,
}

impl ProblemKind {
    /// Get the kind name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemKind::Question => "question",
            ProblemKind::Problem => "problem",
            ProblemKind::Task => "task",
            ProblemKind::Analysis => "analysis",
        }
    }
}

impl std::fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProblemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "question" => Ok(ProblemKind::Question),
            "problem" => Ok(ProblemKind::Problem),
            "task" => Ok(ProblemKind::Task),
            "analysis" => Ok(ProblemKind::Analysis),
            _ => Err(format!("Unknown problem kind: {}", s)),
        }
    }
}

/// Classify a request. Pure and deterministic.
///
/// A leading question word or any `?` makes a question; otherwise problem
/// words, then task words, are searched anywhere in the text.
pub fn classify(text: &str) -> ProblemKind {
    let lower = text.to_lowercase();

    if QUESTION_WORDS.iter().any(|w| lower.starts_with(w)) || text.contains('?') {
        return ProblemKind::Question;
    }
    if PROBLEM_WORDS.iter().any(|w| lower.contains(w)) {
        return ProblemKind::Problem;
    }
    if TASK_WORDS.iter().any(|w| lower.contains(w)) {
        return ProblemKind::Task;
    }
    ProblemKind::Analysis
}

/// Kind-specific part of a decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecompositionDetail {
    Question {
        main_question: String,
        key_concepts: Vec<String>,
        sub_questions: Vec<String>,
    },
    Problem {
        problem_statement: String,
        diagnosis_steps: Vec<String>,
        solution_steps: Vec<String>,
    },
    Task {
        task_description: String,
        action_steps: Vec<String>,
    },
    Analysis {
        subject: String,
        analysis_framework: Vec<String>,
    },
}

/// Structured breakdown of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decomposition {
    #[serde(flatten)]
    pub detail: DecompositionDetail,
    pub reasoning_steps: Vec<String>,
    pub requires_knowledge: bool,
    pub requires_tools: bool,
}

impl Decomposition {
    /// The kind this decomposition was built for.
    pub fn kind(&self) -> ProblemKind {
        match self.detail {
            DecompositionDetail::Question { .. } => ProblemKind::Question,
            DecompositionDetail::Problem { .. } => ProblemKind::Problem,
            DecompositionDetail::Task { .. } => ProblemKind::Task,
            DecompositionDetail::Analysis { .. } => ProblemKind::Analysis,
        }
    }

    /// Read the decomposition a reasoning response carries.
    pub fn from_metadata(metadata: &HashMap<String, Value>) -> Option<Self> {
        metadata
            .get("decomposition")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Render for inclusion in a prompt.
    pub fn describe(&self) -> String {
        fn numbered(title: &str, steps: &[String], lines: &mut Vec<String>) {
            lines.push(format!("\n{}:", title));
            for (i, step) in steps.iter().enumerate() {
                lines.push(format!("  {}. {}", i + 1, step));
            }
        }

        let mut lines = Vec::new();

        match &self.detail {
            DecompositionDetail::Question {
                key_concepts,
                sub_questions,
                ..
            } => {
                lines.push(format!("Key Concepts: {}", key_concepts.join(", ")));
                numbered("Sub-Questions", sub_questions, &mut lines);
            }
            DecompositionDetail::Problem {
                diagnosis_steps,
                solution_steps,
                ..
            } => {
                numbered("Diagnosis Steps", diagnosis_steps, &mut lines);
                numbered("Solution Steps", solution_steps, &mut lines);
            }
            DecompositionDetail::Task { action_steps, .. } => {
                numbered("Action Steps", action_steps, &mut lines);
            }
            DecompositionDetail::Analysis {
                analysis_framework, ..
            } => {
                numbered("Analysis Framework", analysis_framework, &mut lines);
            }
        }

        lines.push(format!("\nRequires Knowledge: {}", self.requires_knowledge));
        lines.push(format!("Requires Tools: {}", self.requires_tools));
        lines.join("\n")
    }
}

fn steps(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Words longer than four letters, punctuation trimmed, at most five.
fn key_concepts(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| w.chars().count() > 4 && w.chars().all(char::is_alphabetic))
        .take(5)
        .map(str::to_string)
        .collect()
}

/// Build the fixed decomposition template for `kind`.
///
/// `requires_tools` is the template default, widened by a computational cue
/// in the text.
pub fn decompose(kind: ProblemKind, text: &str) -> Decomposition {
    let cue = has_computational_cue(text);

    match kind {
        ProblemKind::Question => {
            let concepts = key_concepts(text);
            let sub_questions = concepts
                .iter()
                .take(3)
                .map(|c| format!("What do we know about {}?", c))
                .collect();
            Decomposition {
                detail: DecompositionDetail::Question {
                    main_question: text.to_string(),
                    key_concepts: concepts,
                    sub_questions,
                },
                reasoning_steps: steps(&[
                    "Identify what is being asked",
                    "Gather relevant information",
                    "Synthesize answer from information",
                    "Verify answer completeness",
                ]),
                requires_knowledge: true,
                requires_tools: cue,
            }
        }
        ProblemKind::Problem => Decomposition {
            detail: DecompositionDetail::Problem {
                problem_statement: text.to_string(),
                diagnosis_steps: steps(&[
                    "Identify the symptom or error",
                    "Determine the root cause",
                    "Identify affected components",
                ]),
                solution_steps: steps(&[
                    "Develop potential solutions",
                    "Evaluate solution viability",
                    "Implement chosen solution",
                    "Verify solution effectiveness",
                ]),
            },
            reasoning_steps: steps(&[
                "Understand the problem context",
                "Diagnose root cause",
                "Design solution",
                "Validate solution",
            ]),
            requires_knowledge: false,
            requires_tools: true,
        },
        ProblemKind::Task => Decomposition {
            detail: DecompositionDetail::Task {
                task_description: text.to_string(),
                action_steps: steps(&[
                    "Define task requirements and goals",
                    "Break down into smaller sub-tasks",
                    "Identify dependencies between sub-tasks",
                    "Execute sub-tasks in order",
                    "Verify completion",
                ]),
            },
            reasoning_steps: steps(&[
                "Clarify task objectives",
                "Identify necessary resources",
                "Plan execution strategy",
                "Execute and monitor progress",
            ]),
            requires_knowledge: false,
            requires_tools: true,
        },
        ProblemKind::Analysis => Decomposition {
            detail: DecompositionDetail::Analysis {
                subject: text.to_string(),
                analysis_framework: steps(&[
                    "Define scope of analysis",
                    "Gather relevant data",
                    "Identify patterns and relationships",
                    "Draw conclusions",
                    "Provide recommendations",
                ]),
            },
            reasoning_steps: steps(&[
                "Understand analysis objectives",
                "Collect and organize information",
                "Apply analytical methods",
                "Synthesize findings",
            ]),
            requires_knowledge: true,
            requires_tools: cue,
        },
    }
}

/// Agent specialized in logical reasoning and problem decomposition.
pub struct ReasoningAgent {
    core: AgentCore,
}

impl ReasoningAgent {
    /// Create a new reasoning agent
    pub fn new(core: AgentCore) -> Self {
        Self { core }
    }

    fn build_prompt(
        &self,
        input: &str,
        decomposition: &Decomposition,
        context: &AgentContext,
        run: &mut AgentRun,
    ) -> String {
        let kind = decomposition.kind().as_str();
        let mut prompt = format!(
            "Task: {}\n\nType: {}{}\n\nDecomposition Analysis:\n{}\n\n\
             Now, using this structured decomposition, provide a thorough analysis that:\n\
             1. Addresses each reasoning step systematically\n\
             2. Identifies key insights and considerations\n\
             3. Provides actionable conclusions\n\n\
             Be thorough but concise.",
            input,
            kind[..1].to_uppercase(),
            &kind[1..],
            decomposition.describe()
        );

        if let Some(knowledge) = context.knowledge.as_deref().filter(|k| !k.is_empty()) {
            prompt.push_str("\n\nRelevant Knowledge:\n");
            prompt.push_str(&truncate_chars(knowledge, KNOWLEDGE_PROMPT_CHARS));
            run.think("Incorporated retrieved knowledge into reasoning");
        }

        if !context.history.is_empty() {
            let skip = context.history.len().saturating_sub(HISTORY_PROMPT_MESSAGES);
            let turns: Vec<String> = context.history[skip..]
                .iter()
                .map(|m| format!("- {}: {}", m.role.as_str(), truncate_chars(&m.content, 300)))
                .collect();
            prompt.push_str("\n\nConversation Context:\n");
            prompt.push_str(&turns.join("\n"));
            run.think("Considering conversation history");
        }

        prompt
    }
}

#[async_trait]
impl Agent for ReasoningAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Reasoning
    }

    async fn process(&self, input: &str, context: &AgentContext) -> AgentResult<AgentResponse> {
        if input.trim().is_empty() {
            return Err(AgentError::InvalidInput {
                message: "Input cannot be empty".to_string(),
            });
        }

        let start = Instant::now();
        let mut run = AgentRun::new(self.role());
        run.transition(AgentState::Analyzing);
        run.think(format!("Analyzing: {}", truncate_chars(input, 100)));

        let kind = classify(input);
        run.think(format!("Classified as: {}", kind));

        let decomposition = decompose(kind, input);
        run.think(match kind {
            ProblemKind::Question => "Decomposing question into sub-questions",
            ProblemKind::Problem => "Decomposing problem into diagnosis and solution steps",
            ProblemKind::Task => "Decomposing task into actionable steps",
            ProblemKind::Analysis => "Decomposing analysis into analytical framework",
        });
        run.think(format!(
            "Decomposed into {} reasoning steps",
            decomposition.reasoning_steps.len()
        ));

        let prompt = self.build_prompt(input, &decomposition, context, &mut run);

        run.transition(AgentState::Generating);
        let content = self.core.generate(REASONING_PROMPT, &prompt).await?;

        info!(
            problem_type = %kind,
            requires_tools = decomposition.requires_tools,
            latency_ms = start.elapsed().as_millis() as u64,
            "Reasoning analysis complete"
        );

        Ok(AgentResponse::new(content, 0.9)
            .with_thoughts(run.finish("Completed structured reasoning analysis"))
            .with_metadata("input_type", kind.as_str())
            .with_metadata("reasoning_steps_count", decomposition.reasoning_steps.len())
            .with_metadata(
                "decomposition",
                to_metadata_value(&decomposition, "reasoning.decomposition"),
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{GenerationConfig, MockModelProvider};
    use std::sync::Arc;

    fn agent(reply: &'static str) -> ReasoningAgent {
        let mut provider = MockModelProvider::new();
        provider
            .expect_generate()
            .returning(move |_, _| Ok(reply.to_string()));
        ReasoningAgent::new(AgentCore::new(Arc::new(provider), GenerationConfig::default()))
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("What is recursion?"), ProblemKind::Question);
        assert_eq!(classify("Explain this?"), ProblemKind::Question);
        assert_eq!(classify("My build is broken"), ProblemKind::Problem);
        assert_eq!(classify("Implement a cache"), ProblemKind::Task);
        assert_eq!(classify("Quarterly revenue trends"), ProblemKind::Analysis);
        assert_eq!(classify("Calculate 25 * 4 + 100"), ProblemKind::Analysis);
    }

    #[test]
    fn test_classify_is_deterministic() {
        for _ in 0..10 {
            assert_eq!(classify("What is recursion?"), ProblemKind::Question);
        }
    }

    #[test]
    fn test_question_template() {
        let d = decompose(ProblemKind::Question, "What is recursion in functional programming?");
        match &d.detail {
            DecompositionDetail::Question {
                key_concepts,
                sub_questions,
                ..
            } => {
                assert_eq!(key_concepts, &vec!["recursion", "functional", "programming"]);
                assert_eq!(sub_questions[0], "What do we know about recursion?");
            }
            other => panic!("unexpected detail: {:?}", other),
        }
        assert!(d.requires_knowledge);
        assert!(!d.requires_tools);
        assert_eq!(d.reasoning_steps.len(), 4);
    }

    #[test]
    fn test_computational_cue_requires_tools() {
        let d = decompose(classify("Calculate 25 * 4 + 100"), "Calculate 25 * 4 + 100");
        assert_eq!(d.kind(), ProblemKind::Analysis);
        assert!(d.requires_tools);

        assert!(decompose(ProblemKind::Task, "Write a poem").requires_tools);
    }

    #[test]
    fn test_decomposition_metadata_round_trip() {
        let d = decompose(ProblemKind::Problem, "fix the login bug");
        let mut metadata = HashMap::new();
        metadata.insert("decomposition".to_string(), serde_json::to_value(&d).unwrap());
        assert_eq!(metadata["decomposition"]["type"], "problem");
        assert_eq!(Decomposition::from_metadata(&metadata), Some(d));
    }

    #[tokio::test]
    async fn test_process_records_thoughts_and_metadata() {
        let agent = agent("Recursion is a function calling itself.");
        let context = AgentContext::default().with_knowledge("[Document 1]\nRecursion basics");
        let response = agent.process("What is recursion?", &context).await.unwrap();

        assert_eq!(response.content, "Recursion is a function calling itself.");
        assert_eq!(response.confidence, 0.9);
        assert_eq!(response.metadata["input_type"], "question");
        assert!(response
            .thoughts
            .iter()
            .any(|t| t.content == "Incorporated retrieved knowledge into reasoning"));
        assert_eq!(
            response.thoughts.last().unwrap().metadata["state"],
            "done"
        );
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let err = agent("x").process("   ", &AgentContext::default()).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidInput { .. }));
    }
}
