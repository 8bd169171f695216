use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    extract_json_from_completion, truncate_chars, Agent, AgentContext, AgentCore, AgentResponse,
    AgentRole, AgentRun, AgentState,
};
use crate::error::AgentResult;
use crate::prompts::REFLECTION_PROMPT;

/// Verdict of a reflection pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    pub needs_improvement: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub critique: String,
}

impl Critique {
    /// Parse a reflection reply.
    ///
    /// A JSON reply is used as is. Anything else is treated as free-text
    /// feedback that asks for improvement when it mentions "improve".
    /// Returns the critique and whether it was structured.
    pub fn parse(reply: &str) -> (Self, bool) {
        let structured = extract_json_from_completion(reply)
            .map_err(|e| e.to_string())
            .and_then(|json| serde_json::from_str::<Critique>(json).map_err(|e| e.to_string()));

        match structured {
            Ok(critique) => (critique, true),
            Err(e) => {
                debug!(error = %e, "Reflection reply is not structured, using keyword fallback");
                let needs_improvement = reply.to_lowercase().contains("improve");
                (
                    Critique {
                        needs_improvement,
                        reason: if needs_improvement {
                            "Feedback suggests improvements".to_string()
                        } else {
                            "No improvement requested".to_string()
                        },
                        critique: reply.trim().to_string(),
                    },
                    false,
                )
            }
        }
    }
}

/// Agent specialized in critiquing a draft answer.
///
/// Reflection is advisory; the orchestrator decides whether to act on it.
pub struct ReflectionAgent {
    core: AgentCore,
}

impl ReflectionAgent {
    /// Create a new reflection agent
    pub fn new(core: AgentCore) -> Self {
        Self { core }
    }
}

#[async_trait]
impl Agent for ReflectionAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Reflection
    }

    /// `input` is the draft answer under review.
    async fn process(&self, input: &str, context: &AgentContext) -> AgentResult<AgentResponse> {
        let mut run = AgentRun::new(self.role());
        run.transition(AgentState::Analyzing);
        run.think(format!("Reflecting on: {}", truncate_chars(input, 100)));

        let mut prompt = format!(
            "Analyze this response and provide constructive feedback:\n\n{}\n\n\
             Evaluate:\n\
             1. Clarity and coherence\n\
             2. Accuracy and completeness\n\
             3. Potential improvements\n\
             4. Any issues or concerns",
            input
        );
        prompt.push_str(&format!(
            "\n\nOriginal task: {}",
            context.original_task.as_deref().unwrap_or("N/A")
        ));
        if let Some(tool_results) = &context.tool_results {
            prompt.push_str("\n\nTool results the response should reflect:\n");
            prompt.push_str(tool_results);
        }

        run.transition(AgentState::Generating);
        let reply = self.core.generate(REFLECTION_PROMPT, &prompt).await?;
        let (critique, structured) = Critique::parse(&reply);
        if !structured {
            warn!("Reflection reply was not valid JSON");
        }

        let verdict = if critique.needs_improvement {
            format!("Reflection complete: improvement suggested ({})", critique.reason)
        } else {
            "Reflection complete: response is acceptable".to_string()
        };
        let content = if critique.critique.is_empty() {
            critique.reason.clone()
        } else {
            critique.critique.clone()
        };

        Ok(AgentResponse::new(content, 0.8)
            .with_thoughts(run.finish(verdict))
            .with_metadata("needs_improvement", critique.needs_improvement)
            .with_metadata("reason", critique.reason)
            .with_metadata("structured", structured))
    }
}
