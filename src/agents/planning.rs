use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::{truncate_chars, Agent, AgentContext, AgentCore, AgentResponse, AgentRole, AgentRun, AgentState};
use crate::error::AgentResult;
use crate::prompts::PLANNING_PROMPT;

static NUMBERED_STEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+\s*[.)]\s+(.+)$").expect("step pattern is valid"));

/// Numbered steps found in a plan, in order.
pub fn plan_steps(plan: &str) -> Vec<String> {
    plan.lines()
        .filter_map(|line| NUMBERED_STEP.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .collect()
}

/// Agent specialized in creating action plans.
pub struct PlanningAgent {
    core: AgentCore,
}

impl PlanningAgent {
    /// Create a new planning agent
    pub fn new(core: AgentCore) -> Self {
        Self { core }
    }

    fn build_prompt(input: &str, context: &AgentContext) -> String {
        let mut prompt = format!(
            "Task: {}\n\nCreate a detailed action plan:\n\
             1. List specific steps needed\n\
             2. Identify dependencies\n\
             3. Note any prerequisites\n\
             4. Suggest success criteria\n\n\
             Format as a numbered list with clear steps.",
            input
        );

        if let Some(reasoning) = &context.reasoning {
            prompt.push_str("\n\nReasoning Analysis:\n");
            prompt.push_str(reasoning);
        }
        if let Some(decomposition) = &context.decomposition {
            prompt.push_str("\n\nDecomposition:\n");
            prompt.push_str(&decomposition.describe());
        }
        if let Some(knowledge) = &context.knowledge {
            prompt.push_str("\n\nRelevant Knowledge:\n");
            prompt.push_str(&truncate_chars(knowledge, 1000));
        }
        if let Some(tool_results) = &context.tool_results {
            prompt.push_str("\n\nTool Results:\n");
            prompt.push_str(tool_results);
        }
        prompt
    }
}

#[async_trait]
impl Agent for PlanningAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Planning
    }

    async fn process(&self, input: &str, context: &AgentContext) -> AgentResult<AgentResponse> {
        let mut run = AgentRun::new(self.role());
        run.transition(AgentState::Analyzing);
        run.think(format!("Creating plan for: {}", truncate_chars(input, 100)));

        let prompt = Self::build_prompt(input, context);
        run.transition(AgentState::Generating);
        let plan = self.core.generate(PLANNING_PROMPT, &prompt).await?;
        let steps = plan_steps(&plan);

        Ok(AgentResponse::new(plan, 0.85)
            .with_thoughts(run.finish(format!("Plan created with {} steps", steps.len())))
            .with_metadata("steps", steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AgentError, ModelError};
    use crate::provider::{GenerationConfig, MockModelProvider};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn test_plan_steps() {
        let plan = "Plan:\n1. Gather data\n2) Clean it\n  3. Train model\nNotes: none";
        assert_eq!(plan_steps(plan), vec!["Gather data", "Clean it", "Train model"]);
        assert!(plan_steps("no steps").is_empty());
    }

    #[tokio::test]
    async fn test_prompt_includes_reasoning() {
        let mut provider = MockModelProvider::new();
        provider
            .expect_generate()
            .withf(|prompt, config| {
                prompt.contains("Reasoning Analysis:\nearlier analysis")
                    && config.system.as_deref() == Some(PLANNING_PROMPT)
            })
            .returning(|_, _| Ok("1. First\n2. Second".to_string()));

        let agent = PlanningAgent::new(AgentCore::new(Arc::new(provider), GenerationConfig::default()));
        let context = AgentContext {
            reasoning: Some("earlier analysis".to_string()),
            ..AgentContext::default()
        };
        let response = agent.process("Ship the release", &context).await.unwrap();

        assert_eq!(response.confidence, 0.85);
        assert_eq!(response.metadata["steps"], serde_json::json!(["First", "Second"]));
        assert_eq!(response.thoughts.len(), 2);
    }

    #[tokio::test]
    async fn test_model_failure_propagates() {
        let mut provider = MockModelProvider::new();
        provider.expect_generate().returning(|_, _| {
            Err(ModelError::Timeout { timeout_ms: 10 })
        });
        let agent = PlanningAgent::new(AgentCore::new(Arc::new(provider), GenerationConfig::default()));

        let err = agent.process("x", &AgentContext::default()).await.unwrap_err();
        assert!(matches!(err, AgentError::Model(ModelError::Timeout { .. })));
    }
}
