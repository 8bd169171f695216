use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::join_all;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{
    to_metadata_value, truncate_chars, Action, Agent, AgentContext, AgentCore, AgentResponse, AgentRole, AgentRun,
    AgentState,
};
use crate::error::AgentResult;
use crate::prompts::TOOL_USER_PROMPT;
use crate::tools::ToolRegistry;

static ARITHMETIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\s*[+\-*/^%]\s*\d+").expect("arithmetic pattern is valid"));
static MATH_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(sqrt|sin|cos|tan|log|ln|exp|pow|abs)\s*\(").expect("math call pattern is valid")
});
static CALC_VERB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(calculate|compute|solve)\b").expect("verb pattern is valid"));
static EXPRESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9.]+(?:\s*(?:\*\*|[+\-*/^%])\s*\(?\s*[0-9.]+\s*\)?)+").expect("expression pattern is valid")
});
static TRAILING_OPS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\s*(?:\*\*|[+\-*/^%])\s*[0-9.]+)+").expect("trailing pattern is valid")
});
static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:python|py)?[ \t]*\r?\n(.*?)\r?\n?```").expect("fence pattern is valid")
});
static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`\n]+)`").expect("inline pattern is valid"));
static CODE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(def|import|from)\s").expect("code line pattern is valid"));
static URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"https?://[^\s<>"')\]]+"#).expect("url pattern is valid"));
static SEARCH_QUERY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:search for|search|find information about|find|look up)\s+(.+?)(?:[.?!]\s|[.?!]?$)")
        .expect("search pattern is valid")
});

const SEARCH_PHRASES: [&str; 6] = [
    "search",
    "find information",
    "look up",
    "what is",
    "who is",
    "tell me about",
];

/// Whether `text` contains a cue that only a tool can answer well:
/// an arithmetic expression, a math function call, a calculate/compute verb,
/// a code fence or a URL.
pub fn has_computational_cue(text: &str) -> bool {
    ARITHMETIC.is_match(text)
        || MATH_CALL.is_match(text)
        || CALC_VERB.is_match(text)
        || text.contains("```")
        || URL.is_match(text)
}

/// A tool the request appears to need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolNeed {
    pub tool: &'static str,
    pub reason: &'static str,
}

/// Detect which tools a request needs, in execution order.
pub fn detect_tools(text: &str) -> Vec<ToolNeed> {
    let lower = text.to_lowercase();
    let mut needs = Vec::new();

    if ARITHMETIC.is_match(text) || MATH_CALL.is_match(text) {
        needs.push(ToolNeed {
            tool: "calculator",
            reason: "Task involves mathematical calculations",
        });
    }
    if text.contains("```python") || text.contains("```py") || CODE_LINE.is_match(text) {
        needs.push(ToolNeed {
            tool: "execute_code",
            reason: "Task involves code execution",
        });
    }
    if SEARCH_PHRASES.iter().any(|p| lower.contains(p)) {
        needs.push(ToolNeed {
            tool: "search",
            reason: "Task requires external information",
        });
    }
    if URL.is_match(text) || lower.contains("website") || lower.contains("url") {
        needs.push(ToolNeed {
            tool: "web_fetch",
            reason: "Task involves web content",
        });
    }
    needs
}

/// Turns request text into arguments for one tool.
///
/// Returning `None` means the arguments could not be found and the tool is
/// skipped.
pub trait ArgumentExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Option<Value>;
}

/// Finds an arithmetic expression or math call.
pub struct CalculatorArgs;

impl ArgumentExtractor for CalculatorArgs {
    fn extract(&self, text: &str) -> Option<Value> {
        let expression = if let Some(m) = MATH_CALL.find(text) {
            // Take the call through its closing parenthesis.
            let rest = &text[m.start()..];
            let mut depth = 0usize;
            let mut end = None;
            for (i, c) in rest.char_indices() {
                match c {
                    '(' => depth += 1,
                    ')' => {
                        depth = depth.saturating_sub(1);
                        if depth == 0 {
                            end = Some(i + 1);
                            break;
                        }
                    }
                    _ => {}
                }
            }
            let call_end = end?;
            // Keep trailing arithmetic such as `sqrt(16) + 2`.
            let tail = TRAILING_OPS.find(&rest[call_end..]).map_or(0, |t| t.end());
            rest[..call_end + tail].to_string()
        } else {
            EXPRESSION.find(text)?.as_str().to_string()
        };

        let expression = expression.trim().trim_end_matches(['.', '?', '!']).trim();
        (!expression.is_empty()).then(|| json!({ "expression": expression }))
    }
}

/// Takes the fenced block, an inline code span or the code lines.
pub struct CodeArgs;

impl ArgumentExtractor for CodeArgs {
    fn extract(&self, text: &str) -> Option<Value> {
        let code = if let Some(caps) = CODE_FENCE.captures(text) {
            caps.get(1)?.as_str().to_string()
        } else if let Some(caps) = INLINE_CODE.captures(text) {
            caps.get(1)?.as_str().to_string()
        } else {
            return None;
        };
        let code = code.trim_end();
        (!code.trim().is_empty()).then(|| json!({ "code": code, "language": "python" }))
    }
}

/// Uses the phrase after a search verb, or the first 100 characters.
pub struct SearchArgs;

impl ArgumentExtractor for SearchArgs {
    fn extract(&self, text: &str) -> Option<Value> {
        let query = SEARCH_QUERY
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|q| !q.is_empty())
            .unwrap_or_else(|| text.trim().chars().take(100).collect());
        (!query.is_empty()).then(|| json!({ "query": query, "max_results": 5 }))
    }
}

/// Takes the first http(s) URL.
pub struct WebFetchArgs;

impl ArgumentExtractor for WebFetchArgs {
    fn extract(&self, text: &str) -> Option<Value> {
        let url = URL.find(text)?.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
        Some(json!({ "url": url }))
    }
}

/// Agent that detects, runs and explains tools.
pub struct ToolUserAgent {
    core: AgentCore,
    registry: Arc<ToolRegistry>,
    extractors: HashMap<String, Arc<dyn ArgumentExtractor>>,
}

impl ToolUserAgent {
    /// Create the agent with the built-in extractors
    pub fn new(core: AgentCore, registry: Arc<ToolRegistry>) -> Self {
        let mut extractors: HashMap<String, Arc<dyn ArgumentExtractor>> = HashMap::new();
        extractors.insert("calculator".to_string(), Arc::new(CalculatorArgs));
        extractors.insert("execute_code".to_string(), Arc::new(CodeArgs));
        extractors.insert("search".to_string(), Arc::new(SearchArgs));
        extractors.insert("web_fetch".to_string(), Arc::new(WebFetchArgs));
        Self {
            core,
            registry,
            extractors,
        }
    }

    /// Replace the extractor used for `tool`
    pub fn with_extractor(mut self, tool: &str, extractor: Arc<dyn ArgumentExtractor>) -> Self {
        self.extractors.insert(tool.to_string(), extractor);
        self
    }
}

#[async_trait]
impl Agent for ToolUserAgent {
    fn role(&self) -> AgentRole {
        AgentRole::ToolUser
    }

    async fn process(&self, input: &str, _context: &AgentContext) -> AgentResult<AgentResponse> {
        let start = Instant::now();
        let mut run = AgentRun::new(self.role());
        run.transition(AgentState::Analyzing);
        run.think(format!("Analyzing task for tool usage: {}", truncate_chars(input, 100)));

        let needs = detect_tools(input);
        run.think(format!("Tool analysis: identified {} potential tool(s)", needs.len()));

        let mut calls: Vec<(&'static str, Value)> = Vec::new();
        for need in &needs {
            if !self.registry.contains(need.tool) {
                run.think(format!("Tool {} is not registered, skipping", need.tool));
                continue;
            }
            match self.extractors.get(need.tool).and_then(|e| e.extract(input)) {
                Some(args) => calls.push((need.tool, args)),
                None => run.think(format!("Could not extract parameters for {}, skipping", need.tool)),
            }
        }

        let mut actions = Vec::with_capacity(calls.len());
        let mut lines = Vec::with_capacity(calls.len());

        if !calls.is_empty() {
            run.transition(AgentState::ExecutingActions);
            for (tool, args) in &calls {
                run.think(format!("Executing {} with parameters: {}", tool, args));
            }

            let outcomes = join_all(
                calls
                    .iter()
                    .map(|(tool, args)| self.registry.execute(tool, args.clone())),
            )
            .await;

            for ((tool, args), outcome) in calls.iter().zip(outcomes) {
                let mut action = Action::new(format!("tool_{}", tool), args.clone());
                match outcome {
                    Ok(output) if output.success => {
                        run.think(format!("Tool {} executed successfully", tool));
                        lines.push(format!("Tool '{}' result: {}", tool, output.render()));
                        action.result = Some(output.result);
                    }
                    Ok(output) => {
                        let error = output.error.clone().unwrap_or_else(|| "unknown error".to_string());
                        run.think(format!("Tool {} failed: {}", tool, error));
                        lines.push(format!("Tool '{}' error: {}", tool, output.render()));
                        if !output.result.is_null() {
                            action.result = Some(output.result);
                        }
                        action.error = Some(error);
                    }
                    Err(e) => {
                        run.think(format!("Tool {} failed: {}", tool, e));
                        lines.push(format!("Tool '{}' error: {}", tool, e));
                        action.error = Some(e.to_string());
                    }
                }
                actions.push(action);
            }
        }

        run.transition(AgentState::Generating);
        let summary = lines.join("\n");
        let (content, closing) = if actions.is_empty() {
            run.think("No tools needed for this task");
            (
                self.core.generate(TOOL_USER_PROMPT, input).await?,
                "Answered without tools",
            )
        } else {
            let prompt = format!(
                "Task: {}\n\nTool Results:\n{}\n\n\
                 Based on these tool results, provide a clear, helpful response to the original task.\n\
                 Explain the results in a user-friendly way.",
                input, summary
            );
            match self.core.generate(TOOL_USER_PROMPT, &prompt).await {
                Ok(text) => (text, "Synthesized response from tool results"),
                Err(e) => {
                    warn!(error = %e, "Tool result synthesis failed, returning raw results");
                    run.think(format!("Synthesis failed, using raw tool results: {}", e));
                    (summary.clone(), "Returned raw tool results")
                }
            }
        };

        let tools_used: Vec<String> = calls.iter().map(|(tool, _)| tool.to_string()).collect();
        let failed = actions.iter().filter(|a| !a.is_success()).count();
        info!(
            tools = ?tools_used,
            failed,
            latency_ms = start.elapsed().as_millis() as u64,
            "Tool stage complete"
        );

        let confidence = if actions.is_empty() { 0.7 } else { 0.85 };
        Ok(AgentResponse::new(content, confidence)
            .with_thoughts(run.finish(closing))
            .with_metadata("tool_count", actions.len())
            .with_metadata("tools_used", tools_used)
            .with_metadata("tool_summary", summary)
            .with_metadata("tool_analysis", to_metadata_value(&needs, "tool_analysis"))
            .with_actions(actions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolsConfig;
    use crate::provider::{GenerationConfig, MockModelProvider};
    use crate::tools::{Calculator, Tool, ToolCategory, ToolOutput, ToolSpec};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn extract(extractor: &dyn ArgumentExtractor, text: &str) -> Option<String> {
        extractor
            .extract(text)
            .map(|v| v.as_object().unwrap().values().find_map(Value::as_str).unwrap().to_string())
    }

    #[test]
    fn test_detect_tools() {
        let names = |text: &str| detect_tools(text).into_iter().map(|n| n.tool).collect::<Vec<_>>();
        assert_eq!(names("Calculate 25 * 4 + 100"), vec!["calculator"]);
        assert_eq!(names("what is sqrt(16)"), vec!["calculator", "search"]);
        assert_eq!(names("Run this:\n```python\nprint(1)\n```"), vec!["execute_code"]);
        assert_eq!(names("Summarize https://example.com/a"), vec!["web_fetch"]);
        assert!(names("Write a haiku").is_empty());
    }

    #[test]
    fn test_computational_cue() {
        assert!(has_computational_cue("Calculate the area"));
        assert!(has_computational_cue("2+2"));
        assert!(has_computational_cue("see http://x.y"));
        assert!(!has_computational_cue("What is Python?"));
    }

    #[test]
    fn test_calculator_extraction() {
        assert_eq!(extract(&CalculatorArgs, "Calculate 25 * 4 + 100").as_deref(), Some("25 * 4 + 100"));
        assert_eq!(extract(&CalculatorArgs, "What is 2.5 * 4?").as_deref(), Some("2.5 * 4"));
        assert_eq!(extract(&CalculatorArgs, "compute sqrt(16) please").as_deref(), Some("sqrt(16)"));
        assert_eq!(extract(&CalculatorArgs, "what is sqrt(16) + 2?").as_deref(), Some("sqrt(16) + 2"));
        assert_eq!(extract(&CalculatorArgs, "Calculate the area"), None);
    }

    #[test]
    fn test_code_and_url_extraction() {
        assert_eq!(
            extract(&CodeArgs, "Run:\n```python\nx = 2\nprint(x)\n```").as_deref(),
            Some("x = 2\nprint(x)")
        );
        assert_eq!(extract(&CodeArgs, "no code here"), None);
        assert_eq!(
            extract(&WebFetchArgs, "Read https://example.com/page.").as_deref(),
            Some("https://example.com/page")
        );
        assert_eq!(extract(&SearchArgs, "Search for rust traits.").as_deref(), Some("rust traits"));
    }

    struct NoArgs;

    impl ArgumentExtractor for NoArgs {
        fn extract(&self, _text: &str) -> Option<Value> {
            None
        }
    }

    fn agent(provider: MockModelProvider) -> ToolUserAgent {
        let registry = ToolRegistry::with_builtins(&ToolsConfig::default(), None).unwrap();
        ToolUserAgent::new(
            AgentCore::new(Arc::new(provider), GenerationConfig::default()),
            Arc::new(registry),
        )
    }

    #[tokio::test]
    async fn test_failing_tool_does_not_block_others() {
        let mut provider = MockModelProvider::new();
        provider
            .expect_generate()
            .returning(|prompt, _| Ok(format!("summary of: {}", prompt)));

        let input = "Calculate 1 / 0 and run\n```python\nprint('ok')\n```";
        let response = agent(provider).process(input, &AgentContext::default()).await.unwrap();

        assert_eq!(response.actions.len(), 2);
        let calc = &response.actions[0];
        assert_eq!(calc.action_type, "tool_calculator");
        assert!(!calc.is_success());
        let code = &response.actions[1];
        assert_eq!(code.action_type, "tool_execute_code");
        assert!(code.is_success());
        assert_eq!(code.result, Some(json!("ok\n")));
        assert_eq!(response.confidence, 0.85);
    }

    /// Stands in for `web_fetch` and never answers.
    struct UnresponsiveFetch {
        spec: ToolSpec,
    }

    #[async_trait]
    impl Tool for UnresponsiveFetch {
        fn spec(&self) -> &ToolSpec {
            &self.spec
        }

        async fn execute(&self, _args: Value) -> ToolOutput {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            ToolOutput::success("late")
        }
    }

    #[tokio::test]
    async fn test_hung_tool_times_out_without_stalling_siblings() {
        let mut provider = MockModelProvider::new();
        provider
            .expect_generate()
            .returning(|prompt, _| Ok(format!("summary of: {}", prompt)));

        let mut registry = ToolRegistry::new(100);
        registry.register(Arc::new(Calculator::new()));
        registry.register(Arc::new(UnresponsiveFetch {
            spec: ToolSpec::new("web_fetch", "Never answers", ToolCategory::Web)
                .with_param("url", "string", "Page to fetch", true),
        }));
        let agent = ToolUserAgent::new(
            AgentCore::new(Arc::new(provider), GenerationConfig::default()),
            Arc::new(registry),
        );

        let start = Instant::now();
        let response = agent
            .process(
                "Calculate 25 * 4 + 100 and read https://example.com/slow",
                &AgentContext::default(),
            )
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));

        assert_eq!(response.actions.len(), 2);
        let calc = &response.actions[0];
        assert_eq!(calc.action_type, "tool_calculator");
        assert!(calc.is_success());
        assert_eq!(calc.result, Some(json!(200)));

        let fetch = &response.actions[1];
        assert_eq!(fetch.action_type, "tool_web_fetch");
        assert!(!fetch.is_success());
        assert_eq!(
            fetch.error.as_deref(),
            Some("Tool web_fetch timed out after 100ms")
        );
        assert!(response.content.contains("Tool 'calculator' result: 200"));
    }

    #[tokio::test]
    async fn test_extraction_failure_skips_tool() {
        let mut provider = MockModelProvider::new();
        provider.expect_generate().returning(|_, _| Ok("direct".to_string()));

        let agent = agent(provider).with_extractor("calculator", Arc::new(NoArgs));
        let response = agent
            .process("Calculate 2 + 2", &AgentContext::default())
            .await
            .unwrap();

        assert!(response.actions.is_empty());
        assert_eq!(response.content, "direct");
        assert_eq!(response.confidence, 0.7);
        assert!(response
            .thoughts
            .iter()
            .any(|t| t.content == "Could not extract parameters for calculator, skipping"));
    }

    #[tokio::test]
    async fn test_synthesis_failure_returns_raw_results() {
        let mut provider = MockModelProvider::new();
        provider.expect_generate().returning(|_, _| {
            Err(crate::error::ModelError::Unavailable {
                message: "down".to_string(),
                retries: 3,
            })
        });

        let response = agent(provider)
            .process("Calculate 25 * 4 + 100", &AgentContext::default())
            .await
            .unwrap();
        assert_eq!(response.content, "Tool 'calculator' result: 200");
    }
}
