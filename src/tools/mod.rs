//! Tool registry and built-in tools.
//!
//! A [`Tool`] publishes a [`ToolSpec`] (name, description, JSON-schema
//! parameters, category) and executes with JSON arguments. The
//! [`ToolRegistry`] validates arguments against the schema, runs each call on
//! its own task under its own timeout, and turns every failure into a typed
//! [`ToolError`].

mod calculator;
mod code_exec;
pub(crate) mod expr;
mod search;
mod web_fetch;

pub use calculator::Calculator;
pub use code_exec::CodeExecution;
pub use search::{KnowledgeSearchBackend, Search, SearchBackend, SearchResult};
pub use web_fetch::WebFetch;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::ToolsConfig;
use crate::error::{ToolError, ToolResult};

/// Broad grouping of a tool's capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Computation,
    Code,
    Information,
    Web,
}

impl ToolCategory {
    /// Get the category name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::Computation => "computation",
            ToolCategory::Code => "code",
            ToolCategory::Information => "information",
            ToolCategory::Web => "web",
        }
    }
}

/// Public contract of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema object describing the arguments.
    pub parameters: Value,
    pub category: ToolCategory,
}

impl ToolSpec {
    /// Create a spec with an empty object schema
    pub fn new(name: &str, description: &str, category: ToolCategory) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
            category,
        }
    }

    /// Add a typed parameter
    pub fn with_param(mut self, name: &str, kind: &str, description: &str, required: bool) -> Self {
        self.parameters["properties"][name] = json!({
            "type": kind,
            "description": description
        });
        if required {
            if let Some(list) = self.parameters["required"].as_array_mut() {
                list.push(json!(name));
            }
        }
        self
    }

    /// Check required keys and primitive types.
    pub fn validate(&self, args: &Value) -> ToolResult<()> {
        let invalid = |message: String| ToolError::InvalidArguments {
            tool_name: self.name.clone(),
            message,
        };

        let object = args
            .as_object()
            .ok_or_else(|| invalid("arguments must be a JSON object".to_string()))?;

        if let Some(required) = self.parameters["required"].as_array() {
            for key in required.iter().filter_map(Value::as_str) {
                match object.get(key) {
                    None | Some(Value::Null) => {
                        return Err(invalid(format!("missing required parameter: {}", key)))
                    }
                    Some(Value::String(s)) if s.trim().is_empty() => {
                        return Err(invalid(format!("parameter '{}' must not be empty", key)))
                    }
                    _ => {}
                }
            }
        }

        if let Some(properties) = self.parameters["properties"].as_object() {
            for (key, schema) in properties {
                let Some(value) = object.get(key) else { continue };
                if value.is_null() {
                    continue;
                }
                let expected = schema["type"].as_str();
                let valid = match expected {
                    Some("string") => value.is_string(),
                    Some("integer") => value.is_i64() || value.is_u64(),
                    Some("number") => value.is_number(),
                    Some("boolean") => value.is_boolean(),
                    Some("array") => value.is_array(),
                    Some("object") => value.is_object(),
                    _ => true,
                };
                if !valid {
                    return Err(invalid(format!(
                        "parameter '{}' has wrong type, expected {}",
                        key,
                        expected.unwrap_or("unknown")
                    )));
                }
            }
        }

        Ok(())
    }

    /// Function-calling schema for model APIs.
    pub fn to_function_schema(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters
            }
        })
    }
}

/// Result of a single tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub result: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ToolOutput {
    /// A successful result
    pub fn success(result: impl Into<Value>) -> Self {
        Self {
            success: true,
            result: result.into(),
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// A failed result
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }

    /// A valid result reporting that the tool has no backend.
    pub fn not_configured(tool_name: &str) -> Self {
        Self::success(json!({
            "status": "not_configured",
            "message": format!("{} is not configured", tool_name)
        }))
        .with_metadata("configured", false)
    }

    /// Attach a partial result to a failure
    pub fn with_result(mut self, result: impl Into<Value>) -> Self {
        self.result = result.into();
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Text form of the result for prompts.
    pub fn render(&self) -> String {
        match (&self.result, &self.error) {
            (Value::String(s), None) => s.clone(),
            (Value::Null, Some(e)) => format!("error: {}", e),
            (result, Some(e)) => format!("error: {} (partial: {})", e, render_value(result)),
            (result, None) => render_value(result),
        }
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A named capability callable with JSON arguments.
///
/// Implementations must not share mutable state between concurrent calls.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static description of the tool.
    fn spec(&self) -> &ToolSpec;

    /// Run the tool. Failures are reported in the output, never raised.
    async fn execute(&self, args: Value) -> ToolOutput;
}

/// Name-indexed collection of tools.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout_ms: u64,
}

impl ToolRegistry {
    /// Create an empty registry with a per-call timeout
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            tools: HashMap::new(),
            timeout_ms,
        }
    }

    /// Registry holding calculator, code execution, search and web fetch.
    pub fn with_builtins(
        config: &ToolsConfig,
        search_backend: Option<Arc<dyn SearchBackend>>,
    ) -> ToolResult<Self> {
        let mut registry = Self::new(config.timeout_ms);
        registry.register(Arc::new(Calculator::new()));
        registry.register(Arc::new(CodeExecution::new(
            config.code_exec_timeout_ms,
            config.code_exec_max_steps,
        )));
        registry.register(Arc::new(Search::new(search_backend)));
        registry.register(Arc::new(WebFetch::new(config)?));
        Ok(registry)
    }

    /// Add or replace a tool
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.spec().name.clone();
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "Replaced existing tool registration");
        }
    }

    /// Look up a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Whether a tool is registered
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Specs of every tool, sorted by name
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.names()
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.spec().clone())
            .collect()
    }

    /// Function-calling schemas of every tool
    pub fn schemas(&self) -> Vec<Value> {
        self.specs().iter().map(ToolSpec::to_function_schema).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate and run a tool on its own task, bounded by the registry timeout.
    pub async fn execute(&self, name: &str, args: Value) -> ToolResult<ToolOutput> {
        let tool = self.get(name).ok_or_else(|| ToolError::NotFound {
            tool_name: name.to_string(),
        })?;
        tool.spec().validate(&args)?;

        debug!(tool = %name, "Executing tool");
        let start = Instant::now();
        let timeout_ms = self.timeout_ms;

        let mut handle = tokio::spawn(async move { tool.execute(args).await });
        let _abort = AbortOnDrop(handle.abort_handle());
        let output = match tokio::time::timeout(Duration::from_millis(timeout_ms), &mut handle).await {
            Ok(Ok(output)) => output,
            Ok(Err(join_error)) => {
                return Err(ToolError::Execution {
                    tool_name: name.to_string(),
                    message: if join_error.is_panic() {
                        "tool panicked".to_string()
                    } else {
                        join_error.to_string()
                    },
                })
            }
            Err(_) => {
                warn!(tool = %name, timeout_ms, "Tool call timed out");
                return Err(ToolError::Timeout {
                    tool_name: name.to_string(),
                    timeout_ms,
                });
            }
        };

        info!(
            tool = %name,
            success = output.success,
            latency_ms = start.elapsed().as_millis(),
            "Tool call finished"
        );
        Ok(output)
    }
}

/// Aborts a spawned tool task when the caller stops waiting for it.
struct AbortOnDrop(tokio::task::AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct EchoTool {
        spec: ToolSpec,
    }

    impl EchoTool {
        fn new() -> Self {
            Self {
                spec: ToolSpec::new("echo", "Echo text", ToolCategory::Information)
                    .with_param("text", "string", "Text to echo", true)
                    .with_param("times", "integer", "Repeat count", false),
            }
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn spec(&self) -> &ToolSpec {
            &self.spec
        }

        async fn execute(&self, args: Value) -> ToolOutput {
            ToolOutput::success(args["text"].clone())
        }
    }

    struct HangingTool {
        spec: ToolSpec,
    }

    #[async_trait]
    impl Tool for HangingTool {
        fn spec(&self) -> &ToolSpec {
            &self.spec
        }

        async fn execute(&self, _args: Value) -> ToolOutput {
            tokio::time::sleep(Duration::from_secs(30)).await;
            ToolOutput::success("late")
        }
    }

    /// Sleeps for an hour and flags `dropped` when its future is torn down.
    struct StuckTool {
        spec: ToolSpec,
        dropped: Arc<AtomicBool>,
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Tool for StuckTool {
        fn spec(&self) -> &ToolSpec {
            &self.spec
        }

        async fn execute(&self, _args: Value) -> ToolOutput {
            let _flag = SetOnDrop(Arc::clone(&self.dropped));
            tokio::time::sleep(Duration::from_secs(3600)).await;
            ToolOutput::success("late")
        }
    }

    struct PanickingTool {
        spec: ToolSpec,
    }

    #[async_trait]
    impl Tool for PanickingTool {
        fn spec(&self) -> &ToolSpec {
            &self.spec
        }

        async fn execute(&self, _args: Value) -> ToolOutput {
            panic!("boom")
        }
    }

    #[tokio::test]
    async fn test_execute_registered_tool() {
        let mut registry = ToolRegistry::new(1000);
        registry.register(Arc::new(EchoTool::new()));

        let output = registry.execute("echo", json!({"text": "hi"})).await.unwrap();
        assert!(output.success);
        assert_eq!(output.render(), "hi");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let registry = ToolRegistry::new(1000);
        let err = registry.execute("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound { ref tool_name } if tool_name == "missing"));
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let mut registry = ToolRegistry::new(1000);
        registry.register(Arc::new(EchoTool::new()));

        let err = registry.execute("echo", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));

        let err = registry
            .execute("echo", json!({"text": "x", "times": "two"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected integer"));

        let err = registry.execute("echo", json!("not an object")).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));

        let err = registry.execute("echo", json!({"text": "  "})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_timeout_and_panic_are_contained() {
        let mut registry = ToolRegistry::new(50);
        registry.register(Arc::new(HangingTool {
            spec: ToolSpec::new("hang", "Never returns", ToolCategory::Code),
        }));
        registry.register(Arc::new(PanickingTool {
            spec: ToolSpec::new("panic", "Panics", ToolCategory::Code),
        }));

        let err = registry.execute("hang", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout { timeout_ms: 50, .. }));

        let err = registry.execute("panic", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Execution { ref message, .. } if message == "tool panicked"));
    }

    #[tokio::test]
    async fn test_abandoned_call_aborts_the_tool_task() {
        let dropped = Arc::new(AtomicBool::new(false));
        let mut registry = ToolRegistry::new(600_000);
        registry.register(Arc::new(StuckTool {
            spec: ToolSpec::new("stuck", "Sleeps for an hour", ToolCategory::Code),
            dropped: Arc::clone(&dropped),
        }));

        let call = registry.execute("stuck", json!({}));
        assert!(tokio::time::timeout(Duration::from_millis(50), call).await.is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_builtins_and_schemas() {
        let registry = ToolRegistry::with_builtins(&ToolsConfig::default(), None).unwrap();
        assert_eq!(
            registry.names(),
            vec!["calculator", "execute_code", "search", "web_fetch"]
        );
        let schemas = registry.schemas();
        assert_eq!(schemas.len(), 4);
        assert_eq!(schemas[0]["type"], "function");
        assert_eq!(schemas[0]["function"]["name"], "calculator");
        assert_eq!(
            schemas[0]["function"]["parameters"]["required"],
            json!(["expression"])
        );
    }

    #[test]
    fn test_output_render() {
        assert_eq!(ToolOutput::success(json!(200)).render(), "200");
        assert_eq!(ToolOutput::failure("bad").render(), "error: bad");
        let partial = ToolOutput::failure("timed out").with_result("half");
        assert_eq!(partial.render(), "error: timed out (partial: half)");
        let nc = ToolOutput::not_configured("Search");
        assert!(nc.success);
        assert_eq!(nc.metadata["configured"], false);
    }
}
