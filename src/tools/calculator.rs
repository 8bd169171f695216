use async_trait::async_trait;
use serde_json::{json, Value};

use super::expr::{self, format_number, Constants};
use super::{Tool, ToolCategory, ToolOutput, ToolSpec};

/// Arithmetic over a fixed operator and function whitelist.
pub struct Calculator {
    spec: ToolSpec,
}

impl Calculator {
    /// Create the calculator tool
    pub fn new() -> Self {
        Self {
            spec: ToolSpec::new(
                "calculator",
                "Evaluate an arithmetic expression. Supports + - * / // % ^ **, parentheses, \
                 sqrt, sin, cos, tan, log, ln, log10, log2, exp, abs, round, floor, ceil, \
                 min, max, pow and the constants pi, e, tau.",
                ToolCategory::Computation,
            )
            .with_param("expression", "string", "Expression to evaluate, e.g. 25 * 4 + 100", true),
        }
    }

    /// Evaluate an expression to a number.
    pub fn evaluate(expression: &str) -> Result<f64, expr::ExprError> {
        let parsed = expr::parse(expression)?;
        expr::evaluate(&parsed, &Constants)?.as_num()
    }
}

impl Default for Calculator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for Calculator {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value) -> ToolOutput {
        let Some(expression) = args["expression"].as_str() else {
            return ToolOutput::failure("missing expression");
        };

        match Self::evaluate(expression) {
            Ok(value) => {
                let result = if value.fract() == 0.0 && value.abs() < 9.0e15 {
                    json!(value as i64)
                } else {
                    json!(value)
                };
                ToolOutput::success(result)
                    .with_metadata("expression", expression)
                    .with_metadata("formatted", format_number(value))
            }
            Err(e) => ToolOutput::failure(format!("Invalid expression '{}': {}", expression, e))
                .with_metadata("expression", expression),
        }
    }
}
