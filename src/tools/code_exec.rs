//! Sandboxed execution of a small Python-like script language.
//!
//! Supported: assignment (`=`, `+=`, `-=`, `*=`, `/=`), `print(...)`,
//! `if`/`elif`/`else`, `while`, `for x in range(...)`, `pass`, `break`,
//! `continue`, and the expression language of the calculator plus `len`,
//! `str`, `int`, `float`. There is no import, no attribute access and no
//! function that touches the filesystem or network. Every call gets a fresh
//! namespace and runs on a blocking thread under a step budget and a
//! wall-clock deadline; on timeout the output printed so far is returned.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value as Json};
use thiserror::Error;
use tracing::{debug, warn};

use super::expr::{self, BinOp, Expr, ExprError, Scope, Token, Value};
use super::{Tool, ToolCategory, ToolOutput, ToolSpec};

/// Most bytes a script may print.
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Deepest nesting of `if`/`while`/`for` blocks.
const MAX_BLOCK_DEPTH: usize = 32;

const BLOCKED_BLOCKS: [&str; 7] = ["def", "class", "with", "try", "except", "finally", "async"];

#[derive(Debug, Error)]
enum ExecError {
    #[error("SyntaxError on line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("Error on line {line}: {error}")]
    Runtime { line: usize, error: ExprError },

    #[error("Step limit of {0} exceeded")]
    StepLimit(u64),

    #[error("Execution timed out after {0}ms")]
    Timeout(u64),
}

/// Stops the interpreter thread when the owning future is dropped.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

fn syntax(line: usize, message: impl Into<String>) -> ExecError {
    ExecError::Syntax {
        line,
        message: message.into(),
    }
}

// ============================================================================
// Parsing
// ============================================================================

#[derive(Debug)]
struct Line<'a> {
    number: usize,
    indent: usize,
    text: &'a str,
}

#[derive(Debug)]
enum Stmt {
    Assign {
        target: String,
        op: Option<BinOp>,
        value: Expr,
    },
    Expr(Expr),
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    While {
        condition: Expr,
        body: Vec<Node>,
    },
    For {
        var: String,
        range: Vec<Expr>,
        body: Vec<Node>,
    },
    Pass,
    Break,
    Continue,
}

#[derive(Debug)]
struct Node {
    line: usize,
    stmt: Stmt,
}

/// Drop a trailing `#` comment that is not inside a string literal.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match quote {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '#' => return &line[..i],
            None => {}
        }
    }
    line
}

fn split_lines(code: &str) -> Vec<Line<'_>> {
    code.lines()
        .enumerate()
        .filter_map(|(i, raw)| {
            let text = strip_comment(raw).trim_end();
            if text.trim().is_empty() {
                return None;
            }
            let indent = text
                .chars()
                .take_while(|c| c.is_whitespace())
                .map(|c| if c == '\t' { 4 } else { 1 })
                .sum();
            Some(Line {
                number: i + 1,
                indent,
                text: text.trim_start(),
            })
        })
        .collect()
}

fn parse_program(code: &str) -> Result<Vec<Node>, ExecError> {
    let lines = split_lines(code);
    let Some(first) = lines.first() else {
        return Ok(Vec::new());
    };
    let mut pos = 0;
    let program = parse_block(&lines, &mut pos, first.indent, 0)?;
    match lines.get(pos) {
        Some(line) => Err(syntax(line.number, "unindent does not match any outer level")),
        None => Ok(program),
    }
}

fn keyword_rest<'a>(header: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = header.strip_prefix(keyword)?;
    if rest.starts_with(|c: char| c.is_whitespace() || c == '(') {
        Some(rest.trim())
    } else {
        None
    }
}

fn parse_expr(text: &str, line: usize) -> Result<Expr, ExecError> {
    expr::parse(text).map_err(|e| syntax(line, e.to_string()))
}

fn parse_body(
    lines: &[Line<'_>],
    pos: &mut usize,
    parent: usize,
    line: usize,
    depth: usize,
) -> Result<Vec<Node>, ExecError> {
    if depth >= MAX_BLOCK_DEPTH {
        return Err(syntax(line, "too many nested blocks"));
    }
    match lines.get(*pos) {
        Some(next) if next.indent > parent => parse_block(lines, pos, next.indent, depth + 1),
        _ => Err(syntax(line, "expected an indented block")),
    }
}

fn parse_block(
    lines: &[Line<'_>],
    pos: &mut usize,
    indent: usize,
    depth: usize,
) -> Result<Vec<Node>, ExecError> {
    let mut nodes = Vec::new();

    while let Some(line) = lines.get(*pos) {
        if line.indent < indent {
            break;
        }
        if line.indent > indent {
            return Err(syntax(line.number, "unexpected indent"));
        }
        *pos += 1;

        let stmt = match line.text.strip_suffix(':') {
            Some(header) => parse_compound(lines, pos, indent, depth, line, header.trim())?,
            None => parse_simple(line)?,
        };
        nodes.push(Node {
            line: line.number,
            stmt,
        });
    }

    Ok(nodes)
}

fn parse_compound(
    lines: &[Line<'_>],
    pos: &mut usize,
    indent: usize,
    depth: usize,
    line: &Line<'_>,
    header: &str,
) -> Result<Stmt, ExecError> {
    if let Some(condition) = keyword_rest(header, "if") {
        let condition = parse_expr(condition, line.number)?;
        let body = parse_body(lines, pos, indent, line.number, depth)?;
        let mut branches = vec![(condition, body)];
        let mut otherwise = Vec::new();

        while let Some(next) = lines.get(*pos) {
            if next.indent != indent {
                break;
            }
            let Some(next_header) = next.text.strip_suffix(':').map(str::trim) else {
                break;
            };
            if let Some(condition) = keyword_rest(next_header, "elif") {
                *pos += 1;
                let condition = parse_expr(condition, next.number)?;
                let body = parse_body(lines, pos, indent, next.number, depth)?;
                branches.push((condition, body));
            } else if next_header == "else" {
                *pos += 1;
                otherwise = parse_body(lines, pos, indent, next.number, depth)?;
                break;
            } else {
                break;
            }
        }
        return Ok(Stmt::If {
            branches,
            otherwise,
        });
    }

    if let Some(condition) = keyword_rest(header, "while") {
        let condition = parse_expr(condition, line.number)?;
        let body = parse_body(lines, pos, indent, line.number, depth)?;
        return Ok(Stmt::While { condition, body });
    }

    if let Some(rest) = keyword_rest(header, "for") {
        let (var, iterable) = rest
            .split_once(" in ")
            .ok_or_else(|| syntax(line.number, "expected 'for <name> in range(...)'"))?;
        let var = var.trim();
        if var.is_empty() || !var.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(syntax(line.number, format!("invalid loop variable '{}'", var)));
        }
        let range = match parse_expr(iterable.trim(), line.number)? {
            Expr::Call(name, args) if name == "range" && (1..=3).contains(&args.len()) => args,
            _ => return Err(syntax(line.number, "only 'range(...)' can be iterated")),
        };
        let body = parse_body(lines, pos, indent, line.number, depth)?;
        return Ok(Stmt::For {
            var: var.to_string(),
            range,
            body,
        });
    }

    let keyword = header.split_whitespace().next().unwrap_or(header);
    if keyword == "elif" || keyword == "else" {
        return Err(syntax(line.number, format!("'{}' without matching 'if'", keyword)));
    }
    if BLOCKED_BLOCKS.contains(&keyword) {
        return Err(syntax(
            line.number,
            format!("'{}' blocks are not supported in the sandbox", keyword),
        ));
    }
    Err(syntax(line.number, "invalid syntax"))
}

fn parse_simple(line: &Line<'_>) -> Result<Stmt, ExecError> {
    let keyword = line.text.split_whitespace().next().unwrap_or("");
    match keyword {
        "pass" if line.text == "pass" => return Ok(Stmt::Pass),
        "break" if line.text == "break" => return Ok(Stmt::Break),
        "continue" if line.text == "continue" => return Ok(Stmt::Continue),
        "import" | "from" => {
            return Err(syntax(line.number, "imports are not allowed in the sandbox"))
        }
        "return" | "del" | "global" | "nonlocal" | "yield" | "lambda" | "raise" => {
            return Err(syntax(
                line.number,
                format!("'{}' is not supported in the sandbox", keyword),
            ))
        }
        _ => {}
    }

    let tokens = expr::tokenize(line.text).map_err(|e| syntax(line.number, e.to_string()))?;
    let end = line.text.chars().count();

    if let [(Token::Ident(target), _), (Token::Op(op), _), ..] = tokens.as_slice() {
        let op = match *op {
            "=" => Some(None),
            "+=" => Some(Some(BinOp::Add)),
            "-=" => Some(Some(BinOp::Sub)),
            "*=" => Some(Some(BinOp::Mul)),
            "/=" => Some(Some(BinOp::Div)),
            _ => None,
        };
        if let Some(op) = op {
            let target = target.clone();
            let value = expr::parse_tokens(tokens[2..].to_vec(), end)
                .map_err(|e| syntax(line.number, e.to_string()))?;
            return Ok(Stmt::Assign { target, op, value });
        }
    }

    expr::parse_tokens(tokens, end)
        .map(Stmt::Expr)
        .map_err(|e| syntax(line.number, e.to_string()))
}

// ============================================================================
// Execution
// ============================================================================

/// Output captured from a script, readable while it runs.
#[derive(Clone, Default)]
struct OutputBuffer(Arc<Mutex<String>>);

impl OutputBuffer {
    fn append(&self, text: &str) -> bool {
        let mut guard = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.len() + text.len() > MAX_OUTPUT_BYTES {
            return false;
        }
        guard.push_str(text);
        true
    }

    fn contents(&self) -> String {
        match self.0.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
}

struct Interpreter {
    vars: HashMap<String, Value>,
    output: OutputBuffer,
    cancel: Arc<AtomicBool>,
    steps: u64,
    max_steps: u64,
    deadline: Instant,
    timeout_ms: u64,
}

impl Scope for Interpreter {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.vars
            .get(name)
            .cloned()
            .or_else(|| expr::constant(name).map(Value::Num))
    }

    fn call(&self, name: &str, args: &[Value]) -> Option<Result<Value, ExprError>> {
        let one = |args: &[Value]| -> Result<(), ExprError> {
            if args.len() == 1 {
                Ok(())
            } else {
                Err(ExprError::Arity {
                    name: name.to_string(),
                    expected: "1".to_string(),
                    got: args.len(),
                })
            }
        };

        let result = match name {
            "print" => {
                let line = args.iter().map(Value::to_string).collect::<Vec<_>>().join(" ");
                if self.output.append(&format!("{}\n", line)) {
                    Ok(Value::None)
                } else {
                    Err(ExprError::Domain("output limit exceeded".to_string()))
                }
            }
            "len" => one(args).and_then(|_| match &args[0] {
                Value::Str(s) => Ok(Value::Num(s.chars().count() as f64)),
                other => Err(ExprError::Type(format!(
                    "object of type {} has no len()",
                    other.type_name()
                ))),
            }),
            "str" => one(args).map(|_| Value::Str(args[0].to_string())),
            "int" => one(args).and_then(|_| match &args[0] {
                Value::Str(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(|n| Value::Num(n.trunc()))
                    .map_err(|_| ExprError::Type(format!("invalid literal for int(): '{}'", s))),
                other => other.as_num().map(|n| Value::Num(n.trunc())),
            }),
            "float" => one(args).and_then(|_| match &args[0] {
                Value::Str(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Num)
                    .map_err(|_| ExprError::Type(format!("could not convert string to float: '{}'", s))),
                other => other.as_num().map(Value::Num),
            }),
            _ => return None,
        };
        Some(result)
    }
}

impl Interpreter {
    fn tick(&mut self) -> Result<(), ExecError> {
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(ExecError::StepLimit(self.max_steps));
        }
        if self.cancel.load(Ordering::Relaxed) || Instant::now() >= self.deadline {
            return Err(ExecError::Timeout(self.timeout_ms));
        }
        Ok(())
    }

    fn eval(&self, expr: &Expr, line: usize) -> Result<Value, ExecError> {
        expr::evaluate(expr, self).map_err(|error| ExecError::Runtime { line, error })
    }

    fn run(&mut self, program: &[Node]) -> Result<(), ExecError> {
        match self.exec_block(program)? {
            Flow::Normal => Ok(()),
            Flow::Break | Flow::Continue => Err(syntax(0, "'break' or 'continue' outside loop")),
        }
    }

    fn exec_block(&mut self, nodes: &[Node]) -> Result<Flow, ExecError> {
        for node in nodes {
            match self.exec(node)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, node: &Node) -> Result<Flow, ExecError> {
        self.tick()?;
        let line = node.line;

        match &node.stmt {
            Stmt::Pass => {}
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
            Stmt::Expr(expr) => {
                self.eval(expr, line)?;
            }
            Stmt::Assign { target, op, value } => {
                let rhs = self.eval(value, line)?;
                let new_value = match op {
                    None => rhs,
                    Some(op) => {
                        let current = self.vars.get(target).cloned().ok_or_else(|| {
                            ExecError::Runtime {
                                line,
                                error: ExprError::UnknownName(target.clone()),
                            }
                        })?;
                        let combined = Expr::Binary(
                            *op,
                            Box::new(Expr::Literal(current)),
                            Box::new(Expr::Literal(rhs)),
                        );
                        self.eval(&combined, line)?
                    }
                };
                self.vars.insert(target.clone(), new_value);
            }
            Stmt::If {
                branches,
                otherwise,
            } => {
                for (condition, body) in branches {
                    if self.eval(condition, line)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(otherwise);
            }
            Stmt::While { condition, body } => {
                while self.eval(condition, line)?.truthy() {
                    self.tick()?;
                    if let Flow::Break = self.exec_block(body)? {
                        break;
                    }
                }
            }
            Stmt::For { var, range, body } => {
                let bounds = range
                    .iter()
                    .map(|e| {
                        let n = self.eval(e, line)?.as_num().map_err(|error| ExecError::Runtime {
                            line,
                            error,
                        })?;
                        if n.fract() != 0.0 {
                            return Err(ExecError::Runtime {
                                line,
                                error: ExprError::Type("range() arguments must be integers".to_string()),
                            });
                        }
                        Ok(n as i64)
                    })
                    .collect::<Result<Vec<i64>, ExecError>>()?;
                let (start, end, step) = match bounds.as_slice() {
                    [end] => (0, *end, 1),
                    [start, end] => (*start, *end, 1),
                    [start, end, step] => (*start, *end, *step),
                    _ => return Err(syntax(line, "range() takes 1 to 3 arguments")),
                };
                if step == 0 {
                    return Err(ExecError::Runtime {
                        line,
                        error: ExprError::Domain("range() step must not be zero".to_string()),
                    });
                }

                let mut i = start;
                while (step > 0 && i < end) || (step < 0 && i > end) {
                    self.tick()?;
                    self.vars.insert(var.clone(), Value::Num(i as f64));
                    if let Flow::Break = self.exec_block(body)? {
                        break;
                    }
                    i += step;
                }
            }
        }

        Ok(Flow::Normal)
    }
}

// ============================================================================
// Tool
// ============================================================================

/// Runs scripts in an isolated interpreter with a hard wall-clock limit.
pub struct CodeExecution {
    spec: ToolSpec,
    timeout_ms: u64,
    max_steps: u64,
}

impl CodeExecution {
    /// Create the tool with a per-run timeout and step budget
    pub fn new(timeout_ms: u64, max_steps: u64) -> Self {
        Self {
            spec: ToolSpec::new(
                "execute_code",
                "Run a short Python-style script in a sandbox. Supports variables, \
                 arithmetic, strings, print, if/elif/else, while and for-range loops. \
                 No imports, files or network.",
                ToolCategory::Code,
            )
            .with_param("code", "string", "Script source", true)
            .with_param("language", "string", "Script language (python)", false),
            timeout_ms,
            max_steps,
        }
    }
}

#[async_trait]
impl Tool for CodeExecution {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Json) -> ToolOutput {
        let Some(code) = args["code"].as_str() else {
            return ToolOutput::failure("missing code");
        };
        let language = args["language"].as_str().unwrap_or("python");
        if !matches!(language.to_lowercase().as_str(), "python" | "py" | "script") {
            return ToolOutput::failure(format!("Unsupported language: {}", language));
        }

        let program = match parse_program(code) {
            Ok(program) => program,
            Err(e) => return ToolOutput::failure(e.to_string()),
        };

        let output = OutputBuffer::default();
        let cancel = Arc::new(AtomicBool::new(false));
        let _cancel_guard = CancelOnDrop(Arc::clone(&cancel));
        let timeout = Duration::from_millis(self.timeout_ms);
        let mut interpreter = Interpreter {
            vars: HashMap::new(),
            output: output.clone(),
            cancel: Arc::clone(&cancel),
            steps: 0,
            max_steps: self.max_steps,
            deadline: Instant::now() + timeout,
            timeout_ms: self.timeout_ms,
        };

        let handle = tokio::task::spawn_blocking(move || {
            let result = interpreter.run(&program);
            (result, interpreter.steps)
        });

        // The interpreter checks its own deadline; this bound covers a stuck thread.
        let outcome = tokio::time::timeout(timeout + Duration::from_millis(100), handle).await;
        let stdout = output.contents();

        match outcome {
            Ok(Ok((Ok(()), steps))) => {
                debug!(steps, "Sandbox run completed");
                let result = if stdout.is_empty() {
                    "(no output)".to_string()
                } else {
                    stdout
                };
                ToolOutput::success(result).with_metadata("steps", steps)
            }
            Ok(Ok((Err(e @ ExecError::Timeout(_)), steps))) => {
                warn!(steps, "Sandbox run timed out");
                ToolOutput::failure(e.to_string())
                    .with_result(json!({ "stdout": stdout }))
                    .with_metadata("timed_out", true)
            }
            Ok(Ok((Err(e), steps))) => ToolOutput::failure(e.to_string())
                .with_result(json!({ "stdout": stdout }))
                .with_metadata("steps", steps),
            Ok(Err(join_error)) => ToolOutput::failure(format!("Sandbox crashed: {}", join_error)),
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                warn!(timeout_ms = self.timeout_ms, "Sandbox thread did not stop in time");
                ToolOutput::failure(ExecError::Timeout(self.timeout_ms).to_string())
                    .with_result(json!({ "stdout": stdout }))
                    .with_metadata("timed_out", true)
            }
        }
    }
}

impl ExecError {
    #[cfg(test)]
    fn line(&self) -> Option<usize> {
        match self {
            ExecError::Syntax { line, .. } | ExecError::Runtime { line, .. } => Some(*line),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tool() -> CodeExecution {
        CodeExecution::new(2000, 100_000)
    }

    async fn run(code: &str) -> ToolOutput {
        tool().execute(json!({ "code": code })).await
    }

    #[tokio::test]
    async fn test_print_and_arithmetic() {
        let output = run("x = 6\ny = 7\nprint(x * y)\nprint('done', True)").await;
        assert!(output.success, "{:?}", output.error);
        assert_eq!(output.result, json!("42\ndone True\n"));
    }

    #[tokio::test]
    async fn test_control_flow() {
        let code = r#"
total = 0
for i in range(1, 6):
    if i % 2 == 0:
        continue
    total += i
n = 0
while True:
    n += 1
    if n >= 3:
        break
if total > 100:
    print("big")
elif total == 9:
    print("nine", n)
else:
    print("other")
"#;
        let output = run(code).await;
        assert!(output.success, "{:?}", output.error);
        assert_eq!(output.result, json!("nine 3\n"));
    }

    #[tokio::test]
    async fn test_builtins_and_comments() {
        let code = "s = 'hash # not a comment'  # a comment\nprint(len(s), str(2.5), int('7') + 1)";
        let output = run(code).await;
        assert_eq!(output.result, json!("20 2.5 8\n"));
    }

    #[tokio::test]
    async fn test_forbidden_constructs() {
        let output = run("import os\nprint(os.listdir('/'))").await;
        assert!(!output.success);
        assert!(output.error.unwrap().contains("imports are not allowed"));

        let output = run("open('/etc/passwd')").await;
        assert!(!output.success);
        assert!(output.error.unwrap().contains("'open' is not defined"));

        let output = run("def f():\n    pass").await;
        assert!(output.error.unwrap().contains("not supported"));
    }

    #[tokio::test]
    async fn test_timeout_returns_partial_output() {
        let tool = CodeExecution::new(100, u64::MAX);
        let output = tool
            .execute(json!({ "code": "print('started')\nwhile True:\n    pass" }))
            .await;
        assert!(!output.success);
        assert!(output.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(output.result["stdout"], "started\n");
        assert_eq!(output.metadata["timed_out"], true);
    }

    #[tokio::test]
    async fn test_step_limit() {
        let tool = CodeExecution::new(5000, 50);
        let output = tool
            .execute(json!({ "code": "i = 0\nwhile i < 1000:\n    i += 1" }))
            .await;
        assert!(!output.success);
        assert!(output.error.unwrap().contains("Step limit"));
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let tool = tool();
        let first = tool.execute(json!({ "code": "secret = 1" })).await;
        assert!(first.success);
        let second = tool.execute(json!({ "code": "print(secret)" })).await;
        assert!(!second.success);
        assert!(second.error.unwrap().contains("not defined"));
    }

    #[tokio::test]
    async fn test_deep_nesting_fails_cleanly() {
        let mut code = String::new();
        for level in 0..=MAX_BLOCK_DEPTH {
            code.push_str(&" ".repeat(level));
            code.push_str("if True:\n");
        }
        code.push_str(&" ".repeat(MAX_BLOCK_DEPTH + 1));
        code.push_str("pass\n");
        let output = run(&code).await;
        assert!(!output.success);
        assert!(output.error.unwrap().contains("too many nested blocks"));

        let expression = format!("print({}1{})", "(".repeat(5_000), ")".repeat(5_000));
        let output = run(&expression).await;
        assert!(!output.success);
        assert!(output.error.unwrap().contains("SyntaxError on line 1"));
    }

    #[tokio::test]
    async fn test_dropping_the_run_cancels_the_interpreter() {
        let tool = CodeExecution::new(60_000, u64::MAX);
        let run = tool.execute(json!({ "code": "while True:\n    pass" }));
        assert!(tokio::time::timeout(Duration::from_millis(50), run).await.is_err());

        let flag = Arc::new(AtomicBool::new(false));
        drop(CancelOnDrop(Arc::clone(&flag)));
        assert!(flag.load(Ordering::Relaxed));
    }

    #[test]
    fn test_syntax_errors_carry_line_numbers() {
        let err = parse_program("x = 1\n  y = 2").unwrap_err();
        assert_eq!(err.line(), Some(2));
        let err = parse_program("if x:\nprint(x)").unwrap_err();
        assert!(err.to_string().contains("expected an indented block"));
        let err = parse_program("else:\n    pass").unwrap_err();
        assert!(err.to_string().contains("without matching 'if'"));
    }
}
