//! Expression lexer, parser and evaluator shared by the calculator and the
//! code sandbox.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! or      := and (("or" | "||") and)*
//! and     := not (("and" | "&&") not)*
//! not     := ("not" | "!") not | compare
//! compare := sum (("==" | "!=" | "<" | "<=" | ">" | ">=") sum)?
//! sum     := product (("+" | "-") product)*
//! product := unary (("*" | "/" | "//" | "%") unary)*
//! unary   := ("-" | "+") unary | power
//! power   := primary (("^" | "**") unary)?
//! primary := number | string | name | name "(" args ")" | "(" or ")"
//! ```
//!
//! Only whitelisted functions resolve; any other name is an error.

use std::fmt;

use thiserror::Error;

/// Longest string a single operation may produce.
pub const MAX_STRING_LEN: usize = 64 * 1024;

/// Longest expression source accepted, in characters.
pub const MAX_EXPR_LEN: usize = 4096;

/// Deepest nesting of parentheses, calls and prefix operators.
pub const MAX_DEPTH: usize = 64;

/// Deepest parsed tree, including left-leaning operator chains.
pub const MAX_TREE_DEPTH: usize = 512;

/// Expression evaluation failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("Syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("Name '{0}' is not defined")]
    UnknownName(String),

    #[error("{name}() takes {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("Type error: {0}")]
    Type(String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Math domain error: {0}")]
    Domain(String),
}

/// Runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Num(f64),
    Str(String),
    Bool(bool),
    None,
}

impl Value {
    /// Truthiness used by conditions and logical operators.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Num(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bool(b) => *b,
            Value::None => false,
        }
    }

    /// Numeric view of the value
    pub fn as_num(&self) -> Result<f64, ExprError> {
        match self {
            Value::Num(n) => Ok(*n),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            other => Err(ExprError::Type(format!(
                "expected a number, got {}",
                other.type_name()
            ))),
        }
    }

    /// Name of the value's type for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::Bool(_) => "bool",
            Value::None => "None",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Num(n) => f.write_str(&format_number(*n)),
            Value::Str(s) => f.write_str(s),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::None => f.write_str("None"),
        }
    }
}

/// Render integral values without a fractional part.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

const OPERATORS: [&str; 22] = [
    "**", "//", "==", "!=", "<=", ">=", "&&", "||", "+=", "-=", "*=", "/=", "+", "-", "*", "/",
    "%", "^", "<", ">", "!", "=",
];

pub(crate) fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let chars: Vec<char> = input.chars().collect();
    if chars.len() > MAX_EXPR_LEN {
        return Err(ExprError::Syntax {
            position: MAX_EXPR_LEN,
            message: format!("expression longer than {} characters", MAX_EXPR_LEN),
        });
    }
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let start = i;
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().collect();
            let value = text.parse::<f64>().map_err(|_| ExprError::Syntax {
                position: start,
                message: format!("invalid number '{}'", text),
            })?;
            tokens.push((Token::Num(value), start));
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push((Token::Ident(chars[start..i].iter().collect()), start));
            continue;
        }

        if c == '"' || c == '\'' {
            let (text, next) = lex_string(&chars, i)?;
            tokens.push((Token::Str(text), start));
            i = next;
            continue;
        }

        match c {
            '(' => tokens.push((Token::LParen, start)),
            ')' => tokens.push((Token::RParen, start)),
            ',' => tokens.push((Token::Comma, start)),
            _ => {
                let op = OPERATORS.iter().find(|op| {
                    op.chars()
                        .enumerate()
                        .all(|(k, oc)| chars.get(i + k) == Some(&oc))
                });
                match op {
                    Some(op) => {
                        tokens.push((Token::Op(*op), start));
                        i += op.chars().count();
                        continue;
                    }
                    None => {
                        return Err(ExprError::Syntax {
                            position: start,
                            message: format!("unexpected character '{}'", c),
                        })
                    }
                }
            }
        }
        i += 1;
    }

    Ok(tokens)
}

fn lex_string(chars: &[char], start: usize) -> Result<(String, usize), ExprError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                out.push(match chars[i + 1] {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                i += 2;
            }
            c if c == quote => return Ok((out, i + 1)),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(ExprError::Syntax {
        position: start,
        message: "unterminated string".to_string(),
    })
}

// ============================================================================
// Parser
// ============================================================================

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

/// Parse a complete expression.
pub fn parse(input: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(input)?;
    parse_tokens(tokens, input.chars().count())
}

pub(crate) fn parse_tokens(tokens: Vec<(Token, usize)>, end: usize) -> Result<Expr, ExprError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        end,
        depth: 0,
    };
    if parser.tokens.is_empty() {
        return Err(ExprError::Syntax {
            position: 0,
            message: "empty expression".to_string(),
        });
    }
    let expr = parser.or()?;
    if let Some((token, position)) = parser.tokens.get(parser.pos) {
        return Err(ExprError::Syntax {
            position: *position,
            message: format!("unexpected token {:?}", token),
        });
    }
    if tree_depth(&expr) > MAX_TREE_DEPTH {
        return Err(ExprError::Syntax {
            position: 0,
            message: "expression nested too deeply".to_string(),
        });
    }
    Ok(expr)
}

/// Depth of the tree, walked without recursion.
fn tree_depth(expr: &Expr) -> usize {
    let mut deepest = 0usize;
    let mut stack: Vec<(&Expr, usize)> = vec![(expr, 1)];
    while let Some((node, depth)) = stack.pop() {
        deepest = deepest.max(depth);
        match node {
            Expr::Unary(_, inner) => stack.push((inner.as_ref(), depth + 1)),
            Expr::Binary(_, left, right) => {
                stack.push((left.as_ref(), depth + 1));
                stack.push((right.as_ref(), depth + 1));
            }
            Expr::Call(_, args) => stack.extend(args.iter().map(|a| (a, depth + 1))),
            Expr::Literal(_) | Expr::Var(_) => {}
        }
    }
    deepest
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, p)| *p).unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn eat_op(&mut self, ops: &[&str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(w)) if w == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> ExprError {
        ExprError::Syntax {
            position: self.position(),
            message: message.into(),
        }
    }

    /// Run a recursive production one level deeper.
    fn nested(&mut self, rule: fn(&mut Self) -> Result<Expr, ExprError>) -> Result<Expr, ExprError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        self.depth += 1;
        let result = rule(self);
        self.depth -= 1;
        result
    }

    fn or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.and()?;
        while self.eat_keyword("or") || self.eat_op(&["||"]).is_some() {
            let right = self.and()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.not()?;
        while self.eat_keyword("and") || self.eat_op(&["&&"]).is_some() {
            let right = self.not()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, ExprError> {
        if self.eat_keyword("not") || self.eat_op(&["!"]).is_some() {
            let inner = self.nested(Self::not)?;
            return Ok(Expr::Unary(UnOp::Not, Box::new(inner)));
        }
        self.compare()
    }

    fn compare(&mut self) -> Result<Expr, ExprError> {
        let left = self.sum()?;
        let op = match self.eat_op(&["==", "!=", "<", "<=", ">", ">="]) {
            Some("==") => BinOp::Eq,
            Some("!=") => BinOp::Ne,
            Some("<") => BinOp::Lt,
            Some("<=") => BinOp::Le,
            Some(">") => BinOp::Gt,
            Some(">=") => BinOp::Ge,
            _ => return Ok(left),
        };
        let right = self.sum()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn sum(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.product()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let right = self.product()?;
            let op = if op == "+" { BinOp::Add } else { BinOp::Sub };
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn product(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.unary()?;
        while let Some(op) = self.eat_op(&["*", "/", "//", "%"]) {
            let right = self.unary()?;
            let op = match op {
                "*" => BinOp::Mul,
                "/" => BinOp::Div,
                "//" => BinOp::FloorDiv,
                _ => BinOp::Mod,
            };
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        match self.eat_op(&["-", "+"]) {
            Some("-") => Ok(Expr::Unary(UnOp::Neg, Box::new(self.nested(Self::unary)?))),
            Some(_) => self.nested(Self::unary),
            None => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, ExprError> {
        let base = self.primary()?;
        if self.eat_op(&["^", "**"]).is_some() {
            let exponent = self.nested(Self::unary)?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let position = self.position();
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Literal(Value::Num(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::LParen) => {
                let inner = self.nested(Self::or)?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(ExprError::Syntax {
                        position,
                        message: "unbalanced parenthesis".to_string(),
                    }),
                }
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "True" | "true" => Ok(Expr::Literal(Value::Bool(true))),
                "False" | "false" => Ok(Expr::Literal(Value::Bool(false))),
                "None" => Ok(Expr::Literal(Value::None)),
                _ if self.peek() == Some(&Token::LParen) => {
                    self.pos += 1;
                    let args = self.arguments()?;
                    Ok(Expr::Call(name, args))
                }
                _ => Ok(Expr::Var(name)),
            },
            Some(token) => Err(ExprError::Syntax {
                position,
                message: format!("unexpected token {:?}", token),
            }),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.nested(Self::or)?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                _ => return Err(self.error("expected ',' or ')' in argument list")),
            }
        }
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Name resolution for evaluation.
pub trait Scope {
    /// Resolve a variable or constant.
    fn lookup(&self, name: &str) -> Option<Value>;

    /// Resolve a scope-specific function; `None` falls through to the math builtins.
    fn call(&self, _name: &str, _args: &[Value]) -> Option<Result<Value, ExprError>> {
        None
    }
}

/// Scope exposing only the mathematical constants.
pub struct Constants;

impl Scope for Constants {
    fn lookup(&self, name: &str) -> Option<Value> {
        constant(name).map(Value::Num)
    }
}

/// Mathematical constants available everywhere.
pub fn constant(name: &str) -> Option<f64> {
    match name {
        "pi" => Some(std::f64::consts::PI),
        "e" => Some(std::f64::consts::E),
        "tau" => Some(std::f64::consts::TAU),
        _ => None,
    }
}

/// Evaluate `expr` against `scope`.
pub fn evaluate(expr: &Expr, scope: &dyn Scope) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Var(name) => scope
            .lookup(name)
            .ok_or_else(|| ExprError::UnknownName(name.clone())),
        Expr::Unary(UnOp::Neg, inner) => {
            let n = evaluate(inner, scope)?.as_num()?;
            Ok(Value::Num(-n))
        }
        Expr::Unary(UnOp::Not, inner) => Ok(Value::Bool(!evaluate(inner, scope)?.truthy())),
        Expr::Binary(BinOp::And, l, r) => {
            let left = evaluate(l, scope)?;
            if !left.truthy() {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(evaluate(r, scope)?.truthy()))
        }
        Expr::Binary(BinOp::Or, l, r) => {
            let left = evaluate(l, scope)?;
            if left.truthy() {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(evaluate(r, scope)?.truthy()))
        }
        Expr::Binary(op, l, r) => {
            let left = evaluate(l, scope)?;
            let right = evaluate(r, scope)?;
            binary(*op, left, right)
        }
        Expr::Call(name, args) => {
            let values = args
                .iter()
                .map(|a| evaluate(a, scope))
                .collect::<Result<Vec<_>, _>>()?;
            if let Some(result) = scope.call(name, &values) {
                return result;
            }
            math_builtin(name, &values)
        }
    }
}

fn finite(n: f64) -> Result<Value, ExprError> {
    if n.is_finite() {
        Ok(Value::Num(n))
    } else {
        Err(ExprError::Domain("result is not finite".to_string()))
    }
}

fn binary(op: BinOp, left: Value, right: Value) -> Result<Value, ExprError> {
    match (op, &left, &right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            if a.len() + b.len() > MAX_STRING_LEN {
                return Err(ExprError::Domain("string too long".to_string()));
            }
            return Ok(Value::Str(format!("{}{}", a, b)));
        }
        (BinOp::Mul, Value::Str(s), Value::Num(n)) | (BinOp::Mul, Value::Num(n), Value::Str(s)) => {
            let times = if *n > 0.0 { *n as usize } else { 0 };
            if s.len().saturating_mul(times) > MAX_STRING_LEN {
                return Err(ExprError::Domain("string too long".to_string()));
            }
            return Ok(Value::Str(s.repeat(times)));
        }
        (BinOp::Eq, _, _) => return Ok(Value::Bool(values_equal(&left, &right))),
        (BinOp::Ne, _, _) => return Ok(Value::Bool(!values_equal(&left, &right))),
        (BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge, Value::Str(a), Value::Str(b)) => {
            return Ok(Value::Bool(match op {
                BinOp::Lt => a < b,
                BinOp::Le => a <= b,
                BinOp::Gt => a > b,
                _ => a >= b,
            }))
        }
        _ => {}
    }

    let a = left.as_num().map_err(|_| mixed_types(op, &left, &right))?;
    let b = right.as_num().map_err(|_| mixed_types(op, &left, &right))?;

    match op {
        BinOp::Add => finite(a + b),
        BinOp::Sub => finite(a - b),
        BinOp::Mul => finite(a * b),
        BinOp::Div => {
            if b == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            finite(a / b)
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            finite((a / b).floor())
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            finite(a - b * (a / b).floor())
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            if a < 0.0 && b.fract() != 0.0 {
                return Err(ExprError::Domain(
                    "negative base with fractional exponent".to_string(),
                ));
            }
            finite(a.powf(b))
        }
        BinOp::Lt => Ok(Value::Bool(a < b)),
        BinOp::Le => Ok(Value::Bool(a <= b)),
        BinOp::Gt => Ok(Value::Bool(a > b)),
        BinOp::Ge => Ok(Value::Bool(a >= b)),
        BinOp::Eq | BinOp::Ne | BinOp::And | BinOp::Or => {
            unreachable!("handled before numeric coercion")
        }
    }
}

fn mixed_types(op: BinOp, left: &Value, right: &Value) -> ExprError {
    ExprError::Type(format!(
        "unsupported operand types for {:?}: {} and {}",
        op,
        left.type_name(),
        right.type_name()
    ))
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::None, Value::None) => true,
        (Value::None, _) | (_, Value::None) => false,
        (Value::Str(_), _) | (_, Value::Str(_)) => false,
        _ => match (left.as_num(), right.as_num()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        },
    }
}

fn arity(name: &str, args: &[Value], expected: &str, ok: bool) -> Result<(), ExprError> {
    if ok {
        Ok(())
    } else {
        Err(ExprError::Arity {
            name: name.to_string(),
            expected: expected.to_string(),
            got: args.len(),
        })
    }
}

/// Whitelisted math functions.
fn math_builtin(name: &str, args: &[Value]) -> Result<Value, ExprError> {
    let nums = || args.iter().map(Value::as_num).collect::<Result<Vec<f64>, _>>();

    match name {
        "sqrt" | "sin" | "cos" | "tan" | "ln" | "log10" | "log2" | "exp" | "abs" | "floor"
        | "ceil" => {
            arity(name, args, "1", args.len() == 1)?;
            let x = args[0].as_num()?;
            let result = match name {
                "sqrt" if x < 0.0 => return Err(ExprError::Domain("sqrt of negative number".to_string())),
                "sqrt" => x.sqrt(),
                "sin" => x.sin(),
                "cos" => x.cos(),
                "tan" => x.tan(),
                "ln" | "log10" | "log2" if x <= 0.0 => {
                    return Err(ExprError::Domain(format!("{} of non-positive number", name)))
                }
                "ln" => x.ln(),
                "log10" => x.log10(),
                "log2" => x.log2(),
                "exp" => x.exp(),
                "abs" => x.abs(),
                "floor" => x.floor(),
                _ => x.ceil(),
            };
            finite(result)
        }
        "log" => {
            arity(name, args, "1 or 2", matches!(args.len(), 1 | 2))?;
            let values = nums()?;
            let x = values[0];
            if x <= 0.0 {
                return Err(ExprError::Domain("log of non-positive number".to_string()));
            }
            match values.get(1) {
                None => finite(x.ln()),
                Some(&base) if base <= 0.0 || base == 1.0 => {
                    Err(ExprError::Domain("invalid logarithm base".to_string()))
                }
                Some(&base) => finite(x.ln() / base.ln()),
            }
        }
        "round" => {
            arity(name, args, "1 or 2", matches!(args.len(), 1 | 2))?;
            let values = nums()?;
            let digits = values.get(1).copied().unwrap_or(0.0);
            let factor = 10f64.powi(digits as i32);
            finite((values[0] * factor).round() / factor)
        }
        "pow" => {
            arity(name, args, "2", args.len() == 2)?;
            binary(BinOp::Pow, args[0].clone(), args[1].clone())
        }
        "min" | "max" => {
            arity(name, args, "at least 1", !args.is_empty())?;
            let values = nums()?;
            let folded = values.into_iter().reduce(|a, b| {
                if name == "min" {
                    a.min(b)
                } else {
                    a.max(b)
                }
            });
            folded.map(Value::Num).ok_or_else(|| ExprError::Domain("empty input".to_string()))
        }
        _ => Err(ExprError::UnknownName(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(input: &str) -> Result<Value, ExprError> {
        evaluate(&parse(input)?, &Constants)
    }

    fn num(input: &str) -> f64 {
        eval(input).unwrap().as_num().unwrap()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(num("25 * 4 + 100"), 200.0);
        assert_eq!(num("2 + 3 * 4"), 14.0);
        assert_eq!(num("(2 + 3) * 4"), 20.0);
        assert_eq!(num("2 ^ 3 ^ 2"), 512.0);
        assert_eq!(num("-2 ^ 2"), -4.0);
        assert_eq!(num("2 ** -1"), 0.5);
        assert_eq!(num("7 // 2"), 3.0);
        assert_eq!(num("-7 % 3"), 2.0);
    }

    #[test]
    fn test_functions_and_constants() {
        assert_eq!(num("sqrt(16)"), 4.0);
        assert_eq!(num("max(1, 5, 3)"), 5.0);
        assert_eq!(num("round(3.14159, 2)"), 3.14);
        assert!((num("log(8, 2)") - 3.0).abs() < 1e-12);
        assert!((num("cos(pi)") + 1.0).abs() < 1e-12);
        assert_eq!(num("pow(2, 10)"), 1024.0);
    }

    #[test]
    fn test_errors_are_typed() {
        assert_eq!(eval("1 / 0"), Err(ExprError::DivisionByZero));
        assert!(matches!(eval("sqrt(-1)"), Err(ExprError::Domain(_))));
        assert_eq!(
            eval("__import__('os')"),
            Err(ExprError::UnknownName("__import__".to_string()))
        );
        assert!(matches!(eval("2 +"), Err(ExprError::Syntax { .. })));
        assert!(matches!(eval("(1 + 2"), Err(ExprError::Syntax { .. })));
        assert!(matches!(eval("1 2"), Err(ExprError::Syntax { .. })));
        assert!(matches!(eval("3 $ 4"), Err(ExprError::Syntax { .. })));
        assert!(matches!(eval("sqrt(1, 2)"), Err(ExprError::Arity { .. })));
        assert!(matches!(eval("10 ^ 400"), Err(ExprError::Domain(_))));
        assert!(matches!(eval(""), Err(ExprError::Syntax { .. })));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let deep = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert!(matches!(eval(&deep), Err(ExprError::Syntax { .. })));

        let nested = format!("{}1{}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        let err = eval(&nested).unwrap_err();
        assert!(err.to_string().contains("nested too deeply"));

        let calls = format!("{}4{}", "sqrt(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        assert!(eval(&calls).unwrap_err().to_string().contains("nested too deeply"));

        let negations = format!("{}1", "-".repeat(MAX_DEPTH + 1));
        assert!(eval(&negations).unwrap_err().to_string().contains("nested too deeply"));

        let chain = vec!["1"; MAX_TREE_DEPTH + 2].join("+");
        assert!(eval(&chain).unwrap_err().to_string().contains("nested too deeply"));
    }

    #[test]
    fn test_moderate_nesting_still_evaluates() {
        let nested = format!("{}2{}", "(".repeat(MAX_DEPTH - 1), ")".repeat(MAX_DEPTH - 1));
        assert_eq!(num(&nested), 2.0);
        assert_eq!(num(&vec!["1"; 200].join(" + ")), 200.0);
    }

    #[test]
    fn test_strings_and_logic() {
        assert_eq!(eval("'ab' + \"cd\"").unwrap(), Value::Str("abcd".to_string()));
        assert_eq!(eval("'ab' * 3").unwrap(), Value::Str("ababab".to_string()));
        assert_eq!(eval("1 < 2 and not False").unwrap(), Value::Bool(true));
        assert_eq!(eval("0 or ''").unwrap(), Value::Bool(false));
        assert!(matches!(eval("'a' - 1"), Err(ExprError::Type(_))));
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(200.0), "200");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(1e20), "100000000000000000000");
    }
}
