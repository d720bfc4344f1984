//! A deliberately small line-oriented interpreter.
//!
//! `lite` is not the real magic-script language. It exists so the debug adapter can be run
//! and tested end to end against something that honours the [`Executable`] / [`DebugHooks`]
//! contract. One statement per line:
//!
//! ```text
//! // comment
//! var total = 1 + 2
//! name = "magic"
//! print "hello " + name
//! eprint "to stderr"
//! write "no newline"
//! throw "boom"
//! return total
//! ```
//!
//! Expressions are JSON literals, variable paths (`body.user.id`), or `+` chains (numeric
//! addition when both sides are numbers, string concatenation otherwise).

use std::sync::Arc;

use serde_json::{Map, Number, Value};

use crate::io::{self, StdStream};
use crate::{
    DebugHooks, Executable, PausedFrame, Resume, ScriptEngine, ScriptError, SourceRange,
};

#[derive(Debug, Clone, Default)]
pub struct LiteEngine;

impl LiteEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ScriptEngine for LiteEngine {
    fn compile(&self, text: &str) -> Result<Arc<dyn Executable>, ScriptError> {
        Ok(Arc::new(LiteScript::parse(text)?))
    }

    fn evaluate(&self, expression: &str, scope: &Map<String, Value>) -> Result<Value, ScriptError> {
        let expr = parse_expr(expression.trim()).map_err(|message| ScriptError::Compile {
            line: 1,
            message,
        })?;
        eval(&expr, scope)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Path(Vec<String>),
    Add(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum StatementKind {
    Assign { name: String, value: Expr },
    Print { stream: StdStream, value: Expr, newline: bool },
    Return(Expr),
    Throw(Expr),
}

#[derive(Debug, Clone, PartialEq)]
struct Statement {
    line: u32,
    width: u32,
    kind: StatementKind,
}

/// A compiled `lite` script.
#[derive(Debug, Clone, PartialEq)]
pub struct LiteScript {
    statements: Vec<Statement>,
}

impl LiteScript {
    pub fn parse(text: &str) -> Result<Self, ScriptError> {
        let mut statements = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = idx as u32 + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with("//") {
                continue;
            }
            let kind = parse_statement(trimmed)
                .map_err(|message| ScriptError::Compile { line, message })?;
            statements.push(Statement {
                line,
                width: raw.trim_end().chars().count() as u32,
                kind,
            });
        }
        Ok(Self { statements })
    }

    /// Lines that carry a statement, i.e. valid suspension points.
    pub fn statement_lines(&self) -> impl Iterator<Item = u32> + '_ {
        self.statements.iter().map(|s| s.line)
    }
}

impl Executable for LiteScript {
    fn execute(
        &self,
        hooks: &dyn DebugHooks,
        env: Map<String, Value>,
    ) -> Result<Value, ScriptError> {
        let mut vars = env;
        for statement in &self.statements {
            if hooks.should_suspend(statement.line) {
                let frame = PausedFrame {
                    range: SourceRange {
                        start_line: statement.line,
                        start_column: 1,
                        end_line: statement.line,
                        end_column: statement.width + 1,
                    },
                    variables: vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                };
                match hooks.suspend(frame) {
                    Resume::Abort => return Err(ScriptError::Aborted),
                    Resume::Continue { overrides } => {
                        for (name, value) in overrides {
                            vars.insert(name, value);
                        }
                    }
                }
            }

            match &statement.kind {
                StatementKind::Assign { name, value } => {
                    let value = eval(value, &vars)?;
                    vars.insert(name.clone(), value);
                }
                StatementKind::Print {
                    stream,
                    value,
                    newline,
                } => {
                    let text = display(&eval(value, &vars)?);
                    let result = if *newline {
                        io::println(*stream, &text)
                    } else {
                        io::write(*stream, &text)
                    };
                    if let Err(err) = result {
                        tracing::debug!(target: "magic.script", error = %err, "script output failed");
                    }
                }
                StatementKind::Return(value) => return eval(value, &vars),
                StatementKind::Throw(value) => {
                    return Err(ScriptError::Runtime(display(&eval(value, &vars)?)))
                }
            }
        }
        Ok(Value::Null)
    }
}

fn parse_statement(text: &str) -> Result<StatementKind, String> {
    if let Some(rest) = keyword(text, "var") {
        return parse_assignment(rest);
    }
    if let Some(rest) = keyword(text, "print") {
        return Ok(StatementKind::Print {
            stream: StdStream::Stdout,
            value: parse_expr(rest)?,
            newline: true,
        });
    }
    if let Some(rest) = keyword(text, "eprint") {
        return Ok(StatementKind::Print {
            stream: StdStream::Stderr,
            value: parse_expr(rest)?,
            newline: true,
        });
    }
    if let Some(rest) = keyword(text, "write") {
        return Ok(StatementKind::Print {
            stream: StdStream::Stdout,
            value: parse_expr(rest)?,
            newline: false,
        });
    }
    if text == "return" {
        return Ok(StatementKind::Return(Expr::Literal(Value::Null)));
    }
    if let Some(rest) = keyword(text, "return") {
        return Ok(StatementKind::Return(parse_expr(rest)?));
    }
    if let Some(rest) = keyword(text, "throw") {
        return Ok(StatementKind::Throw(parse_expr(rest)?));
    }
    if text.contains('=') {
        return parse_assignment(text);
    }
    Err(format!("unrecognized statement `{text}`"))
}

fn keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(keyword)?;
    rest.starts_with(char::is_whitespace).then(|| rest.trim())
}

fn parse_assignment(text: &str) -> Result<StatementKind, String> {
    let (name, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected `=` in `{text}`"))?;
    let name = name.trim();
    if !is_identifier(name) {
        return Err(format!("invalid variable name `{name}`"));
    }
    Ok(StatementKind::Assign {
        name: name.to_owned(),
        value: parse_expr(value.trim())?,
    })
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_expr(text: &str) -> Result<Expr, String> {
    let terms = split_plus(text);
    if terms.len() > 1 {
        return terms
            .into_iter()
            .map(parse_term)
            .collect::<Result<Vec<_>, _>>()
            .map(Expr::Add);
    }
    parse_term(text)
}

fn parse_term(text: &str) -> Result<Expr, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("expected an expression".to_owned());
    }
    if text.split('.').all(is_identifier) && !matches!(text, "true" | "false" | "null") {
        return Ok(Expr::Path(text.split('.').map(str::to_owned).collect()));
    }
    serde_json::from_str::<Value>(text)
        .map(Expr::Literal)
        .map_err(|_| format!("invalid expression `{text}`"))
}

/// Split on top-level `+` (outside strings and brackets).
fn split_plus(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0usize;

    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => depth -= 1,
            // The operator needs whitespace in front; `1e+5` stays a single literal.
            '+' if depth == 0 && text[..idx].ends_with(char::is_whitespace) => {
                parts.push(&text[start..idx]);
                start = idx + ch.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn eval(expr: &Expr, vars: &Map<String, Value>) -> Result<Value, ScriptError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(path) => lookup(path, vars),
        Expr::Add(terms) => {
            let mut iter = terms.iter();
            let Some(first) = iter.next() else {
                return Ok(Value::Null);
            };
            let mut acc = eval(first, vars)?;
            for term in iter {
                acc = add(acc, eval(term, vars)?);
            }
            Ok(acc)
        }
    }
}

fn lookup(path: &[String], vars: &Map<String, Value>) -> Result<Value, ScriptError> {
    let (head, rest) = path
        .split_first()
        .ok_or_else(|| ScriptError::Runtime("empty variable path".to_owned()))?;
    let mut value = vars
        .get(head)
        .ok_or_else(|| ScriptError::Runtime(format!("undefined variable `{head}`")))?;
    for segment in rest {
        value = match value {
            Value::Object(map) => map.get(segment).unwrap_or(&Value::Null),
            _ => &Value::Null,
        };
    }
    Ok(value.clone())
}

fn add(lhs: Value, rhs: Value) -> Value {
    match (&lhs, &rhs) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                if let Some(sum) = a.checked_add(b) {
                    return Value::Number(sum.into());
                }
            }
            let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
            Number::from_f64(sum).map(Value::Number).unwrap_or(Value::Null)
        }
        _ => Value::String(format!("{}{}", display(&lhs), display(&rhs))),
    }
}

/// Text form used by `print` and string concatenation.
pub fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
