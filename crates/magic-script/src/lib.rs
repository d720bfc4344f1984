//! Interfaces between the debug adapter and the magic-script runtime.
//!
//! The adapter never interprets scripts itself. It resolves script text through a
//! [`ScriptResolver`], compiles it with a [`ScriptEngine`], and runs the resulting
//! [`Executable`] on a dedicated thread, handing it a [`DebugHooks`] implementation that the
//! interpreter consults before every statement.
//!
//! Line numbers crossing these interfaces are *instrumented* lines: scripts are compiled with
//! [`DEBUG_MARK`] prepended, so the first line of user code is line 2.

pub mod io;
pub mod lite;
pub mod resolver;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use resolver::{DirectoryResolver, InMemoryResolver, ResolveError, ScriptResolver};

/// Marker line prepended to every script compiled for debugging.
pub const DEBUG_MARK: &str = "//@magic-debug\n";

/// Number of lines [`DEBUG_MARK`] adds in front of the user's script.
pub const DEBUG_MARK_LINES: u32 = 1;

/// Prepend the debug marker to `text`.
pub fn instrument(text: &str) -> String {
    let mut out = String::with_capacity(DEBUG_MARK.len() + text.len());
    out.push_str(DEBUG_MARK);
    out.push_str(text);
    out
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("compile error at line {line}: {message}")]
    Compile { line: u32, message: String },

    #[error("{0}")]
    Runtime(String),

    /// Execution was abandoned by the debugger (session closed while suspended).
    #[error("script execution aborted")]
    Aborted,
}

/// 1-based source range of the statement an interpreter is suspended on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRange {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl SourceRange {
    /// `[startLine, startColumn, endLine, endColumn]`, the shape used in console payloads.
    pub fn to_array(self) -> [u32; 4] {
        [
            self.start_line,
            self.start_column,
            self.end_line,
            self.end_column,
        ]
    }
}

/// State handed to the debugger when the interpreter suspends.
#[derive(Debug, Clone, PartialEq)]
pub struct PausedFrame {
    pub range: SourceRange,
    /// Variables visible at the suspension point, in the interpreter's order.
    pub variables: Vec<(String, Value)>,
}

/// How the interpreter should proceed after [`DebugHooks::suspend`] returns.
#[derive(Debug, Clone, PartialEq)]
pub enum Resume {
    /// Keep executing. `overrides` are variable assignments made by the debugger while the
    /// script was suspended and must be applied before the next statement runs.
    Continue { overrides: Vec<(String, Value)> },
    /// Stop executing and return [`ScriptError::Aborted`].
    Abort,
}

impl Resume {
    pub fn proceed() -> Self {
        Resume::Continue {
            overrides: Vec::new(),
        }
    }
}

/// Debugger callbacks consulted by an executing script.
///
/// Both methods are called on the execution thread. `suspend` blocks that thread until the
/// debugger resumes it.
pub trait DebugHooks: Send + Sync {
    /// Whether the interpreter must suspend before executing the statement at `line`.
    fn should_suspend(&self, line: u32) -> bool;

    fn suspend(&self, frame: PausedFrame) -> Resume;
}

/// A compiled script.
pub trait Executable: Send + Sync {
    /// Run the script to completion. `env` holds the initial variables (request context).
    fn execute(&self, hooks: &dyn DebugHooks, env: Map<String, Value>)
        -> Result<Value, ScriptError>;
}

pub trait ScriptEngine: Send + Sync {
    fn compile(&self, text: &str) -> Result<Arc<dyn Executable>, ScriptError>;

    /// Evaluate a standalone expression against `scope`.
    fn evaluate(&self, expression: &str, scope: &Map<String, Value>) -> Result<Value, ScriptError>;
}

/// A script entity as stored by the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedScript {
    pub text: String,
    /// Canonical script name without extension, e.g. `api/user/list`.
    pub script_name: String,
    pub request: RequestDefaults,
}

/// Request context an API script would normally see, with the values configured on the
/// API definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDefaults {
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub paths: Vec<Parameter>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub request_body: Option<String>,
    #[serde(default)]
    pub default_data_source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub default_value: Option<Value>,
}

impl Parameter {
    /// The configured value, falling back to the default value.
    pub fn effective_value(&self) -> Value {
        self.value
            .clone()
            .filter(|v| !v.is_null())
            .or_else(|| self.default_value.clone())
            .unwrap_or(Value::Null)
    }
}
