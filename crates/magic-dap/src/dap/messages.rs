//! Typed request arguments and canned response bodies.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::codec::{sanitize_json_error_message, Request};
use crate::error::{DebugError, DebugResult};

/// Deserialize `request.arguments` into `T`. A missing `arguments` object is treated as `{}`.
pub fn parse_arguments<T: DeserializeOwned>(request: &Request) -> DebugResult<T> {
    let arguments = match &request.arguments {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(arguments).map_err(|err| {
        DebugError::InvalidRequest(format!(
            "invalid {} arguments: {}",
            request.command,
            sanitize_json_error_message(&err.to_string())
        ))
    })
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchArguments {
    #[serde(default)]
    pub program: Option<Value>,
    #[serde(default)]
    pub file_key: Option<Value>,
    #[serde(default)]
    pub program_path: Option<Value>,
    #[serde(default)]
    pub path: Option<Value>,
    #[serde(default)]
    pub target: Option<Value>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl LaunchArguments {
    /// The script id to launch: `program`, falling back to `fileKey`, `programPath`, `path`
    /// and `target` in that order.
    pub fn script_id(&self) -> Option<String> {
        [
            &self.program,
            &self.file_key,
            &self.program_path,
            &self.path,
            &self.target,
        ]
        .into_iter()
        .filter_map(|value| value.as_ref())
        .find_map(id_text)
    }
}

fn id_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_owned(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    pub line: u32,
    #[serde(default)]
    pub column: Option<u32>,
    #[serde(default)]
    pub log_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub breakpoints: Option<Vec<SourceBreakpoint>>,
    /// Deprecated DAP field, used when `breakpoints` is absent.
    #[serde(default)]
    pub lines: Option<Vec<u32>>,
}

impl SetBreakpointsArguments {
    pub fn requested(&self) -> Vec<SourceBreakpoint> {
        match (&self.breakpoints, &self.lines) {
            (Some(breakpoints), _) => breakpoints.clone(),
            (None, Some(lines)) => lines
                .iter()
                .map(|&line| SourceBreakpoint {
                    line,
                    column: None,
                    log_message: None,
                })
                .collect(),
            (None, None) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub id: i64,
    pub verified: bool,
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadArguments {
    #[serde(default)]
    pub thread_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablesArguments {
    pub variables_reference: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetVariableArguments {
    pub variables_reference: i64,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateArguments {
    #[serde(default)]
    pub expression: String,
    #[serde(default)]
    pub frame_id: Option<i64>,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub id: i64,
    pub name: String,
    pub source: Source,
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub variables_reference: i64,
}

pub fn capabilities() -> Value {
    json!({
        "supportsConfigurationDoneRequest": true,
        "supportsEvaluateForHovers": true,
        "supportsStepBack": false,
        "supportsSetVariable": true,
        "supportsRestartFrame": false,
        "supportsGotoTargetsRequest": false,
        "supportsStepInTargetsRequest": false,
        "supportsCompletionsRequest": false,
        "supportsModulesRequest": false,
        "supportsRestartRequest": true,
        "supportsExceptionOptions": false,
        "supportsValueFormattingOptions": false,
        "supportsExceptionInfoRequest": false,
        "supportTerminateDebuggee": true,
        "supportsDelayedStackTraceLoading": false,
        "supportsLoadedSourcesRequest": false,
        "supportsLogPoints": true,
        "supportsTerminateThreadsRequest": false,
        "supportsSetExpression": false,
        "supportsTerminateRequest": true,
        "supportsDataBreakpoints": false,
        "supportsConditionalBreakpoints": false,
        "supportsHitConditionalBreakpoints": false,
        "exceptionBreakpointFilters": [],
    })
}
