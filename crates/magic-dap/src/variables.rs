//! The paused-state snapshot and its variable handles.

use std::collections::HashMap;

use serde_json::Value;

use crate::dap::messages::{StackFrame, Variable};
use crate::error::{DebugError, DebugResult};
use crate::format;

pub const LOCAL_SCOPE_REFERENCE: i64 = 1;
pub const GLOBAL_SCOPE_REFERENCE: i64 = 2;
const FIRST_HANDLE: i64 = 3;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
enum Handle {
    /// A value inside a snapshot variable; can be modified.
    Path { root: String, segments: Vec<Segment> },
    /// A value produced by `evaluate`; read-only.
    Detached(Value),
}

/// State captured at the last suspension.
///
/// Handles are only valid until the script resumes; [`Snapshot::invalidate_handles`]
/// forgets them.
#[derive(Debug, Default)]
pub struct Snapshot {
    variables: Vec<(String, Value)>,
    frames: Vec<StackFrame>,
    handles: HashMap<i64, Handle>,
    next_handle: i64,
    overrides: Vec<(String, Value)>,
}

impl Snapshot {
    pub fn capture(&mut self, variables: Vec<(String, Value)>, frames: Vec<StackFrame>) {
        self.variables = variables;
        self.frames = frames;
        self.invalidate_handles();
        self.overrides.clear();
    }

    pub fn invalidate_handles(&mut self) {
        self.handles.clear();
        self.next_handle = FIRST_HANDLE;
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    pub fn scope(&self) -> serde_json::Map<String, Value> {
        self.variables.iter().cloned().collect()
    }

    /// Resolve a dotted path (`body.user.id`) against the snapshot.
    pub fn lookup_path(&self, path: &str) -> Option<Value> {
        lookup_path(&self.variables, path)
    }

    fn variable(&self, name: &str) -> Option<&Value> {
        find_variable(&self.variables, name)
    }

    fn variable_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.variables
            .iter_mut()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    fn allocate(&mut self, handle: Handle) -> i64 {
        if self.next_handle < FIRST_HANDLE {
            self.next_handle = FIRST_HANDLE;
        }
        let id = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(id, handle);
        id
    }

    /// Handle for a value returned by `evaluate`, or 0 when it has no children.
    pub fn detached_reference(&mut self, value: &Value) -> i64 {
        if format::is_structured(value) {
            self.allocate(Handle::Detached(value.clone()))
        } else {
            0
        }
    }

    fn resolve(&self, handle: &Handle) -> Option<Value> {
        match handle {
            Handle::Detached(value) => Some(value.clone()),
            Handle::Path { root, segments } => {
                let mut value = self.variable(root)?;
                for segment in segments {
                    value = match (segment, value) {
                        (Segment::Key(key), Value::Object(map)) => map.get(key)?,
                        (Segment::Index(idx), Value::Array(items)) => items.get(*idx)?,
                        _ => return None,
                    };
                }
                Some(value.clone())
            }
        }
    }

    fn describe(&mut self, name: String, value: &Value, handle: Option<Handle>) -> Variable {
        let variables_reference = match handle {
            Some(handle) if format::is_structured(value) => self.allocate(handle),
            _ => 0,
        };
        Variable {
            name,
            value: format::format_value(value),
            type_name: format::type_name(value).to_owned(),
            variables_reference,
        }
    }

    /// Children of `reference`: the snapshot variables for the two scopes, or the entries of
    /// an expanded value.
    pub fn list(&mut self, reference: i64) -> DebugResult<Vec<Variable>> {
        if reference == LOCAL_SCOPE_REFERENCE || reference == GLOBAL_SCOPE_REFERENCE {
            if self.variables.is_empty() {
                return Ok(vec![Variable {
                    name: "(no variables)".to_owned(),
                    value: "No variables in current scope".to_owned(),
                    type_name: "info".to_owned(),
                    variables_reference: 0,
                }]);
            }
            let variables = self.variables.clone();
            return Ok(variables
                .into_iter()
                .map(|(name, value)| {
                    let handle = Handle::Path {
                        root: name.clone(),
                        segments: Vec::new(),
                    };
                    self.describe(name, &value, Some(handle))
                })
                .collect());
        }

        let handle = self
            .handles
            .get(&reference)
            .cloned()
            .ok_or(DebugError::UnknownVariablesReference(reference))?;
        let value = self
            .resolve(&handle)
            .ok_or(DebugError::UnknownVariablesReference(reference))?;

        let child = |segment: Segment| match &handle {
            Handle::Path { root, segments } => {
                let mut segments = segments.clone();
                segments.push(segment);
                Handle::Path {
                    root: root.clone(),
                    segments,
                }
            }
            Handle::Detached(_) => Handle::Detached(Value::Null),
        };

        let children: Vec<(String, Value, Handle)> = match &value {
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| (k.clone(), v.clone(), child(Segment::Key(k.clone()))))
                .collect(),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(idx, v)| (idx.to_string(), v.clone(), child(Segment::Index(idx))))
                .collect(),
            _ => Vec::new(),
        };

        Ok(children
            .into_iter()
            .map(|(name, value, handle)| {
                let handle = match handle {
                    Handle::Detached(_) => Handle::Detached(value.clone()),
                    path => path,
                };
                self.describe(name, &value, Some(handle))
            })
            .collect())
    }

    /// Assign `value` to `name` inside `reference`, queueing the change for the interpreter.
    pub fn set(&mut self, reference: i64, name: &str, value: Value) -> DebugResult<Variable> {
        let (root, segments) =
            if reference == LOCAL_SCOPE_REFERENCE || reference == GLOBAL_SCOPE_REFERENCE {
                (name.to_owned(), Vec::new())
            } else {
                match self.handles.get(&reference).cloned() {
                    Some(Handle::Path { root, mut segments }) => {
                        let parent = self
                            .resolve(&Handle::Path {
                                root: root.clone(),
                                segments: segments.clone(),
                            })
                            .ok_or(DebugError::UnknownVariablesReference(reference))?;
                        segments.push(match parent {
                            Value::Array(_) => Segment::Index(name.parse().map_err(|_| {
                                DebugError::InvalidRequest(format!("invalid index `{name}`"))
                            })?),
                            _ => Segment::Key(name.to_owned()),
                        });
                        (root, segments)
                    }
                    Some(Handle::Detached(_)) => {
                        return Err(DebugError::InvalidRequest(
                            "evaluated values cannot be modified".to_owned(),
                        ))
                    }
                    None => return Err(DebugError::UnknownVariablesReference(reference)),
                }
            };

        if segments.is_empty() {
            match self.variable_mut(&root) {
                Some(slot) => *slot = value.clone(),
                None => self.variables.push((root.clone(), value.clone())),
            }
        } else {
            let slot = self
                .variable_mut(&root)
                .ok_or(DebugError::UnknownVariablesReference(reference))?;
            let target = walk_mut(slot, &segments).ok_or_else(|| {
                DebugError::InvalidRequest(format!("cannot assign `{name}` here"))
            })?;
            *target = value.clone();
        }

        let root_value = self
            .variable(&root)
            .cloned()
            .unwrap_or(Value::Null);
        self.overrides.retain(|(n, _)| n != &root);
        self.overrides.push((root.clone(), root_value));

        // Children of the modified value may have moved.
        self.invalidate_handles();
        let handle = Handle::Path { root, segments };
        Ok(self.describe(name.to_owned(), &value, Some(handle)))
    }

    /// Assignments made since the last capture, in the order they were made.
    pub fn take_overrides(&mut self) -> Vec<(String, Value)> {
        std::mem::take(&mut self.overrides)
    }
}

/// The innermost binding of `name`; later entries shadow earlier ones.
fn find_variable<'a>(variables: &'a [(String, Value)], name: &str) -> Option<&'a Value> {
    variables
        .iter()
        .rev()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v)
}

/// Resolve a dotted path (`body.user.id`, `items.0`) against a variable list.
pub fn lookup_path(variables: &[(String, Value)], path: &str) -> Option<Value> {
    let mut parts = path.split('.');
    let root = parts.next()?;
    let mut value = find_variable(variables, root)?;
    for part in parts {
        value = match value {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(value.clone())
}

fn walk_mut<'a>(value: &'a mut Value, segments: &[Segment]) -> Option<&'a mut Value> {
    let Some((last, parents)) = segments.split_last() else {
        return Some(value);
    };
    let mut current = value;
    for segment in parents {
        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get_mut(key)?,
            (Segment::Index(idx), Value::Array(items)) => items.get_mut(*idx)?,
            _ => return None,
        };
    }
    match (last, current) {
        (Segment::Key(key), Value::Object(map)) => {
            Some(map.entry(key.clone()).or_insert(Value::Null))
        }
        (Segment::Index(idx), Value::Array(items)) => items.get_mut(*idx),
        _ => None,
    }
}

/// Parse a value typed by the user: JSON when it parses, a plain string otherwise.
pub fn parse_user_value(text: &str) -> Value {
    serde_json::from_str(text.trim()).unwrap_or_else(|_| Value::String(text.to_owned()))
}
