//! Looking up script entities by id.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use parking_lot::RwLock;
use thiserror::Error;

use crate::{RequestDefaults, ResolvedScript};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid script id `{0}`")]
    InvalidId(String),

    #[error("invalid request defaults in {path}: {source}")]
    InvalidDefaults {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Maps a script id (as given in a `launch` request) to the stored script.
pub trait ScriptResolver: Send + Sync {
    /// `Ok(None)` when no script with that id exists.
    fn resolve(&self, id: &str) -> Result<Option<ResolvedScript>, ResolveError>;
}

/// Resolver backed by a map. Ids are the keys the scripts were inserted under.
#[derive(Debug, Default)]
pub struct InMemoryResolver {
    scripts: RwLock<HashMap<String, ResolvedScript>>,
}

impl InMemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, script: ResolvedScript) {
        self.scripts.write().insert(id.into(), script);
    }

    /// Register `text` under `id`, using `id` as the script name and empty request defaults.
    pub fn insert_text(&self, id: impl Into<String>, text: impl Into<String>) {
        let id = id.into();
        let script = ResolvedScript {
            text: text.into(),
            script_name: id.clone(),
            request: RequestDefaults::default(),
        };
        self.insert(id, script);
    }
}

impl ScriptResolver for InMemoryResolver {
    fn resolve(&self, id: &str) -> Result<Option<ResolvedScript>, ResolveError> {
        Ok(self.scripts.read().get(id).cloned())
    }
}

/// Resolver reading `<root>/<id>.ms`, with optional request defaults from `<root>/<id>.json`.
///
/// The id doubles as the script name, so `api/user/list` resolves to
/// `<root>/api/user/list.ms` and is reported as `api/user/list`.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: PathBuf,
}

impl DirectoryResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative_id(id: &str) -> Result<PathBuf, ResolveError> {
        let trimmed = id.trim().trim_end_matches(".ms");
        if trimmed.is_empty() {
            return Err(ResolveError::InvalidId(id.to_owned()));
        }
        let path = PathBuf::from(trimmed);
        let safe = path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(ResolveError::InvalidId(id.to_owned()));
        }
        Ok(path)
    }
}

impl ScriptResolver for DirectoryResolver {
    fn resolve(&self, id: &str) -> Result<Option<ResolvedScript>, ResolveError> {
        let relative = Self::relative_id(id)?;
        let base = self.root.join(&relative);
        let with_suffix = |suffix: &str| {
            let mut path = base.clone().into_os_string();
            path.push(suffix);
            PathBuf::from(path)
        };
        let script_path = with_suffix(".ms");

        let text = match std::fs::read_to_string(&script_path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ResolveError::Io {
                    path: script_path,
                    source,
                })
            }
        };

        let defaults_path = with_suffix(".json");
        let request = match std::fs::read_to_string(&defaults_path) {
            Ok(json) => serde_json::from_str(&json).map_err(|source| {
                ResolveError::InvalidDefaults {
                    path: defaults_path.clone(),
                    source,
                }
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => RequestDefaults::default(),
            Err(source) => {
                return Err(ResolveError::Io {
                    path: defaults_path,
                    source,
                })
            }
        };

        let script_name = relative
            .components()
            .filter_map(|component| component.as_os_str().to_str())
            .collect::<Vec<_>>()
            .join("/");

        tracing::debug!(
            target: "magic.script",
            id,
            path = %script_path.display(),
            "resolved script"
        );

        Ok(Some(ResolvedScript {
            text,
            script_name,
            request,
        }))
    }
}
