use magic_script::{ResolveError, ScriptError};
use thiserror::Error;

pub type DebugResult<T> = Result<T, DebugError>;

#[derive(Error, Debug)]
pub enum DebugError {
    #[error("invalid launch configuration: {0}")]
    Config(String),

    #[error("script not found: {0}")]
    ScriptNotFound(String),

    #[error("failed to load script: {0}")]
    Resolve(#[from] ResolveError),

    #[error("{0}")]
    Script(#[from] ScriptError),

    #[error("no script has been launched")]
    NotLaunched,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("unknown variablesReference {0}")]
    UnknownVariablesReference(i64),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),
}

impl DebugError {
    /// Errors after which the launched session cannot continue; the client gets a
    /// `terminated` event after the error response.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DebugError::ScriptNotFound(_) | DebugError::Resolve(_) | DebugError::Script(_)
        )
    }
}
