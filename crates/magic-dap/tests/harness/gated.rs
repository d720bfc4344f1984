//! A script engine whose scripts block in the middle of a statement until the test
//! releases them, so requests can be sent while a script is genuinely running.

use std::sync::Arc;
use std::time::Duration;

use magic_config::DebugConfig;
use magic_dap::Backend;
use magic_script::{
    DebugHooks, Executable, InMemoryResolver, PausedFrame, Resume, ScriptEngine, ScriptError,
    SourceRange,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

/// Client lines of the three statements every gated script runs.
pub const STATEMENTS: [u32; 3] = [1, 2, 3];

/// The client line whose statement blocks until [`Gate::release`].
pub const BLOCKING_STATEMENT: u32 = 2;

/// What a gated script returns when it runs to the end.
pub const RESULT: &str = "released";

const WAIT: Duration = Duration::from_secs(10);

/// Test side of a [`GatedEngine`].
pub struct Gate {
    entered: mpsc::UnboundedReceiver<()>,
    release: mpsc::UnboundedSender<()>,
    finished: mpsc::UnboundedReceiver<Result<Value, ScriptError>>,
}

impl Gate {
    /// Wait until the script is blocked inside [`BLOCKING_STATEMENT`].
    pub async fn entered(&mut self) {
        tokio::time::timeout(WAIT, self.entered.recv())
            .await
            .expect("script never reached the blocking statement")
            .expect("engine dropped");
    }

    pub fn release(&self) {
        self.release.send(()).unwrap();
    }

    /// The value `execute` returned, once the execution thread is done with the script.
    pub async fn finished(&mut self) -> Result<Value, ScriptError> {
        tokio::time::timeout(WAIT, self.finished.recv())
            .await
            .expect("script execution did not finish")
            .expect("engine dropped")
    }
}

pub struct GatedEngine {
    entered: mpsc::UnboundedSender<()>,
    release: Arc<Mutex<mpsc::UnboundedReceiver<()>>>,
    finished: mpsc::UnboundedSender<Result<Value, ScriptError>>,
}

impl GatedEngine {
    pub fn new() -> (Self, Gate) {
        let (entered_tx, entered_rx) = mpsc::unbounded_channel();
        let (release_tx, release_rx) = mpsc::unbounded_channel();
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let engine = Self {
            entered: entered_tx,
            release: Arc::new(Mutex::new(release_rx)),
            finished: finished_tx,
        };
        let gate = Gate {
            entered: entered_rx,
            release: release_tx,
            finished: finished_rx,
        };
        (engine, gate)
    }
}

impl ScriptEngine for GatedEngine {
    fn compile(&self, _text: &str) -> Result<Arc<dyn Executable>, ScriptError> {
        Ok(Arc::new(GatedScript {
            entered: self.entered.clone(),
            release: self.release.clone(),
            finished: self.finished.clone(),
        }))
    }

    fn evaluate(&self, expression: &str, scope: &Map<String, Value>) -> Result<Value, ScriptError> {
        scope
            .get(expression.trim())
            .cloned()
            .ok_or_else(|| ScriptError::Runtime(format!("undefined variable `{expression}`")))
    }
}

struct GatedScript {
    entered: mpsc::UnboundedSender<()>,
    release: Arc<Mutex<mpsc::UnboundedReceiver<()>>>,
    finished: mpsc::UnboundedSender<Result<Value, ScriptError>>,
}

impl GatedScript {
    fn run(&self, hooks: &dyn DebugHooks, mut vars: Map<String, Value>) -> Result<Value, ScriptError> {
        for client_line in STATEMENTS {
            let line = client_line + magic_script::DEBUG_MARK_LINES;
            if hooks.should_suspend(line) {
                let frame = PausedFrame {
                    range: SourceRange {
                        start_line: line,
                        start_column: 1,
                        end_line: line,
                        end_column: 10,
                    },
                    variables: vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                };
                match hooks.suspend(frame) {
                    Resume::Abort => return Err(ScriptError::Aborted),
                    Resume::Continue { overrides } => vars.extend(overrides),
                }
            }
            if client_line == BLOCKING_STATEMENT {
                let _ = self.entered.send(());
                self.release.lock().blocking_recv();
            }
            vars.insert(format!("line{client_line}"), json!(client_line));
        }
        Ok(json!(RESULT))
    }
}

impl Executable for GatedScript {
    fn execute(&self, hooks: &dyn DebugHooks, env: Map<String, Value>) -> Result<Value, ScriptError> {
        let result = self.run(hooks, env);
        let _ = self.finished.send(result.clone());
        result
    }
}

/// Backend whose only script, `api/gated`, runs on a [`GatedEngine`].
pub fn gated_backend(start_timeout_ms: u64) -> (Backend, Gate) {
    let resolver = InMemoryResolver::new();
    resolver.insert_text("api/gated", "step one\nblock\nstep three");
    let (engine, gate) = GatedEngine::new();
    let backend = Backend::new(Arc::new(resolver), Arc::new(engine)).with_config(DebugConfig {
        start_timeout_ms,
        start_poll_interval_ms: 10,
        ..DebugConfig::default()
    });
    (backend, gate)
}
