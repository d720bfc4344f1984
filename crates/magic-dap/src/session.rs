//! The debug session state machine.
//!
//! One [`Session`] serves one client connection. A `launch` resolves and compiles the
//! script, then waits (bounded) for the client to send breakpoints for it before the
//! script starts on its own thread. Every launch creates a new [`Run`]; abandoning a run
//! (restart, terminate, disconnect) closes its rendezvous and silences its events, so a
//! thread that is still unwinding can never talk to the client again.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use magic_config::DebugConfig;
use magic_script::{
    Executable, PausedFrame, RequestDefaults, ScriptEngine, ScriptError, ScriptResolver,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::breakpoints::{to_client_line, BreakpointRegistry};
use crate::bridge::{self, DebugContext, PauseDecision, PauseHandler};
use crate::dap::codec::Request;
use crate::dap::messages::{
    capabilities, parse_arguments, EvaluateArguments, LaunchArguments,
    SetBreakpointsArguments, SetVariableArguments, Source, StackFrame, ThreadArguments,
    VariablesArguments,
};
use crate::error::{DebugError, DebugResult};
use crate::format;
use crate::hardening;
use crate::outbound::Outbound;
use crate::output::{OutputRelay, OutputSink};
use crate::path;
use crate::variables::{self, Snapshot, GLOBAL_SCOPE_REFERENCE, LOCAL_SCOPE_REFERENCE};

/// The single thread id reported to the client.
pub const THREAD_ID: i64 = 1;
const THREAD_NAME: &str = "Magic Script Main Thread";
const FRAME_ID: i64 = 1;
const FRAME_NAME: &str = "Magic Script";
const SOURCE_NAME: &str = "magic-script";

/// Collaborators a session needs to launch scripts.
#[derive(Clone)]
pub struct Backend {
    pub resolver: Arc<dyn ScriptResolver>,
    pub engine: Arc<dyn ScriptEngine>,
    pub config: DebugConfig,
}

impl Backend {
    pub fn new(resolver: Arc<dyn ScriptResolver>, engine: Arc<dyn ScriptEngine>) -> Self {
        Self {
            resolver,
            engine,
            config: DebugConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DebugConfig) -> Self {
        self.config = config;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Launching,
    AwaitingBreakpoints,
    Running,
    Paused,
    Terminated,
    Disconnected,
}

/// Work to do once the response to a request has been queued.
enum FollowUp {
    None,
    Start(Arc<Run>),
    Resume {
        run: Arc<Run>,
        continued: bool,
        signal: bool,
    },
    PauseRequested(Arc<Run>),
    Teardown {
        run: Option<Arc<Run>>,
        clear_breakpoints: bool,
    },
}

/// Outcome of a successfully handled request.
pub struct Reply {
    pub body: Option<Value>,
    follow_up: FollowUp,
    disconnect: bool,
}

impl Reply {
    fn new(body: Option<Value>) -> Self {
        Self {
            body,
            follow_up: FollowUp::None,
            disconnect: false,
        }
    }

    fn with(body: Option<Value>, follow_up: FollowUp) -> Self {
        Self {
            body,
            follow_up,
            disconnect: false,
        }
    }

    /// Whether the connection should be closed after this reply.
    pub fn ends_session(&self) -> bool {
        self.disconnect
    }
}

/// Forwards events for one run until the run is abandoned.
struct Gate {
    live: Mutex<bool>,
    out: Outbound,
}

impl Gate {
    fn event(&self, event: &str, body: Option<Value>) {
        let live = self.live.lock();
        if *live {
            self.out.event(event, body);
        }
    }

    fn close(&self) {
        *self.live.lock() = false;
    }

    fn is_open(&self) -> bool {
        *self.live.lock()
    }
}

/// One launched execution of a script.
struct Run {
    key: String,
    client_path: String,
    script_name: String,
    executable: Arc<dyn Executable>,
    env: Mutex<Option<Map<String, Value>>>,
    context: Arc<DebugContext>,
    registry: Arc<BreakpointRegistry>,
    state: Mutex<SessionState>,
    snapshot: Mutex<Snapshot>,
    gate: Gate,
    started: AtomicBool,
    terminated: AtomicBool,
    pause_pending: AtomicBool,
    cancel: CancellationToken,
}

impl Run {
    fn is_live(&self) -> bool {
        self.gate.is_open()
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    fn emit(&self, event: &str, body: Option<Value>) {
        self.gate.event(event, body);
    }

    /// Console output carrying the `{event, source, data}` envelope.
    fn console(&self, event: &str, data: Value) {
        let mut payload = Map::new();
        payload.insert("event".into(), Value::String(event.to_owned()));
        payload.insert("source".into(), Value::String(self.client_path.clone()));
        if !data.is_null() {
            payload.insert("data".into(), data);
        }
        let mut text = Value::Object(payload).to_string();
        text.push('\n');
        self.console_text(text);
    }

    fn console_text(&self, text: String) {
        self.emit(
            "output",
            Some(json!({ "category": "console", "output": text })),
        );
    }

    fn emit_terminated(&self) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            self.emit("terminated", None);
        }
    }

    fn finish(&self) {
        self.set_state(SessionState::Terminated);
        self.emit_terminated();
    }

    fn abandon(&self) {
        self.cancel.cancel();
        self.gate.close();
        self.context.close();
        self.set_state(SessionState::Terminated);
    }
}

impl OutputSink for Run {
    fn output(&self, category: &str, text: String) {
        self.emit(
            "output",
            Some(json!({ "category": category, "output": text })),
        );
    }
}

/// Pause callbacks for a run, invoked on its execution thread.
struct RunHooks {
    run: Weak<Run>,
}

impl PauseHandler for RunHooks {
    fn on_pause(&self, frame: &PausedFrame) -> PauseDecision {
        let Some(run) = self.run.upgrade() else {
            return PauseDecision::Abort;
        };

        let line = frame.range.start_line;
        // Held until the stop is published, so `pause`/`resume` see either the running
        // or the paused run, never a half-suspended one.
        let mut state = run.state.lock();
        if !run.is_live() {
            return PauseDecision::Abort;
        }
        let pause_requested = run.pause_pending.swap(false, Ordering::SeqCst);
        let stepping = run.context.step_mode();
        let on_breakpoint = run.context.has_breakpoint(line);

        if !pause_requested && !stepping {
            if !on_breakpoint {
                // Removed between the interpreter's check and now.
                return PauseDecision::Proceed;
            }
            let log_message = run
                .registry
                .get(&run.key, line)
                .and_then(|bp| bp.log_message);
            if let Some(template) = log_message {
                drop(state);
                let mut text =
                    format::interpolate(&template, |name| variables::lookup_path(&frame.variables, name));
                text.push('\n');
                run.console_text(text);
                return PauseDecision::Proceed;
            }
        }

        let reason = if pause_requested {
            "pause"
        } else if on_breakpoint {
            "breakpoint"
        } else {
            "step"
        };

        let range = frame.range;
        let stack_frame = StackFrame {
            id: FRAME_ID,
            name: FRAME_NAME.to_owned(),
            source: Source {
                name: Some(SOURCE_NAME.to_owned()),
                path: Some(run.client_path.clone()),
            },
            line: to_client_line(range.start_line),
            column: range.start_column,
            end_line: to_client_line(range.end_line),
            end_column: range.end_column,
        };
        run.snapshot
            .lock()
            .capture(frame.variables.clone(), vec![stack_frame]);
        *state = SessionState::Paused;

        tracing::debug!(
            target: "magic.dap.session",
            script = %run.script_name,
            line = to_client_line(line),
            reason,
            "script paused"
        );

        run.emit(
            "stopped",
            Some(json!({
                "reason": reason,
                "threadId": THREAD_ID,
                "allThreadsStopped": true,
            })),
        );
        let variables: Map<String, Value> = frame.variables.iter().cloned().collect();
        run.console(
            "pause",
            json!({ "variables": variables, "range": range.to_array() }),
        );
        drop(state);

        PauseDecision::Wait
    }

    fn on_resume(&self) -> Vec<(String, Value)> {
        self.run
            .upgrade()
            .map(|run| run.snapshot.lock().take_overrides())
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct Inner {
    run: Option<Arc<Run>>,
    launch: Option<LaunchArguments>,
    disconnected: bool,
    /// `terminated` sent while no run existed (failed launch, terminate before launch).
    terminated_without_run: bool,
}

pub struct Session {
    backend: Backend,
    out: Outbound,
    registry: Arc<BreakpointRegistry>,
    runtime: tokio::runtime::Handle,
    inner: Mutex<Inner>,
}

impl Session {
    /// Create a session. Must be called from within a tokio runtime.
    pub fn new(backend: Backend, out: Outbound) -> Arc<Self> {
        Arc::new(Self {
            backend,
            out,
            registry: Arc::new(BreakpointRegistry::new()),
            runtime: tokio::runtime::Handle::current(),
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn state(&self) -> SessionState {
        let inner = self.inner.lock();
        if inner.disconnected {
            return SessionState::Disconnected;
        }
        inner
            .run
            .as_ref()
            .map(|run| run.state())
            .unwrap_or(SessionState::Idle)
    }

    fn current_run(&self) -> Option<Arc<Run>> {
        self.inner.lock().run.clone()
    }

    /// Handle one request. The caller queues the response, then calls [`Session::complete`].
    pub fn handle(self: &Arc<Self>, request: &Request) -> DebugResult<Reply> {
        tracing::debug!(
            target: "magic.dap.session",
            command = %request.command,
            seq = request.seq,
            "request"
        );

        match request.command.as_str() {
            "initialize" => Ok(Reply::new(Some(capabilities()))),
            "launch" => self.launch(parse_arguments(request)?),
            "configurationDone" => Ok(Reply::new(None)),
            "setBreakpoints" => self.set_breakpoints(parse_arguments(request)?),
            "setExceptionBreakpoints" => {
                Ok(Reply::new(Some(json!({ "breakpoints": [] }))))
            }
            "continue" | "next" | "stepIn" | "stepOut" => {
                let args: ThreadArguments = parse_arguments(request)?;
                Ok(self.resume(&request.command, args))
            }
            "pause" => Ok(self.pause()),
            "stackTrace" => Ok(self.stack_trace()),
            "scopes" => Ok(Reply::new(Some(json!({
                "scopes": [
                    { "name": "Local", "variablesReference": LOCAL_SCOPE_REFERENCE, "expensive": false },
                    { "name": "Global", "variablesReference": GLOBAL_SCOPE_REFERENCE, "expensive": false },
                ]
            })))),
            "variables" => self.variables(parse_arguments(request)?),
            "setVariable" => self.set_variable(parse_arguments(request)?),
            "threads" => Ok(Reply::new(Some(json!({
                "threads": [{ "id": THREAD_ID, "name": THREAD_NAME }]
            })))),
            "evaluate" => Ok(self.evaluate(parse_arguments(request)?)),
            "restart" => self.restart(),
            "terminate" => Ok(self.terminate()),
            "disconnect" => Ok(self.disconnect()),
            other => Err(DebugError::UnknownCommand(other.to_owned())),
        }
    }

    /// Run the follow-up work of `reply` after its response has been queued.
    pub fn complete(self: &Arc<Self>, reply: Reply) {
        match reply.follow_up {
            FollowUp::None => {}
            FollowUp::Start(run) => self.start(&run),
            FollowUp::Resume {
                run,
                continued,
                signal,
            } => {
                if continued {
                    run.emit(
                        "continued",
                        Some(json!({ "threadId": THREAD_ID, "allThreadsContinued": true })),
                    );
                }
                if signal {
                    run.context.signal();
                }
            }
            FollowUp::PauseRequested(run) => run.emit(
                "stopped",
                Some(json!({
                    "reason": "pause",
                    "threadId": THREAD_ID,
                    "allThreadsStopped": true,
                })),
            ),
            FollowUp::Teardown {
                run,
                clear_breakpoints,
            } => {
                match run {
                    Some(run) => {
                        run.emit_terminated();
                        run.abandon();
                    }
                    None => self.emit_terminated_without_run(),
                }
                if clear_breakpoints {
                    self.registry.clear();
                }
            }
        }
    }

    /// Called after an error response has been queued for a failed request.
    pub fn after_error(&self, err: &DebugError) {
        if err.is_fatal() {
            self.emit_terminated_without_run();
        }
    }

    /// Abandon everything; used when the transport goes away.
    pub fn shutdown(&self) {
        let run = {
            let mut inner = self.inner.lock();
            inner.disconnected = true;
            inner.run.take()
        };
        if let Some(run) = run {
            run.abandon();
        }
        self.registry.clear();
    }

    fn emit_terminated_without_run(&self) {
        let mut inner = self.inner.lock();
        if !inner.terminated_without_run {
            inner.terminated_without_run = true;
            self.out.event("terminated", None);
        }
    }

    fn launch(self: &Arc<Self>, args: LaunchArguments) -> DebugResult<Reply> {
        if !args.other.is_empty() {
            tracing::debug!(
                target: "magic.dap.session",
                keys = ?args.other.keys().collect::<Vec<_>>(),
                "ignoring unrecognized launch arguments"
            );
        }

        let previous = {
            let mut inner = self.inner.lock();
            inner.launch = Some(args.clone());
            inner.terminated_without_run = false;
            inner.run.take()
        };
        if let Some(previous) = previous {
            tracing::debug!(
                target: "magic.dap.session",
                script = %previous.script_name,
                "abandoning previous run"
            );
            previous.abandon();
        }

        let id = args.script_id().ok_or_else(|| {
            DebugError::Config(
                "launch requires `program` (or `fileKey`, `programPath`, `path`, `target`)"
                    .to_owned(),
            )
        })?;

        let script = self
            .backend
            .resolver
            .resolve(&id)?
            .ok_or_else(|| DebugError::ScriptNotFound(id.clone()))?;

        let key = path::normalize(&format!("{}.ms", script.script_name));
        let client_path = path::client_path(&key);

        let executable = self
            .backend
            .engine
            .compile(&magic_script::instrument(&script.text))
            .map_err(|err| match err {
                ScriptError::Compile { line, message } => ScriptError::Compile {
                    line: to_client_line(line),
                    message,
                },
                other => other,
            })
            .inspect_err(|err| {
                tracing::warn!(
                    target: "magic.dap.session",
                    script = %script.script_name,
                    error = %err,
                    "script failed to compile"
                );
            })?;

        let env = request_env(&script.request);
        let lines = self.registry.lines(&key);
        let run = Arc::new_cyclic(|weak: &Weak<Run>| Run {
            key: key.clone(),
            client_path: client_path.clone(),
            script_name: script.script_name.clone(),
            executable,
            env: Mutex::new(Some(env)),
            context: Arc::new(DebugContext::new(
                lines,
                Arc::new(RunHooks { run: weak.clone() }),
            )),
            registry: self.registry.clone(),
            state: Mutex::new(SessionState::Launching),
            snapshot: Mutex::new(Snapshot::default()),
            gate: Gate {
                live: Mutex::new(true),
                out: self.out.clone(),
            },
            started: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            pause_pending: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });
        self.inner.lock().run = Some(run.clone());

        tracing::info!(
            target: "magic.dap.session",
            id = %id,
            script = %script.script_name,
            key = %key,
            client_path = %client_path,
            "launching script"
        );

        run.emit("initialized", None);
        run.set_state(SessionState::AwaitingBreakpoints);
        self.schedule_start(run);

        Ok(Reply::new(None))
    }

    /// Start the run once breakpoints for its source arrive, or after the configured
    /// timeout.
    fn schedule_start(self: &Arc<Self>, run: Arc<Run>) {
        let session = Arc::clone(self);
        let timeout = self.backend.config.start_timeout();
        let interval = self.backend.config.start_poll_interval();

        self.runtime.spawn(async move {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                if run.is_started() || !run.is_live() {
                    return;
                }
                if session.registry.has_entry(&run.key) {
                    tracing::debug!(
                        target: "magic.dap.session",
                        key = %run.key,
                        "breakpoints received for launched script"
                    );
                    session.start(&run);
                    return;
                }

                let now = tokio::time::Instant::now();
                if now >= deadline {
                    break;
                }
                let step = interval.min(deadline - now);
                tokio::select! {
                    _ = run.cancel.cancelled() => return,
                    _ = tokio::time::sleep(step) => {}
                }
            }

            let waited_ms = timeout.as_millis();
            tracing::warn!(
                target: "magic.dap.session",
                key = %run.key,
                waited_ms = waited_ms as u64,
                "breakpoints for the launched script were not received in time; starting without them"
            );
            run.console_text(format!(
                "Breakpoints for {} were not received within {}ms; starting without them.\n",
                run.client_path, waited_ms
            ));
            session.start(&run);
        });
    }

    fn start(&self, run: &Arc<Run>) {
        if !run.is_live() || run.started.swap(true, Ordering::SeqCst) {
            return;
        }
        run.cancel.cancel();
        run.set_state(SessionState::Running);

        let env = run.env.lock().take().unwrap_or_default();
        let worker = Arc::clone(run);
        let spawned = bridge::spawn_execution(&self.backend.config.thread_name, move || {
            execute(worker, env)
        });
        if let Err(err) = spawned {
            tracing::error!(
                target: "magic.dap.session",
                error = %err,
                "failed to spawn script execution thread"
            );
            run.console("error", json!({ "message": err.to_string() }));
            run.finish();
        }
    }

    fn set_breakpoints(&self, args: SetBreakpointsArguments) -> DebugResult<Reply> {
        let requested = args.requested();
        let replaced = self.registry.replace(&args.source, &requested);
        let body = json!({ "breakpoints": replaced.breakpoints });

        let Some(run) = self.current_run().filter(|run| run.is_live()) else {
            return Ok(Reply::new(Some(body)));
        };
        if !replaced.matches(&run.key) {
            tracing::debug!(
                target: "magic.dap.session",
                key = %replaced.key,
                active = %run.key,
                "breakpoints are for another source; stored without live effect"
            );
            return Ok(Reply::new(Some(body)));
        }

        run.context.set_breakpoints(replaced.lines.clone());
        let follow_up = if run.is_started() {
            FollowUp::None
        } else {
            FollowUp::Start(run)
        };
        Ok(Reply::with(Some(body), follow_up))
    }

    fn resume(&self, command: &str, args: ThreadArguments) -> Reply {
        let is_continue = command == "continue";
        let body = is_continue.then(|| json!({ "allThreadsContinued": true }));
        let step = matches!(command, "next" | "stepIn");

        tracing::debug!(
            target: "magic.dap.session",
            command,
            thread_id = ?args.thread_id,
            "resume requested"
        );

        let Some(run) = self.current_run() else {
            return Reply::new(body);
        };

        let mut state = run.state.lock();
        let current = *state;
        match current {
            SessionState::Paused => {
                *state = SessionState::Running;
                drop(state);
                run.context.set_step_mode(step);
                run.snapshot.lock().invalidate_handles();
                Reply::with(
                    body,
                    FollowUp::Resume {
                        run: run.clone(),
                        continued: is_continue,
                        signal: true,
                    },
                )
            }
            SessionState::Running if run.pause_pending.swap(false, Ordering::SeqCst) => {
                run.context.set_step_mode(step);
                drop(state);
                Reply::with(
                    body,
                    FollowUp::Resume {
                        run: run.clone(),
                        continued: is_continue,
                        signal: false,
                    },
                )
            }
            _ => Reply::new(body),
        }
    }

    fn pause(&self) -> Reply {
        let Some(run) = self.current_run() else {
            return Reply::new(None);
        };
        let state = run.state.lock();
        if *state != SessionState::Running {
            return Reply::new(None);
        }
        run.pause_pending.store(true, Ordering::SeqCst);
        run.context.set_step_mode(true);
        drop(state);
        Reply::with(None, FollowUp::PauseRequested(run))
    }

    fn stack_trace(&self) -> Reply {
        let frames = self
            .current_run()
            .map(|run| run.snapshot.lock().frames().to_vec())
            .unwrap_or_default();
        Reply::new(Some(json!({
            "stackFrames": frames,
            "totalFrames": frames.len(),
        })))
    }

    fn variables(&self, args: VariablesArguments) -> DebugResult<Reply> {
        let variables = match self.current_run() {
            Some(run) => run.snapshot.lock().list(args.variables_reference)?,
            None => Snapshot::default().list(args.variables_reference)?,
        };
        Ok(Reply::new(Some(json!({ "variables": variables }))))
    }

    fn set_variable(&self, args: SetVariableArguments) -> DebugResult<Reply> {
        let run = self.current_run().ok_or(DebugError::NotLaunched)?;
        let state = run.state.lock();
        if *state != SessionState::Paused {
            return Err(DebugError::InvalidRequest(
                "variables can only be set while the script is paused".to_owned(),
            ));
        }
        let value = variables::parse_user_value(&args.value);
        let variable = run
            .snapshot
            .lock()
            .set(args.variables_reference, &args.name, value)?;
        drop(state);

        tracing::debug!(
            target: "magic.dap.session",
            name = %args.name,
            "variable set"
        );
        Ok(Reply::new(Some(json!({
            "value": variable.value,
            "type": variable.type_name,
            "variablesReference": variable.variables_reference,
        }))))
    }

    fn evaluate(&self, args: EvaluateArguments) -> Reply {
        let Some(run) = self.current_run() else {
            return Reply::new(Some(json!({
                "result": "Debug context not available",
                "type": "error",
                "variablesReference": 0,
            })));
        };

        let scope = run.snapshot.lock().scope();
        let body = match self.backend.engine.evaluate(&args.expression, &scope) {
            Ok(value) => {
                let reference = run.snapshot.lock().detached_reference(&value);
                json!({
                    "result": format::format_value(&value),
                    "type": format::type_name(&value),
                    "variablesReference": reference,
                })
            }
            Err(err) => {
                tracing::debug!(
                    target: "magic.dap.session",
                    context = ?args.context,
                    error = %err,
                    "evaluate failed"
                );
                json!({
                    "result": format!("Error: {err}"),
                    "type": "error",
                    "variablesReference": 0,
                })
            }
        };
        Reply::new(Some(body))
    }

    fn restart(self: &Arc<Self>) -> DebugResult<Reply> {
        let args = self
            .inner
            .lock()
            .launch
            .clone()
            .ok_or(DebugError::NotLaunched)?;
        tracing::info!(target: "magic.dap.session", "restarting debug session");
        self.launch(args)
    }

    fn terminate(&self) -> Reply {
        let run = self.current_run();
        Reply::with(
            None,
            FollowUp::Teardown {
                run,
                clear_breakpoints: true,
            },
        )
    }

    fn disconnect(&self) -> Reply {
        let run = {
            let mut inner = self.inner.lock();
            inner.disconnected = true;
            inner.run.take()
        };
        tracing::info!(target: "magic.dap.session", "client disconnected");
        Reply {
            body: None,
            follow_up: FollowUp::Teardown {
                run,
                clear_breakpoints: true,
            },
            disconnect: true,
        }
    }
}

/// Body of the execution thread.
fn execute(run: Arc<Run>, env: Map<String, Value>) {
    let relay = OutputRelay::install(run.clone());
    run.console("start", json!({ "normalizedSource": run.key }));

    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
        run.executable.execute(run.context.as_ref(), env)
    }));

    relay.flush();
    drop(relay);

    match outcome {
        Ok(Ok(value)) => {
            tracing::info!(
                target: "magic.dap.session",
                script = %run.script_name,
                "script completed"
            );
            run.console("result", value);
        }
        Ok(Err(ScriptError::Aborted)) => {
            tracing::debug!(
                target: "magic.dap.session",
                script = %run.script_name,
                "script aborted"
            );
        }
        Ok(Err(err)) => {
            tracing::warn!(
                target: "magic.dap.session",
                script = %run.script_name,
                error = %err,
                "script failed"
            );
            run.console("error", json!({ "message": err.to_string() }));
        }
        Err(payload) => {
            let message = match hardening::payload_message(payload.as_ref()) {
                Some(detail) => format!("script execution panicked: {detail}"),
                None => "script execution panicked".to_owned(),
            };
            tracing::error!(
                target: "magic.dap.session",
                script = %run.script_name,
                error = %message,
                "script execution panicked"
            );
            run.console("error", json!({ "message": message }));
        }
    }

    run.finish();
}

/// Variables an API script would see for its configured request defaults.
pub fn request_env(defaults: &RequestDefaults) -> Map<String, Value> {
    let header: Map<String, Value> = defaults
        .headers
        .iter()
        .map(|h| (h.name.clone(), h.value.clone()))
        .collect();
    let path: Map<String, Value> = defaults
        .paths
        .iter()
        .map(|p| (p.name.clone(), p.effective_value()))
        .collect();
    let query: Map<String, Value> = defaults
        .parameters
        .iter()
        .map(|p| (p.name.clone(), p.effective_value()))
        .collect();

    let mut env = Map::new();
    env.insert("path".into(), Value::Object(path));
    env.insert("header".into(), Value::Object(header));
    env.insert("query".into(), Value::Object(query));

    if let Some(body) = defaults
        .request_body
        .as_deref()
        .filter(|body| !body.trim().is_empty())
    {
        let value = match serde_json::from_str::<Value>(body) {
            Ok(object @ Value::Object(_)) => object,
            _ => Value::String(body.to_owned()),
        };
        env.insert("body".into(), value);
    }

    if let Some(data_source) = &defaults.default_data_source {
        env.insert(
            "default_data_source".into(),
            Value::String(data_source.clone()),
        );
    }

    env
}
