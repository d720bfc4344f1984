//! The bridge between the script execution thread and the protocol handlers.
//!
//! [`DebugContext`] is what the interpreter sees as its [`DebugHooks`]. It owns the live
//! breakpoint set and the step flag, and parks the execution thread on a [`Rendezvous`]
//! while the client inspects a paused script.

use std::collections::BTreeSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use magic_script::{DebugHooks, PausedFrame, Resume};
use parking_lot::RwLock;
use serde_json::Value;

use crate::rendezvous::{Rendezvous, Wake};

/// What to do with a suspension after the pause callback has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseDecision {
    /// Park the execution thread until the client resumes it.
    Wait,
    /// Keep running without parking (log points).
    Proceed,
    /// Stop executing the script.
    Abort,
}

/// Session-side callbacks, run on the execution thread.
pub trait PauseHandler: Send + Sync {
    /// Publish the paused state. Called before the thread parks.
    fn on_pause(&self, frame: &PausedFrame) -> PauseDecision;

    /// Called once the thread has been released; returns the variable assignments made
    /// while it was parked.
    fn on_resume(&self) -> Vec<(String, Value)>;
}

pub struct DebugContext {
    breakpoints: RwLock<BTreeSet<u32>>,
    step_mode: AtomicBool,
    rendezvous: Rendezvous,
    handler: Arc<dyn PauseHandler>,
}

impl DebugContext {
    pub fn new(breakpoints: BTreeSet<u32>, handler: Arc<dyn PauseHandler>) -> Self {
        Self {
            breakpoints: RwLock::new(breakpoints),
            step_mode: AtomicBool::new(false),
            rendezvous: Rendezvous::new(),
            handler,
        }
    }

    /// Replace the instrumented lines the interpreter suspends on. Takes effect at the next
    /// statement boundary.
    pub fn set_breakpoints(&self, lines: BTreeSet<u32>) {
        *self.breakpoints.write() = lines;
    }

    /// With step mode on, the interpreter suspends before every statement.
    pub fn set_step_mode(&self, on: bool) {
        self.step_mode.store(on, Ordering::SeqCst);
    }

    pub fn step_mode(&self) -> bool {
        self.step_mode.load(Ordering::SeqCst)
    }

    pub fn has_breakpoint(&self, line: u32) -> bool {
        self.breakpoints.read().contains(&line)
    }

    /// Release the parked execution thread (or the next one to park).
    pub fn signal(&self) {
        self.rendezvous.signal();
    }

    /// Abandon the execution: a parked thread wakes up and aborts, a running one aborts at
    /// its next statement.
    pub fn close(&self) {
        self.rendezvous.close();
    }

    pub fn is_closed(&self) -> bool {
        self.rendezvous.is_closed()
    }
}

impl DebugHooks for DebugContext {
    fn should_suspend(&self, line: u32) -> bool {
        self.is_closed() || self.step_mode() || self.has_breakpoint(line)
    }

    fn suspend(&self, frame: PausedFrame) -> Resume {
        if self.is_closed() {
            return Resume::Abort;
        }

        match self.handler.on_pause(&frame) {
            PauseDecision::Proceed => Resume::proceed(),
            PauseDecision::Abort => Resume::Abort,
            PauseDecision::Wait => match self.rendezvous.wait() {
                Wake::Signaled => Resume::Continue {
                    overrides: self.handler.on_resume(),
                },
                Wake::Closed => {
                    tracing::debug!(
                        target: "magic.dap.bridge",
                        line = frame.range.start_line,
                        "debug context closed while suspended; aborting script"
                    );
                    Resume::Abort
                }
            },
        }
    }
}

/// Spawn the named thread that runs one script execution.
pub fn spawn_execution<F>(name: &str, body: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_owned())
        .spawn(body)
}
