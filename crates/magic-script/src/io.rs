//! Process-wide script output streams.
//!
//! Interpreters write `print`-style output through [`write`] rather than straight to the
//! process stdout/stderr. Each stream is a swappable slot, so a debugger can wrap it for
//! the duration of one execution (see `magic_dap::output`) and put the previous writer
//! back afterwards.

use std::io::{self, Write};
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdStream {
    Stdout,
    Stderr,
}

impl StdStream {
    /// DAP `output` event category for this stream.
    pub fn category(self) -> &'static str {
        match self {
            StdStream::Stdout => "stdout",
            StdStream::Stderr => "stderr",
        }
    }
}

pub trait ScriptWriter: Send + Sync {
    fn write(&self, bytes: &[u8]) -> io::Result<()>;

    fn flush(&self) -> io::Result<()>;

    /// For wrappers that have been detached from their slot: the writer they now forward
    /// everything to. [`restore`] skips over detached wrappers.
    fn detached_delegate(&self) -> Option<Arc<dyn ScriptWriter>> {
        None
    }
}

struct ProcessStdout;

impl ScriptWriter for ProcessStdout {
    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        io::stdout().lock().write_all(bytes)
    }

    fn flush(&self) -> io::Result<()> {
        io::stdout().lock().flush()
    }
}

struct ProcessStderr;

impl ScriptWriter for ProcessStderr {
    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        io::stderr().lock().write_all(bytes)
    }

    fn flush(&self) -> io::Result<()> {
        io::stderr().lock().flush()
    }
}

pub fn process_stdout() -> Arc<dyn ScriptWriter> {
    Arc::new(ProcessStdout)
}

pub fn process_stderr() -> Arc<dyn ScriptWriter> {
    Arc::new(ProcessStderr)
}

static STDOUT: LazyLock<RwLock<Arc<dyn ScriptWriter>>> =
    LazyLock::new(|| RwLock::new(process_stdout()));
static STDERR: LazyLock<RwLock<Arc<dyn ScriptWriter>>> =
    LazyLock::new(|| RwLock::new(process_stderr()));

fn slot(stream: StdStream) -> &'static RwLock<Arc<dyn ScriptWriter>> {
    match stream {
        StdStream::Stdout => &STDOUT,
        StdStream::Stderr => &STDERR,
    }
}

/// The writer currently installed for `stream`.
pub fn current(stream: StdStream) -> Arc<dyn ScriptWriter> {
    slot(stream).read().clone()
}

/// Install `writer` for `stream`, returning the previously installed writer.
pub fn replace(stream: StdStream, writer: Arc<dyn ScriptWriter>) -> Arc<dyn ScriptWriter> {
    std::mem::replace(&mut *slot(stream).write(), writer)
}

/// Put `previous` back, but only if `installed` is still the active writer.
///
/// Returns `false` when another writer has been installed on top of `installed` in the
/// meantime; the caller is then responsible for detaching itself.
pub fn restore(
    stream: StdStream,
    installed: &Arc<dyn ScriptWriter>,
    previous: Arc<dyn ScriptWriter>,
) -> bool {
    let mut previous = previous;
    while let Some(delegate) = previous.detached_delegate() {
        previous = delegate;
    }

    let mut guard = slot(stream).write();
    if !std::ptr::addr_eq(Arc::as_ptr(&*guard), Arc::as_ptr(installed)) {
        return false;
    }
    *guard = previous;
    true
}

/// Write raw text to `stream`.
pub fn write(stream: StdStream, text: &str) -> io::Result<()> {
    current(stream).write(text.as_bytes())
}

/// Write `text` followed by a newline to `stream`.
pub fn println(stream: StdStream, text: &str) -> io::Result<()> {
    let mut line = String::with_capacity(text.len() + 1);
    line.push_str(text);
    line.push('\n');
    write(stream, &line)
}
