//! Relaying script output to the client.
//!
//! While a script runs, both `magic_script::io` streams are wrapped. Writes made on the
//! execution thread are buffered and forwarded as DAP `output` events, one per completed
//! line; writes from any other thread go to the previously installed writer untouched.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use magic_script::io::{self as script_io, ScriptWriter, StdStream};
use parking_lot::Mutex;

/// Receives completed output chunks.
pub trait OutputSink: Send + Sync {
    fn output(&self, category: &str, text: String);
}

struct ThreadRelay {
    stream: StdStream,
    thread: ThreadId,
    delegate: Arc<dyn ScriptWriter>,
    sink: Arc<dyn OutputSink>,
    buffer: Mutex<Vec<u8>>,
    detached: AtomicBool,
}

impl ThreadRelay {
    fn captures_current_thread(&self) -> bool {
        !self.detached.load(Ordering::Acquire) && std::thread::current().id() == self.thread
    }

    fn emit(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(bytes).into_owned();
        self.sink.output(self.stream.category(), text);
    }

    /// Emit whatever is buffered, complete line or not.
    fn drain(&self) {
        let pending = std::mem::take(&mut *self.buffer.lock());
        self.emit(&pending);
    }
}

impl ScriptWriter for ThreadRelay {
    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        if !self.captures_current_thread() {
            return self.delegate.write(bytes);
        }

        let lines = {
            let mut buffer = self.buffer.lock();
            buffer.extend_from_slice(bytes);
            match buffer.iter().rposition(|&b| b == b'\n') {
                Some(last) => {
                    let rest = buffer.split_off(last + 1);
                    std::mem::replace(&mut *buffer, rest)
                }
                None => return Ok(()),
            }
        };

        for line in lines.split_inclusive(|&b| b == b'\n') {
            self.emit(line);
        }
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        if !self.captures_current_thread() {
            return self.delegate.flush();
        }
        self.drain();
        Ok(())
    }

    fn detached_delegate(&self) -> Option<Arc<dyn ScriptWriter>> {
        self.detached
            .load(Ordering::Acquire)
            .then(|| self.delegate.clone())
    }
}

struct Installed {
    relay: Arc<ThreadRelay>,
    installed: Arc<dyn ScriptWriter>,
    previous: Arc<dyn ScriptWriter>,
}

/// Restores the wrapped streams when dropped, flushing any partial line first.
#[must_use = "output is only relayed while the guard is alive"]
pub struct OutputRelay {
    streams: Vec<Installed>,
}

impl OutputRelay {
    /// Wrap stdout and stderr for the current thread.
    pub fn install(sink: Arc<dyn OutputSink>) -> Self {
        let thread = std::thread::current().id();
        let streams = [StdStream::Stdout, StdStream::Stderr]
            .into_iter()
            .map(|stream| {
                let relay = Arc::new(ThreadRelay {
                    stream,
                    thread,
                    delegate: script_io::current(stream),
                    sink: sink.clone(),
                    buffer: Mutex::new(Vec::new()),
                    detached: AtomicBool::new(false),
                });
                let installed: Arc<dyn ScriptWriter> = relay.clone();
                let previous = script_io::replace(stream, installed.clone());
                Installed {
                    relay,
                    installed,
                    previous,
                }
            })
            .collect();
        Self { streams }
    }

    /// Emit partial lines buffered so far.
    pub fn flush(&self) {
        for installed in &self.streams {
            installed.relay.drain();
        }
    }
}

impl Drop for OutputRelay {
    fn drop(&mut self) {
        for Installed {
            relay,
            installed,
            previous,
        } in self.streams.drain(..)
        {
            relay.drain();
            let stream = relay.stream;
            if !script_io::restore(stream, &installed, previous) {
                // Someone wrapped the stream after us. Turn into a pass-through; the next
                // restore further up the chain unwraps us.
                relay.detached.store(true, Ordering::Release);
                tracing::debug!(
                    target: "magic.dap",
                    stream = stream.category(),
                    "script stream replaced while relaying; detaching"
                );
            }
        }
    }
}
