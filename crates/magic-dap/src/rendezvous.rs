//! Hand-off between protocol handlers and a suspended execution thread.

use parking_lot::{Condvar, Mutex};

/// Why [`Rendezvous::wait`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Signaled,
    Closed,
}

#[derive(Debug, Default)]
struct State {
    permits: usize,
    closed: bool,
}

/// A counting semaphore that can be closed.
///
/// A `signal` that happens before the matching `wait` is remembered, and each `signal`
/// releases exactly one `wait`. Once closed, every current and future `wait` returns
/// [`Wake::Closed`].
#[derive(Debug, Default)]
pub struct Rendezvous {
    state: Mutex<State>,
    cond: Condvar,
}

impl Rendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.permits = state.permits.saturating_add(1);
        self.cond.notify_one();
    }

    /// Block until a permit is available or the rendezvous is closed.
    pub fn wait(&self) -> Wake {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Wake::Closed;
            }
            if state.permits > 0 {
                state.permits -= 1;
                return Wake::Signaled;
            }
            self.cond.wait(&mut state);
        }
    }

    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.permits = 0;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
