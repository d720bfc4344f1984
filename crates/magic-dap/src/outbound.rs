use serde_json::Value;
use tokio::sync::mpsc;

use crate::dap::codec::{make_event, make_response, Event, Request, Response};

/// A message queued for the client. Sequence numbers are assigned by the writer, in the
/// order messages leave the queue.
#[derive(Debug, Clone)]
pub enum Outgoing {
    Response(Response),
    Event(Event),
}

/// Cloneable handle for sending responses and events from any thread.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl Outbound {
    pub fn new(tx: mpsc::UnboundedSender<Outgoing>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn send(&self, message: Outgoing) {
        if self.tx.send(message).is_err() {
            tracing::debug!(target: "magic.dap", "client writer closed; dropping message");
        }
    }

    pub fn response(&self, request: &Request, body: Option<Value>) {
        self.send(Outgoing::Response(make_response(0, request, true, body, None)));
    }

    pub fn error_response(&self, request: &Request, message: impl Into<String>) {
        self.send(Outgoing::Response(make_response(
            0,
            request,
            false,
            None,
            Some(message.into()),
        )));
    }

    pub fn event(&self, event: &str, body: Option<Value>) {
        self.send(Outgoing::Event(make_event(0, event, body)));
    }
}
