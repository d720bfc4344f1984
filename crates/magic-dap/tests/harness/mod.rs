use std::sync::Arc;
use std::time::Duration;

use magic_config::DebugConfig;
use magic_dap::dap::codec::{DapError, DapReader, DapWriter};
use magic_dap::{server, Backend};
use magic_script::lite::LiteEngine;
use magic_script::InMemoryResolver;
use serde_json::{json, Value};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

pub mod gated;

const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Backend over in-memory scripts with a short deferred-start timeout.
pub fn backend(scripts: &[(&str, &str)], start_timeout_ms: u64) -> Backend {
    let resolver = InMemoryResolver::new();
    for (id, text) in scripts {
        resolver.insert_text(*id, *text);
    }
    Backend::new(Arc::new(resolver), Arc::new(LiteEngine::new())).with_config(DebugConfig {
        start_timeout_ms,
        start_poll_interval_ms: 10,
        ..DebugConfig::default()
    })
}

/// A DAP client connected to an in-process server over a duplex pipe.
pub struct Client {
    reader: DapReader<ReadHalf<DuplexStream>>,
    writer: DapWriter<WriteHalf<DuplexStream>>,
    next_seq: i64,
    /// Messages read while waiting for something else.
    backlog: Vec<Value>,
    /// Every message read so far, in order.
    history: Vec<Value>,
    server: JoinHandle<Result<(), DapError>>,
}

impl Client {
    pub fn spawn(backend: Backend) -> Self {
        let (client, server_stream) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_stream);
        let server =
            tokio::spawn(async move { server::run(server_read, server_write, backend).await });

        let (client_read, client_write) = tokio::io::split(client);
        Self {
            reader: DapReader::new(client_read),
            writer: DapWriter::new(client_write),
            next_seq: 1,
            backlog: Vec::new(),
            history: Vec::new(),
            server,
        }
    }

    pub async fn send(&mut self, command: &str, arguments: Value) -> i64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let msg = json!({
            "seq": seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        });
        self.writer.write_value(&msg).await.unwrap();
        seq
    }

    /// Close the client's side of the connection, as an editor that goes away would.
    pub async fn close_input(&mut self) {
        self.writer.shutdown().await.unwrap();
    }

    async fn read_next(&mut self) -> Value {
        let msg = tokio::time::timeout(READ_TIMEOUT, self.reader.read_value())
            .await
            .expect("timed out waiting for a DAP message")
            .unwrap()
            .expect("server closed the stream");
        self.history.push(msg.clone());
        msg
    }

    pub fn history(&self) -> &[Value] {
        &self.history
    }

    /// Send a request and wait for its response; everything read before it is kept.
    pub async fn request(&mut self, command: &str, arguments: Value) -> Value {
        let seq = self.send(command, arguments).await;
        if let Some(pos) = self.backlog.iter().position(|m| is_response_to(m, seq)) {
            return self.backlog.remove(pos);
        }
        loop {
            let msg = self.read_next().await;
            if is_response_to(&msg, seq) {
                return msg;
            }
            self.backlog.push(msg);
        }
    }

    /// Wait for the first message matching `pred`, consuming it and everything before it.
    pub async fn wait_for<F>(&mut self, pred: F) -> Value
    where
        F: Fn(&Value) -> bool,
    {
        if let Some(pos) = self.backlog.iter().position(&pred) {
            let found = self.backlog.remove(pos);
            self.backlog.drain(..pos);
            return found;
        }
        self.backlog.clear();
        loop {
            let msg = self.read_next().await;
            if pred(&msg) {
                return msg;
            }
        }
    }

    pub async fn wait_for_event(&mut self, name: &str) -> Value {
        self.wait_for(|msg| is_event(msg, name)).await
    }

    /// Wait for a console envelope with the given `event` tag and return the envelope.
    pub async fn wait_for_console(&mut self, tag: &str) -> Value {
        let msg = self
            .wait_for(|msg| console_envelope(msg).is_some_and(|env| env["event"] == tag))
            .await;
        console_envelope(&msg).unwrap()
    }

    /// Wait for an `output` event of `category` whose text contains `needle`.
    pub async fn wait_for_output(&mut self, category: &str, needle: &str) -> Value {
        self.wait_for(|msg| {
            is_event(msg, "output")
                && msg["body"]["category"] == category
                && msg["body"]["output"]
                    .as_str()
                    .is_some_and(|text| text.contains(needle))
        })
        .await
    }

    /// Read everything until the server closes the stream.
    /// Returns the full history of the connection.
    pub async fn drain(mut self) -> Vec<Value> {
        let mut messages = std::mem::take(&mut self.history);
        loop {
            match tokio::time::timeout(READ_TIMEOUT, self.reader.read_value()).await {
                Ok(Ok(Some(msg))) => messages.push(msg),
                Ok(_) => break,
                Err(_) => panic!("server did not close the stream"),
            }
        }
        let result = tokio::time::timeout(READ_TIMEOUT, self.server)
            .await
            .expect("server task did not finish")
            .unwrap();
        assert!(result.is_ok(), "server failed: {result:?}");
        messages
    }

    /// Standard handshake: initialize, then launch `program`.
    pub async fn initialize_and_launch(&mut self, program: &str) -> Value {
        let init = self.request("initialize", json!({ "adapterID": "magic-api" })).await;
        assert_eq!(init["success"], true, "{init}");
        self.request("launch", json!({ "program": program })).await
    }
}

pub fn is_response_to(msg: &Value, seq: i64) -> bool {
    msg["type"] == "response" && msg["request_seq"] == seq
}

pub fn is_event(msg: &Value, name: &str) -> bool {
    msg["type"] == "event" && msg["event"] == name
}

pub fn find_event<'a>(messages: &'a [Value], name: &str) -> Option<&'a Value> {
    messages.iter().find(|msg| is_event(msg, name))
}

/// The parsed `{event, source, data}` envelope of a console output event.
pub fn console_envelope(msg: &Value) -> Option<Value> {
    if !is_event(msg, "output") || msg["body"]["category"] != "console" {
        return None;
    }
    let text = msg["body"]["output"].as_str()?;
    serde_json::from_str(text.trim_end()).ok()
}

pub fn source(path: &str) -> Value {
    json!({ "name": "script", "path": path })
}
