//! Transports: one DAP session over any async byte stream.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;

use magic_script::io::{self as script_io, StdStream};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dap::codec::{DapError, DapReader, DapWriter, Request};
use crate::outbound::{Outbound, Outgoing};
use crate::session::{Backend, Session};

/// Serve one debug session over `reader`/`writer` until the client disconnects or the
/// stream ends.
pub async fn run<R, W>(reader: R, writer: W, backend: Backend) -> Result<(), DapError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out, rx) = Outbound::channel();
    let shutdown = CancellationToken::new();
    let writer_task = tokio::spawn(write_loop(DapWriter::new(writer), rx, shutdown.clone()));

    let session = Session::new(backend, out.clone());
    let result = read_loop(DapReader::new(reader), &session, &out).await;

    session.shutdown();
    shutdown.cancel();
    if writer_task.await.is_err() {
        tracing::error!(target: "magic.dap", "DAP writer task panicked");
    }

    tracing::debug!(target: "magic.dap", "DAP session closed");
    result
}

async fn read_loop<R>(
    mut reader: DapReader<R>,
    session: &std::sync::Arc<Session>,
    out: &Outbound,
) -> Result<(), DapError>
where
    R: AsyncRead + Unpin,
{
    while let Some(value) = reader.read_value().await? {
        if value.get("type").and_then(Value::as_str) != Some("request") {
            continue;
        }
        let request: Request = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(err) => {
                let err = DapError::from(err);
                tracing::warn!(target: "magic.dap", error = %err, "ignoring malformed request");
                continue;
            }
        };

        match std::panic::catch_unwind(AssertUnwindSafe(|| session.handle(&request))) {
            Ok(Ok(mut reply)) => {
                let ends_session = reply.ends_session();
                out.response(&request, reply.body.take());
                session.complete(reply);
                if ends_session {
                    break;
                }
            }
            Ok(Err(err)) => {
                tracing::debug!(
                    target: "magic.dap",
                    command = %request.command,
                    error = %err,
                    "request failed"
                );
                out.error_response(&request, err.to_string());
                session.after_error(&err);
            }
            Err(_) => {
                tracing::error!(
                    target: "magic.dap",
                    command = %request.command,
                    "panic in DAP request handler"
                );
                out.error_response(
                    &request,
                    "Internal error (panic). The adapter will continue in safe-mode.",
                );
            }
        }
    }
    Ok(())
}

/// Serialize outgoing messages, assigning sequence numbers in send order.
async fn write_loop<W>(
    mut writer: DapWriter<W>,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    shutdown: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    let mut seq = 1_i64;
    loop {
        let message = tokio::select! {
            biased;
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = shutdown.cancelled() => break,
        };
        if let Err(err) = write_one(&mut writer, message, &mut seq).await {
            tracing::debug!(target: "magic.dap", error = %err, "failed to write DAP message");
            return;
        }
    }

    // Flush whatever was queued before shutdown (final responses, `terminated`).
    while let Ok(message) = rx.try_recv() {
        if let Err(err) = write_one(&mut writer, message, &mut seq).await {
            tracing::debug!(target: "magic.dap", error = %err, "failed to write DAP message");
            return;
        }
    }
    if let Err(err) = writer.shutdown().await {
        tracing::debug!(target: "magic.dap", error = %err, "failed to close DAP stream");
    }
}

async fn write_one<W>(
    writer: &mut DapWriter<W>,
    message: Outgoing,
    seq: &mut i64,
) -> Result<(), DapError>
where
    W: AsyncWrite + Unpin,
{
    let current = *seq;
    *seq += 1;
    match message {
        Outgoing::Response(mut response) => {
            response.seq = current;
            writer.write_response(&response).await
        }
        Outgoing::Event(mut event) => {
            event.seq = current;
            writer.write_event(&event).await
        }
    }
}

/// Serve a single session over stdin/stdout.
///
/// Script stdout is rebound to stderr first so that the DAP channel only ever carries
/// protocol messages.
pub async fn run_stdio(backend: Backend) -> anyhow::Result<()> {
    script_io::replace(StdStream::Stdout, script_io::process_stderr());
    run(tokio::io::stdin(), tokio::io::stdout(), backend).await?;
    Ok(())
}

/// Accept connections on `addr`, one session per connection.
pub async fn serve_tcp(addr: SocketAddr, backend: Backend) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(
        target: "magic.dap",
        addr = %listener.local_addr()?,
        "listening for DAP clients"
    );
    serve_listener(listener, backend).await
}

pub async fn serve_listener(listener: TcpListener, backend: Backend) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let backend = backend.clone();
        tokio::spawn(async move {
            tracing::info!(target: "magic.dap", %peer, "DAP client connected");
            let (reader, writer) = stream.into_split();
            if let Err(err) = run(reader, writer, backend).await {
                tracing::warn!(target: "magic.dap", %peer, error = %err, "DAP session failed");
            }
        });
    }
}
