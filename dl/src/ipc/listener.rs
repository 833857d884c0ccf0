//! IPC listener for the server side
//!
//! Binds the Unix Domain Socket and serves each connection on its own task.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::messages::{Request, Response};
use crate::events::{Cursor, LogEntry};
use crate::handler::EventHandler;

/// Maximum request size; events with large error texts fit comfortably
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create and bind a listener at `socket_path`
///
/// Handles cleanup of stale socket files from previous runs.
pub fn create_listener_at(socket_path: &Path) -> Result<(UnixListener, PathBuf)> {
    debug!(?socket_path, "create_listener: creating IPC socket");

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }

    if socket_path.exists() {
        debug!(?socket_path, "create_listener: removing stale socket");
        std::fs::remove_file(socket_path).context("Failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(socket_path).context("Failed to bind IPC socket")?;
    debug!(?socket_path, "create_listener: socket bound successfully");

    Ok((listener, socket_path.to_path_buf()))
}

/// Remove the socket file on shutdown
pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}

/// One frame read off a connection
#[derive(Debug, PartialEq, Eq)]
pub enum ReadLine {
    Line(String),
    /// The line ran past the limit; its bytes were skipped, not kept
    TooLarge,
}

/// Newline-delimited reader that never holds more than `limit` bytes of one line
///
/// `next_line` is cancel safe: partial lines stay in the reader between calls.
pub struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    limit: usize,
    discarding: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R, limit: usize) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
            limit,
            discarding: false,
        }
    }

    /// Next line without its terminator; `None` at end of stream
    pub async fn next_line(&mut self) -> std::io::Result<Option<ReadLine>> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if self.discarding {
                    self.discarding = false;
                    return Ok(Some(ReadLine::TooLarge));
                }
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return self.take_line().map(Some);
            }

            let (chunk, consumed, complete) = match available.iter().position(|b| *b == b'\n') {
                Some(i) => (i, i + 1, true),
                None => (available.len(), available.len(), false),
            };
            if !self.discarding {
                if self.buf.len() + chunk > self.limit {
                    self.discarding = true;
                    self.buf = Vec::new();
                } else {
                    self.buf.extend_from_slice(&available[..chunk]);
                }
            }
            self.reader.consume(consumed);

            if complete {
                if self.discarding {
                    self.discarding = false;
                    return Ok(Some(ReadLine::TooLarge));
                }
                return self.take_line().map(Some);
            }
        }
    }

    fn take_line(&mut self) -> std::io::Result<ReadLine> {
        let bytes = std::mem::take(&mut self.buf);
        let mut line =
            String::from_utf8(bytes).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if line.ends_with('\r') {
            line.pop();
        }
        Ok(ReadLine::Line(line))
    }
}

fn too_large() -> Response {
    Response::error(format!("Message too large: over {} bytes", MAX_MESSAGE_SIZE))
}

/// Parse one request line
pub fn parse_request(line: &str) -> Result<Request> {
    if line.len() > MAX_MESSAGE_SIZE {
        return Err(eyre::eyre!("Message too large: {} bytes", line.len()));
    }
    let request: Request = serde_json::from_str(line.trim()).context("Failed to parse IPC message")?;
    debug!(?request, "parse_request: parsed message");
    Ok(request)
}

/// Send a response line
pub async fn send_response<W>(writer: &mut W, response: &Response) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut json = serde_json::to_string(response).context("Failed to serialize response")?;
    json.push('\n');
    writer
        .write_all(json.as_bytes())
        .await
        .context("Failed to write response")?;
    writer.flush().await.context("Failed to flush response")?;
    Ok(())
}

/// Accept connections until `shutdown` is notified
pub async fn serve(listener: UnixListener, handler: EventHandler, shutdown: Arc<Notify>) -> Result<()> {
    info!("IPC server accepting connections");

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, _addr)) => {
                        debug!("serve: IPC connection accepted");
                        let handler = handler.clone();
                        let shutdown = Arc::clone(&shutdown);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, handler, shutdown).await {
                                warn!(error = %e, "serve: IPC connection error");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "serve: IPC accept error");
                    }
                }
            }

            _ = shutdown.notified() => {
                info!("IPC server stopping");
                break;
            }
        }
    }

    Ok(())
}

/// Serve one client until it hangs up
///
/// Plain requests are answered one line each. A streaming request takes the
/// connection over for the rest of its life.
pub async fn handle_connection(stream: UnixStream, handler: EventHandler, shutdown: Arc<Notify>) -> Result<()> {
    let (read_half, mut writer) = stream.into_split();
    let mut lines = LineReader::new(read_half, MAX_MESSAGE_SIZE);

    while let Some(read) = lines.next_line().await.context("Failed to read IPC message")? {
        let line = match read {
            ReadLine::Line(line) => line,
            ReadLine::TooLarge => {
                warn!("handle_connection: oversized request skipped");
                send_response(&mut writer, &too_large()).await?;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request = match parse_request(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "handle_connection: bad request");
                send_response(&mut writer, &Response::error(format!("{e:#}"))).await?;
                continue;
            }
        };

        match request {
            Request::Events => {
                debug!("handle_connection: Events");
                return match handler.events().await {
                    Ok(cursor) => stream_entries(cursor, lines, writer, &handler, false).await,
                    Err(e) => send_response(&mut writer, &Response::error(e)).await,
                };
            }
            Request::EventLog => {
                debug!("handle_connection: EventLog");
                return match handler.tail().await {
                    Ok(cursor) => stream_entries(cursor, lines, writer, &handler, true).await,
                    Err(e) => send_response(&mut writer, &Response::error(e)).await,
                };
            }
            other => {
                let response = respond(other, &handler, &shutdown).await;
                send_response(&mut writer, &response).await?;
            }
        }
    }

    debug!("handle_connection: client disconnected");
    Ok(())
}

/// Answer a non-streaming request
async fn respond(request: Request, handler: &EventHandler, shutdown: &Notify) -> Response {
    match request {
        Request::Ping => {
            debug!("respond: Ping");
            Response::Pong {
                version: VERSION.to_string(),
            }
        }
        Request::GetState => match handler.get_state().await {
            Ok(state) => Response::State { state: Box::new(state) },
            Err(e) => Response::error(e),
        },
        Request::Execute { intent } => {
            handler.execute(intent);
            Response::Ok
        }
        Request::AutoExecute { phase, state } => match handler.auto_execute(phase, state).await {
            Ok(()) => Response::Ok,
            Err(e) => Response::error(e),
        },
        Request::Handle { event } => match handler.handle(event).await {
            Ok(_) => Response::Ok,
            Err(e) => Response::error(e),
        },
        Request::Shutdown => {
            info!("Shutdown requested over IPC");
            shutdown.notify_one();
            Response::Ok
        }
        Request::Events | Request::EventLog => Response::error("streaming request on a plain path"),
    }
}

/// Push entries to the client until the stream ends or the client leaves
///
/// With `accept_entries`, lines the client sends are handled as events.
async fn stream_entries(
    mut cursor: Cursor,
    mut lines: LineReader<OwnedReadHalf>,
    mut writer: OwnedWriteHalf,
    handler: &EventHandler,
    accept_entries: bool,
) -> Result<()> {
    debug!(subscriber = cursor.id(), from = cursor.position(), "stream_entries: started");

    loop {
        tokio::select! {
            item = cursor.next() => match item {
                Some(Ok(entry)) => {
                    let response = Response::Entry {
                        entry: Box::new(LogEntry::clone(&entry)),
                    };
                    send_response(&mut writer, &response).await?;
                }
                Some(Err(e)) => {
                    warn!(subscriber = cursor.id(), error = %e, "stream_entries: closing slow consumer");
                    send_response(&mut writer, &Response::error(e)).await?;
                    return Ok(());
                }
                None => {
                    debug!("stream_entries: log closed");
                    return Ok(());
                }
            },

            line = lines.next_line() => match line.context("Failed to read from client")? {
                Some(ReadLine::TooLarge) if accept_entries => {
                    warn!("stream_entries: oversized client entry skipped");
                    send_response(&mut writer, &too_large()).await?;
                }
                Some(ReadLine::Line(line)) if accept_entries && !line.trim().is_empty() => {
                    if let Err(e) = accept_entry(&line, handler).await {
                        warn!(error = %e, "stream_entries: rejected client entry");
                        send_response(&mut writer, &Response::error(format!("{e:#}"))).await?;
                    }
                }
                Some(_) => {}
                None => {
                    debug!(subscriber = cursor.id(), "stream_entries: client disconnected");
                    return Ok(());
                }
            },
        }
    }
}

async fn accept_entry(line: &str, handler: &EventHandler) -> Result<()> {
    if line.len() > MAX_MESSAGE_SIZE {
        return Err(eyre::eyre!("Message too large: {} bytes", line.len()));
    }
    let entry: LogEntry = serde_json::from_str(line.trim()).context("Failed to parse log entry")?;
    handler.handle(entry.event).await?;
    Ok(())
}
