//! IPC client for talking to the event server
//!
//! Provides a simple interface for the CLI and for producers in other
//! processes to reach the server via Unix Domain Socket.

use std::path::PathBuf;
use std::time::Duration;

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use super::get_socket_path;
use super::listener::MAX_MESSAGE_SIZE;
use super::messages::{Request, Response};
use crate::control::{Intent, TriggerPhase, TriggerState};
use crate::events::{Event, LogEntry};
use crate::state::State;

/// Default timeout for IPC operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the event server
#[derive(Debug, Clone)]
pub struct EventClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Default for EventClient {
    fn default() -> Self {
        Self::new()
    }
}

impl EventClient {
    /// Create a new client with the default socket path
    pub fn new() -> Self {
        Self::with_socket_path(get_socket_path())
    }

    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set a custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    /// Check if the server socket exists
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Check if the server is alive and get its version
    pub async fn ping(&self) -> Result<String> {
        debug!("EventClient: pinging server");
        match self.send_request(Request::Ping).await? {
            Response::Pong { version } => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_state(&self) -> Result<State> {
        debug!("EventClient: fetching state");
        match self.send_request(Request::GetState).await? {
            Response::State { state } => Ok(*state),
            other => Err(unexpected(other)),
        }
    }

    pub async fn execute(&self, intent: Intent) -> Result<()> {
        debug!(?intent, "EventClient: requesting execution");
        self.expect_ok(Request::Execute { intent }).await
    }

    pub async fn auto_execute(&self, phase: TriggerPhase, enabled: bool) -> Result<()> {
        debug!(%phase, enabled, "EventClient: toggling auto-trigger");
        self.expect_ok(Request::AutoExecute {
            phase,
            state: TriggerState { enabled },
        })
        .await
    }

    pub async fn handle(&self, event: Event) -> Result<()> {
        debug!(event_type = event.event_type(), "EventClient: sending event");
        self.expect_ok(Request::Handle { event }).await
    }

    /// Request the server to stop gracefully
    pub async fn shutdown(&self) -> Result<()> {
        debug!("EventClient: requesting server shutdown");
        self.expect_ok(Request::Shutdown).await
    }

    /// Full history, then live entries
    pub async fn events(&self) -> Result<EntryStream> {
        self.open_stream(Request::Events).await
    }

    /// Live entries only; the stream also accepts entries to record
    pub async fn event_log(&self) -> Result<EntryStream> {
        self.open_stream(Request::EventLog).await
    }

    async fn expect_ok(&self, request: Request) -> Result<()> {
        match self.send_request(request).await? {
            Response::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn connect(&self) -> Result<UnixStream> {
        tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to server socket")
    }

    /// Send a request and wait for its single response line
    async fn send_request(&self, request: Request) -> Result<Response> {
        debug!(?self.socket_path, ?request, "EventClient: sending request");
        let stream = self.connect().await?;
        let (read_half, mut write_half) = stream.into_split();

        tokio::time::timeout(self.timeout, write_line(&mut write_half, &request))
            .await
            .context("Write timeout")??;

        let mut lines = BufReader::new(read_half).lines();
        let line = tokio::time::timeout(self.timeout, lines.next_line())
            .await
            .context("Read timeout")?
            .context("Failed to read response")?
            .ok_or_else(|| eyre::eyre!("Server closed the connection"))?;

        let response: Response = serde_json::from_str(line.trim()).context("Failed to parse server response")?;
        debug!(?response, "EventClient: received response");
        Ok(response)
    }

    async fn open_stream(&self, request: Request) -> Result<EntryStream> {
        debug!(?request, "EventClient: opening stream");
        let stream = self.connect().await?;
        let (read_half, mut writer) = stream.into_split();
        tokio::time::timeout(self.timeout, write_line(&mut writer, &request))
            .await
            .context("Write timeout")??;
        Ok(EntryStream {
            lines: BufReader::new(read_half).lines(),
            writer,
        })
    }
}

/// Open streaming connection; dropping it unsubscribes on the server
pub struct EntryStream {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl EntryStream {
    /// Next entry; `None` once the server ends the stream
    pub async fn next(&mut self) -> Result<Option<LogEntry>> {
        loop {
            let Some(line) = self.lines.next_line().await.context("Failed to read entry")? else {
                return Ok(None);
            };
            let response: Response = serde_json::from_str(line.trim()).context("Failed to parse server response")?;
            match response {
                Response::Entry { entry } => return Ok(Some(*entry)),
                Response::Error { message } => return Err(eyre::eyre!("Server error: {}", message)),
                // acks are not expected on a stream; skip them
                other => debug!(?other, "EntryStream: ignoring response"),
            }
        }
    }

    /// Send an entry to be recorded (live-only streams)
    pub async fn send(&mut self, entry: &LogEntry) -> Result<()> {
        write_line(&mut self.writer, entry).await
    }
}

async fn write_line<T: serde::Serialize>(writer: &mut OwnedWriteHalf, value: &T) -> Result<()> {
    let mut json = serde_json::to_string(value).context("Failed to serialize message")?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(eyre::eyre!("Message too large: {} bytes", json.len()));
    }
    json.push('\n');
    writer
        .write_all(json.as_bytes())
        .await
        .context("Failed to write message")?;
    writer.flush().await.context("Failed to flush stream")?;
    Ok(())
}

fn unexpected(response: Response) -> eyre::Report {
    match response {
        Response::Error { message } => eyre::eyre!("Server error: {}", message),
        other => eyre::eyre!("Unexpected response: {:?}", other),
    }
}
