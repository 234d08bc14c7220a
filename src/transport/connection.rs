//! Connection manager - owns the WebSocket to the media server.
//!
//! A background task connects, pumps outbound frames and inbound replies,
//! and on any drop waits a fixed delay before connecting again. There is no
//! retry cap and the delay never grows.
//!
//! Callers hold a cheap [`ConnectionHandle`]: `send` only succeeds while the
//! socket is open, inbound replies arrive on a broadcast stream.

use crate::error::{Result, UploadError};
use crate::transport::response::{CompletionResponse, ProgressResponse, ServerMessage};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

/// Delay before every reconnect attempt
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Capacity of the inbound event broadcast channel
pub const CONNECTION_EVENT_CHANNEL_SIZE: usize = 256;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    State(ConnectionState),
    Progress(ProgressResponse),
    Completion(CompletionResponse),
    /// Anything the server sent that is not a known reply
    Text(String),
}

/// Outbound side of a connection, as seen by the upload session.
pub trait FrameSink: Send + Sync {
    /// Hand one encoded frame to the socket. Fails with `ConnectionNotOpen`
    /// instead of queueing when the socket is not open.
    fn send(&self, frame: Bytes) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    pub reconnect_delay: Duration,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

struct Inner {
    outbound: mpsc::UnboundedSender<Bytes>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Inner>,
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    /// Subscribe to state changes and server replies from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Resolve once the socket is open.
    pub async fn wait_open(&self) -> Result<()> {
        let mut state = self.inner.state.clone();
        state
            .wait_for(|s| *s == ConnectionState::Open)
            .await
            .map(|_| ())
            .map_err(|_| UploadError::ConnectionDropped("connection task stopped".to_string()))
    }

    /// Close the socket and stop reconnecting.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
    }
}

impl FrameSink for ConnectionHandle {
    fn send(&self, frame: Bytes) -> Result<()> {
        if !self.is_open() {
            return Err(UploadError::ConnectionNotOpen);
        }
        self.inner
            .outbound
            .send(frame)
            .map_err(|_| UploadError::ConnectionDropped("connection task stopped".to_string()))
    }
}

// =============================================================================
// Manager
// =============================================================================

/// Owns the background connection task.
pub struct ConnectionManager {
    handle: ConnectionHandle,
    task: JoinHandle<()>,
}

impl ConnectionManager {
    /// Start connecting in the background. Must be called inside a Tokio runtime.
    pub fn spawn(config: ConnectionConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (events, _) = broadcast::channel(CONNECTION_EVENT_CHANNEL_SIZE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = Worker {
            config,
            outbound_rx,
            state_tx,
            events: events.clone(),
            shutdown_rx,
        };
        let task = tokio::spawn(worker.run());

        Self {
            handle: ConnectionHandle {
                inner: Arc::new(Inner {
                    outbound: outbound_tx,
                    state: state_rx,
                    events,
                    shutdown: shutdown_tx,
                }),
            },
            task,
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Request shutdown and wait for the background task to finish.
    pub async fn shutdown(self) {
        self.handle.shutdown();
        if let Err(e) = self.task.await {
            error!("Connection task failed: {}", e);
        }
    }
}

// =============================================================================
// Worker
// =============================================================================

enum PumpExit {
    Shutdown,
    ClosedByServer,
}

struct Worker {
    config: ConnectionConfig,
    outbound_rx: mpsc::UnboundedReceiver<Bytes>,
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }
            self.set_state(ConnectionState::Connecting);
            info!("Connecting to {}", self.config.url);

            let connected = tokio::select! {
                r = connect_async(self.config.url.as_str()) => Some(r),
                _ = self.shutdown_rx.changed() => None,
            };

            match connected {
                None => break,
                Some(Ok((socket, _))) => {
                    self.discard_pending();
                    self.set_state(ConnectionState::Open);
                    info!("Connection established with {}", self.config.url);

                    match self.pump(socket).await {
                        Ok(PumpExit::Shutdown) => break,
                        Ok(PumpExit::ClosedByServer) => warn!("Connection closed by server"),
                        Err(e) => warn!("{}", e),
                    }
                }
                Some(Err(e)) => warn!("Connecting to {} failed: {}", self.config.url, e),
            }

            self.set_state(ConnectionState::Closed);
            self.discard_pending();

            info!("Reconnecting in {:?}", self.config.reconnect_delay);
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = self.shutdown_rx.changed() => break,
            }
        }

        self.set_state(ConnectionState::Closed);
        debug!("Connection task stopped");
    }

    async fn pump(&mut self, socket: Socket) -> Result<PumpExit> {
        let (mut write, mut read) = socket.split();
        let outbound_rx = &mut self.outbound_rx;
        let shutdown_rx = &mut self.shutdown_rx;
        let events = &self.events;

        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else {
                        return Ok(PumpExit::Shutdown);
                    };
                    let len = frame.len();
                    write
                        .send(Message::Binary(frame.to_vec()))
                        .await
                        .map_err(|e| UploadError::ConnectionDropped(e.to_string()))?;
                    debug!("Wrote {} byte frame", len);
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => dispatch(events, &text),
                    Some(Ok(Message::Binary(data))) => {
                        debug!("Ignoring {} byte binary message from server", data.len());
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(PumpExit::ClosedByServer),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(UploadError::ConnectionDropped(e.to_string())),
                },
                _ = shutdown_rx.changed() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!("Close frame not delivered: {}", e);
                    }
                    return Ok(PumpExit::Shutdown);
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("Connection state {:?} -> {:?}", previous, state);
            let _ = self.events.send(ConnectionEvent::State(state));
        }
    }

    /// Frames accepted by `send` but not written before a drop are lost.
    fn discard_pending(&mut self) {
        let mut dropped = 0usize;
        while self.outbound_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!("Dropped {} unsent frame(s) after connection loss", dropped);
        }
    }
}

fn dispatch(events: &broadcast::Sender<ConnectionEvent>, text: &str) {
    let event = match ServerMessage::parse(text) {
        ServerMessage::Progress(p) => {
            debug!(
                "Progress for {}: {}/{}",
                p.filename, p.chunks_sent, p.total_chunks
            );
            ConnectionEvent::Progress(p)
        }
        ServerMessage::Completion(c) => {
            info!("Server stored {}: {}", c.filename(), c.message);
            ConnectionEvent::Completion(c)
        }
        ServerMessage::Text(t) => {
            info!("Server message: {}", t);
            ConnectionEvent::Text(t)
        }
    };
    let _ = events.send(event);
}
