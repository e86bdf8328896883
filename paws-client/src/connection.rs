//! Connection management.
//!
//! A [`ConnectionManager`] owns at most one TCP connection at a time. A
//! background task connects, reads frames on a single sequential path and
//! hands them to a [`FrameHandler`], and reconnects with backoff when the
//! connection is lost without a disconnect having been requested.

use crate::backoff::{Backoff, BackoffConfig};
use crate::error::ClientError;
use paws_protocol::{Encoder, LineDecoder, ProtocolError, Request, Response};
use paws_protocol::{DEFAULT_HOST, DEFAULT_PORT};
use parking_lot::Mutex as SyncMutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Capacity of the failed-attempt channel.
const ATTEMPT_CHANNEL_CAPACITY: usize = 16;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Timeout for a single connect attempt.
    pub connect_timeout: Duration,
    /// Default deadline for request completions.
    pub request_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// API key attached to every outbound frame.
    pub api_key: Option<String>,
    /// Reconnect backoff.
    pub backoff: BackoffConfig,
    /// Re-send subscriptions after an automatic reconnect.
    pub resubscribe_on_reconnect: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            api_key: None,
            backoff: BackoffConfig::default(),
            resubscribe_on_reconnect: true,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_resubscribe(mut self, enabled: bool) -> Self {
        self.resubscribe_on_reconnect = enabled;
        self
    }

    /// `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Lifecycle state of the physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

/// Receives everything the read path produces.
///
/// All methods are called from the connection task and must not block.
pub trait FrameHandler: Send + Sync + 'static {
    /// A complete frame, or the error that caused it to be dropped.
    fn on_frame(&self, frame: Result<Response, ProtocolError>);

    /// A connection was established. Returned requests are written before
    /// any inbound frame is read and before other callers may send.
    fn on_connected(&self, _reconnect: bool) -> Vec<Request> {
        Vec::new()
    }

    /// The connection was torn down; no frame from it will follow.
    fn on_connection_lost(&self) {}
}

struct Session {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct Inner {
    config: ConnectionConfig,
    handler: Arc<dyn FrameHandler>,
    state: watch::Sender<ConnectionState>,
    /// Reason of every failed connect attempt, for callers waiting in `connect`.
    failed_attempts: broadcast::Sender<String>,
    /// Write half of the current connection, shared by all senders.
    writer: Mutex<Option<OwnedWriteHalf>>,
    /// Running connection task, if any.
    session: SyncMutex<Option<Session>>,
}

enum ReadOutcome {
    Shutdown,
    Lost(String),
}

/// Owns the connection lifecycle.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Creates a manager (not yet connected).
    pub fn new(config: ConnectionConfig, handler: Arc<dyn FrameHandler>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (failed_attempts, _) = broadcast::channel(ATTEMPT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                handler,
                state,
                failed_attempts,
                writer: Mutex::new(None),
                session: SyncMutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Observes state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Connects to the server.
    ///
    /// Succeeds immediately when already connected. The outcome of the first
    /// attempt is reported here; when it fails, attempts continue in the
    /// background until one succeeds or [`disconnect`](Self::disconnect)
    /// is called. Calling `connect` while those attempts run reports the
    /// outcome of the next one.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let done = {
            let mut session = self.inner.session.lock();
            if session.is_some() {
                None
            } else {
                let (done_tx, done_rx) = oneshot::channel();
                let (shutdown_tx, shutdown_rx) = watch::channel(false);
                self.inner.state.send_replace(ConnectionState::Connecting);
                let task = tokio::spawn(supervise(self.inner.clone(), shutdown_rx, done_tx));
                *session = Some(Session {
                    shutdown: shutdown_tx,
                    task,
                });
                Some(done_rx)
            }
        };

        match done {
            Some(done) => done
                .await
                .unwrap_or_else(|_| Err(ClientError::Connect("connection task ended".into()))),
            None => self.wait_connected().await,
        }
    }

    async fn wait_connected(&self) -> Result<(), ClientError> {
        // Subscribe before reading the state so no failure is missed.
        let mut failures = self.inner.failed_attempts.subscribe();
        let mut state = self.inner.state.subscribe();
        loop {
            let current = *state.borrow_and_update();
            match current {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => {}
                ConnectionState::Disconnecting | ConnectionState::Disconnected => {
                    return Err(ClientError::Connect("connection is shutting down".into()));
                }
            }
            tokio::select! {
                changed = state.changed() => {
                    if changed.is_err() {
                        return Err(ClientError::NotConnected);
                    }
                }
                failure = failures.recv() => match failure {
                    Ok(reason) => return Err(ClientError::Connect(reason)),
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        return Err(ClientError::Connect("connect attempts failed".into()));
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(ClientError::NotConnected);
                    }
                },
            }
        }
    }

    /// Closes the connection and stops any reconnect loop.
    ///
    /// Succeeds immediately when already disconnected.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let session = self.inner.session.lock().take();
        let Some(session) = session else {
            tracing::debug!("disconnect() called while already disconnected");
            return Ok(());
        };

        tracing::debug!("Disconnecting from {}...", self.inner.config.addr());
        let _ = session.shutdown.send(true);
        self.inner
            .state
            .send_replace(ConnectionState::Disconnecting);

        if let Err(e) = session.task.await {
            tracing::error!("connection task failed: {}", e);
            self.inner.state.send_replace(ConnectionState::Disconnected);
        }
        Ok(())
    }

    /// Writes one request. Fails fast without writing when not connected.
    pub async fn send(&self, request: &Request) -> Result<(), ClientError> {
        if !self.is_connected() {
            tracing::debug!("send() called but not connected");
            return Err(ClientError::NotConnected);
        }
        write_request(&self.inner, request).await
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(session) = self.inner.session.lock().take() {
            let _ = session.shutdown.send(true);
        }
    }
}

async fn write_request(inner: &Inner, request: &Request) -> Result<(), ClientError> {
    let encoded = Encoder::encode_request(request)?;
    let mut writer_guard = inner.writer.lock().await;
    let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
    writer.write_all(&encoded).await?;
    tracing::debug!(
        "sent {} token={} resource={} ({} bytes)",
        request.method,
        request.token,
        request.resource,
        encoded.len()
    );
    Ok(())
}

async fn open(config: &ConnectionConfig) -> Result<TcpStream, ClientError> {
    let addr = config.addr();
    tracing::debug!("Connecting to {}...", addr);

    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| ClientError::Connect(format!("timed out connecting to {}", addr)))?
        .map_err(|e| ClientError::Connect(format!("{}: {}", addr, e)))?;

    stream.set_nodelay(true).ok();
    Ok(stream)
}

/// Resolves once shutdown has been requested.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop || shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Connection task: connect, read until lost, back off, repeat.
async fn supervise(
    inner: Arc<Inner>,
    mut shutdown: watch::Receiver<bool>,
    done: oneshot::Sender<Result<(), ClientError>>,
) {
    let addr = inner.config.addr();
    let mut done = Some(done);
    let mut backoff = Backoff::new(inner.config.backoff.clone());
    let mut was_connected = false;

    loop {
        let attempt = tokio::select! {
            result = open(&inner.config) => result,
            _ = stopped(&mut shutdown) => break,
        };

        match attempt {
            Ok(stream) => {
                backoff.reset();
                let (reader, writer) = stream.into_split();
                *inner.writer.lock().await = Some(writer);

                for request in inner.handler.on_connected(was_connected) {
                    if let Err(e) = write_request(&inner, &request).await {
                        tracing::warn!("failed to re-send token={}: {}", request.token, e);
                    }
                }

                let stop = *shutdown.borrow();
                if stop {
                    teardown(&inner).await;
                    break;
                }
                inner.state.send_replace(ConnectionState::Connected);
                tracing::info!("Connected to {}", addr);
                if let Some(done) = done.take() {
                    let _ = done.send(Ok(()));
                }
                was_connected = true;

                let outcome = read_loop(&inner, reader, &mut shutdown).await;
                teardown(&inner).await;
                match outcome {
                    ReadOutcome::Shutdown => break,
                    ReadOutcome::Lost(reason) => {
                        tracing::warn!("Connection to {} lost: {}", addr, reason);
                        inner.state.send_replace(ConnectionState::Connecting);
                    }
                }
            }
            Err(e) => {
                tracing::error!("Connection attempt failed: {}", e);
                let reason = match &e {
                    ClientError::Connect(reason) => reason.clone(),
                    other => other.to_string(),
                };
                // No waiters is fine.
                let _ = inner.failed_attempts.send(reason);
                if let Some(done) = done.take() {
                    let _ = done.send(Err(e));
                }
            }
        }

        let delay = backoff.next_delay();
        tracing::info!("Reconnecting to {} in {:?}", addr, delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stopped(&mut shutdown) => break,
        }
    }

    inner.state.send_replace(ConnectionState::Disconnected);
    tracing::info!("Disconnected from {}", addr);
}

async fn teardown(inner: &Inner) {
    if let Some(mut writer) = inner.writer.lock().await.take() {
        tracing::debug!("Shutting down writer");
        let _ = writer.shutdown().await;
    }
    inner.handler.on_connection_lost();
}

/// The only reader of the connection: frames are handled in the order they complete.
async fn read_loop(
    inner: &Inner,
    mut reader: OwnedReadHalf,
    shutdown: &mut watch::Receiver<bool>,
) -> ReadOutcome {
    tracing::debug!("read_loop started");
    let mut decoder = LineDecoder::new();
    let mut buf = vec![0u8; inner.config.read_buffer_size];

    loop {
        let n = tokio::select! {
            result = reader.read(&mut buf) => match result {
                Ok(0) => return ReadOutcome::Lost("closed by peer".into()),
                Ok(n) => n,
                Err(e) => return ReadOutcome::Lost(e.to_string()),
            },
            _ = stopped(shutdown) => return ReadOutcome::Shutdown,
        };

        tracing::trace!("read_loop: received {} bytes", n);
        for frame in decoder.feed::<Response>(&buf[..n]) {
            inner.handler.on_frame(frame);
        }
    }
}
