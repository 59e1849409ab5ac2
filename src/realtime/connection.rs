//! Connection manager for the real-time endpoints
//!
//! Owns the lifecycle of one outbound connection per handle, either a
//! bidirectional WebSocket or a one-way push stream (SSE). State
//! transitions (`Connecting → Open`, `Open → Closed`, `* → Errored`) are
//! observable through a typed event channel; transport failures are
//! reported as events, never panics.
//!
//! The manager does not reconnect. Retry policy belongs to the caller,
//! which knows what backoff is appropriate for its endpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::realtime::sse::SseDecoder;

// ─────────────────────────────────────────────────────────────────
// Endpoints
// ─────────────────────────────────────────────────────────────────

/// Protocol kind of a real-time endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// Bidirectional WebSocket
    Socket,
    /// One-way server push stream (SSE)
    PushStream,
}

/// A fully-resolved real-time endpoint: kind, address, query parameters.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub kind: EndpointKind,
    pub url: Url,
}

impl Endpoint {
    /// The driver location-update socket, optionally scoped to a booking.
    pub fn location(base: &str, driver_id: i64, booking_id: Option<i64>) -> Result<Self> {
        let mut url = join_url(base, "/ws/driver/update-location")?;
        url.query_pairs_mut()
            .append_pair("driver_id", &driver_id.to_string());
        if let Some(booking_id) = booking_id {
            url.query_pairs_mut()
                .append_pair("booking_id", &booking_id.to_string());
        }
        Ok(Self { kind: EndpointKind::Socket, url })
    }

    /// The booking-assignment socket for one driver.
    pub fn assignment(base: &str, driver_id: i64) -> Result<Self> {
        let mut url = join_url(base, "/ws/driver/assign")?;
        url.query_pairs_mut()
            .append_pair("driver_id", &driver_id.to_string());
        Ok(Self { kind: EndpointKind::Socket, url })
    }

    /// The ride-tracking push stream for one booking.
    pub fn tracking(base: &str, booking_id: i64) -> Result<Self> {
        let mut url = join_url(base, "/api/user/track-transport")?;
        url.query_pairs_mut()
            .append_pair("booking_id", &booking_id.to_string());
        Ok(Self { kind: EndpointKind::PushStream, url })
    }
}

fn join_url(base: &str, path: &str) -> Result<Url> {
    let base = Url::parse(base).map_err(|e| Error::Config(format!("invalid URL '{}': {}", base, e)))?;
    base.join(path)
        .map_err(|e| Error::Config(format!("invalid endpoint path '{}': {}", path, e)))
}

// ─────────────────────────────────────────────────────────────────
// Connection State & Events
// ─────────────────────────────────────────────────────────────────

/// Connection state, observable at any time through the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Establishment in flight
    #[default]
    Connecting,
    /// Transport established, frames flowing
    Open,
    /// Terminated normally (either side)
    Closed,
    /// Terminated by a transport failure
    Errored,
}

/// One inbound frame from the remote end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A socket text frame or an unnamed SSE data event
    Data(String),
    /// A named SSE event (e.g. the terminal `end` event)
    Named { event: String, data: String },
}

/// Events emitted by a connection, in transport delivery order.
///
/// Each event is delivered at most once; `Closed` is always the last
/// event a handle emits, on every exit path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Transport established
    Opened,
    /// One inbound frame
    Message(InboundFrame),
    /// Transport failure; the handle has moved to `Errored`
    Error(String),
    /// Connection is gone; no further events follow
    Closed,
}

// ─────────────────────────────────────────────────────────────────
// Connection Handle
// ─────────────────────────────────────────────────────────────────

/// Caller-visible lifecycle object for one live connection.
///
/// A handle has exactly one owner. `close()` is idempotent and safe to
/// call from any state, including from within event handling.
#[derive(Debug)]
pub struct ConnectionHandle {
    endpoint: Endpoint,
    state: Arc<RwLock<ConnectionState>>,
    outbound_tx: mpsc::Sender<String>,
    close_tx: mpsc::Sender<()>,
    close_requested: Arc<AtomicBool>,
}

impl ConnectionHandle {
    /// The endpoint this handle is connected to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether frames can currently be sent.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Queue a text frame for sending. Only valid on socket endpoints.
    pub fn send(&self, frame: String) -> Result<()> {
        if self.endpoint.kind != EndpointKind::Socket {
            return Err(Error::Protocol(
                "push stream endpoints are receive-only".to_string(),
            ));
        }
        self.outbound_tx
            .try_send(frame)
            .map_err(|_| Error::ConnectionLost {
                message: "connection task gone".to_string(),
            })
    }

    /// A send-only view of this handle for components that publish frames
    /// but must not control the connection lifecycle.
    pub fn sender(&self) -> ConnectionSender {
        ConnectionSender {
            kind: self.endpoint.kind,
            state: self.state.clone(),
            outbound_tx: self.outbound_tx.clone(),
        }
    }

    /// Close the connection. Idempotent; the second and later calls are
    /// no-ops and the owner observes exactly one `Closed` event.
    pub fn close(&self) {
        if self.close_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        // The task may already be gone; that is fine.
        let _ = self.close_tx.try_send(());
    }
}

/// Send-only view of a [`ConnectionHandle`].
#[derive(Debug, Clone)]
pub struct ConnectionSender {
    kind: EndpointKind,
    state: Arc<RwLock<ConnectionState>>,
    outbound_tx: mpsc::Sender<String>,
}

impl ConnectionSender {
    pub fn is_open(&self) -> bool {
        *self.state.read() == ConnectionState::Open
    }

    pub fn send(&self, frame: String) -> Result<()> {
        if self.kind != EndpointKind::Socket {
            return Err(Error::Protocol(
                "push stream endpoints are receive-only".to_string(),
            ));
        }
        self.outbound_tx
            .try_send(frame)
            .map_err(|_| Error::ConnectionLost {
                message: "connection task gone".to_string(),
            })
    }
}

// ─────────────────────────────────────────────────────────────────
// Connector
// ─────────────────────────────────────────────────────────────────

/// Configuration for connection establishment
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Bound on connection establishment
    pub connect_timeout: Duration,

    /// Event channel capacity per connection
    pub event_buffer: usize,

    /// Outbound frame queue capacity per socket connection
    pub send_buffer: usize,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            event_buffer: 64,
            send_buffer: 64,
        }
    }
}

/// Opens real-time connections and hands out handles.
#[derive(Debug, Clone)]
pub struct Connector {
    config: ConnectorConfig,
    http: reqwest::Client,
}

impl Default for Connector {
    fn default() -> Self {
        Self::new(ConnectorConfig::default())
    }
}

impl Connector {
    pub fn new(config: ConnectorConfig) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "HTTP client build failed, connect timeout not applied");
                reqwest::Client::default()
            });
        Self { config, http }
    }

    /// Open a connection to the given endpoint.
    ///
    /// Returns immediately with a handle in `Connecting` state and the
    /// event stream; establishment is observed via `Opened` (or `Error`
    /// followed by `Closed`).
    pub fn open(&self, endpoint: Endpoint) -> (ConnectionHandle, mpsc::Receiver<ConnectionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(self.config.event_buffer);
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.send_buffer);
        let (close_tx, close_rx) = mpsc::channel(1);

        let state = Arc::new(RwLock::new(ConnectionState::Connecting));

        let handle = ConnectionHandle {
            endpoint: endpoint.clone(),
            state: state.clone(),
            outbound_tx,
            close_tx,
            close_requested: Arc::new(AtomicBool::new(false)),
        };

        let config = self.config.clone();
        let http = self.http.clone();
        tokio::spawn(async move {
            match endpoint.kind {
                EndpointKind::Socket => {
                    run_socket(endpoint, config, state.clone(), outbound_rx, close_rx, &event_tx)
                        .await;
                }
                EndpointKind::PushStream => {
                    run_push_stream(endpoint, config, http, state.clone(), close_rx, &event_tx)
                        .await;
                }
            }
            // Closed is always the final event, on every exit path.
            if *state.read() == ConnectionState::Connecting
                || *state.read() == ConnectionState::Open
            {
                *state.write() = ConnectionState::Closed;
            }
            let _ = event_tx.send(ConnectionEvent::Closed).await;
        });

        (handle, event_rx)
    }
}

// ─────────────────────────────────────────────────────────────────
// Socket task
// ─────────────────────────────────────────────────────────────────

async fn run_socket(
    endpoint: Endpoint,
    config: ConnectorConfig,
    state: Arc<RwLock<ConnectionState>>,
    mut outbound_rx: mpsc::Receiver<String>,
    mut close_rx: mpsc::Receiver<()>,
    event_tx: &mpsc::Sender<ConnectionEvent>,
) {
    debug!(url = %endpoint.url, "Connecting socket");

    let connect = tokio::time::timeout(config.connect_timeout, connect_async(endpoint.url.clone()));
    let ws_stream = tokio::select! {
        result = connect => match result {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                warn!(url = %endpoint.url, error = %e, "Socket connect failed");
                *state.write() = ConnectionState::Errored;
                let _ = event_tx.send(ConnectionEvent::Error(e.to_string())).await;
                return;
            }
            Err(_) => {
                warn!(url = %endpoint.url, "Socket connect timed out");
                *state.write() = ConnectionState::Errored;
                let err = Error::connection_timeout(
                    endpoint.url.as_str(),
                    config.connect_timeout.as_secs(),
                );
                let _ = event_tx.send(ConnectionEvent::Error(err.to_string())).await;
                return;
            }
        },
        _ = close_rx.recv() => {
            debug!(url = %endpoint.url, "Closed while connecting");
            return;
        }
    };

    info!(url = %endpoint.url, "Socket connection established");
    *state.write() = ConnectionState::Open;
    let _ = event_tx.send(ConnectionEvent::Opened).await;

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            // Owner-initiated close
            _ = close_rx.recv() => {
                debug!(url = %endpoint.url, "Close requested");
                let _ = write.send(WsMessage::Close(None)).await;
                return;
            }

            // Outbound frames from the owner
            frame = outbound_rx.recv() => {
                match frame {
                    Some(text) => {
                        if let Err(e) = write.send(WsMessage::Text(text)).await {
                            warn!(url = %endpoint.url, error = %e, "Socket send failed");
                            *state.write() = ConnectionState::Errored;
                            let _ = event_tx.send(ConnectionEvent::Error(e.to_string())).await;
                            return;
                        }
                    }
                    None => {
                        // Handle dropped without close(); treat as close.
                        let _ = write.send(WsMessage::Close(None)).await;
                        return;
                    }
                }
            }

            // Inbound frames from the remote end
            msg = read.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        let _ = event_tx
                            .send(ConnectionEvent::Message(InboundFrame::Data(text)))
                            .await;
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        let text = String::from_utf8_lossy(&data).into_owned();
                        let _ = event_tx
                            .send(ConnectionEvent::Message(InboundFrame::Data(text)))
                            .await;
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = write.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Close(frame))) => {
                        debug!(url = %endpoint.url, frame = ?frame, "Received close frame");
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let fatal = !matches!(e, WsError::Protocol(_));
                        warn!(url = %endpoint.url, error = %e, "Socket error");
                        if fatal {
                            *state.write() = ConnectionState::Errored;
                            let _ = event_tx.send(ConnectionEvent::Error(e.to_string())).await;
                            return;
                        }
                    }
                    None => {
                        debug!(url = %endpoint.url, "Socket stream ended");
                        return;
                    }
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Push-stream task
// ─────────────────────────────────────────────────────────────────

async fn run_push_stream(
    endpoint: Endpoint,
    config: ConnectorConfig,
    http: reqwest::Client,
    state: Arc<RwLock<ConnectionState>>,
    mut close_rx: mpsc::Receiver<()>,
    event_tx: &mpsc::Sender<ConnectionEvent>,
) {
    debug!(url = %endpoint.url, "Connecting push stream");

    let request = http
        .get(endpoint.url.clone())
        .header("Accept", "text/event-stream")
        .send();
    let connect = tokio::time::timeout(config.connect_timeout, request);

    let response = tokio::select! {
        result = connect => match result {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(url = %endpoint.url, error = %e, "Push stream connect failed");
                *state.write() = ConnectionState::Errored;
                let _ = event_tx.send(ConnectionEvent::Error(e.to_string())).await;
                return;
            }
            Err(_) => {
                warn!(url = %endpoint.url, "Push stream connect timed out");
                *state.write() = ConnectionState::Errored;
                let err = Error::connection_timeout(
                    endpoint.url.as_str(),
                    config.connect_timeout.as_secs(),
                );
                let _ = event_tx.send(ConnectionEvent::Error(err.to_string())).await;
                return;
            }
        },
        _ = close_rx.recv() => {
            debug!(url = %endpoint.url, "Closed while connecting");
            return;
        }
    };

    if !response.status().is_success() {
        let status = response.status();
        warn!(url = %endpoint.url, status = %status, "Push stream rejected");
        *state.write() = ConnectionState::Errored;
        let _ = event_tx
            .send(ConnectionEvent::Error(format!("HTTP {}", status)))
            .await;
        return;
    }

    info!(url = %endpoint.url, "Push stream established");
    *state.write() = ConnectionState::Open;
    let _ = event_tx.send(ConnectionEvent::Opened).await;

    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    loop {
        tokio::select! {
            _ = close_rx.recv() => {
                debug!(url = %endpoint.url, "Close requested");
                return;
            }

            chunk = body.next() => {
                match chunk {
                    Some(Ok(bytes)) => {
                        for sse_event in decoder.feed(&bytes) {
                            let frame = match sse_event.event {
                                Some(name) => InboundFrame::Named {
                                    event: name,
                                    data: sse_event.data,
                                },
                                None => InboundFrame::Data(sse_event.data),
                            };
                            let _ = event_tx.send(ConnectionEvent::Message(frame)).await;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(url = %endpoint.url, error = %e, "Push stream error");
                        *state.write() = ConnectionState::Errored;
                        let _ = event_tx.send(ConnectionEvent::Error(e.to_string())).await;
                        return;
                    }
                    None => {
                        debug!(url = %endpoint.url, "Push stream ended");
                        return;
                    }
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
