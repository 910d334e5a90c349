//! Push channel: WebSocket connection lifecycle with bounded reconnect.
//!
//! Owns connect, receive, and reconnect-with-backoff for one order's update
//! stream. After the reconnect budget is spent it emits one terminal
//! `Exhausted` event and stops; switching to polling is the session's call,
//! not this module's.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TrackError;
use crate::model::OrderSnapshot;

/// Base reconnect delay.
const BACKOFF_BASE: Duration = Duration::from_secs(5);
/// Reconnect delay cap.
const BACKOFF_CAP: Duration = Duration::from_secs(30);
/// Reconnect budget before the manager gives up.
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Events the manager reports to the session.
#[derive(Debug)]
pub enum PushEvent {
    Connected,
    Disconnected { attempts: u32 },
    Update(OrderSnapshot),
    /// Reconnect budget spent; the manager will not try again.
    Exhausted,
}

// ---------------------------------------------------------------------------
// Channel abstraction
// ---------------------------------------------------------------------------

/// An established push channel delivering raw text frames.
pub trait PushChannel: Send + 'static {
    /// Next text frame; `None` when the channel has closed. Transport
    /// errors also end the channel, after surfacing once.
    fn recv(&mut self) -> impl Future<Output = Option<Result<String, TrackError>>> + Send;
}

/// Something that can establish a push channel for `(order_no, token)`.
/// The production impl dials a WebSocket; tests substitute scripted
/// channels to drive the reconnect logic deterministically.
pub trait Connector: Send + Sync + 'static {
    type Channel: PushChannel;

    fn connect(&self) -> impl Future<Output = Result<Self::Channel, TrackError>> + Send;
}

// ---------------------------------------------------------------------------
// WebSocket implementation
// ---------------------------------------------------------------------------

/// Dials the backend's order update WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// `url` is the fully-formed push address (see `SessionConfig::push_url`).
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WsConnector {
    type Channel = WsChannel;

    async fn connect(&self) -> Result<WsChannel, TrackError> {
        let (stream, _resp) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TrackError::transport(format!("WebSocket connect failed: {e}")))?;
        Ok(WsChannel { inner: stream })
    }
}

/// Live WebSocket wrapped to yield text frames only.
pub struct WsChannel {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl PushChannel for WsChannel {
    async fn recv(&mut self) -> Option<Result<String, TrackError>> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text)),
                Some(Ok(Message::Ping(data))) => {
                    if self.inner.send(Message::Pong(data)).await.is_err() {
                        return None;
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("push channel closed by server");
                    return None;
                }
                // Binary, Pong, raw frames: nothing for us.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Some(Err(TrackError::transport(format!("WebSocket error: {e}"))))
                }
                None => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Frame decoding
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PushFrame {
    #[serde(rename = "type")]
    frame_type: String,
    order: Option<OrderSnapshot>,
}

/// Decode an inbound frame. Only `{"type": "order_update", "order": ...}`
/// is meaningful; malformed JSON and unknown types are discarded silently —
/// a bad frame must never terminate the channel.
fn decode_frame(text: &str) -> Option<OrderSnapshot> {
    let frame: PushFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            debug!(error = %e, "discarding malformed push frame");
            return None;
        }
    };
    if frame.frame_type != "order_update" {
        debug!(frame_type = %frame.frame_type, "ignoring push frame");
        return None;
    }
    frame.order
}

/// Reconnect delay before attempt `attempts + 1`.
fn backoff_delay(attempts: u32) -> Duration {
    let scaled = BACKOFF_BASE.saturating_mul(attempts + 1);
    scaled.min(BACKOFF_CAP)
}

// ---------------------------------------------------------------------------
// Connection manager
// ---------------------------------------------------------------------------

/// Drives one push channel: connect, receive, reconnect with backoff,
/// report events upward. Cancellation tears everything down; no timer
/// survives it.
pub struct ConnectionManager<C: Connector> {
    connector: Arc<C>,
    events: mpsc::Sender<PushEvent>,
    cancel: CancellationToken,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(
        connector: Arc<C>,
        events: mpsc::Sender<PushEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connector,
            events,
            cancel,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut attempts: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.connector.connect() => result,
            };

            match connected {
                Ok(channel) => {
                    attempts = 0;
                    info!("push channel connected");
                    if self.events.send(PushEvent::Connected).await.is_err() {
                        return;
                    }
                    self.read_until_closed(channel).await;
                    if self.cancel.is_cancelled() {
                        return;
                    }
                    attempts += 1;
                    if self
                        .events
                        .send(PushEvent::Disconnected { attempts })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Err(e) => {
                    attempts += 1;
                    warn!(attempts, error = %e, "push channel connect failed");
                }
            }

            if attempts > MAX_RECONNECT_ATTEMPTS {
                info!("push reconnect budget spent");
                let _ = self.events.send(PushEvent::Exhausted).await;
                return;
            }

            let delay = backoff_delay(attempts - 1);
            debug!(delay_secs = delay.as_secs(), attempts, "push reconnect scheduled");
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Pump frames until the channel dies. Malformed frames are dropped;
    /// the channel stays open.
    async fn read_until_closed(&self, mut channel: C::Channel) {
        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => return,
                frame = channel.recv() => frame,
            };
            match frame {
                Some(Ok(text)) => {
                    if let Some(snapshot) = decode_frame(&text) {
                        if self.events.send(PushEvent::Update(snapshot)).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "push channel error");
                    return;
                }
                None => return,
            }
        }
    }
}
