//! The live channel: one owned WebSocket connection per mounted session.
//!
//! ## Lifecycle
//! `Connecting → Open → Closing → Closed`, with `Errored` treated like
//! `Closed` for sending. Opening sends the "entered the chat" announce once;
//! closing while `Open` sends a best-effort "left the chat" announce first.
//!
//! `send` is a silent no-op unless the channel is `Open`: nothing is queued
//! and nothing is retried.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use rand::Rng;
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::calendar::Calendar;
use crate::error::{ChatError, Result};
use crate::protocol::OutboundFrame;

/// Underlying socket type.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
/// Write half of a live connection.
pub type WsSink = futures_util::stream::SplitSink<WsStream, WsMessage>;
/// Read half of a live connection.
pub type WsSource = futures_util::stream::SplitStream<WsStream>;

// ---------------------------------------------------------------------------
// ChannelState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
    Errored,
}

impl ChannelState {
    pub fn can_send(self) -> bool {
        self == ChannelState::Open
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Connecting => write!(f, "connecting"),
            ChannelState::Open => write!(f, "open"),
            ChannelState::Closing => write!(f, "closing"),
            ChannelState::Closed => write!(f, "closed"),
            ChannelState::Errored => write!(f, "errored"),
        }
    }
}

// ---------------------------------------------------------------------------
// TransportChannel
// ---------------------------------------------------------------------------

/// Owned write side of the live channel with its state machine.
pub struct TransportChannel<S> {
    sink: S,
    state: ChannelState,
    username: String,
    announce_correlation: String,
    announced: bool,
    calendar: Calendar,
}

impl<S> TransportChannel<S>
where
    S: Sink<WsMessage> + Unpin,
    S::Error: fmt::Display,
{
    /// Wrap a freshly connected sink. The channel starts in `Connecting`.
    pub fn new(
        sink: S,
        username: impl Into<String>,
        announce_correlation: impl Into<String>,
        calendar: Calendar,
    ) -> Self {
        Self {
            sink,
            state: ChannelState::Connecting,
            username: username.into(),
            announce_correlation: announce_correlation.into(),
            announced: false,
            calendar,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// `Connecting → Open`, sending the entered announce exactly once.
    ///
    /// Returns `true` if the announce went out on this call.
    pub async fn open(&mut self) -> bool {
        if self.state != ChannelState::Connecting {
            return false;
        }
        self.state = ChannelState::Open;
        info!(username = %self.username, "live channel open");
        if self.announced {
            return false;
        }
        self.announced = true;
        let frame = OutboundFrame::entered(&self.username, self.calendar.now_wire(), &self.announce_correlation);
        self.send(&frame).await
    }

    /// Write one frame if the channel is `Open`. Returns whether it was
    /// written; a failed write moves the channel to `Errored`.
    pub async fn send(&mut self, frame: &OutboundFrame) -> bool {
        if !self.state.can_send() {
            debug!(state = %self.state, "dropping frame, live channel not open");
            return false;
        }
        match self.sink.send(WsMessage::Text(frame.to_json())).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "live channel write failed");
                self.state = ChannelState::Errored;
                false
            }
        }
    }

    /// Tear down: best-effort leave announce when `Open`, then close.
    /// Safe to call more than once.
    pub async fn close(&mut self) {
        match self.state {
            ChannelState::Closed | ChannelState::Closing => return,
            ChannelState::Open => {
                let frame = OutboundFrame::left(&self.username, self.calendar.now_wire());
                self.send(&frame).await;
            }
            ChannelState::Connecting | ChannelState::Errored => {}
        }
        if self.state != ChannelState::Errored {
            self.state = ChannelState::Closing;
        }
        if let Err(e) = self.sink.close().await {
            debug!(error = %e, "error while closing live channel");
        }
        self.state = ChannelState::Closed;
        info!(username = %self.username, "live channel closed");
    }

    /// The remote end went away cleanly.
    pub fn mark_closed(&mut self) {
        self.state = ChannelState::Closed;
    }

    /// The connection failed underneath us.
    pub fn mark_errored(&mut self) {
        self.state = ChannelState::Errored;
    }
}

// ---------------------------------------------------------------------------
// Connecting
// ---------------------------------------------------------------------------

/// Resolve the live URL for `username`: substitute a `{username}`
/// placeholder, or append a `username` query parameter.
pub fn live_url(template: &str, username: &str) -> Result<Url> {
    if template.contains("{username}") {
        return Url::parse(&template.replace("{username}", username))
            .map_err(|e| ChatError::Config(format!("invalid live url '{template}': {e}")));
    }
    let mut url = Url::parse(template)
        .map_err(|e| ChatError::Config(format!("invalid live url '{template}': {e}")))?;
    url.query_pairs_mut().append_pair("username", username);
    Ok(url)
}

/// Something that can open a live connection.
pub trait LiveConnector {
    type Sink: Sink<WsMessage> + Unpin + Send;
    type Source: Stream<Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Unpin
        + Send;

    fn connect(&self) -> impl Future<Output = Result<(Self::Sink, Self::Source)>> + Send;
}

/// Connects over tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: Url, connect_timeout: Duration) -> Self {
        Self { url, connect_timeout }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl LiveConnector for WsConnector {
    type Sink = WsSink;
    type Source = WsSource;

    async fn connect(&self) -> Result<(WsSink, WsSource)> {
        debug!(url = %self.url, "opening live channel");
        let attempt = tokio_tungstenite::connect_async(self.url.as_str());
        let (stream, _response) = tokio::time::timeout(self.connect_timeout, attempt)
            .await
            .map_err(|_| ChatError::Transport(format!("timed out connecting to {}", self.url)))??;
        Ok(stream.split())
    }
}

// ---------------------------------------------------------------------------
// Reconnect policy
// ---------------------------------------------------------------------------

/// Exponential backoff with jitter for re-opening a dropped live channel.
///
/// `max_attempts == 0` disables reconnection: a dropped channel stays closed
/// until the session is mounted again.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn enabled(&self) -> bool {
        self.max_attempts > 0
    }

    /// Whether attempt number `attempt` (0-based) is allowed.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Upper bound of the delay before attempt `attempt` (0-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Jittered delay in `[ceiling / 2, ceiling]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        let half = ceiling / 2;
        let spread = (ceiling - half).as_millis() as u64;
        let jitter = if spread == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=spread)
        };
        half + Duration::from_millis(jitter)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
