//! Polymarket live-data WebSocket client
//!
//! One `LiveDataClient::run` owns one connection for its whole life:
//! connect, subscribe, keepalive, read loop, close. There is no reconnect;
//! build a new client to try again.
//!
//! The socket is split once connected. A writer task owns the sink and is the
//! only code that writes to it (keepalive pings, subscription changes, the
//! closing frame). The read loop owns the stream and forwards frames in-line
//! to the caller's `FrameHandler`. Other tasks steer the connection through a
//! cloneable `LiveDataHandle`.
//!
//! Keepalive: raw text "ping" every 5 seconds; the server answers "pong".

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, protocol::WebSocketConfig, Message};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

use crate::error::ConnectorError;
use crate::metrics;
use crate::polymarket::messages::{Subscription, SubscriptionAction, SubscriptionMessage};
use crate::traits::FrameHandler;

/// Polymarket real-time data endpoint
pub const LIVE_DATA_WS_URL: &str = "wss://ws-live-data.polymarket.com";

/// Keepalive interval required by the live-data service
pub const PING_INTERVAL: Duration = Duration::from_secs(5);

const PING_TOKEN: &str = "ping";
const PONG_TOKEN: &str = "pong";

/// Read deadline, in ping intervals
const READ_TIMEOUT_INTERVALS: u32 = 3;

/// Max WebSocket message size: 2 MiB
const MAX_MESSAGE_SIZE: usize = 2_097_152;

const COMMAND_BUFFER: usize = 16;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Lifecycle of one connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Subscribing,
    Running,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Subscribing => "subscribing",
            ConnectionState::Running => "running",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }

    /// Whether control messages can be written
    fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Subscribing | ConnectionState::Running)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Endpoint, keepalive cadence and initial subscriptions for one client
#[derive(Debug, Clone)]
pub struct LiveDataConfig {
    url: String,
    ping_interval: Duration,
    subscriptions: Vec<Subscription>,
}

impl Default for LiveDataConfig {
    fn default() -> Self {
        Self {
            url: LIVE_DATA_WS_URL.to_string(),
            ping_interval: PING_INTERVAL,
            subscriptions: vec![Subscription::activity_trades()],
        }
    }
}

impl LiveDataConfig {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// A zero interval falls back to the default
    pub fn with_ping_interval(mut self, ping_interval: Duration) -> Self {
        self.ping_interval = if ping_interval.is_zero() {
            PING_INTERVAL
        } else {
            ping_interval
        };
        self
    }

    pub fn with_subscriptions(mut self, subscriptions: Vec<Subscription>) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn ping_interval(&self) -> Duration {
        self.ping_interval
    }

    pub fn read_timeout(&self) -> Duration {
        self.ping_interval * READ_TIMEOUT_INTERVALS
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }
}

/// A control frame queued for the socket writer
struct Command {
    text: String,
    reply: oneshot::Sender<Result<(), ConnectorError>>,
}

struct Shared {
    /// Set once by the first `close`
    closing: AtomicBool,
    /// Flips to true exactly once; every loop watches it
    done: watch::Sender<bool>,
    state: watch::Sender<ConnectionState>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Live-data connection state");
        }
        metrics::set_connected(state == ConnectionState::Running);
    }

    fn signal_done(&self) {
        self.done.send_replace(true);
    }

    fn active_subscriptions(&self) -> std::sync::MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Client for the Polymarket live-data feed
pub struct LiveDataClient {
    config: LiveDataConfig,
    shared: Arc<Shared>,
    commands_tx: mpsc::Sender<Command>,
    commands_rx: mpsc::Receiver<Command>,
}

impl LiveDataClient {
    pub fn new(config: LiveDataConfig) -> Self {
        let (done, _) = watch::channel(false);
        let (state, _) = watch::channel(ConnectionState::Idle);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        Self {
            config,
            shared: Arc::new(Shared {
                closing: AtomicBool::new(false),
                done,
                state,
                subscriptions: Mutex::new(Vec::new()),
            }),
            commands_tx,
            commands_rx,
        }
    }

    /// Handle for controlling the connection from other tasks
    pub fn handle(&self) -> LiveDataHandle {
        LiveDataHandle {
            shared: Arc::clone(&self.shared),
            commands: self.commands_tx.clone(),
        }
    }

    pub fn config(&self) -> &LiveDataConfig {
        &self.config
    }

    /// Connect, subscribe and forward frames to `handler` until closed.
    ///
    /// Returns `Ok` after `LiveDataHandle::close` or a close frame from the
    /// peer, and an error for any other way the connection ends.
    pub async fn run<H: FrameHandler>(mut self, mut handler: H) -> Result<(), ConnectorError> {
        let result = self.run_connection(&mut handler).await;

        self.shared.closing.store(true, Ordering::SeqCst);
        self.shared.signal_done();
        self.shared.active_subscriptions().clear();
        self.shared.set_state(ConnectionState::Closed);

        match &result {
            Ok(()) => info!("Live-data connection closed"),
            Err(e) => error!(error = %e, "Live-data connection failed"),
        }
        result
    }

    async fn run_connection<H: FrameHandler>(
        &mut self,
        handler: &mut H,
    ) -> Result<(), ConnectorError> {
        let mut done = self.shared.done.subscribe();
        if self.shared.closing.load(Ordering::SeqCst) {
            info!("Close requested before connect, not connecting");
            return Ok(());
        }

        self.shared.set_state(ConnectionState::Connecting);
        let ws = tokio::select! {
            connected = connect(&self.config.url) => connected?,
            _ = done.changed() => {
                info!("Close requested while connecting");
                return Ok(());
            }
        };
        let (mut sink, stream) = ws.split();

        self.shared.set_state(ConnectionState::Subscribing);
        let initial = self.config.subscriptions.clone();
        if !initial.is_empty() {
            let text = encode_action(SubscriptionAction::Subscribe, &initial)?;
            sink.send(Message::Text(text))
                .await
                .map_err(|e| ConnectorError::Protocol(format!("initial subscribe: {}", e)))?;
            info!(count = initial.len(), "Live-data subscription sent");
        }
        *self.shared.active_subscriptions() = initial;

        // Swap in a fresh receiver so `self` keeps a valid one
        let (_, placeholder) = mpsc::channel(1);
        let commands = std::mem::replace(&mut self.commands_rx, placeholder);
        let writer = tokio::spawn(write_loop(
            sink,
            commands,
            Arc::clone(&self.shared),
            self.config.ping_interval,
        ));

        if !self.shared.closing.load(Ordering::SeqCst) {
            self.shared.set_state(ConnectionState::Running);
        }
        info!(url = %self.config.url, "Live-data feed running");

        let read_result = read_loop(stream, handler, &mut done, self.config.read_timeout()).await;

        self.shared.set_state(ConnectionState::Closing);
        self.shared.signal_done();
        let write_result = match writer.await {
            Ok(result) => result,
            Err(e) => Err(ConnectorError::Protocol(format!("socket writer task: {}", e))),
        };
        read_result.and(write_result)
    }
}

/// Cloneable control surface for a running `LiveDataClient`
#[derive(Clone)]
pub struct LiveDataHandle {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
}

impl LiveDataHandle {
    pub async fn subscribe(&self, subscriptions: &[Subscription]) -> Result<(), ConnectorError> {
        self.send_action(SubscriptionAction::Subscribe, subscriptions)
            .await?;
        let mut active = self.shared.active_subscriptions();
        for sub in subscriptions {
            if !active.contains(sub) {
                active.push(sub.clone());
            }
        }
        Ok(())
    }

    pub async fn unsubscribe(&self, subscriptions: &[Subscription]) -> Result<(), ConnectorError> {
        self.send_action(SubscriptionAction::Unsubscribe, subscriptions)
            .await?;
        self.shared
            .active_subscriptions()
            .retain(|sub| !subscriptions.contains(sub));
        Ok(())
    }

    async fn send_action(
        &self,
        action: SubscriptionAction,
        subscriptions: &[Subscription],
    ) -> Result<(), ConnectorError> {
        if self.is_closing() {
            return Err(ConnectorError::Closed);
        }
        if !self.state().is_connected() {
            return Err(ConnectorError::NotConnected);
        }

        let text = encode_action(action, subscriptions)?;
        let (reply, replied) = oneshot::channel();
        self.commands
            .send(Command { text, reply })
            .await
            .map_err(|_| ConnectorError::Closed)?;
        replied.await.map_err(|_| ConnectorError::Closed)?
    }

    /// Request shutdown. Only the first call has any effect.
    pub fn close(&self) {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            debug!("Live-data close already requested");
            return;
        }
        info!("Closing live-data connection");
        self.shared.state.send_modify(|state| {
            *state = match *state {
                ConnectionState::Idle | ConnectionState::Closed => ConnectionState::Closed,
                _ => ConnectionState::Closing,
            };
        });
        metrics::set_connected(false);
        self.shared.signal_done();
    }

    pub fn is_closing(&self) -> bool {
        self.shared.closing.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch connection state changes
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Subscriptions acknowledged by the socket writer
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.shared.active_subscriptions().clone()
    }

    /// Wait until the connection reaches `Closed`
    pub async fn closed(&self) {
        let mut state = self.shared.state.subscribe();
        loop {
            if *state.borrow_and_update() == ConnectionState::Closed {
                return;
            }
            if state.changed().await.is_err() {
                return;
            }
        }
    }
}

async fn connect(url: &str) -> Result<WsStream, ConnectorError> {
    info!(url = %url, "Connecting to Polymarket live-data WebSocket");

    let config = WebSocketConfig {
        max_message_size: Some(MAX_MESSAGE_SIZE),
        max_frame_size: Some(MAX_MESSAGE_SIZE),
        ..Default::default()
    };

    let (ws, response) = connect_async_with_config(url, Some(config), false)
        .await
        .map_err(|e| ConnectorError::ConnectionFailed(e.to_string()))?;

    info!(status = ?response.status(), "Live-data WebSocket connected");
    Ok(ws)
}

fn encode_action(
    action: SubscriptionAction,
    subscriptions: &[Subscription],
) -> Result<String, ConnectorError> {
    serde_json::to_string(&SubscriptionMessage {
        action,
        subscriptions,
    })
    .map_err(|e| ConnectorError::Protocol(format!("encode {:?}: {}", action, e)))
}

/// Forward frames until done is signalled, the peer closes, or the read fails
async fn read_loop<H: FrameHandler>(
    mut stream: WsSource,
    handler: &mut H,
    done: &mut watch::Receiver<bool>,
    read_timeout: Duration,
) -> Result<(), ConnectorError> {
    loop {
        if *done.borrow_and_update() {
            return Ok(());
        }

        tokio::select! {
            _ = done.changed() => {
                // Re-checked at the top of the loop
            }
            next = timeout(read_timeout, stream.next()) => match next {
                Err(_) => {
                    warn!(timeout = ?read_timeout, "Live-data WebSocket read timeout");
                    return Err(ConnectorError::ReadTimeout(read_timeout));
                }
                Ok(None) => {
                    return Err(ConnectorError::ReadFailed(
                        "stream ended without a close frame".to_string(),
                    ));
                }
                Ok(Some(Err(tungstenite::Error::ConnectionClosed))) => return Ok(()),
                Ok(Some(Err(e))) => return Err(ConnectorError::ReadFailed(e.to_string())),
                Ok(Some(Ok(message))) => match message {
                    Message::Text(text) if text == PONG_TOKEN => {
                        debug!("Received live-data pong");
                    }
                    Message::Text(text) => {
                        trace!(len = text.len(), "Received live-data frame");
                        handler.on_frame(Bytes::from(text)).await;
                    }
                    Message::Binary(data) => {
                        trace!(len = data.len(), "Received binary live-data frame");
                        handler.on_frame(Bytes::from(data)).await;
                    }
                    Message::Close(frame) => {
                        info!(frame = ?frame, "Live-data WebSocket closed by peer");
                        return Ok(());
                    }
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                },
            },
        }
    }
}

/// Sole writer of the socket: keepalive pings, queued control frames, and the
/// closing frame once done is signalled
async fn write_loop(
    mut sink: WsSink,
    mut commands: mpsc::Receiver<Command>,
    shared: Arc<Shared>,
    ping_interval: Duration,
) -> Result<(), ConnectorError> {
    let mut done = shared.done.subscribe();
    let mut ping = interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut commands_open = true;

    let result = loop {
        if *done.borrow_and_update() {
            break Ok(());
        }

        tokio::select! {
            biased;

            changed = done.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
            }
            _ = ping.tick() => {
                if let Err(e) = sink.send(Message::Text(PING_TOKEN.to_string())).await {
                    error!(error = %e, "Failed to send live-data ping");
                    break Err(ConnectorError::Protocol(format!("ping: {}", e)));
                }
                debug!("Sent live-data ping");
                metrics::inc_ping_sent();
            }
            command = commands.recv(), if commands_open => match command {
                Some(Command { text, reply }) => {
                    match sink.send(Message::Text(text)).await {
                        Ok(()) => {
                            let _ = reply.send(Ok(()));
                        }
                        Err(e) => {
                            let message = format!("control frame: {}", e);
                            let _ = reply.send(Err(ConnectorError::Protocol(message.clone())));
                            break Err(ConnectorError::Protocol(message));
                        }
                    }
                }
                None => commands_open = false,
            },
        }
    };

    // Nothing else is written after this point
    shared.signal_done();
    match sink.close().await {
        Ok(()) => debug!("Live-data socket closed"),
        Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {}
        Err(e) => debug!(error = %e, "Error closing live-data socket"),
    }
    result
}
