// src/connection.rs

//! # WebSocket Connection
//!
//! One [`WsConnection`] owns one WebSocket socket and its full lifecycle:
//! dial with a handshake timeout, `eth_subscribe` registration, a keepalive
//! ping loop, a read loop that routes subscription notifications, and an
//! idempotent close.
//!
//! A connection never retries itself. Once it turns unhealthy or is closed it
//! is a terminal object; the owner (normally
//! [`ConnectionManager`](crate::connection_manager::ConnectionManager)) must
//! discard it and dial a fresh instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::errors::ConnectionError;
use crate::types::ConnectionHealth;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Subscription channels handed out by [`WsConnection::subscribe`].
///
/// A channel starts out keyed by its `eth_subscribe` request id and is
/// promoted to the server-assigned subscription id once the response arrives;
/// notifications are then routed by that id.
#[derive(Default)]
struct SubscriptionTable {
    pending: HashMap<u64, mpsc::Sender<Vec<u8>>>,
    active: HashMap<String, mpsc::Sender<Vec<u8>>>,
}

impl SubscriptionTable {
    fn clear(&mut self) {
        // Dropping the senders closes every subscription channel.
        self.pending.clear();
        self.active.clear();
    }
}

/// State shared between the connection handle and its background loops.
struct ConnState {
    connected: AtomicBool,
    closed: AtomicBool,
    health: RwLock<ConnectionHealth>,
    subscriptions: Mutex<SubscriptionTable>,
    writer: tokio::sync::Mutex<Option<WsSink>>,
    cancel: CancellationToken,
    /// Notifications dropped because a subscriber's channel was full.
    dropped_messages: AtomicU64,
    /// Notifications dropped because no channel matched their subscription id.
    unroutable_messages: AtomicU64,
}

impl ConnState {
    fn record_error(&self, error: impl Into<String>) {
        self.health
            .write()
            .expect("health lock poisoned")
            .record_error(error);
    }
}

/// A single WebSocket RPC connection.
pub struct WsConnection {
    config: ConnectionConfig,
    state: Arc<ConnState>,
    next_request_id: AtomicU64,
}

impl WsConnection {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: Arc::new(ConnState {
                connected: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                health: RwLock::new(ConnectionHealth::default()),
                subscriptions: Mutex::new(SubscriptionTable::default()),
                writer: tokio::sync::Mutex::new(None),
                cancel: CancellationToken::new(),
                dropped_messages: AtomicU64::new(0),
                unroutable_messages: AtomicU64::new(0),
            }),
            next_request_id: AtomicU64::new(1),
        }
    }

    /// Dials `url` with the configured handshake timeout and starts the ping
    /// and read loops. On success any previous error state is reset.
    pub async fn connect(&self, url: &str) -> Result<(), ConnectionError> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }

        let dial = timeout(self.config.connect_timeout(), connect_async(url)).await;
        let ws_stream = match dial {
            Err(_) => {
                let err = ConnectionError::HandshakeTimeout(self.config.connect_timeout());
                self.state.record_error(err.to_string());
                return Err(err);
            }
            Ok(Err(e)) => {
                self.state.record_error(e.to_string());
                return Err(ConnectionError::Transport(e.to_string()));
            }
            Ok(Ok((stream, _response))) => stream,
        };

        let (sink, source) = ws_stream.split();
        *self.state.writer.lock().await = Some(sink);

        {
            let mut health = self.state.health.write().expect("health lock poisoned");
            health.is_healthy = true;
            health.error_count = 0;
            health.last_error = None;
            health.last_ping_time = Some(Instant::now());
        }
        self.state.connected.store(true, Ordering::SeqCst);
        info!(target: "ws_connection", url, "WebSocket connection established");

        self.spawn_ping_loop();
        self.spawn_read_loop(source);
        Ok(())
    }

    /// Sends an `eth_subscribe` request and returns the receive-only channel
    /// that notifications for the resulting subscription will be delivered on.
    pub async fn subscribe(
        &self,
        event_name: &str,
        extra_params: &[serde_json::Value],
    ) -> Result<mpsc::Receiver<Vec<u8>>, ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::NotEstablished);
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let mut params = vec![json!(event_name)];
        params.extend_from_slice(extra_params);
        let request = json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "method": "eth_subscribe",
            "params": params,
        });

        let (tx, rx) = mpsc::channel(self.config.subscription_buffer);
        self.state
            .subscriptions
            .lock()
            .expect("subscription lock poisoned")
            .pending
            .insert(request_id, tx);

        let mut writer = self.state.writer.lock().await;
        let sink = writer.as_mut().ok_or(ConnectionError::NotEstablished)?;
        if let Err(e) = sink.send(Message::Text(request.to_string())).await {
            self.state
                .subscriptions
                .lock()
                .expect("subscription lock poisoned")
                .pending
                .remove(&request_id);
            self.state.record_error(e.to_string());
            return Err(ConnectionError::SubscribeFailed(e.to_string()));
        }
        debug!(target: "ws_connection", request_id, event_name, "Sent eth_subscribe request");
        Ok(rx)
    }

    /// Idempotently stops the background loops, closes every subscription
    /// channel, and closes the socket.
    pub async fn close(&self) -> Result<(), ConnectionError> {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.state.cancel.cancel();
        self.state.connected.store(false, Ordering::SeqCst);
        self.state
            .subscriptions
            .lock()
            .expect("subscription lock poisoned")
            .clear();

        let mut writer = self.state.writer.lock().await;
        if let Some(mut sink) = writer.take() {
            if let Err(e) = sink.close().await {
                debug!(target: "ws_connection", error = %e, "Error closing WebSocket sink");
                return Err(ConnectionError::Transport(e.to_string()));
            }
        }
        info!(target: "ws_connection", "Connection closed");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    /// Thread-safe snapshot of the connection's health state.
    pub fn connection_health(&self) -> ConnectionHealth {
        self.state.health.read().expect("health lock poisoned").clone()
    }

    /// Notifications dropped because their subscriber's channel was full.
    pub fn dropped_messages(&self) -> u64 {
        self.state.dropped_messages.load(Ordering::Relaxed)
    }

    /// Notifications dropped because no channel matched their subscription id.
    pub fn unroutable_messages(&self) -> u64 {
        self.state.unroutable_messages.load(Ordering::Relaxed)
    }

    fn spawn_ping_loop(&self) {
        let state = self.state.clone();
        let interval = self.config.ping_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick of a tokio interval fires immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = state.cancel.cancelled() => {
                        debug!(target: "ws_connection::ping", "Ping loop stopped");
                        return;
                    }
                    _ = ticker.tick() => {}
                }
                if !state.connected.load(Ordering::SeqCst) {
                    return;
                }
                {
                    let mut health = state.health.write().expect("health lock poisoned");
                    health.last_ping_time = Some(Instant::now());
                }
                let mut writer = state.writer.lock().await;
                let Some(sink) = writer.as_mut() else { return };
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    warn!(target: "ws_connection::ping", error = %e, "Ping write failed, marking connection unhealthy");
                    state.record_error(e.to_string());
                    return;
                }
            }
        });
    }

    fn spawn_read_loop(&self, mut source: WsSource) {
        let state = self.state.clone();
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = state.cancel.cancelled() => {
                        debug!(target: "ws_connection::read", "Read loop stopped");
                        return;
                    }
                    msg = source.next() => msg,
                };
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        Self::handle_message(&state, text.as_bytes());
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        Self::handle_message(&state, &bytes);
                    }
                    Some(Ok(Message::Pong(_))) => {
                        let mut health = state.health.write().expect("health lock poisoned");
                        if let Some(sent) = health.last_ping_time {
                            health.record_pong(sent.elapsed());
                        } else {
                            health.is_healthy = true;
                        }
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite answers pings on the next write; nothing to do.
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(target: "ws_connection::read", ?frame, "Server closed the connection");
                        state.connected.store(false, Ordering::SeqCst);
                        state.record_error("server closed connection");
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(target: "ws_connection::read", error = %e, "Read error, marking connection unhealthy");
                        state.connected.store(false, Ordering::SeqCst);
                        state.record_error(e.to_string());
                        return;
                    }
                    None => {
                        debug!(target: "ws_connection::read", "WebSocket stream ended");
                        state.connected.store(false, Ordering::SeqCst);
                        state.record_error("websocket stream ended");
                        return;
                    }
                }
            }
        });
    }

    /// Dispatches one inbound frame: `eth_subscribe` responses promote their
    /// pending channel to the assigned subscription id; `eth_subscription`
    /// notifications are routed to the matching channel with a non-blocking
    /// send, so one slow consumer drops its own messages instead of stalling
    /// ingestion for everyone else.
    fn handle_message(state: &ConnState, raw: &[u8]) {
        let Ok(value) = serde_json::from_slice::<serde_json::Value>(raw) else {
            debug!(target: "ws_connection::read", "Discarding non-JSON frame");
            return;
        };

        if value.get("method").and_then(|m| m.as_str()) == Some("eth_subscription") {
            let sub_id = value
                .get("params")
                .and_then(|p| p.get("subscription"))
                .and_then(|s| s.as_str());
            let Some(sub_id) = sub_id else {
                debug!(target: "ws_connection::read", "Notification without subscription id");
                return;
            };
            let subs = state.subscriptions.lock().expect("subscription lock poisoned");
            match subs.active.get(sub_id) {
                Some(sender) => {
                    if let Err(mpsc::error::TrySendError::Full(_)) = sender.try_send(raw.to_vec()) {
                        state.dropped_messages.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            target: "ws_connection::read",
                            subscription = sub_id,
                            "Subscriber channel full, dropping notification"
                        );
                    }
                }
                None => {
                    state.unroutable_messages.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        target: "ws_connection::read",
                        subscription = sub_id,
                        "No subscriber registered for notification"
                    );
                }
            }
            return;
        }

        // An eth_subscribe response: {"id": N, "result": "0x..."}.
        if let (Some(id), Some(sub_id)) = (
            value.get("id").and_then(|i| i.as_u64()),
            value.get("result").and_then(|r| r.as_str()),
        ) {
            let mut subs = state.subscriptions.lock().expect("subscription lock poisoned");
            if let Some(sender) = subs.pending.remove(&id) {
                debug!(
                    target: "ws_connection::read",
                    request_id = id,
                    subscription = sub_id,
                    "Subscription confirmed"
                );
                subs.active.insert(sub_id.to_string(), sender);
            }
        }
    }
}

impl std::fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnection")
            .field("connected", &self.is_connected())
            .field("closed", &self.state.closed.load(Ordering::SeqCst))
            .finish()
    }
}
