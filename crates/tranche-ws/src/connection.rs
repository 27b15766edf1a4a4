//! Price stream manager.
//!
//! Owns at most one live multiplexed connection covering exactly the open
//! symbols. Rebuild requests are debounced, each connection runs in its own
//! task under a child cancellation token, and a dropped connection is
//! re-established after a fixed delay.

use crate::error::{WsError, WsResult};
use crate::message::{parse_tick, PriceTick};
use crate::state::{DisconnectCause, StreamAction, StreamState, StreamStateMachine};
use futures_util::{SinkExt, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Provides the live set of symbols to subscribe to.
///
/// Read at rebuild time, never cached by the manager.
pub trait SymbolSource: Send + Sync {
    fn symbols(&self) -> BTreeSet<String>;
}

/// Stream configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Combined-stream endpoint, e.g. `wss://fstream.binance.com/stream`.
    pub base_url: String,
    /// Per-symbol stream suffix, e.g. `markPrice@1s`.
    pub topic: String,
    /// Fixed delay before re-establishing a dropped connection.
    pub reconnect_delay_ms: u64,
    /// Rebuild requests inside this window collapse into one rebuild.
    pub rebuild_cooldown_ms: u64,
    /// Upper bound on the TCP, TLS and WebSocket handshake.
    pub connect_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: "wss://fstream.binance.com/stream".to_string(),
            topic: "markPrice@1s".to_string(),
            reconnect_delay_ms: 5000,
            rebuild_cooldown_ms: 500,
            connect_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCommand {
    Rebuild,
}

/// Cloneable handle used to ask the manager for a rebuild.
#[derive(Debug, Clone)]
pub struct RebuildHandle {
    tx: mpsc::Sender<StreamCommand>,
}

impl RebuildHandle {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamCommand>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Request a rebuild. Never blocks; a full queue already holds a
    /// pending rebuild, so the request is coalesced.
    pub fn request_rebuild(&self) {
        match self.tx.try_send(StreamCommand::Rebuild) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Stream manager stopped, rebuild request dropped");
            }
        }
    }
}

#[derive(Debug)]
enum ConnectionEvent {
    Connected { generation: u64 },
    Disconnected { generation: u64, cause: DisconnectCause },
}

pub struct PriceStreamManager {
    config: StreamConfig,
    source: Arc<dyn SymbolSource>,
    machine: StreamStateMachine,
    state_tx: watch::Sender<StreamState>,
    reconnects: u64,
}

impl PriceStreamManager {
    pub fn new(config: StreamConfig, source: Arc<dyn SymbolSource>) -> Self {
        let machine = StreamStateMachine::new(
            config.base_url.clone(),
            config.topic.clone(),
            Duration::from_millis(config.reconnect_delay_ms),
        );
        let (state_tx, _) = watch::channel(StreamState::Disconnected);
        Self {
            config,
            source,
            machine,
            state_tx,
            reconnects: 0,
        }
    }

    /// Subscribe to state changes.
    pub fn state_watch(&self) -> watch::Receiver<StreamState> {
        self.state_tx.subscribe()
    }

    /// Drive the stream until `shutdown` is cancelled.
    pub async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<StreamCommand>,
        tick_tx: mpsc::Sender<PriceTick>,
        shutdown: CancellationToken,
    ) {
        let (event_tx, mut event_rx) = mpsc::channel::<ConnectionEvent>(16);
        let cooldown = Duration::from_millis(self.config.rebuild_cooldown_ms);
        let mut live: Option<CancellationToken> = None;
        let mut rebuild_at: Option<Instant> = None;
        let mut reconnect_at: Option<Instant> = None;
        let mut commands_open = true;

        info!(base_url = %self.config.base_url, topic = %self.config.topic, "Price stream manager started");

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    if let Some(token) = live.take() {
                        token.cancel();
                    }
                    self.publish(StreamState::Disconnected);
                    info!("Price stream manager stopped");
                    return;
                }

                cmd = cmd_rx.recv(), if commands_open => match cmd {
                    Some(StreamCommand::Rebuild) => {
                        if rebuild_at.is_none() {
                            rebuild_at = Some(Instant::now() + cooldown);
                        }
                    }
                    None => commands_open = false,
                },

                Some(event) = event_rx.recv() => match event {
                    ConnectionEvent::Connected { generation } => {
                        if self.machine.on_connected(generation) {
                            info!(generation, symbols = self.machine.symbols().len(), "Price stream connected");
                            self.publish(StreamState::Connected);
                        }
                    }
                    ConnectionEvent::Disconnected { generation, cause } => {
                        let action = self.machine.on_disconnected(generation, cause);
                        if generation == self.machine.generation() {
                            live = None;
                            self.publish(self.machine.state());
                        }
                        if let StreamAction::ScheduleReconnect { delay } = action {
                            warn!(generation, ?cause, delay_ms = delay.as_millis() as u64, "Price stream dropped, reconnect scheduled");
                            reconnect_at = Some(Instant::now() + delay);
                        }
                    }
                },

                () = sleep_until(rebuild_at) => {
                    rebuild_at = None;
                    reconnect_at = None;
                    self.rebuild(&mut live, &tick_tx, &event_tx, &shutdown);
                }

                () = sleep_until(reconnect_at) => {
                    reconnect_at = None;
                    if self.machine.on_reconnect_timer() {
                        self.reconnects += 1;
                        info!(reconnects = self.reconnects, "Reconnecting price stream");
                        self.rebuild(&mut live, &tick_tx, &event_tx, &shutdown);
                    }
                }
            }
        }
    }

    fn rebuild(
        &mut self,
        live: &mut Option<CancellationToken>,
        tick_tx: &mpsc::Sender<PriceTick>,
        event_tx: &mpsc::Sender<ConnectionEvent>,
        shutdown: &CancellationToken,
    ) {
        if let Some(token) = live.take() {
            token.cancel();
        }

        let symbols = self.source.symbols();
        match self.machine.on_rebuild(symbols) {
            StreamAction::Connect { generation, url } => {
                debug!(generation, %url, "Rebuilding price stream");
                let token = shutdown.child_token();
                *live = Some(token.clone());
                self.publish(StreamState::Connecting);
                tokio::spawn(run_connection(
                    generation,
                    url,
                    Duration::from_millis(self.config.connect_timeout_ms),
                    tick_tx.clone(),
                    event_tx.clone(),
                    token,
                ));
            }
            StreamAction::Idle => {
                info!("No open positions, price stream idle");
                self.publish(StreamState::Disconnected);
            }
            StreamAction::None | StreamAction::ScheduleReconnect { .. } => {}
        }
    }

    fn publish(&self, state: StreamState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn run_connection(
    generation: u64,
    url: String,
    connect_timeout: Duration,
    tick_tx: mpsc::Sender<PriceTick>,
    event_tx: mpsc::Sender<ConnectionEvent>,
    token: CancellationToken,
) {
    let result = stream_ticks(generation, &url, connect_timeout, &tick_tx, &event_tx, &token).await;

    let cause = if token.is_cancelled() {
        DisconnectCause::Superseded
    } else {
        match result {
            Ok(()) | Err(WsError::ConnectionClosed { .. }) => DisconnectCause::RemoteClose,
            Err(e) => {
                warn!(generation, error = %e, "Price stream connection failed");
                DisconnectCause::Error
            }
        }
    };

    let _ = event_tx
        .send(ConnectionEvent::Disconnected { generation, cause })
        .await;
}

async fn stream_ticks(
    generation: u64,
    url: &str,
    connect_timeout: Duration,
    tick_tx: &mpsc::Sender<PriceTick>,
    event_tx: &mpsc::Sender<ConnectionEvent>,
    token: &CancellationToken,
) -> WsResult<()> {
    info!(generation, %url, "Connecting to price stream");

    let connect = tokio::time::timeout(
        connect_timeout,
        connect_async_tls_with_config(url, None, true, None),
    );
    let (ws_stream, _response) = tokio::select! {
        () = token.cancelled() => return Ok(()),
        res = connect => res.map_err(|_| WsError::ConnectTimeout {
            timeout_ms: connect_timeout.as_millis() as u64,
        })??,
    };
    let (mut write, mut read) = ws_stream.split();

    if event_tx
        .send(ConnectionEvent::Connected { generation })
        .await
        .is_err()
    {
        return Ok(());
    }

    loop {
        tokio::select! {
            biased;

            () = token.cancelled() => {
                if let Err(e) = write.send(Message::Close(None)).await {
                    debug!(?e, "Failed to send Close frame on teardown");
                }
                return Ok(());
            }

            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let Some(tick) = parse_tick(&text) else {
                        trace!(generation, "Ignoring non-tick frame");
                        continue;
                    };
                    // Bounded send: a slow consumer backs up into the socket.
                    tokio::select! {
                        biased;
                        () = token.cancelled() => return Ok(()),
                        res = tick_tx.send(tick) => {
                            if res.is_err() {
                                return Err(WsError::ReceiverDropped);
                            }
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    write.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (f.code.into(), f.reason.to_string()))
                        .unwrap_or((1000, "Normal close".to_string()));
                    warn!(generation, code, %reason, "Price stream closed by server");
                    return Err(WsError::ConnectionClosed { code, reason });
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => {
                    warn!(generation, "Price stream ended");
                    return Ok(());
                }
            },
        }
    }
}
