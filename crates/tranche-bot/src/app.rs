//! Application context and startup sequence.
//!
//! Wires the registry, exchange, store, stream manager, dispatcher and
//! webhook server together, restores tracked positions from the store, and
//! runs until ctrl-c.

use crate::config::{AppConfig, StoreBackend};
use crate::dispatch::TickDispatcher;
use crate::error::{AppError, AppResult};
use crate::lifecycle::LifecycleController;
use crate::webhook::{run_server, WebhookState};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tranche_exchange::{
    BinanceConfig, BinanceCredentials, BinanceFuturesClient, ExchangeGateway, PrecisionCache,
};
use tranche_position::PositionRegistry;
use tranche_store::{FileStore, MemoryStore, PostgrestConfig, PostgrestStore, TradeStore};
use tranche_telemetry::Metrics;
use tranche_ws::{PriceStreamManager, RebuildHandle, StreamCommand, StreamState};

/// Depth of the rebuild request queue. One pending request is enough since
/// the manager debounces.
const REBUILD_QUEUE: usize = 1;

/// Result of the startup restore.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    /// Rows that could not be decoded.
    pub skipped: usize,
    /// Restored symbols the exchange reports flat.
    pub missing_on_exchange: Vec<String>,
    /// Restored symbols held on the opposite side at the exchange.
    pub side_mismatch: Vec<String>,
}

pub struct Application {
    config: AppConfig,
    registry: Arc<PositionRegistry>,
    exchange: Arc<dyn ExchangeGateway>,
    store: Arc<dyn TradeStore>,
    precisions: Arc<PrecisionCache>,
    controller: Arc<LifecycleController>,
    rebuild: RebuildHandle,
    rebuild_rx: mpsc::Receiver<StreamCommand>,
    shutdown: CancellationToken,
}

impl Application {
    /// Build the live application: Binance client from env credentials and
    /// the configured store backend.
    pub async fn new(config: AppConfig) -> AppResult<Self> {
        let credentials = BinanceCredentials::from_env()?;
        let exchange: Arc<dyn ExchangeGateway> = Arc::new(BinanceFuturesClient::new(
            BinanceConfig::from(&config.exchange),
            Some(credentials),
        )?);

        let store: Arc<dyn TradeStore> = match config.store.backend {
            StoreBackend::Postgrest => {
                Arc::new(PostgrestStore::from_env(&PostgrestConfig::from(&config.store))?)
            }
            StoreBackend::File => Arc::new(FileStore::open(&config.store.path).await?),
            StoreBackend::Memory => {
                warn!("Memory trade store selected, positions will not survive a restart");
                Arc::new(MemoryStore::new())
            }
        };
        info!(store = store.name(), "Trade store ready");

        Ok(Self::with_components(config, exchange, store))
    }

    /// Build around caller-supplied collaborators.
    pub fn with_components(
        config: AppConfig,
        exchange: Arc<dyn ExchangeGateway>,
        store: Arc<dyn TradeStore>,
    ) -> Self {
        let registry = Arc::new(PositionRegistry::new());
        let precisions = Arc::new(PrecisionCache::new(exchange.clone()));
        let (rebuild, rebuild_rx) = RebuildHandle::channel(REBUILD_QUEUE);

        let controller = Arc::new(LifecycleController::new(
            registry.clone(),
            exchange.clone(),
            store.clone(),
            precisions.clone(),
            config.plan.clone(),
            config.reversal.clone(),
            rebuild.clone(),
            config.lifecycle.call_timeout(),
        ));

        Self {
            config,
            registry,
            exchange,
            store,
            precisions,
            controller,
            rebuild,
            rebuild_rx,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn controller(&self) -> &Arc<LifecycleController> {
        &self.controller
    }

    pub fn registry(&self) -> &Arc<PositionRegistry> {
        &self.registry
    }

    /// Token that stops every task spawned by [`Self::run`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Load precisions and tracked positions, then report how the restored
    /// set compares to the exchange. Nothing is mutated on a mismatch.
    pub async fn restore(&self) -> AppResult<RestoreReport> {
        match self.precisions.refresh_all().await {
            Ok(count) => info!(count, "Instrument precisions loaded"),
            Err(e) => warn!(error = %e, "Precision refresh failed, falling back to lazy lookups"),
        }

        let rows = self.store.list_all().await?;
        let mut report = RestoreReport::default();
        let mut positions = Vec::with_capacity(rows.len());
        for row in rows {
            match row.to_position() {
                Ok(position) => positions.push(position),
                Err(e) => {
                    warn!(symbol = %row.symbol, error = %e, "Skipping unreadable trade row");
                    report.skipped += 1;
                }
            }
        }
        report.restored = self.registry.seed(positions);
        Metrics::open_positions(self.registry.len());

        for position in self.registry.snapshot() {
            let symbol = position.symbol.as_str();
            match self.exchange.get_position(symbol).await {
                Ok(Some(live)) if live.side == position.side => {
                    if live.quantity != position.quantity {
                        warn!(
                            symbol,
                            tracked = %position.quantity,
                            exchange = %live.quantity,
                            "Restored quantity differs from exchange"
                        );
                    }
                }
                Ok(Some(live)) => {
                    warn!(symbol, tracked = %position.side, exchange = %live.side, "Restored side differs from exchange");
                    report.side_mismatch.push(position.symbol.clone());
                }
                Ok(None) => {
                    warn!(symbol, "Restored position not found on exchange");
                    report.missing_on_exchange.push(position.symbol.clone());
                }
                Err(e) => warn!(symbol, error = %e, "Exchange position check failed"),
            }
        }

        info!(
            restored = report.restored,
            skipped = report.skipped,
            missing = report.missing_on_exchange.len(),
            mismatched = report.side_mismatch.len(),
            "Tracked positions restored"
        );
        Ok(report)
    }

    /// Run until ctrl-c or until the shutdown token is cancelled.
    pub async fn run(self) -> AppResult<()> {
        self.restore().await?;

        let Self {
            config,
            registry,
            controller,
            rebuild,
            rebuild_rx,
            shutdown,
            ..
        } = self;

        let (tick_tx, tick_rx) = mpsc::channel(config.stream.tick_buffer);
        let manager = PriceStreamManager::new((&config.stream).into(), registry.clone());
        let state_rx = manager.state_watch();

        let stream_handle = tokio::spawn(manager.run(rebuild_rx, tick_tx, shutdown.clone()));
        let dispatch_handle =
            tokio::spawn(TickDispatcher::new(controller.clone()).run(tick_rx, shutdown.clone()));
        let state_handle = tokio::spawn(track_stream_state(state_rx, shutdown.clone()));

        let server_shutdown = shutdown.clone();
        let server_state = WebhookState::new(controller);
        let bind = config.server.bind;
        let mut server_handle =
            tokio::spawn(async move { run_server(bind, server_state, server_shutdown).await });

        rebuild.request_rebuild();
        info!(%bind, tracked = registry.len(), "Monitor running");

        let server_result = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                None
            }
            () = shutdown.cancelled() => None,
            result = &mut server_handle => Some(result),
        };
        shutdown.cancel();

        let server_result = match server_result {
            Some(result) => result,
            None => server_handle.await,
        };
        let _ = stream_handle.await;
        let _ = dispatch_handle.await;
        let _ = state_handle.await;

        info!(tracked = registry.len(), "Shut down");
        match server_result {
            Ok(result) => result,
            Err(e) => Err(AppError::Server(format!("server task failed: {e}"))),
        }
    }
}

/// Mirror stream state changes into metrics.
async fn track_stream_state(mut state_rx: watch::Receiver<StreamState>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            biased;

            () = shutdown.cancelled() => break,

            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                Metrics::stream_state(state.as_gauge());
                if state == StreamState::Connecting {
                    Metrics::stream_connect_attempt();
                }
            }
        }
    }
}
