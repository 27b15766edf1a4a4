//! Lifecycle controller.
//!
//! Every mutation of a tracked position goes through here: webhook opens,
//! reversals and explicit closes, and the transitions a price tick triggers.
//! Each operation holds the symbol's registry lock for its whole duration,
//! exchange calls included, so two mutations of one symbol never interleave.
//!
//! Exchange effects always run before persistence. A failed call aborts the
//! operation, leaving the registry and store at the last persisted state;
//! the next tick (or webhook) re-evaluates from there. Nothing is rolled back.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use tranche_core::{
    now_ms, CoreError, OpenRequest, Position, PositionSide, Price, Size, StagePlan,
    SymbolPrecision, TargetSpec,
};
use tranche_exchange::{ExchangeError, ExchangeGateway, ExchangeResult, PrecisionCache};
use tranche_position::{
    apply, evaluate, CloseReason, PositionRegistry, ReversalPolicy, ReversalReason,
    SignalDecision, Transition,
};
use tranche_store::{StoreError, StoreResult, TradeRecord, TradeStore};
use tranche_telemetry::Metrics;
use tranche_ws::RebuildHandle;

/// Binance code for cancelling an order that no longer exists.
const UNKNOWN_ORDER: i64 = -2011;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Exchange call {op} failed: {source}")]
    Exchange {
        op: &'static str,
        #[source]
        source: ExchangeError,
    },

    #[error("Store call {op} failed: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("{op} timed out after {timeout_ms}ms")]
    Timeout { op: &'static str, timeout_ms: u64 },

    #[error("Unknown precision for {symbol}: {reason}")]
    UnknownPrecision { symbol: String, reason: String },

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Validated open instruction from the webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSignal {
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: Size,
    pub leverage: u32,
    pub entry_price: Price,
    pub stop_price: Price,
    pub final_target: Price,
    pub targets: Vec<TargetSpec>,
}

impl OpenSignal {
    fn into_request(self, precision: &SymbolPrecision) -> LifecycleResult<OpenRequest> {
        let quantity = precision.floor_quantity(self.quantity);
        if !quantity.is_positive() {
            return Err(LifecycleError::InvalidSignal(format!(
                "quantity {} rounds to zero at step {}",
                self.quantity, precision.quantity_step
            )));
        }
        if self.leverage == 0 {
            return Err(LifecycleError::InvalidSignal(
                "leverage must be positive".to_string(),
            ));
        }
        Ok(OpenRequest {
            symbol: self.symbol,
            side: self.side,
            quantity,
            leverage: self.leverage,
            entry_price: self.entry_price,
            stop_price: self.stop_price,
            final_target: self.final_target,
            targets: self.targets,
        })
    }
}

/// Why a signal was dropped without effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Same side as the tracked position.
    SameDirection,
    /// Opposite side, but the reversal gate is closed.
    Hold,
    /// Nothing tracked, yet the exchange already holds a position.
    ExchangeConflict,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SameDirection => "same_direction",
            Self::Hold => "hold",
            Self::ExchangeConflict => "exchange_conflict",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    Opened(Position),
    Reversed {
        reason: ReversalReason,
        position: Position,
    },
    Skipped(SkipReason),
}

impl OpenOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Opened(_) => "opened",
            Self::Reversed { .. } => "reversed",
            Self::Skipped(reason) => reason.as_str(),
        }
    }
}

pub struct LifecycleController {
    registry: Arc<PositionRegistry>,
    exchange: Arc<dyn ExchangeGateway>,
    store: Arc<dyn TradeStore>,
    precisions: Arc<PrecisionCache>,
    plan: StagePlan,
    reversal: ReversalPolicy,
    rebuild: RebuildHandle,
    call_timeout: Duration,
}

impl LifecycleController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<PositionRegistry>,
        exchange: Arc<dyn ExchangeGateway>,
        store: Arc<dyn TradeStore>,
        precisions: Arc<PrecisionCache>,
        plan: StagePlan,
        reversal: ReversalPolicy,
        rebuild: RebuildHandle,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            exchange,
            store,
            precisions,
            plan,
            reversal,
            rebuild,
            call_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<PositionRegistry> {
        &self.registry
    }

    /// Open (or reverse into) a position for a webhook signal.
    pub async fn handle_signal(&self, signal: OpenSignal) -> LifecycleResult<OpenOutcome> {
        let symbol = signal.symbol.trim().to_ascii_uppercase();
        let _guard = self.registry.lock(&symbol).await;

        let result = self.handle_signal_locked(&symbol, signal).await;
        match &result {
            Ok(outcome) => Metrics::signal(outcome.label()),
            Err(_) => Metrics::signal("failed"),
        }
        result
    }

    async fn handle_signal_locked(
        &self,
        symbol: &str,
        signal: OpenSignal,
    ) -> LifecycleResult<OpenOutcome> {
        let precision = self.precision(symbol).await?;
        let signal_entry = signal.entry_price;
        let incoming = signal.side;

        // Validate before any exchange effect; a bad signal must not close
        // the position it would replace.
        let mut request = signal.into_request(&precision)?;
        request.symbol = symbol.to_string();
        let position = Position::open(request, &self.plan, now_ms())?;

        if let Some(existing) = self.registry.get(symbol) {
            let reference = self.registry.last_price(symbol).unwrap_or(signal_entry);
            return match self.reversal.decide(&existing, incoming, reference) {
                SignalDecision::SameDirection => {
                    info!(symbol, side = %incoming, "Signal matches open position, dropped");
                    Ok(OpenOutcome::Skipped(SkipReason::SameDirection))
                }
                SignalDecision::Hold => {
                    info!(
                        symbol,
                        side = %incoming,
                        %reference,
                        entry = %existing.entry_price,
                        stop = %existing.stop_price,
                        "Reversal gate closed, signal dropped"
                    );
                    Ok(OpenOutcome::Skipped(SkipReason::Hold))
                }
                SignalDecision::Reverse { reason } => {
                    info!(symbol, from = %existing.side, to = %incoming, ?reason, %reference, "Reversing position");
                    self.close_locked(&existing, CloseReason::Reversal).await?;
                    match self.open_locked(position, &precision).await {
                        Ok(position) => Ok(OpenOutcome::Reversed { reason, position }),
                        Err(e) => {
                            // The symbol left the registry after all.
                            self.rebuild.request_rebuild();
                            Err(e)
                        }
                    }
                }
            };
        }

        let live = self
            .exchange_call("get_position", symbol, self.exchange.get_position(symbol))
            .await?;
        if let Some(live) = live.filter(|p| p.quantity.is_positive()) {
            warn!(
                symbol,
                side = %live.side,
                quantity = %live.quantity,
                "Exchange already holds an untracked position, signal dropped"
            );
            return Ok(OpenOutcome::Skipped(SkipReason::ExchangeConflict));
        }

        let position = self.open_locked(position, &precision).await?;
        self.rebuild.request_rebuild();
        Ok(OpenOutcome::Opened(position))
    }

    /// Fresh open: leverage, entry, take-profit, stop, then persist.
    async fn open_locked(
        &self,
        position: Position,
        precision: &SymbolPrecision,
    ) -> LifecycleResult<Position> {
        let symbol = position.symbol.as_str();
        let entry_side = position.side.entry_order_side();
        let exit_side = position.side.exit_order_side();

        self.exchange_call(
            "set_leverage",
            symbol,
            self.exchange.set_leverage(symbol, position.leverage),
        )
        .await?;

        let entry = self
            .exchange_call(
                "place_market_order",
                symbol,
                self.exchange
                    .place_market_order(symbol, entry_side, position.quantity, false),
            )
            .await?;
        debug!(symbol, order_id = entry.order_id, client_order_id = %entry.client_order_id, "Entry order accepted");

        let target = precision.floor_price(position.final_target);
        self.exchange_call(
            "place_take_profit_order",
            symbol,
            self.exchange
                .place_take_profit_order(symbol, exit_side, target, None),
        )
        .await?;

        let stop = precision.floor_price(position.stop_price);
        self.exchange_call(
            "place_stop_order",
            symbol,
            self.exchange.place_stop_order(symbol, exit_side, stop, None),
        )
        .await?;

        self.persist(&position).await?;

        info!(
            symbol,
            side = %position.side,
            quantity = %position.quantity,
            entry = %position.entry_price,
            stop = %position.stop_price,
            target = %position.final_target,
            partials = position.partial_targets.len(),
            "Position opened"
        );
        Ok(position)
    }

    /// Evaluate `price` against the tracked position and apply what it
    /// triggers. Returns the transitions that were fully applied.
    pub async fn on_tick(&self, symbol: &str, price: Price) -> LifecycleResult<Vec<Transition>> {
        let _guard = self.registry.lock(symbol).await;

        let Some(mut position) = self.registry.get(symbol) else {
            return Ok(Vec::new());
        };
        let precision = self.precision(symbol).await?;

        let mut transitions = evaluate(price, &position, &precision);
        let terminal_first = transitions.first().is_some_and(Transition::is_terminal);
        if let Some(stop) = position.pending_stop.filter(|_| !terminal_first) {
            if position.side.is_stopped(price, stop) {
                // Already through the stop the partial asked for.
                transitions = vec![Transition::StopHit { price, stop }];
            } else {
                info!(symbol, %stop, "Retrying stop relocation left by an earlier partial");
                self.relocate_stop(&position, stop, &precision).await?;
                position.confirm_pending_stop();
                position.touch(now_ms());
                self.persist(&position).await?;
                transitions = evaluate(price, &position, &precision);
            }
        }
        let mut applied = Vec::with_capacity(transitions.len());

        for transition in transitions {
            if let Some(reason) = transition.close_reason() {
                info!(symbol, %price, ?transition, "Terminal transition");
                self.close_locked(&position, reason).await?;
                Metrics::transition_applied(transition.kind());
                applied.push(transition);
                break;
            }

            match &transition {
                Transition::PartialTarget {
                    index,
                    close_quantity,
                    new_stop,
                } => {
                    if close_quantity.is_positive() {
                        self.exchange_call(
                            "place_market_order",
                            symbol,
                            self.exchange.place_market_order(
                                symbol,
                                position.side.exit_order_side(),
                                *close_quantity,
                                true,
                            ),
                        )
                        .await?;
                    }
                    // The close is on the exchange: record it before touching
                    // the stop so a failed relocation never resends it.
                    position.mark_partial_closed(*index, *close_quantity, *new_stop);
                    position.touch(now_ms());
                    self.persist(&position).await?;
                    info!(symbol, %price, index, closed = %close_quantity, new_stop = ?new_stop, "Partial target hit");

                    if let Some(stop) = new_stop {
                        self.relocate_stop(&position, *stop, &precision).await?;
                        position.confirm_pending_stop();
                        position.touch(now_ms());
                        self.persist(&position).await?;
                    }
                }
                Transition::StopMove { index, new_stop } => {
                    if let Some(stop) = new_stop {
                        self.relocate_stop(&position, *stop, &precision).await?;
                    }
                    apply(&mut position, &transition, now_ms());
                    self.persist(&position).await?;
                    info!(symbol, %price, index, new_stop = ?new_stop, "Stop checkpoint hit");
                }
                Transition::StopHit { .. } | Transition::FinalTargetHit { .. } => {}
            }

            Metrics::transition_applied(transition.kind());
            applied.push(transition);
        }

        Ok(applied)
    }

    /// Explicit close. Returns the removed position, or `None` when the
    /// symbol was not tracked.
    pub async fn close(
        &self,
        symbol: &str,
        reason: CloseReason,
    ) -> LifecycleResult<Option<Position>> {
        let symbol = symbol.trim().to_ascii_uppercase();
        let _guard = self.registry.lock(&symbol).await;

        let Some(position) = self.registry.get(&symbol) else {
            info!(symbol = %symbol, "Close requested for untracked symbol");
            return Ok(None);
        };
        self.close_locked(&position, reason).await?;
        Ok(Some(position))
    }

    /// Terminal path: cancel everything, flatten, forget.
    async fn close_locked(&self, position: &Position, reason: CloseReason) -> LifecycleResult<()> {
        let symbol = position.symbol.as_str();

        self.exchange_call(
            "cancel_all_orders",
            symbol,
            self.exchange.cancel_all_orders(symbol),
        )
        .await?;

        let residual = self
            .exchange_call("get_position", symbol, self.exchange.get_position(symbol))
            .await?;
        if let Some(residual) = residual.filter(|p| p.quantity.is_positive()) {
            self.exchange_call(
                "place_market_order",
                symbol,
                self.exchange.place_market_order(
                    symbol,
                    residual.side.exit_order_side(),
                    residual.quantity,
                    true,
                ),
            )
            .await?;
            debug!(symbol, quantity = %residual.quantity, "Residual position flattened");
        }

        self.store_call("delete", symbol, self.store.delete(symbol))
            .await?;
        self.registry.remove(symbol);
        Metrics::open_positions(self.registry.len());
        Metrics::position_closed(&reason.to_string());
        // A reversal reopens the symbol right away, so the key set holds.
        if reason != CloseReason::Reversal {
            self.rebuild.request_rebuild();
        }

        info!(symbol, side = %position.side, %reason, "Position closed");
        Ok(())
    }

    /// Replace every resting stop for the symbol with one at `stop`.
    async fn relocate_stop(
        &self,
        position: &Position,
        stop: Price,
        precision: &SymbolPrecision,
    ) -> LifecycleResult<()> {
        let symbol = position.symbol.as_str();

        let orders = self
            .exchange_call(
                "get_open_orders",
                symbol,
                self.exchange.get_open_orders(symbol),
            )
            .await?;
        for order in orders.iter().filter(|o| o.is_stop()) {
            let cancelled = self
                .exchange_call(
                    "cancel_order",
                    symbol,
                    self.exchange.cancel_order(symbol, order.order_id),
                )
                .await;
            match cancelled {
                Ok(()) => {}
                // Already triggered or cancelled elsewhere.
                Err(LifecycleError::Exchange {
                    source: ExchangeError::Api { code, .. },
                    ..
                }) if code == UNKNOWN_ORDER => {
                    debug!(symbol, order_id = order.order_id, "Stop order already gone");
                }
                Err(e) => return Err(e),
            }
        }

        let trigger = precision.floor_price(stop);
        self.exchange_call(
            "place_stop_order",
            symbol,
            self.exchange
                .place_stop_order(symbol, position.side.exit_order_side(), trigger, None),
        )
        .await?;
        debug!(symbol, %trigger, "Stop relocated");
        Ok(())
    }

    /// Store first, then registry.
    async fn persist(&self, position: &Position) -> LifecycleResult<()> {
        let symbol = position.symbol.as_str();
        let record = TradeRecord::from_position(position).map_err(|source| {
            LifecycleError::Store {
                op: "encode",
                source,
            }
        })?;
        self.store_call("upsert", symbol, self.store.upsert(record))
            .await?;
        self.registry.put(position.clone());
        Metrics::open_positions(self.registry.len());
        Ok(())
    }

    async fn precision(&self, symbol: &str) -> LifecycleResult<SymbolPrecision> {
        if let Some(precision) = self.precisions.get(symbol) {
            return Ok(precision);
        }
        match tokio::time::timeout(self.call_timeout, self.precisions.get_or_fetch(symbol)).await
        {
            Ok(Ok(precision)) => Ok(precision),
            Ok(Err(e)) => {
                warn!(symbol, error = %e, "Precision lookup failed");
                Err(LifecycleError::UnknownPrecision {
                    symbol: symbol.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => Err(LifecycleError::UnknownPrecision {
                symbol: symbol.to_string(),
                reason: format!("lookup timed out after {}ms", self.timeout_ms()),
            }),
        }
    }

    async fn exchange_call<T>(
        &self,
        op: &'static str,
        symbol: &str,
        call: impl Future<Output = ExchangeResult<T>>,
    ) -> LifecycleResult<T> {
        let started = Instant::now();
        let result = tokio::time::timeout(self.call_timeout, call).await;
        Metrics::exchange_latency(op, started.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => {
                Metrics::exchange_failure(op);
                error!(symbol, op, error = %source, "Exchange call failed");
                Err(LifecycleError::Exchange { op, source })
            }
            Err(_) => {
                Metrics::exchange_failure(op);
                error!(symbol, op, timeout_ms = self.timeout_ms(), "Exchange call timed out");
                Err(LifecycleError::Timeout {
                    op,
                    timeout_ms: self.timeout_ms(),
                })
            }
        }
    }

    async fn store_call<T>(
        &self,
        op: &'static str,
        symbol: &str,
        call: impl Future<Output = StoreResult<T>>,
    ) -> LifecycleResult<T> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => {
                Metrics::store_failure(op);
                error!(symbol, op, store = self.store.name(), error = %source, "Store call failed");
                Err(LifecycleError::Store { op, source })
            }
            Err(_) => {
                Metrics::store_failure(op);
                error!(symbol, op, store = self.store.name(), "Store call timed out");
                Err(LifecycleError::Timeout {
                    op,
                    timeout_ms: self.timeout_ms(),
                })
            }
        }
    }

    fn timeout_ms(&self) -> u64 {
        self.call_timeout.as_millis() as u64
    }
}
