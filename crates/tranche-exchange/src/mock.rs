//! In-memory exchange gateway for tests and dry runs.
//!
//! Simulates just enough of the venue to exercise the lifecycle: market
//! orders move a one-way position, conditional orders rest until cancelled,
//! and any operation can be made to fail or stall.

use crate::error::{ExchangeError, ExchangeResult};
use crate::gateway::{BoxFuture, ExchangeGateway, ExchangePosition, OpenOrder, OrderAck};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tranche_core::{ClientOrderId, OrderSide, PositionSide, Price, Size, SymbolPrecision};

/// A recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeCall {
    GetPosition { symbol: String },
    SetLeverage { symbol: String, leverage: u32 },
    MarketOrder { symbol: String, side: OrderSide, quantity: Size, reduce_only: bool },
    StopOrder { symbol: String, side: OrderSide, trigger: Price, quantity: Option<Size> },
    TakeProfitOrder { symbol: String, side: OrderSide, trigger: Price, quantity: Option<Size> },
    CancelOrder { symbol: String, order_id: i64 },
    CancelAll { symbol: String },
    GetOpenOrders { symbol: String },
    GetPrecision { symbol: String },
    GetAllPrecisions,
}

impl ExchangeCall {
    /// Operation name, as accepted by [`MockExchangeGateway::fail_next`].
    pub fn op(&self) -> &'static str {
        match self {
            Self::GetPosition { .. } => "get_position",
            Self::SetLeverage { .. } => "set_leverage",
            Self::MarketOrder { .. } => "place_market_order",
            Self::StopOrder { .. } => "place_stop_order",
            Self::TakeProfitOrder { .. } => "place_take_profit_order",
            Self::CancelOrder { .. } => "cancel_order",
            Self::CancelAll { .. } => "cancel_all_orders",
            Self::GetOpenOrders { .. } => "get_open_orders",
            Self::GetPrecision { .. } => "get_instrument_precision",
            Self::GetAllPrecisions => "get_all_precisions",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureMode {
    Once,
    Always,
}

/// Recording mock gateway.
#[derive(Debug)]
pub struct MockExchangeGateway {
    calls: Mutex<Vec<ExchangeCall>>,
    positions: Mutex<HashMap<String, ExchangePosition>>,
    orders: Mutex<Vec<OpenOrder>>,
    precisions: Mutex<HashMap<String, SymbolPrecision>>,
    failures: Mutex<HashMap<&'static str, FailureMode>>,
    delays: Mutex<HashMap<&'static str, Duration>>,
    next_order_id: AtomicI64,
}

impl Default for MockExchangeGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExchangeGateway {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            positions: Mutex::new(HashMap::new()),
            orders: Mutex::new(Vec::new()),
            precisions: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            next_order_id: AtomicI64::new(1),
        }
    }

    pub fn set_precision(&self, symbol: &str, precision: SymbolPrecision) {
        self.precisions.lock().insert(symbol.to_string(), precision);
    }

    pub fn set_position(&self, position: ExchangePosition) {
        self.positions.lock().insert(position.symbol.clone(), position);
    }

    pub fn clear_position(&self, symbol: &str) {
        self.positions.lock().remove(symbol);
    }

    /// Simulated position, if any.
    pub fn position(&self, symbol: &str) -> Option<ExchangePosition> {
        self.positions.lock().get(symbol).cloned()
    }

    /// Resting orders for `symbol`.
    pub fn open_orders(&self, symbol: &str) -> Vec<OpenOrder> {
        self.orders
            .lock()
            .iter()
            .filter(|o| o.symbol == symbol)
            .cloned()
            .collect()
    }

    /// Fail the next call of `op`.
    pub fn fail_next(&self, op: &'static str) {
        self.failures.lock().insert(op, FailureMode::Once);
    }

    /// Fail every call of `op` until [`Self::clear_failures`].
    pub fn fail_always(&self, op: &'static str) {
        self.failures.lock().insert(op, FailureMode::Always);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Stall every call of `op` for `delay` before answering.
    pub fn set_delay(&self, op: &'static str, delay: Duration) {
        self.delays.lock().insert(op, delay);
    }

    /// Recorded calls, oldest first.
    pub fn calls(&self) -> Vec<ExchangeCall> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls of `op`.
    pub fn count(&self, op: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.op() == op).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    async fn enter(&self, call: ExchangeCall) -> ExchangeResult<()> {
        let op = call.op();
        self.calls.lock().push(call);

        let delay = self.delays.lock().get(op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut failures = self.failures.lock();
        match failures.get(op).copied() {
            Some(FailureMode::Once) => {
                failures.remove(op);
                Err(injected(op))
            }
            Some(FailureMode::Always) => Err(injected(op)),
            None => Ok(()),
        }
    }

    fn ack(&self, symbol: &str) -> OrderAck {
        OrderAck {
            order_id: self.next_order_id.fetch_add(1, Ordering::SeqCst),
            client_order_id: ClientOrderId::new().to_string(),
            symbol: symbol.to_string(),
        }
    }

    fn fill_market(&self, symbol: &str, side: OrderSide, quantity: Size, reduce_only: bool) {
        let mut positions = self.positions.lock();
        let current = positions
            .get(symbol)
            .map(|p| match p.side {
                PositionSide::Long => p.quantity.inner(),
                PositionSide::Short => -p.quantity.inner(),
            })
            .unwrap_or(Decimal::ZERO);
        let delta = match side {
            OrderSide::Buy => quantity.inner(),
            OrderSide::Sell => -quantity.inner(),
        };

        let mut next = current + delta;
        if reduce_only && (current.is_zero() || next.is_sign_negative() != current.is_sign_negative()) {
            next = Decimal::ZERO;
        }

        if next.is_zero() {
            positions.remove(symbol);
            return;
        }

        let entry_price = positions
            .get(symbol)
            .map(|p| p.entry_price)
            .unwrap_or(Price::ZERO);
        positions.insert(
            symbol.to_string(),
            ExchangePosition {
                symbol: symbol.to_string(),
                side: if next.is_sign_negative() {
                    PositionSide::Short
                } else {
                    PositionSide::Long
                },
                quantity: Size::new(next.abs()),
                entry_price,
            },
        );
    }

    fn rest_order(&self, ack: &OrderAck, side: OrderSide, order_type: &str, trigger: Price, quantity: Option<Size>) {
        self.orders.lock().push(OpenOrder {
            order_id: ack.order_id,
            symbol: ack.symbol.clone(),
            side,
            order_type: order_type.to_string(),
            stop_price: Some(trigger),
            close_position: quantity.is_none(),
            reduce_only: true,
        });
    }
}

fn injected(op: &str) -> ExchangeError {
    ExchangeError::Api {
        code: -1000,
        msg: format!("injected failure: {op}"),
    }
}

impl ExchangeGateway for MockExchangeGateway {
    fn get_position(&self, symbol: &str) -> BoxFuture<'_, ExchangeResult<Option<ExchangePosition>>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            self.enter(ExchangeCall::GetPosition { symbol: symbol.clone() })
                .await?;
            Ok(self.position(&symbol))
        })
    }

    fn set_leverage(&self, symbol: &str, leverage: u32) -> BoxFuture<'_, ExchangeResult<()>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            self.enter(ExchangeCall::SetLeverage { symbol, leverage }).await
        })
    }

    fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Size,
        reduce_only: bool,
    ) -> BoxFuture<'_, ExchangeResult<OrderAck>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            self.enter(ExchangeCall::MarketOrder {
                symbol: symbol.clone(),
                side,
                quantity,
                reduce_only,
            })
            .await?;
            self.fill_market(&symbol, side, quantity, reduce_only);
            Ok(self.ack(&symbol))
        })
    }

    fn place_stop_order(
        &self,
        symbol: &str,
        side: OrderSide,
        trigger: Price,
        quantity: Option<Size>,
    ) -> BoxFuture<'_, ExchangeResult<OrderAck>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            self.enter(ExchangeCall::StopOrder {
                symbol: symbol.clone(),
                side,
                trigger,
                quantity,
            })
            .await?;
            let ack = self.ack(&symbol);
            self.rest_order(&ack, side, "STOP_MARKET", trigger, quantity);
            Ok(ack)
        })
    }

    fn place_take_profit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        trigger: Price,
        quantity: Option<Size>,
    ) -> BoxFuture<'_, ExchangeResult<OrderAck>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            self.enter(ExchangeCall::TakeProfitOrder {
                symbol: symbol.clone(),
                side,
                trigger,
                quantity,
            })
            .await?;
            let ack = self.ack(&symbol);
            self.rest_order(&ack, side, "TAKE_PROFIT_MARKET", trigger, quantity);
            Ok(ack)
        })
    }

    fn cancel_order(&self, symbol: &str, order_id: i64) -> BoxFuture<'_, ExchangeResult<()>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            self.enter(ExchangeCall::CancelOrder {
                symbol: symbol.clone(),
                order_id,
            })
            .await?;
            let mut orders = self.orders.lock();
            let before = orders.len();
            orders.retain(|o| !(o.symbol == symbol && o.order_id == order_id));
            if orders.len() == before {
                return Err(ExchangeError::Api {
                    code: -2011,
                    msg: "Unknown order sent.".to_string(),
                });
            }
            Ok(())
        })
    }

    fn cancel_all_orders(&self, symbol: &str) -> BoxFuture<'_, ExchangeResult<()>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            self.enter(ExchangeCall::CancelAll { symbol: symbol.clone() })
                .await?;
            self.orders.lock().retain(|o| o.symbol != symbol);
            Ok(())
        })
    }

    fn get_open_orders(&self, symbol: &str) -> BoxFuture<'_, ExchangeResult<Vec<OpenOrder>>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            self.enter(ExchangeCall::GetOpenOrders { symbol: symbol.clone() })
                .await?;
            Ok(self.open_orders(&symbol))
        })
    }

    fn get_instrument_precision(&self, symbol: &str) -> BoxFuture<'_, ExchangeResult<SymbolPrecision>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            self.enter(ExchangeCall::GetPrecision { symbol: symbol.clone() })
                .await?;
            self.precisions
                .lock()
                .get(&symbol)
                .copied()
                .ok_or(ExchangeError::UnknownSymbol(symbol))
        })
    }

    fn get_all_precisions(&self) -> BoxFuture<'_, ExchangeResult<HashMap<String, SymbolPrecision>>> {
        Box::pin(async move {
            self.enter(ExchangeCall::GetAllPrecisions).await?;
            Ok(self.precisions.lock().clone())
        })
    }
}
