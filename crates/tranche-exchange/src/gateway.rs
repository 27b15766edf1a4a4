//! Exchange gateway abstraction.
//!
//! Everything the lifecycle controller needs from the venue, behind an
//! object-safe trait so tests can swap in [`crate::MockExchangeGateway`].

use crate::error::ExchangeResult;
use std::collections::HashMap;
use std::pin::Pin;
use tranche_core::{OrderSide, PositionSide, Price, Size, SymbolPrecision};

/// Boxed future type for object-safe async traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Acknowledgment of an accepted order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAck {
    pub order_id: i64,
    pub client_order_id: String,
    pub symbol: String,
}

/// Live exchange position (one-way mode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangePosition {
    pub symbol: String,
    pub side: PositionSide,
    /// Absolute size.
    pub quantity: Size,
    pub entry_price: Price,
}

/// Resting order as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOrder {
    pub order_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    /// Exchange order type, e.g. `STOP_MARKET`.
    pub order_type: String,
    pub stop_price: Option<Price>,
    pub close_position: bool,
    pub reduce_only: bool,
}

impl OpenOrder {
    /// Stop-loss style order (`STOP` or `STOP_MARKET`).
    pub fn is_stop(&self) -> bool {
        matches!(self.order_type.as_str(), "STOP" | "STOP_MARKET")
    }
}

/// Exchange operations used by the monitor.
///
/// Conditional orders take `quantity: None` to mean "close the whole
/// position" (`closePosition=true`).
pub trait ExchangeGateway: Send + Sync {
    /// Current position for `symbol`, or `None` when flat.
    fn get_position(&self, symbol: &str) -> BoxFuture<'_, ExchangeResult<Option<ExchangePosition>>>;

    fn set_leverage(&self, symbol: &str, leverage: u32) -> BoxFuture<'_, ExchangeResult<()>>;

    fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Size,
        reduce_only: bool,
    ) -> BoxFuture<'_, ExchangeResult<OrderAck>>;

    /// Stop-market order triggered at `trigger`.
    fn place_stop_order(
        &self,
        symbol: &str,
        side: OrderSide,
        trigger: Price,
        quantity: Option<Size>,
    ) -> BoxFuture<'_, ExchangeResult<OrderAck>>;

    /// Take-profit-market order triggered at `trigger`.
    fn place_take_profit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        trigger: Price,
        quantity: Option<Size>,
    ) -> BoxFuture<'_, ExchangeResult<OrderAck>>;

    fn cancel_order(&self, symbol: &str, order_id: i64) -> BoxFuture<'_, ExchangeResult<()>>;

    fn cancel_all_orders(&self, symbol: &str) -> BoxFuture<'_, ExchangeResult<()>>;

    fn get_open_orders(&self, symbol: &str) -> BoxFuture<'_, ExchangeResult<Vec<OpenOrder>>>;

    fn get_instrument_precision(&self, symbol: &str) -> BoxFuture<'_, ExchangeResult<SymbolPrecision>>;

    fn get_all_precisions(&self) -> BoxFuture<'_, ExchangeResult<HashMap<String, SymbolPrecision>>>;
}
