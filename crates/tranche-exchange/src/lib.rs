//! Exchange access for the tranche position monitor.
//!
//! - [`ExchangeGateway`]: the operations the monitor needs from the venue
//! - [`BinanceFuturesClient`]: signed REST implementation for Binance USDⓈ-M futures
//! - [`PrecisionCache`]: per-instrument quantity step / price tick
//! - [`MockExchangeGateway`]: recording in-memory venue for tests

pub mod client;
pub mod error;
pub mod gateway;
pub mod mock;
pub mod precision;
pub mod signer;

pub use client::{BinanceConfig, BinanceCredentials, BinanceFuturesClient};
pub use error::{ExchangeError, ExchangeResult};
pub use gateway::{BoxFuture, ExchangeGateway, ExchangePosition, OpenOrder, OrderAck};
pub use mock::{ExchangeCall, MockExchangeGateway};
pub use precision::PrecisionCache;
