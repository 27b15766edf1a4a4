//! Trade store abstraction.

use crate::error::StoreResult;
use crate::record::TradeRecord;
use std::pin::Pin;

/// Boxed future type for object-safe async traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Durable table of open positions, one row per symbol.
///
/// `upsert` is last-write-wins keyed by symbol.
pub trait TradeStore: Send + Sync {
    fn get(&self, symbol: &str) -> BoxFuture<'_, StoreResult<Option<TradeRecord>>>;

    fn upsert(&self, record: TradeRecord) -> BoxFuture<'_, StoreResult<()>>;

    /// Remove the row for `symbol`. Deleting a missing row is not an error.
    fn delete(&self, symbol: &str) -> BoxFuture<'_, StoreResult<()>>;

    fn list_all(&self) -> BoxFuture<'_, StoreResult<Vec<TradeRecord>>>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}
