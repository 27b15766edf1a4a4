//! In-memory trade store.

use crate::error::{StoreError, StoreResult};
use crate::record::TradeRecord;
use crate::store::{BoxFuture, TradeStore};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};

/// Volatile store for tests and dry runs. Operations can be made to fail.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<String, TradeRecord>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every `op` (`get`, `upsert`, `delete`, `list_all`) until cleared.
    pub fn fail(&self, op: &'static str) {
        self.failing.lock().insert(op);
    }

    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    /// Current row for `symbol`, bypassing failure injection.
    pub fn row(&self, symbol: &str) -> Option<TradeRecord> {
        self.rows.lock().get(symbol).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    fn check(&self, op: &'static str) -> StoreResult<()> {
        if self.failing.lock().contains(op) {
            return Err(StoreError::Http(format!("injected failure: {op}")));
        }
        Ok(())
    }
}

impl TradeStore for MemoryStore {
    fn get(&self, symbol: &str) -> BoxFuture<'_, StoreResult<Option<TradeRecord>>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            self.check("get")?;
            Ok(self.row(&symbol))
        })
    }

    fn upsert(&self, record: TradeRecord) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.check("upsert")?;
            self.rows.lock().insert(record.symbol.clone(), record);
            Ok(())
        })
    }

    fn delete(&self, symbol: &str) -> BoxFuture<'_, StoreResult<()>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            self.check("delete")?;
            self.rows.lock().remove(&symbol);
            Ok(())
        })
    }

    fn list_all(&self) -> BoxFuture<'_, StoreResult<Vec<TradeRecord>>> {
        Box::pin(async move {
            self.check("list_all")?;
            Ok(self.rows.lock().values().cloned().collect())
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::sample_position;
    use rust_decimal_macros::dec;
    use tranche_core::Size;

    #[tokio::test]
    async fn test_upsert_is_last_write_wins() {
        let store = MemoryStore::new();
        let mut position = sample_position("BTCUSDT");
        store
            .upsert(TradeRecord::from_position(&position).unwrap())
            .await
            .unwrap();

        position.mark_partial_hit(0, Size::new(dec!(0.5)), None);
        store
            .upsert(TradeRecord::from_position(&position).unwrap())
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        let row = store.get("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(row.qty, Size::new(dec!(0.5)));
    }

    #[tokio::test]
    async fn test_delete_missing_row_is_ok() {
        let store = MemoryStore::new();
        store.delete("NOPE").await.unwrap();
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryStore::new();
        store.fail("upsert");
        let record = TradeRecord::from_position(&sample_position("BTCUSDT")).unwrap();
        assert!(store.upsert(record.clone()).await.is_err());
        assert!(store.is_empty());

        store.clear_failures();
        store.upsert(record).await.unwrap();
        assert_eq!(store.len(), 1);
    }
}
