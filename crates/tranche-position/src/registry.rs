//! Position registry.
//!
//! In-memory map of open positions keyed by symbol, plus the per-symbol
//! serialization point every mutation goes through. The registry itself
//! only stores; callers hold [`PositionRegistry::lock`] for the full
//! read-modify-write including exchange calls.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use tranche_core::{Position, Price};
use tranche_ws::SymbolSource;

#[derive(Debug, Default)]
pub struct PositionRegistry {
    positions: DashMap<String, Position>,
    /// Never removed: a waiter must always contend on the same mutex.
    locks: DashMap<String, Arc<Mutex<()>>>,
    last_prices: DashMap<String, Price>,
}

impl PositionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the mutation lock for `symbol`.
    pub async fn lock(&self, symbol: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<Position> {
        self.positions.get(symbol).map(|p| p.clone())
    }

    pub fn put(&self, position: Position) {
        debug!(symbol = %position.symbol, quantity = %position.quantity, stop = %position.stop_price, "Registry put");
        self.positions.insert(position.symbol.clone(), position);
    }

    pub fn remove(&self, symbol: &str) -> Option<Position> {
        self.last_prices.remove(symbol);
        self.positions.remove(symbol).map(|(_, p)| p)
    }

    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    /// Current key set, sorted.
    #[must_use]
    pub fn keys(&self) -> BTreeSet<String> {
        self.positions.iter().map(|e| e.key().clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// All positions, sorted by symbol.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Position> {
        let mut all: Vec<Position> = self.positions.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        all
    }

    /// Load positions restored at startup. Terminal positions are skipped.
    /// Returns the number loaded.
    pub fn seed(&self, positions: Vec<Position>) -> usize {
        let mut loaded = 0;
        for position in positions {
            if position.is_terminal() {
                warn!(symbol = %position.symbol, "Skipping closed position during seed");
                continue;
            }
            self.positions.insert(position.symbol.clone(), position);
            loaded += 1;
        }
        loaded
    }

    /// Remember the latest observed price for a tracked symbol.
    pub fn record_price(&self, symbol: &str, price: Price) {
        if self.positions.contains_key(symbol) {
            self.last_prices.insert(symbol.to_string(), price);
        }
    }

    #[must_use]
    pub fn last_price(&self, symbol: &str) -> Option<Price> {
        self.last_prices.get(symbol).map(|p| *p)
    }
}

impl SymbolSource for PositionRegistry {
    fn symbols(&self) -> BTreeSet<String> {
        self.keys()
    }
}
