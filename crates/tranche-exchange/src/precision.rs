//! Instrument precision cache.
//!
//! Loaded once at startup from the exchange's instrument list; a symbol
//! missing from the cache is fetched on demand.

use crate::error::ExchangeResult;
use crate::gateway::ExchangeGateway;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};
use tranche_core::SymbolPrecision;

#[derive(Debug, Clone)]
struct PrecisionEntry {
    precision: SymbolPrecision,
    fetched_at: DateTime<Utc>,
}

pub struct PrecisionCache {
    entries: DashMap<String, PrecisionEntry>,
    gateway: Arc<dyn ExchangeGateway>,
}

impl PrecisionCache {
    pub fn new(gateway: Arc<dyn ExchangeGateway>) -> Self {
        Self {
            entries: DashMap::new(),
            gateway,
        }
    }

    /// Replace the cache contents with every instrument the exchange lists.
    ///
    /// Returns the number of instruments loaded.
    pub async fn refresh_all(&self) -> ExchangeResult<usize> {
        let all = self.gateway.get_all_precisions().await?;
        let now = Utc::now();
        for (symbol, precision) in all {
            self.entries.insert(
                symbol.to_ascii_uppercase(),
                PrecisionEntry {
                    precision,
                    fetched_at: now,
                },
            );
        }
        info!(instruments = self.entries.len(), "Precision cache loaded");
        Ok(self.entries.len())
    }

    pub fn get(&self, symbol: &str) -> Option<SymbolPrecision> {
        self.entries
            .get(&symbol.to_ascii_uppercase())
            .map(|e| e.precision)
    }

    /// Cached precision, or a single-instrument lookup on a miss.
    pub async fn get_or_fetch(&self, symbol: &str) -> ExchangeResult<SymbolPrecision> {
        if let Some(precision) = self.get(symbol) {
            return Ok(precision);
        }

        let key = symbol.to_ascii_uppercase();
        debug!(symbol = %key, "Precision cache miss, fetching");
        let precision = self.gateway.get_instrument_precision(&key).await?;
        self.insert(&key, precision);
        Ok(precision)
    }

    pub fn insert(&self, symbol: &str, precision: SymbolPrecision) {
        self.entries.insert(
            symbol.to_ascii_uppercase(),
            PrecisionEntry {
                precision,
                fetched_at: Utc::now(),
            },
        );
    }

    /// When `symbol` was last fetched.
    pub fn fetched_at(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.entries
            .get(&symbol.to_ascii_uppercase())
            .map(|e| e.fetched_at)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
