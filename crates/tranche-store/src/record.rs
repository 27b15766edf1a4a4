//! Persisted row for one tracked position.
//!
//! The headline columns (side, quantity, stop, target, stage) are kept
//! flat so the table stays readable from the Supabase dashboard; the full
//! position, including every resolved stage, lives in `state`.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use tranche_core::{Position, PositionSide, Price, Size};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: PositionSide,
    pub qty: Size,
    pub leverage: u32,
    #[serde(rename = "entryPrice")]
    pub entry_price: Price,
    /// Final target.
    pub tp: Price,
    /// Current stop.
    pub sl: Price,
    /// Partial targets hit so far.
    pub stage: u32,
    #[serde(rename = "slMoved")]
    pub sl_moved: bool,
    pub state: serde_json::Value,
    #[serde(rename = "timeStamp")]
    pub time_stamp: u64,
}

impl TradeRecord {
    pub fn from_position(position: &Position) -> StoreResult<Self> {
        Ok(Self {
            symbol: position.symbol.clone(),
            side: position.side,
            qty: position.quantity,
            leverage: position.leverage,
            entry_price: position.entry_price,
            tp: position.final_target,
            sl: position.stop_price,
            stage: position.stage() as u32,
            sl_moved: position.stop_moved(),
            state: serde_json::to_value(position)?,
            time_stamp: position.updated_at_ms,
        })
    }

    /// Restore the position. Rows whose state does not match their key are
    /// rejected.
    pub fn to_position(&self) -> StoreResult<Position> {
        let position: Position =
            serde_json::from_value(self.state.clone()).map_err(|e| StoreError::InvalidRecord {
                symbol: self.symbol.clone(),
                reason: e.to_string(),
            })?;

        if position.symbol != self.symbol {
            return Err(StoreError::InvalidRecord {
                symbol: self.symbol.clone(),
                reason: format!("state belongs to {}", position.symbol),
            });
        }
        if position.is_terminal() {
            return Err(StoreError::InvalidRecord {
                symbol: self.symbol.clone(),
                reason: "position already closed".to_string(),
            });
        }

        Ok(position)
    }
}
