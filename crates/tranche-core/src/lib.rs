//! Core domain types for the tranche position monitor.
//!
//! This crate provides the fundamental types shared by every component:
//! - `Price`, `Size`: precision-safe numeric types
//! - `PositionSide`, `OrderSide`: direction enums with the LONG/SHORT mirror logic
//! - `Position`: tracked state of one open position and its staged exit plan
//! - `SymbolPrecision`: exchange step/tick for an instrument

pub mod decimal;
pub mod error;
pub mod order;
pub mod position;
pub mod precision;

pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use order::{ClientOrderId, OrderSide, PositionSide};
pub use position::{
    CheckpointStage, OpenRequest, PartialStage, PartialTarget, Position, StagePlan,
    StopCheckpoint, StopRule, TargetSpec,
};
pub use precision::SymbolPrecision;

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
