//! Position state for the tranche monitor.
//!
//! - [`PositionRegistry`]: open positions by symbol and the per-symbol mutation lock
//! - [`evaluate`] / [`apply`]: pure stage evaluation and state application
//! - [`ReversalPolicy`]: gate for opposite-direction signals

pub mod evaluator;
pub mod registry;
pub mod reversal;

pub use evaluator::{apply, evaluate, CloseReason, Transition};
pub use registry::PositionRegistry;
pub use reversal::{ReversalPolicy, ReversalReason, SignalDecision};
