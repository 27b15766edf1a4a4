//! Managed-exit position monitor.
//!
//! Orchestrates the monitor's moving parts:
//! - webhook intake opening, reversing and closing positions
//! - a multiplexed price stream over exactly the tracked symbols
//! - per-symbol tick workers applying staged exits
//! - the trade store and in-memory registry kept in step

pub mod app;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod webhook;

pub use app::{Application, RestoreReport};
pub use config::AppConfig;
pub use dispatch::TickDispatcher;
pub use error::{AppError, AppResult};
pub use lifecycle::{
    LifecycleController, LifecycleError, LifecycleResult, OpenOutcome, OpenSignal, SkipReason,
};
pub use webhook::{create_router, parse_command, WebhookCommand, WebhookState};
