//! Integration tests for tranche-bot.
//!
//! These tests drive the components together:
//! - price stream subscription, rebuild and reconnect
//! - tick-driven staged exits through the lifecycle controller
//! - webhook intake through the axum router

pub mod common;
