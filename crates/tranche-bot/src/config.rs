//! Application configuration.
//!
//! Loaded from TOML. Every field has a default so a partial file (or none at
//! all in tests) yields a runnable config. Secrets never live here: exchange
//! credentials and the store key come from the environment.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tranche_core::StagePlan;
use tranche_exchange::BinanceConfig;
use tranche_position::ReversalPolicy;
use tranche_store::PostgrestConfig;
use tranche_ws::StreamConfig;

/// Webhook HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Exchange REST settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSection {
    #[serde(default = "default_rest_url")]
    pub base_url: String,
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
    /// HTTP client timeout (ms).
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_rest_url() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_recv_window_ms() -> u64 {
    5000
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

impl Default for ExchangeSection {
    fn default() -> Self {
        Self {
            base_url: default_rest_url(),
            recv_window_ms: default_recv_window_ms(),
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

impl From<&ExchangeSection> for BinanceConfig {
    fn from(cfg: &ExchangeSection) -> Self {
        Self {
            base_url: cfg.base_url.clone(),
            recv_window_ms: cfg.recv_window_ms,
            timeout_ms: cfg.timeout_ms,
        }
    }
}

/// Price stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSection {
    #[serde(default = "default_stream_url")]
    pub base_url: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_rebuild_cooldown_ms")]
    pub rebuild_cooldown_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Capacity of the tick channel between the socket and the dispatcher.
    #[serde(default = "default_tick_buffer")]
    pub tick_buffer: usize,
}

fn default_stream_url() -> String {
    "wss://fstream.binance.com/stream".to_string()
}

fn default_topic() -> String {
    "markPrice@1s".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_rebuild_cooldown_ms() -> u64 {
    500
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_tick_buffer() -> usize {
    1024
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            base_url: default_stream_url(),
            topic: default_topic(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            rebuild_cooldown_ms: default_rebuild_cooldown_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            tick_buffer: default_tick_buffer(),
        }
    }
}

impl From<&StreamSection> for StreamConfig {
    fn from(cfg: &StreamSection) -> Self {
        Self {
            base_url: cfg.base_url.clone(),
            topic: cfg.topic.clone(),
            reconnect_delay_ms: cfg.reconnect_delay_ms,
            rebuild_cooldown_ms: cfg.rebuild_cooldown_ms,
            connect_timeout_ms: cfg.connect_timeout_ms,
        }
    }
}

/// Trade store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Supabase / PostgREST table.
    #[default]
    Postgrest,
    /// Local JSON file.
    File,
    /// Process memory; nothing survives a restart.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_table")]
    pub table: String,
    /// Table file for the `file` backend.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_table() -> String {
    "orders".to_string()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/trades.json")
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            table: default_table(),
            path: default_store_path(),
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

impl From<&StoreSection> for PostgrestConfig {
    fn from(cfg: &StoreSection) -> Self {
        Self {
            table: cfg.table.clone(),
            timeout_ms: cfg.timeout_ms,
        }
    }
}

/// Lifecycle controller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleSection {
    /// Upper bound on any single exchange or store call (ms).
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_call_timeout_ms() -> u64 {
    15_000
}

impl Default for LifecycleSection {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl LifecycleSection {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub exchange: ExchangeSection,
    #[serde(default)]
    pub stream: StreamSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub lifecycle: LifecycleSection,
    /// Exit schedule applied to every opened position.
    #[serde(default)]
    pub plan: StagePlan,
    #[serde(default)]
    pub reversal: ReversalPolicy,
}

impl AppConfig {
    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config {path}: {e}")))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the monitor misbehave at runtime.
    pub fn validate(&self) -> AppResult<()> {
        if self.lifecycle.call_timeout_ms == 0 {
            return Err(AppError::Config(
                "lifecycle.call_timeout_ms must be positive".to_string(),
            ));
        }
        if self.stream.tick_buffer == 0 {
            return Err(AppError::Config(
                "stream.tick_buffer must be positive".to_string(),
            ));
        }
        for (i, stage) in self.plan.partials.iter().enumerate() {
            if stage.close_fraction <= rust_decimal::Decimal::ZERO
                || stage.close_fraction >= rust_decimal::Decimal::ONE
            {
                return Err(AppError::Config(format!(
                    "plan.partials[{i}].close_fraction must be in (0, 1)"
                )));
            }
        }
        for (i, stage) in self.plan.checkpoints.iter().enumerate() {
            if stage.trigger_r <= rust_decimal::Decimal::ZERO {
                return Err(AppError::Config(format!(
                    "plan.checkpoints[{i}].trigger_r must be positive"
                )));
            }
        }
        if self.reversal.adverse_fraction < rust_decimal::Decimal::ZERO {
            return Err(AppError::Config(
                "reversal.adverse_fraction must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tranche_core::StopRule;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.bind.port(), 3000);
        assert_eq!(config.store.backend, StoreBackend::Postgrest);
        assert_eq!(config.stream.rebuild_cooldown_ms, 500);
        assert_eq!(config.stream.reconnect_delay_ms, 5000);
        assert_eq!(config.stream.connect_timeout_ms, 10_000);
        assert_eq!(config.reversal.adverse_fraction, dec!(0.2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.exchange.base_url, "https://fapi.binance.com");
        assert_eq!(config.plan, StagePlan::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = AppConfig::from_toml(
            r#"
            [server]
            bind = "127.0.0.1:8080"

            [store]
            backend = "file"
            path = "/tmp/trades.json"

            [reversal]
            adverse_fraction = "0.3"
            allow_after_stop_move = false

            [[plan.partials]]
            close_fraction = "0.4"
            stop_rule = "breakeven"

            [[plan.partials]]
            close_fraction = "0.3"
            stop_rule = { fraction_of_risk = "0.25" }
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind.port(), 8080);
        assert_eq!(config.store.backend, StoreBackend::File);
        assert_eq!(config.store.path, PathBuf::from("/tmp/trades.json"));
        assert_eq!(config.store.table, "orders");
        assert_eq!(config.reversal.adverse_fraction, dec!(0.3));
        assert!(!config.reversal.allow_after_stop_move);
        assert_eq!(config.plan.partials.len(), 2);
        assert_eq!(
            config.plan.partials[1].stop_rule,
            StopRule::FractionOfRisk(dec!(0.25))
        );
        assert!(config.plan.checkpoints.is_empty());
    }

    #[test]
    fn test_rejects_invalid_fraction() {
        let err = AppConfig::from_toml(
            r#"
            [[plan.partials]]
            close_fraction = "1.5"
            stop_rule = "keep"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_section_conversions() {
        let config = AppConfig::default();
        let stream: StreamConfig = (&config.stream).into();
        assert_eq!(stream.topic, "markPrice@1s");
        let exchange: BinanceConfig = (&config.exchange).into();
        assert_eq!(exchange.recv_window_ms, 5000);
        let store: PostgrestConfig = (&config.store).into();
        assert_eq!(store.table, "orders");
    }

    #[test]
    fn test_shipped_config_parses() {
        let config = AppConfig::from_toml(include_str!("../../../config/default.toml")).unwrap();
        assert_eq!(config.plan.partials.len(), 2);
        assert_eq!(config.plan.partials[1].stop_rule, StopRule::PreviousTarget);
        assert_eq!(
            config.plan.checkpoints[0].stop_rule,
            StopRule::FractionOfRisk(dec!(0.5))
        );
        assert_eq!(config.lifecycle.call_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[server]"));
        assert!(toml_str.contains("backend"));
    }
}
