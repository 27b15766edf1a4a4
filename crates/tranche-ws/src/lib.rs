//! Multiplexed price stream for the tranche position monitor.
//!
//! One WebSocket connection carries the price feed for every open symbol.
//! The connection is rebuilt whenever the open-symbol set changes and is
//! re-established after a fixed delay when it drops.

pub mod connection;
pub mod error;
pub mod message;
pub mod state;

pub use connection::{PriceStreamManager, RebuildHandle, StreamCommand, StreamConfig, SymbolSource};
pub use error::{WsError, WsResult};
pub use message::{combined_stream_url, parse_tick, PriceTick};
pub use state::{DisconnectCause, StreamAction, StreamState, StreamStateMachine};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
