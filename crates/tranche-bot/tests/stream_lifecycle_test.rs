//! End-to-end: restored positions subscribe to the mock stream, mark
//! prices drive the lifecycle, and the subscription follows the registry.

mod integration;
use integration::common::fixtures::{
    eventually, long_signal, precision, px, single_partial_plan, sz, BTC, ETH,
};
use integration::common::mock_ws::MockWsServer;

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tranche_bot::{AppConfig, AppResult, Application};
use tranche_core::{OpenRequest, Position};
use tranche_exchange::{ExchangePosition, MockExchangeGateway};
use tranche_position::PositionRegistry;
use tranche_store::{MemoryStore, TradeRecord, TradeStore};

struct Running {
    exchange: Arc<MockExchangeGateway>,
    store: Arc<MemoryStore>,
    registry: Arc<PositionRegistry>,
    controller: Arc<tranche_bot::LifecycleController>,
    shutdown: CancellationToken,
    handle: JoinHandle<AppResult<()>>,
}

impl Running {
    async fn stop(self) {
        self.shutdown.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), self.handle)
            .await
            .expect("application did not stop")
            .unwrap();
        tokio_test::assert_ok!(result, "application failed");
    }
}

fn config(server: &MockWsServer) -> AppConfig {
    let mut config = AppConfig::default();
    config.server.bind = "127.0.0.1:0".parse().unwrap();
    config.stream.base_url = server.url();
    config.stream.rebuild_cooldown_ms = 20;
    config.stream.reconnect_delay_ms = 50;
    config.plan = single_partial_plan();
    config
}

/// Seed one tracked BTC long in the store and on the exchange, then run.
async fn start(server: &MockWsServer) -> Running {
    let exchange = Arc::new(MockExchangeGateway::new());
    let store = Arc::new(MemoryStore::new());
    for symbol in [BTC, ETH] {
        exchange.set_precision(symbol, precision());
    }

    let signal = long_signal(BTC);
    let request = OpenRequest {
        symbol: signal.symbol,
        side: signal.side,
        quantity: signal.quantity,
        leverage: signal.leverage,
        entry_price: signal.entry_price,
        stop_price: signal.stop_price,
        final_target: signal.final_target,
        targets: signal.targets,
    };
    let position = Position::open(request, &single_partial_plan(), 0).unwrap();
    store
        .upsert(TradeRecord::from_position(&position).unwrap())
        .await
        .unwrap();
    exchange.set_position(ExchangePosition {
        symbol: BTC.to_string(),
        side: position.side,
        quantity: position.quantity,
        entry_price: position.entry_price,
    });

    let app = Application::with_components(config(server), exchange.clone(), store.clone());
    let registry = app.registry().clone();
    let controller = app.controller().clone();
    let shutdown = app.shutdown_token();
    let handle = tokio::spawn(app.run());

    Running {
        exchange,
        store,
        registry,
        controller,
        shutdown,
        handle,
    }
}

#[tokio::test]
async fn test_restored_position_follows_mark_price_to_close() {
    let server = MockWsServer::start().await;
    let app = start(&server).await;

    eventually("stream connected", || server.live_count() == 1).await;
    let paths = server.paths().await;
    assert!(paths[0].contains("btcusdt@markPrice@1s"), "{paths:?}");
    assert!(app.registry.contains(BTC));

    server.push_price(BTC, "110");
    eventually("partial close persisted", || {
        app.store
            .row(BTC)
            .is_some_and(|row| row.qty == sz("0.7") && row.sl == px("100"))
    })
    .await;
    assert_eq!(app.registry.get(BTC).unwrap().stop_price, px("100"));
    assert_eq!(app.exchange.position(BTC).unwrap().quantity, sz("0.7"));

    server.push_price(BTC, "130");
    eventually("final target close", || app.registry.is_empty()).await;
    assert!(app.store.is_empty());
    assert!(app.exchange.position(BTC).is_none());

    // Nothing left to watch, so the stream goes idle.
    eventually("stream released", || server.live_count() == 0).await;

    app.stop().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_stream_reconnects_after_remote_close() {
    let server = MockWsServer::start().await;
    let app = start(&server).await;

    eventually("stream connected", || server.live_count() == 1).await;
    server.drop_connections();
    eventually("stream reconnected", || {
        server.connection_count() == 2 && server.live_count() == 1
    })
    .await;

    server.push_price(BTC, "110");
    eventually("ticks flow after reconnect", || {
        app.registry
            .get(BTC)
            .is_some_and(|p| p.partial_targets[0].hit)
    })
    .await;

    app.stop().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_new_position_rebuilds_subscription() {
    let server = MockWsServer::start().await;
    let app = start(&server).await;

    eventually("stream connected", || server.live_count() == 1).await;
    app.controller.handle_signal(long_signal(ETH)).await.unwrap();

    eventually("rebuilt with both symbols", || server.connection_count() >= 2).await;
    eventually("old socket closed", || server.live_count() == 1).await;
    let paths = server.paths().await;
    let last = paths.last().unwrap();
    assert!(last.contains("btcusdt@markPrice@1s"), "{last}");
    assert!(last.contains("ethusdt@markPrice@1s"), "{last}");

    server.push_price(ETH, "110");
    eventually("ETH partial", || {
        app.registry
            .get(ETH)
            .is_some_and(|p| p.partial_targets[0].hit)
    })
    .await;
    assert!(!app.registry.get(BTC).unwrap().partial_targets[0].hit);

    app.stop().await;
    server.shutdown().await;
}
