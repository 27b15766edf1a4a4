//! Controller wired to the recording mock exchange and the memory store.

use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tranche_bot::{LifecycleController, OpenSignal};
use tranche_core::{
    PartialStage, PositionSide, Price, Size, StagePlan, StopRule, SymbolPrecision, TargetSpec,
};
use tranche_exchange::{ExchangeCall, MockExchangeGateway, PrecisionCache};
use tranche_position::{PositionRegistry, ReversalPolicy};
use tranche_store::MemoryStore;
use tranche_ws::{RebuildHandle, StreamCommand};

pub const BTC: &str = "BTCUSDT";
pub const ETH: &str = "ETHUSDT";

pub fn px(v: &str) -> Price {
    v.parse().unwrap()
}

pub fn sz(v: &str) -> Size {
    v.parse().unwrap()
}

pub fn precision() -> SymbolPrecision {
    SymbolPrecision::new(Size::new(dec!(0.001)), Price::new(dec!(0.01)))
}

/// One partial target closing 30% and moving the stop to entry; no
/// checkpoints.
pub fn single_partial_plan() -> StagePlan {
    StagePlan {
        partials: vec![PartialStage {
            close_fraction: dec!(0.3),
            stop_rule: StopRule::Breakeven,
        }],
        checkpoints: Vec::new(),
    }
}

/// LONG, entry 100, stop 90, partial at 110, final target 130.
pub fn long_signal(symbol: &str) -> OpenSignal {
    OpenSignal {
        symbol: symbol.to_string(),
        side: PositionSide::Long,
        quantity: sz("1"),
        leverage: 10,
        entry_price: px("100"),
        stop_price: px("90"),
        final_target: px("130"),
        targets: vec![TargetSpec::at(px("110"))],
    }
}

/// SHORT, entry 100, stop 110, partial at 90, final target 70.
pub fn short_signal(symbol: &str) -> OpenSignal {
    OpenSignal {
        symbol: symbol.to_string(),
        side: PositionSide::Short,
        quantity: sz("2"),
        leverage: 5,
        entry_price: px("100"),
        stop_price: px("110"),
        final_target: px("70"),
        targets: vec![TargetSpec::at(px("90"))],
    }
}

pub struct Harness {
    pub exchange: Arc<MockExchangeGateway>,
    pub store: Arc<MemoryStore>,
    pub registry: Arc<PositionRegistry>,
    pub precisions: Arc<PrecisionCache>,
    pub controller: Arc<LifecycleController>,
    rebuild_rx: mpsc::Receiver<StreamCommand>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(
            single_partial_plan(),
            ReversalPolicy::default(),
            Duration::from_secs(5),
        )
    }

    pub fn with(plan: StagePlan, reversal: ReversalPolicy, call_timeout: Duration) -> Self {
        let exchange = Arc::new(MockExchangeGateway::new());
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(PositionRegistry::new());
        let precisions = Arc::new(PrecisionCache::new(exchange.clone()));
        let (rebuild, rebuild_rx) = RebuildHandle::channel(64);

        for symbol in [BTC, ETH] {
            exchange.set_precision(symbol, precision());
            precisions.insert(symbol, precision());
        }

        let controller = Arc::new(LifecycleController::new(
            registry.clone(),
            exchange.clone(),
            store.clone(),
            precisions.clone(),
            plan,
            reversal,
            rebuild,
            call_timeout,
        ));

        Self {
            exchange,
            store,
            registry,
            precisions,
            controller,
            rebuild_rx,
        }
    }

    /// Rebuild requests issued since the last call.
    pub fn rebuild_requests(&mut self) -> usize {
        let mut count = 0;
        while self.rebuild_rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    /// Operation names of recorded exchange calls, then clear them.
    pub fn take_ops(&self) -> Vec<&'static str> {
        let ops = self.exchange.calls().iter().map(ExchangeCall::op).collect();
        self.exchange.clear_calls();
        ops
    }

    /// Open a long position on `symbol` and forget the calls it made.
    pub async fn open_long(&mut self, symbol: &str) {
        self.controller
            .handle_signal(long_signal(symbol))
            .await
            .unwrap();
        self.exchange.clear_calls();
        self.rebuild_requests();
    }
}

/// Poll `check` until it holds, failing the test after five seconds.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}
