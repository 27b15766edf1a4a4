//! Tick dispatch.
//!
//! One consumption loop reads the stream's tick channel and hands each tick
//! to a per-symbol worker through a bounded queue. Workers apply their ticks
//! in arrival order, so a stop-crossing price queued behind a slow exchange
//! call is still seen. A symbol stuck on a slow call only fills its own
//! queue; once full, further ticks for it are dropped and counted.

use crate::lifecycle::LifecycleController;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use tranche_core::Price;
use tranche_position::PositionRegistry;
use tranche_telemetry::Metrics;
use tranche_ws::PriceTick;

/// Ticks a worker may have queued before new ones are dropped.
const WORKER_QUEUE_CAPACITY: usize = 64;

pub struct TickDispatcher {
    controller: Arc<LifecycleController>,
    registry: Arc<PositionRegistry>,
    workers: HashMap<String, mpsc::Sender<Price>>,
}

impl TickDispatcher {
    pub fn new(controller: Arc<LifecycleController>) -> Self {
        let registry = controller.registry().clone();
        Self {
            controller,
            registry,
            workers: HashMap::new(),
        }
    }

    /// Consume ticks until the channel closes or `shutdown` is cancelled.
    pub async fn run(mut self, mut tick_rx: mpsc::Receiver<PriceTick>, shutdown: CancellationToken) {
        info!("Tick dispatcher started");
        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => break,

                tick = tick_rx.recv() => match tick {
                    Some(tick) => self.dispatch(tick, &shutdown),
                    None => break,
                },
            }
        }
        info!(workers = self.workers.len(), "Tick dispatcher stopped");
    }

    fn dispatch(&mut self, tick: PriceTick, shutdown: &CancellationToken) {
        let PriceTick { symbol, price } = tick;

        if !self.registry.contains(&symbol) {
            trace!(symbol = %symbol, %price, "Tick for untracked symbol ignored");
            self.workers.remove(&symbol);
            Metrics::tick_ignored();
            return;
        }
        self.registry.record_price(&symbol, price);
        Metrics::tick_dispatched();

        let sent = self.workers.get(&symbol).map(|queue| queue.try_send(price));
        match sent {
            Some(Ok(())) => return,
            Some(Err(TrySendError::Full(price))) => {
                warn!(symbol = %symbol, %price, "Tick worker backlog full, tick dropped");
                Metrics::tick_dropped();
                return;
            }
            // Worker exited after its position closed; this is a new one.
            Some(Err(TrySendError::Closed(_))) => {
                self.workers.remove(&symbol);
            }
            None => {}
        }

        let (queue, rx) = mpsc::channel(WORKER_QUEUE_CAPACITY);
        if queue.try_send(price).is_err() {
            return;
        }
        debug!(symbol = %symbol, "Spawning tick worker");
        tokio::spawn(symbol_worker(
            symbol.clone(),
            rx,
            self.controller.clone(),
            shutdown.clone(),
        ));
        self.workers.insert(symbol, queue);
    }
}

/// Apply ticks for one symbol, strictly one at a time and in order.
async fn symbol_worker(
    symbol: String,
    mut queue: mpsc::Receiver<Price>,
    controller: Arc<LifecycleController>,
    shutdown: CancellationToken,
) {
    loop {
        let price = tokio::select! {
            biased;

            () = shutdown.cancelled() => break,

            price = queue.recv() => match price {
                Some(price) => price,
                None => break,
            },
        };

        if let Err(e) = controller.on_tick(&symbol, price).await {
            warn!(symbol = %symbol, %price, error = %e, "Tick apply failed, state kept for next tick");
        }

        if !controller.registry().contains(&symbol) {
            break;
        }
    }
    debug!(symbol = %symbol, "Tick worker exited");
}
