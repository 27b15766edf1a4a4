//! Stream connection state machine.
//!
//! Pure and clock-free: the async driver feeds it events and performs the
//! returned actions. Each connection attempt carries a generation number;
//! events from a superseded generation are ignored.

use crate::message::combined_stream_url;
use std::collections::BTreeSet;
use std::time::Duration;

/// Externally observable stream state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Connected,
}

impl StreamState {
    /// Gauge value used by the metrics layer.
    pub fn as_gauge(&self) -> i64 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
        }
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    /// Transport or protocol error.
    Error,
    /// Server closed the socket or the stream ended.
    RemoteClose,
    /// A rebuild or shutdown cancelled the connection on purpose.
    Superseded,
}

/// What the driver must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamAction {
    /// Nothing to do.
    None,
    /// Key set is empty: hold no connection.
    Idle,
    /// Open a connection for this generation.
    Connect { generation: u64, url: String },
    /// Arm the (single) reconnect timer.
    ScheduleReconnect { delay: Duration },
}

#[derive(Debug)]
pub struct StreamStateMachine {
    base_url: String,
    topic: String,
    reconnect_delay: Duration,
    state: StreamState,
    generation: u64,
    reconnect_pending: bool,
    symbols: BTreeSet<String>,
}

impl StreamStateMachine {
    pub fn new(base_url: impl Into<String>, topic: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            topic: topic.into(),
            reconnect_delay,
            state: StreamState::Disconnected,
            generation: 0,
            reconnect_pending: false,
            symbols: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Symbols covered by the current (or last attempted) connection.
    pub fn symbols(&self) -> &BTreeSet<String> {
        &self.symbols
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    /// Tear down whatever exists and subscribe to exactly `symbols`.
    ///
    /// Always bumps the generation so the previous connection's events
    /// become stale, and clears any outstanding reconnect timer.
    pub fn on_rebuild(&mut self, symbols: BTreeSet<String>) -> StreamAction {
        self.generation += 1;
        self.reconnect_pending = false;
        self.symbols = symbols;

        if self.symbols.is_empty() {
            self.state = StreamState::Disconnected;
            return StreamAction::Idle;
        }

        self.state = StreamState::Connecting;
        StreamAction::Connect {
            generation: self.generation,
            url: combined_stream_url(&self.base_url, &self.symbols, &self.topic),
        }
    }

    /// Handshake completed. The subscription is encoded in the URL, so a
    /// completed handshake is the subscription acknowledgment.
    ///
    /// Returns `true` if the state changed.
    pub fn on_connected(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.state != StreamState::Connecting {
            return false;
        }
        self.state = StreamState::Connected;
        true
    }

    pub fn on_disconnected(&mut self, generation: u64, cause: DisconnectCause) -> StreamAction {
        if generation != self.generation {
            return StreamAction::None;
        }

        self.state = StreamState::Disconnected;

        match cause {
            DisconnectCause::Superseded => StreamAction::None,
            DisconnectCause::Error | DisconnectCause::RemoteClose => {
                if self.reconnect_pending {
                    StreamAction::None
                } else {
                    self.reconnect_pending = true;
                    StreamAction::ScheduleReconnect {
                        delay: self.reconnect_delay,
                    }
                }
            }
        }
    }

    /// The reconnect timer fired. Returns `true` if a rebuild should run;
    /// `false` when the timer was already cleared by an earlier rebuild.
    pub fn on_reconnect_timer(&mut self) -> bool {
        std::mem::replace(&mut self.reconnect_pending, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> StreamStateMachine {
        StreamStateMachine::new(
            "wss://fstream.binance.com/stream",
            "markPrice@1s",
            Duration::from_secs(5),
        )
    }

    fn keys(symbols: &[&str]) -> BTreeSet<String> {
        symbols.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_key_set_stays_idle() {
        let mut m = machine();
        assert_eq!(m.on_rebuild(BTreeSet::new()), StreamAction::Idle);
        assert_eq!(m.state(), StreamState::Disconnected);
    }

    #[test]
    fn test_rebuild_connects_then_ack_marks_connected() {
        let mut m = machine();
        let action = m.on_rebuild(keys(&["BTCUSDT", "ETHUSDT"]));
        let StreamAction::Connect { generation, url } = action else {
            panic!("expected connect, got {action:?}");
        };
        assert_eq!(generation, 1);
        assert!(url.ends_with("?streams=btcusdt@markPrice@1s/ethusdt@markPrice@1s"));
        assert_eq!(m.state(), StreamState::Connecting);

        assert!(m.on_connected(1));
        assert_eq!(m.state(), StreamState::Connected);
        assert!(!m.on_connected(1));
    }

    #[test]
    fn test_stale_generation_events_are_ignored() {
        let mut m = machine();
        m.on_rebuild(keys(&["BTCUSDT"]));
        m.on_rebuild(keys(&["BTCUSDT", "SOLUSDT"]));
        assert_eq!(m.generation(), 2);

        assert!(!m.on_connected(1));
        assert_eq!(
            m.on_disconnected(1, DisconnectCause::Error),
            StreamAction::None
        );
        assert_eq!(m.state(), StreamState::Connecting);
        assert!(!m.reconnect_pending());
    }

    #[test]
    fn test_only_one_reconnect_timer_outstanding() {
        let mut m = machine();
        m.on_rebuild(keys(&["BTCUSDT"]));
        m.on_connected(1);

        assert_eq!(
            m.on_disconnected(1, DisconnectCause::RemoteClose),
            StreamAction::ScheduleReconnect {
                delay: Duration::from_secs(5)
            }
        );
        assert_eq!(
            m.on_disconnected(1, DisconnectCause::Error),
            StreamAction::None
        );
        assert!(m.on_reconnect_timer());
        assert!(!m.on_reconnect_timer());
    }

    #[test]
    fn test_rebuild_clears_pending_reconnect() {
        let mut m = machine();
        m.on_rebuild(keys(&["BTCUSDT"]));
        m.on_disconnected(1, DisconnectCause::Error);
        assert!(m.reconnect_pending());

        m.on_rebuild(keys(&["BTCUSDT"]));
        assert!(!m.reconnect_pending());
        assert!(!m.on_reconnect_timer());
    }

    #[test]
    fn test_superseded_close_does_not_reconnect() {
        let mut m = machine();
        m.on_rebuild(keys(&["BTCUSDT"]));
        m.on_connected(1);
        assert_eq!(
            m.on_disconnected(1, DisconnectCause::Superseded),
            StreamAction::None
        );
        assert_eq!(m.state(), StreamState::Disconnected);
        assert!(!m.reconnect_pending());
    }

    #[test]
    fn test_rebuild_to_empty_after_connect_goes_idle() {
        let mut m = machine();
        m.on_rebuild(keys(&["BTCUSDT"]));
        m.on_connected(1);
        assert_eq!(m.on_rebuild(BTreeSet::new()), StreamAction::Idle);
        assert_eq!(m.state(), StreamState::Disconnected);
        assert!(m.symbols().is_empty());
    }
}
