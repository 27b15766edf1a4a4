//! Order and position direction types.
//!
//! `PositionSide` is the direction of an open exposure; `OrderSide` is the
//! direction of a single order. Every directional comparison the monitor
//! makes (target crossed, stop crossed, stop tightened) lives on
//! `PositionSide` so the LONG/SHORT mirror is written exactly once.

use crate::decimal::Price;
use crate::error::CoreError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Exchange wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Order side that opens (or adds to) this position.
    pub fn entry_order_side(&self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces this position.
    pub fn exit_order_side(&self) -> OrderSide {
        self.entry_order_side().opposite()
    }

    pub fn opposite(&self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// Price has reached `level` in the profitable direction.
    #[inline]
    pub fn is_favorable(&self, price: Price, level: Price) -> bool {
        match self {
            Self::Long => price >= level,
            Self::Short => price <= level,
        }
    }

    /// Price has reached `stop` in the losing direction.
    #[inline]
    pub fn is_stopped(&self, price: Price, stop: Price) -> bool {
        match self {
            Self::Long => price <= stop,
            Self::Short => price >= stop,
        }
    }

    /// The less risky of two stop prices.
    #[inline]
    pub fn tighter(&self, a: Price, b: Price) -> Price {
        match self {
            Self::Long => a.max(b),
            Self::Short => a.min(b),
        }
    }

    /// `candidate` would reduce risk compared to `current`.
    #[inline]
    pub fn tightens(&self, current: Price, candidate: Price) -> bool {
        match self {
            Self::Long => candidate > current,
            Self::Short => candidate < current,
        }
    }

    /// How far price has moved against a position opened at `entry`.
    /// Negative when the position is in profit.
    #[inline]
    pub fn adverse_move(&self, entry: Price, price: Price) -> Decimal {
        match self {
            Self::Long => entry.inner() - price.inner(),
            Self::Short => price.inner() - entry.inner(),
        }
    }

    /// Offset `distance` from `from` in the profitable direction.
    #[inline]
    pub fn toward_profit(&self, from: Price, distance: Decimal) -> Price {
        match self {
            Self::Long => from + distance,
            Self::Short => from - distance,
        }
    }

    /// Offset `distance` from `from` in the losing direction.
    #[inline]
    pub fn toward_loss(&self, from: Price, distance: Decimal) -> Price {
        match self {
            Self::Long => from - distance,
            Self::Short => from + distance,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => f.write_str("LONG"),
            Self::Short => f.write_str("SHORT"),
        }
    }
}

impl FromStr for PositionSide {
    type Err = CoreError;

    /// Accepts position (`LONG`/`SHORT`) and order (`BUY`/`SELL`) spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LONG" | "BUY" => Ok(Self::Long),
            "SHORT" | "SELL" => Ok(Self::Short),
            other => Err(CoreError::InvalidSide(other.to_string())),
        }
    }
}

/// Client order ID attached to every submitted order.
///
/// Lets an operator correlate exchange order history with log lines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    /// Create a new unique client order ID.
    ///
    /// Format: `trn_{timestamp_ms}_{uuid_short}` (fits the 36 char exchange limit).
    pub fn new() -> Self {
        let ts = chrono::Utc::now().timestamp_millis();
        let uuid_short = &Uuid::new_v4().simple().to_string()[..8];
        Self(format!("trn_{ts}_{uuid_short}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientOrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
