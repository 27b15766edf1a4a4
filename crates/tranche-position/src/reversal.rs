//! Reversal policy for opposite-direction signals.
//!
//! An opposite signal replaces an open position only when the position is
//! already going wrong (adverse move of at least `adverse_fraction` of the
//! initial risk) or has already had its stop moved toward safety.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tranche_core::{Position, PositionSide, Price};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReversalReason {
    AdverseMove,
    StopAlreadyMoved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDecision {
    /// Same direction as the open position: drop the signal.
    SameDirection,
    /// Close the existing position and open the new one.
    Reverse { reason: ReversalReason },
    /// Opposite direction but the gate is closed: drop the signal.
    Hold,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReversalPolicy {
    /// Adverse move, as a fraction of the initial stop distance, that
    /// unlocks a reversal.
    #[serde(default = "default_adverse_fraction")]
    pub adverse_fraction: Decimal,
    /// Allow reversal once the stop has been moved at least once.
    #[serde(default = "default_allow_after_stop_move")]
    pub allow_after_stop_move: bool,
}

fn default_adverse_fraction() -> Decimal {
    Decimal::new(2, 1)
}

fn default_allow_after_stop_move() -> bool {
    true
}

impl Default for ReversalPolicy {
    fn default() -> Self {
        Self {
            adverse_fraction: default_adverse_fraction(),
            allow_after_stop_move: default_allow_after_stop_move(),
        }
    }
}

impl ReversalPolicy {
    /// Decide what to do with a signal for `incoming` while `existing` is open.
    ///
    /// `reference` is the latest known price for the symbol.
    pub fn decide(&self, existing: &Position, incoming: PositionSide, reference: Price) -> SignalDecision {
        if incoming == existing.side {
            return SignalDecision::SameDirection;
        }

        let adverse = existing.side.adverse_move(existing.entry_price, reference);
        let threshold = existing.risk_distance() * self.adverse_fraction;
        if adverse > Decimal::ZERO && adverse >= threshold {
            return SignalDecision::Reverse {
                reason: ReversalReason::AdverseMove,
            };
        }

        if self.allow_after_stop_move && existing.stop_moved() {
            return SignalDecision::Reverse {
                reason: ReversalReason::StopAlreadyMoved,
            };
        }

        SignalDecision::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tranche_core::{OpenRequest, Size, StagePlan};

    fn px(v: Decimal) -> Price {
        Price::new(v)
    }

    /// LONG @100, stop 90 (risk 10).
    fn long() -> Position {
        Position::open(
            OpenRequest {
                symbol: "BTCUSDT".to_string(),
                side: PositionSide::Long,
                quantity: Size::new(dec!(1)),
                leverage: 10,
                entry_price: px(dec!(100)),
                stop_price: px(dec!(90)),
                final_target: px(dec!(130)),
                targets: vec![],
            },
            &StagePlan::default(),
            1,
        )
        .unwrap()
    }

    #[test]
    fn test_same_direction_is_dropped() {
        let policy = ReversalPolicy::default();
        assert_eq!(
            policy.decide(&long(), PositionSide::Long, px(dec!(50))),
            SignalDecision::SameDirection
        );
    }

    #[test]
    fn test_adverse_move_threshold() {
        let policy = ReversalPolicy::default();
        // 20% of 10 = 2.
        assert_eq!(
            policy.decide(&long(), PositionSide::Short, px(dec!(98.5))),
            SignalDecision::Hold
        );
        assert_eq!(
            policy.decide(&long(), PositionSide::Short, px(dec!(98))),
            SignalDecision::Reverse {
                reason: ReversalReason::AdverseMove
            }
        );
    }

    #[test]
    fn test_profit_without_stop_move_holds() {
        let policy = ReversalPolicy::default();
        assert_eq!(
            policy.decide(&long(), PositionSide::Short, px(dec!(104))),
            SignalDecision::Hold
        );
    }

    #[test]
    fn test_stop_moved_unlocks_reversal() {
        let mut position = long();
        position.tighten_stop(px(dec!(95)));

        let policy = ReversalPolicy::default();
        assert_eq!(
            policy.decide(&position, PositionSide::Short, px(dec!(104))),
            SignalDecision::Reverse {
                reason: ReversalReason::StopAlreadyMoved
            }
        );

        let strict = ReversalPolicy {
            allow_after_stop_move: false,
            ..ReversalPolicy::default()
        };
        assert_eq!(
            strict.decide(&position, PositionSide::Short, px(dec!(104))),
            SignalDecision::Hold
        );
    }

    #[test]
    fn test_policy_from_toml() {
        let policy: ReversalPolicy = toml::from_str("adverse_fraction = \"0.5\"").unwrap();
        assert_eq!(policy.adverse_fraction, dec!(0.5));
        assert!(policy.allow_after_stop_move);
    }
}
