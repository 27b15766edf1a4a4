//! Stage evaluator.
//!
//! Pure function of (price, position): decides which transitions a tick
//! triggers. Terminal transitions are exclusive. Otherwise every crossed
//! partial target fires in index order, followed by every crossed stop
//! checkpoint, each computed against the state left by the previous one.

use std::fmt;
use tranche_core::{Position, Price, Size, SymbolPrecision};

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    StopHit,
    FinalTarget,
    /// Replaced by an opposite-direction signal.
    Reversal,
    /// Explicit close command.
    Manual,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StopHit => write!(f, "stop_hit"),
            Self::FinalTarget => write!(f, "final_target"),
            Self::Reversal => write!(f, "reversal"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Price reached the current stop.
    StopHit { price: Price, stop: Price },
    /// Price reached the final target.
    FinalTargetHit { price: Price, target: Price },
    /// Partial target `index` crossed: close `close_quantity`, then move the
    /// stop to `new_stop` when set.
    PartialTarget {
        index: usize,
        close_quantity: Size,
        new_stop: Option<Price>,
    },
    /// Stop checkpoint `index` crossed. `new_stop` is `None` when the
    /// checkpoint would not tighten the stop; the hit still latches.
    StopMove { index: usize, new_stop: Option<Price> },
}

impl Transition {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::StopHit { .. } | Self::FinalTargetHit { .. })
    }

    /// Close reason for terminal transitions.
    pub fn close_reason(&self) -> Option<CloseReason> {
        match self {
            Self::StopHit { .. } => Some(CloseReason::StopHit),
            Self::FinalTargetHit { .. } => Some(CloseReason::FinalTarget),
            _ => None,
        }
    }

    /// Metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StopHit { .. } => "stop_hit",
            Self::FinalTargetHit { .. } => "final_target",
            Self::PartialTarget { .. } => "partial_target",
            Self::StopMove { .. } => "stop_move",
        }
    }
}

/// Decide what `price` triggers for `position`.
pub fn evaluate(price: Price, position: &Position, precision: &SymbolPrecision) -> Vec<Transition> {
    if position.is_terminal() {
        return Vec::new();
    }

    let side = position.side;

    if side.is_stopped(price, position.stop_price) {
        return vec![Transition::StopHit {
            price,
            stop: position.stop_price,
        }];
    }
    if side.is_favorable(price, position.final_target) {
        return vec![Transition::FinalTargetHit {
            price,
            target: position.final_target,
        }];
    }

    let mut transitions = Vec::new();
    let mut stop = position.stop_price;
    let mut remaining = position.quantity;
    // Keep one step open; only a terminal close takes the quantity to zero.
    let keep = precision.quantity_step;

    for (index, target) in position.partial_targets.iter().enumerate() {
        if target.hit || !side.is_favorable(price, target.price) {
            continue;
        }

        let wanted = precision.floor_quantity(position.original_quantity * target.close_fraction);
        let close_quantity = wanted.min(remaining.saturating_sub(keep));
        remaining = remaining.saturating_sub(close_quantity);

        let new_stop = tightened(target.stop_to, stop, position, precision);
        if let Some(s) = new_stop {
            stop = s;
        }

        transitions.push(Transition::PartialTarget {
            index,
            close_quantity,
            new_stop,
        });
    }

    for (index, checkpoint) in position.checkpoints.iter().enumerate() {
        if checkpoint.hit || !side.is_favorable(price, checkpoint.trigger_price) {
            continue;
        }

        let new_stop = tightened(checkpoint.stop_to, stop, position, precision);
        if let Some(s) = new_stop {
            stop = s;
        }

        transitions.push(Transition::StopMove { index, new_stop });
    }

    transitions
}

/// Tick-floored `candidate` if it tightens `current`.
fn tightened(
    candidate: Option<Price>,
    current: Price,
    position: &Position,
    precision: &SymbolPrecision,
) -> Option<Price> {
    let floored = precision.floor_price(candidate?);
    position.side.tightens(current, floored).then_some(floored)
}

/// Apply a transition to the position's tracked state.
///
/// Called after the transition's exchange effects succeeded.
pub fn apply(position: &mut Position, transition: &Transition, now_ms: u64) {
    match transition {
        Transition::StopHit { .. } => {
            position.stop_hit = true;
            position.quantity = Size::ZERO;
        }
        Transition::FinalTargetHit { .. } => {
            position.target_hit = true;
            position.quantity = Size::ZERO;
        }
        Transition::PartialTarget {
            index,
            close_quantity,
            new_stop,
        } => position.mark_partial_hit(*index, *close_quantity, *new_stop),
        Transition::StopMove { index, new_stop } => {
            position.mark_checkpoint_hit(*index, *new_stop)
        }
    }
    position.touch(now_ms);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tranche_core::{OpenRequest, PositionSide, StagePlan, TargetSpec};

    fn px(v: Decimal) -> Price {
        Price::new(v)
    }

    fn precision() -> SymbolPrecision {
        SymbolPrecision::new(Size::new(dec!(0.001)), px(dec!(0.01)))
    }

    /// LONG 1.0 @100, stop 90, TP1 110, TP2 120, final 130.
    fn long_position() -> Position {
        Position::open(
            OpenRequest {
                symbol: "BTCUSDT".to_string(),
                side: PositionSide::Long,
                quantity: Size::new(dec!(1)),
                leverage: 10,
                entry_price: px(dec!(100)),
                stop_price: px(dec!(90)),
                final_target: px(dec!(130)),
                targets: vec![TargetSpec::at(px(dec!(110))), TargetSpec::at(px(dec!(120)))],
            },
            &StagePlan::default(),
            1,
        )
        .unwrap()
    }

    fn short_position() -> Position {
        Position::open(
            OpenRequest {
                symbol: "ETHUSDT".to_string(),
                side: PositionSide::Short,
                quantity: Size::new(dec!(2)),
                leverage: 10,
                entry_price: px(dec!(100)),
                stop_price: px(dec!(110)),
                final_target: px(dec!(70)),
                targets: vec![TargetSpec::at(px(dec!(90))), TargetSpec::at(px(dec!(80)))],
            },
            &StagePlan::default(),
            1,
        )
        .unwrap()
    }

    #[test]
    fn test_quiet_tick_does_nothing() {
        assert!(evaluate(px(dec!(101)), &long_position(), &precision()).is_empty());
    }

    #[test]
    fn test_stop_hit_is_exclusive() {
        let t = evaluate(px(dec!(89.5)), &long_position(), &precision());
        assert_eq!(
            t,
            vec![Transition::StopHit {
                price: px(dec!(89.5)),
                stop: px(dec!(90))
            }]
        );
        assert!(t[0].is_terminal());
        assert_eq!(t[0].close_reason(), Some(CloseReason::StopHit));
    }

    #[test]
    fn test_final_target_is_exclusive() {
        let t = evaluate(px(dec!(131)), &long_position(), &precision());
        assert_eq!(t.len(), 1);
        assert!(matches!(t[0], Transition::FinalTargetHit { .. }));
    }

    #[test]
    fn test_checkpoint_moves_stop_to_half_risk() {
        let t = evaluate(px(dec!(105)), &long_position(), &precision());
        assert_eq!(
            t,
            vec![Transition::StopMove {
                index: 0,
                new_stop: Some(px(dec!(95)))
            }]
        );
    }

    #[test]
    fn test_first_target_closes_half_and_moves_to_breakeven() {
        let t = evaluate(px(dec!(110)), &long_position(), &precision());
        assert_eq!(
            t[0],
            Transition::PartialTarget {
                index: 0,
                close_quantity: Size::new(dec!(0.5)),
                new_stop: Some(px(dec!(100)))
            }
        );
        // The half-risk checkpoint is crossed too but no longer tightens.
        assert_eq!(
            t[1],
            Transition::StopMove {
                index: 0,
                new_stop: None
            }
        );
    }

    #[test]
    fn test_gap_crosses_both_targets_in_order() {
        let t = evaluate(px(dec!(125)), &long_position(), &precision());
        assert_eq!(t.len(), 3);
        assert_eq!(
            t[0],
            Transition::PartialTarget {
                index: 0,
                close_quantity: Size::new(dec!(0.5)),
                new_stop: Some(px(dec!(100)))
            }
        );
        assert_eq!(
            t[1],
            Transition::PartialTarget {
                index: 1,
                close_quantity: Size::new(dec!(0.25)),
                new_stop: Some(px(dec!(110)))
            }
        );

        let mut position = long_position();
        for transition in &t {
            apply(&mut position, transition, 2);
        }
        assert_eq!(position.quantity, Size::new(dec!(0.25)));
        assert_eq!(position.stop_price, px(dec!(110)));
        assert_eq!(position.stage(), 2);
        assert_eq!(position.updated_at_ms, 2);
    }

    #[test]
    fn test_hit_targets_do_not_refire() {
        let mut position = long_position();
        for transition in evaluate(px(dec!(110)), &position, &precision()) {
            apply(&mut position, &transition, 2);
        }
        assert!(evaluate(px(dec!(111)), &position, &precision()).is_empty());

        // Stop now at breakeven.
        let t = evaluate(px(dec!(100)), &position, &precision());
        assert!(matches!(t[..], [Transition::StopHit { .. }]));
    }

    #[test]
    fn test_short_mirrors_long() {
        let position = short_position();
        let t = evaluate(px(dec!(95)), &position, &precision());
        assert_eq!(
            t,
            vec![Transition::StopMove {
                index: 0,
                new_stop: Some(px(dec!(105)))
            }]
        );

        let t = evaluate(px(dec!(90)), &position, &precision());
        assert_eq!(
            t[0],
            Transition::PartialTarget {
                index: 0,
                close_quantity: Size::new(dec!(1)),
                new_stop: Some(px(dec!(100)))
            }
        );

        assert!(matches!(
            evaluate(px(dec!(110)), &position, &precision())[..],
            [Transition::StopHit { .. }]
        ));
        assert!(matches!(
            evaluate(px(dec!(69)), &position, &precision())[..],
            [Transition::FinalTargetHit { .. }]
        ));
    }

    #[test]
    fn test_close_quantity_floored_to_step() {
        let mut position = long_position();
        position.original_quantity = Size::new(dec!(0.0333));
        position.quantity = Size::new(dec!(0.0333));
        let t = evaluate(px(dec!(110)), &position, &precision());
        assert_eq!(
            t[0],
            Transition::PartialTarget {
                index: 0,
                close_quantity: Size::new(dec!(0.016)),
                new_stop: Some(px(dec!(100)))
            }
        );
    }

    #[test]
    fn test_partial_never_closes_last_step() {
        let mut position = long_position();
        position.original_quantity = Size::new(dec!(0.002));
        position.quantity = Size::new(dec!(0.001));
        let t = evaluate(px(dec!(110)), &position, &precision());
        assert_eq!(
            t[0],
            Transition::PartialTarget {
                index: 0,
                close_quantity: Size::ZERO,
                new_stop: Some(px(dec!(100)))
            }
        );
    }

    #[test]
    fn test_stop_rounded_to_tick() {
        let coarse = SymbolPrecision::new(Size::new(dec!(0.001)), px(dec!(0.5)));
        let mut position = long_position();
        position.checkpoints[0].stop_to = Some(px(dec!(95.3)));
        let t = evaluate(px(dec!(105)), &position, &coarse);
        assert_eq!(
            t,
            vec![Transition::StopMove {
                index: 0,
                new_stop: Some(px(dec!(95)))
            }]
        );
    }

    #[test]
    fn test_terminal_apply_zeroes_quantity() {
        let mut position = long_position();
        let t = evaluate(px(dec!(130)), &position, &precision());
        apply(&mut position, &t[0], 3);
        assert!(position.target_hit);
        assert!(position.is_terminal());
        assert!(position.quantity.is_zero());
        assert!(evaluate(px(dec!(80)), &position, &precision()).is_empty());
    }
}
