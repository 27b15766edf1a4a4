//! Tracked position state and its staged exit plan.
//!
//! A [`Position`] is created from an accepted open signal and then only
//! mutated through the methods here, which enforce the lifetime invariants:
//!
//! - `quantity` never increases and never drops below zero
//! - `stop_price` only moves in the risk-reducing direction for the side
//! - hit flags latch; once set they are never cleared
//!
//! The configured [`StagePlan`] is resolved into concrete prices at open time
//! so the evaluator never needs the plan again.

use crate::decimal::{Price, Size};
use crate::error::{CoreError, Result};
use crate::order::PositionSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Where to relocate the stop when a stage fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopRule {
    /// Move the stop to the entry price.
    Breakeven,
    /// Keep this fraction of the original risk: `0.5` moves the stop halfway
    /// from the initial stop to entry, `0` is breakeven.
    FractionOfRisk(Decimal),
    /// Move the stop to the previous partial target (entry for the first one).
    PreviousTarget,
    /// Leave the stop where it is.
    Keep,
}

impl StopRule {
    /// Resolve the rule to a concrete stop price. `None` means no relocation.
    pub fn resolve(
        &self,
        side: PositionSide,
        entry: Price,
        initial_stop: Price,
        previous_target: Option<Price>,
    ) -> Option<Price> {
        match self {
            Self::Breakeven => Some(entry),
            Self::FractionOfRisk(fraction) => {
                let risk = entry.distance(initial_stop);
                Some(side.toward_loss(entry, risk * *fraction))
            }
            Self::PreviousTarget => Some(previous_target.unwrap_or(entry)),
            Self::Keep => None,
        }
    }
}

/// Configured behavior for the partial target at one index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialStage {
    /// Fraction of the original opening quantity closed at this target.
    pub close_fraction: Decimal,
    pub stop_rule: StopRule,
}

/// Configured stop-only checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointStage {
    /// Trigger distance from entry in multiples of the initial risk
    /// (`0.5` = half the stop distance into profit).
    pub trigger_r: Decimal,
    pub stop_rule: StopRule,
}

/// Per-deployment exit schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePlan {
    #[serde(default)]
    pub partials: Vec<PartialStage>,
    #[serde(default)]
    pub checkpoints: Vec<CheckpointStage>,
}

impl Default for StagePlan {
    fn default() -> Self {
        Self {
            partials: vec![
                PartialStage {
                    close_fraction: Decimal::new(5, 1),
                    stop_rule: StopRule::Breakeven,
                },
                PartialStage {
                    close_fraction: Decimal::new(25, 2),
                    stop_rule: StopRule::PreviousTarget,
                },
            ],
            checkpoints: vec![CheckpointStage {
                trigger_r: Decimal::new(5, 1),
                stop_rule: StopRule::FractionOfRisk(Decimal::new(5, 1)),
            }],
        }
    }
}

impl StagePlan {
    /// Stage for partial target `index` out of `count` targets.
    ///
    /// Indices past the configured list reuse the last stage; with nothing
    /// configured each target closes an equal share and moves to breakeven.
    pub fn partial_stage(&self, index: usize, count: usize) -> PartialStage {
        if let Some(stage) = self.partials.get(index).or_else(|| self.partials.last()) {
            return stage.clone();
        }
        PartialStage {
            close_fraction: Decimal::ONE / Decimal::from(count as u64 + 1),
            stop_rule: StopRule::Breakeven,
        }
    }
}

/// Partial target as supplied by a signal; unset fields come from the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub price: Price,
    pub close_fraction: Option<Decimal>,
    pub stop_rule: Option<StopRule>,
}

impl TargetSpec {
    pub fn at(price: Price) -> Self {
        Self {
            price,
            close_fraction: None,
            stop_rule: None,
        }
    }
}

/// Intermediate take-profit level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialTarget {
    pub price: Price,
    pub close_fraction: Decimal,
    /// Resolved relocation price; `None` keeps the current stop.
    pub stop_to: Option<Price>,
    pub hit: bool,
}

/// Stop-only risk reduction level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopCheckpoint {
    pub trigger_price: Price,
    pub stop_to: Option<Price>,
    pub hit: bool,
}

/// Inputs for [`Position::open`].
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: Size,
    pub leverage: u32,
    pub entry_price: Price,
    pub stop_price: Price,
    pub final_target: Price,
    pub targets: Vec<TargetSpec>,
}

/// An open, monitored position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    /// Remaining open quantity.
    pub quantity: Size,
    /// Quantity at open; partial closes are fractions of this.
    pub original_quantity: Size,
    pub leverage: u32,
    pub entry_price: Price,
    pub initial_stop: Price,
    pub stop_price: Price,
    pub final_target: Price,
    pub partial_targets: Vec<PartialTarget>,
    #[serde(default)]
    pub checkpoints: Vec<StopCheckpoint>,
    #[serde(default)]
    pub stop_hit: bool,
    #[serde(default)]
    pub target_hit: bool,
    /// Stop a partial target asked for that no resting order carries yet.
    /// `stop_price` keeps tracking the resting order until it is placed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_stop: Option<Price>,
    pub opened_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Position {
    /// Build a position from an open request and the deployment plan.
    pub fn open(req: OpenRequest, plan: &StagePlan, now_ms: u64) -> Result<Self> {
        let side = req.side;
        let entry = req.entry_price;

        if req.symbol.trim().is_empty() {
            return Err(CoreError::InvalidPosition("empty symbol".to_string()));
        }
        if !req.quantity.is_positive() {
            return Err(CoreError::InvalidSize(format!(
                "quantity must be positive, got {}",
                req.quantity
            )));
        }
        for (name, px) in [
            ("entry", entry),
            ("stop", req.stop_price),
            ("final target", req.final_target),
        ] {
            if !px.is_positive() {
                return Err(CoreError::InvalidPrice(format!("{name} must be positive")));
            }
        }
        if !side.is_stopped(req.stop_price, entry) || req.stop_price == entry {
            return Err(CoreError::InvalidPosition(format!(
                "{side} stop {} is not on the losing side of entry {entry}",
                req.stop_price
            )));
        }
        if !side.is_favorable(req.final_target, entry) || req.final_target == entry {
            return Err(CoreError::InvalidPosition(format!(
                "{side} final target {} is not on the winning side of entry {entry}",
                req.final_target
            )));
        }

        let count = req.targets.len();
        let mut partial_targets = Vec::with_capacity(count);
        let mut previous: Option<Price> = None;
        let mut fraction_sum = Decimal::ZERO;
        for (index, target) in req.targets.iter().enumerate() {
            let beyond_prev = previous.unwrap_or(entry);
            if !side.is_favorable(target.price, beyond_prev) || target.price == beyond_prev {
                return Err(CoreError::InvalidPosition(format!(
                    "partial target {index} at {} is not beyond {beyond_prev}",
                    target.price
                )));
            }
            if !side.is_favorable(req.final_target, target.price) || target.price == req.final_target
            {
                return Err(CoreError::InvalidPosition(format!(
                    "partial target {index} at {} is not before final target {}",
                    target.price, req.final_target
                )));
            }

            let stage = plan.partial_stage(index, count);
            let close_fraction = target.close_fraction.unwrap_or(stage.close_fraction);
            if close_fraction <= Decimal::ZERO {
                return Err(CoreError::InvalidPosition(format!(
                    "partial target {index} close fraction must be positive"
                )));
            }
            fraction_sum += close_fraction;

            let rule = target.stop_rule.unwrap_or(stage.stop_rule);
            partial_targets.push(PartialTarget {
                price: target.price,
                close_fraction,
                stop_to: rule.resolve(side, entry, req.stop_price, previous),
                hit: false,
            });
            previous = Some(target.price);
        }
        if fraction_sum >= Decimal::ONE {
            return Err(CoreError::InvalidPosition(format!(
                "partial close fractions sum to {fraction_sum}, must stay below 1"
            )));
        }

        let risk = entry.distance(req.stop_price);
        let checkpoints = plan
            .checkpoints
            .iter()
            .map(|stage| StopCheckpoint {
                trigger_price: side.toward_profit(entry, risk * stage.trigger_r),
                stop_to: stage.stop_rule.resolve(side, entry, req.stop_price, None),
                hit: false,
            })
            .collect();

        Ok(Self {
            symbol: req.symbol.trim().to_ascii_uppercase(),
            side,
            quantity: req.quantity,
            original_quantity: req.quantity,
            leverage: req.leverage,
            entry_price: entry,
            initial_stop: req.stop_price,
            stop_price: req.stop_price,
            final_target: req.final_target,
            partial_targets,
            checkpoints,
            stop_hit: false,
            target_hit: false,
            pending_stop: None,
            opened_at_ms: now_ms,
            updated_at_ms: now_ms,
        })
    }

    /// Number of partial targets already hit.
    pub fn stage(&self) -> usize {
        self.partial_targets.iter().filter(|t| t.hit).count()
    }

    /// Stop has been relocated at least once.
    pub fn stop_moved(&self) -> bool {
        self.stop_price != self.initial_stop
    }

    /// Distance between entry and the initial stop.
    pub fn risk_distance(&self) -> Decimal {
        self.entry_price.distance(self.initial_stop)
    }

    pub fn is_terminal(&self) -> bool {
        self.stop_hit || self.target_hit
    }

    /// Move the stop to `candidate` if that reduces risk. Returns whether it moved.
    pub fn tighten_stop(&mut self, candidate: Price) -> bool {
        if self.side.tightens(self.stop_price, candidate) {
            self.stop_price = candidate;
            true
        } else {
            false
        }
    }

    /// Latch partial target `index` and remove `closed` from the open quantity.
    pub fn mark_partial_hit(&mut self, index: usize, closed: Size, new_stop: Option<Price>) {
        let Some(target) = self.partial_targets.get_mut(index) else {
            return;
        };
        target.hit = true;
        self.quantity = self.quantity.saturating_sub(closed);
        if let Some(stop) = new_stop {
            self.tighten_stop(stop);
        }
    }

    /// Record the partial close of target `index` on its own. The stop it
    /// asked for waits in `pending_stop` until [`Self::confirm_pending_stop`].
    pub fn mark_partial_closed(&mut self, index: usize, closed: Size, new_stop: Option<Price>) {
        let Some(target) = self.partial_targets.get_mut(index) else {
            return;
        };
        target.hit = true;
        self.quantity = self.quantity.saturating_sub(closed);
        if let Some(stop) = new_stop {
            self.pending_stop = Some(stop);
        }
    }

    /// The pending stop is resting on the exchange; track it.
    pub fn confirm_pending_stop(&mut self) -> bool {
        match self.pending_stop.take() {
            Some(stop) => self.tighten_stop(stop),
            None => false,
        }
    }

    /// Latch checkpoint `index`.
    pub fn mark_checkpoint_hit(&mut self, index: usize, new_stop: Option<Price>) {
        let Some(checkpoint) = self.checkpoints.get_mut(index) else {
            return;
        };
        checkpoint.hit = true;
        if let Some(stop) = new_stop {
            self.tighten_stop(stop);
        }
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.updated_at_ms = now_ms;
    }
}
