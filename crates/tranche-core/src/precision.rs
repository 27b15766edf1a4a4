//! Exchange precision for one instrument.

use crate::decimal::{Price, Size};
use serde::{Deserialize, Serialize};

/// Minimum quantity and price increments accepted for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolPrecision {
    pub quantity_step: Size,
    pub price_tick: Price,
}

impl SymbolPrecision {
    pub fn new(quantity_step: Size, price_tick: Price) -> Self {
        Self {
            quantity_step,
            price_tick,
        }
    }

    #[inline]
    pub fn floor_quantity(&self, quantity: Size) -> Size {
        quantity.floor_to_step(self.quantity_step)
    }

    #[inline]
    pub fn floor_price(&self, price: Price) -> Price {
        price.floor_to_tick(self.price_tick)
    }
}
