//! # FIFO Consumption Planning
//!
//! Decides which cost layers a stock-out draws from, oldest first, without
//! touching storage. The persistence layer applies the resulting plan to the
//! layers it re-read inside its transaction.
//!
//! ```text
//!  layers (FIFO order)      request 25
//!  ┌──────────────┐
//!  │ A 20 @ $10   │ ──take 20──►  200.00
//!  ├──────────────┤
//!  │ B 10 @ $12   │ ──take  5──►   60.00   (B left with 5)
//!  └──────────────┘
//!                              ─────────
//!                     total     260.00
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::CostLayer;
use crate::validation::checked_stock;

/// Quantity taken from one layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LayerSlice {
    pub layer_id: String,
    pub unit_cost_cents: i64,
    pub quantity: i64,
}

impl LayerSlice {
    /// `None` when the slice value leaves the `i64` range.
    #[inline]
    pub fn cost(&self) -> Option<Money> {
        Money::from_cents(self.unit_cost_cents).checked_multiply_quantity(self.quantity)
    }
}

/// Result of planning a consumption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ConsumptionPlan {
    pub slices: Vec<LayerSlice>,
    pub quantity: i64,
    pub total_cost_cents: i64,
}

impl ConsumptionPlan {
    #[inline]
    pub fn total_cost(&self) -> Money {
        Money::from_cents(self.total_cost_cents)
    }

    /// Weighted average unit cost, rounded to the cent.
    pub fn weighted_unit_cost(&self) -> Money {
        self.total_cost().per_unit(self.quantity)
    }
}

/// Plans a FIFO stock-out of `quantity` units.
///
/// `layers` must already be in FIFO order (oldest first). Depleted layers
/// are skipped. Fails with `InsufficientStock` when the layers together hold
/// less than requested; the layers are never modified here.
pub fn plan_consumption(
    product_id: &str,
    branch_id: &str,
    layers: &[CostLayer],
    quantity: i64,
) -> CoreResult<ConsumptionPlan> {
    if quantity <= 0 {
        return Err(CoreError::InvalidQuantity { quantity });
    }

    let available = layers
        .iter()
        .try_fold(0i64, |sum, l| checked_stock(sum, l.remaining_stock.max(0)))?;
    if available < quantity {
        return Err(CoreError::InsufficientStock {
            product_id: product_id.to_string(),
            branch_id: branch_id.to_string(),
            available,
            requested: quantity,
        });
    }

    let mut outstanding = quantity;
    let mut slices = Vec::new();
    let mut total = Money::zero();

    for layer in layers.iter().filter(|l| l.remaining_stock > 0) {
        if outstanding == 0 {
            break;
        }
        let take = outstanding.min(layer.remaining_stock);
        let slice = LayerSlice {
            layer_id: layer.id.clone(),
            unit_cost_cents: layer.cost_cents,
            quantity: take,
        };
        total = slice
            .cost()
            .and_then(|cost| total.checked_add(cost))
            .ok_or_else(|| ValidationError::OutOfRange {
                field: "consumption cost".to_string(),
                min: 0,
                max: i64::MAX,
            })?;
        slices.push(slice);
        outstanding -= take;
    }

    Ok(ConsumptionPlan {
        slices,
        quantity,
        total_cost_cents: total.cents(),
    })
}

/// Applies a plan to in-memory copies of the layers it was planned from.
///
/// Returns the ids of the layers that changed. Layers not named by the plan
/// are left alone.
pub fn apply_plan(layers: &mut [CostLayer], plan: &ConsumptionPlan) -> Vec<String> {
    let mut touched = Vec::with_capacity(plan.slices.len());
    for slice in &plan.slices {
        if let Some(layer) = layers.iter_mut().find(|l| l.id == slice.layer_id) {
            layer.remaining_stock -= slice.quantity;
            touched.push(layer.id.clone());
        }
    }
    touched
}
