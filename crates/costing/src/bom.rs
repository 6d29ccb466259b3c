use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use batchline_core::{ItemId, StockError, StockResult, Unit};
use batchline_inventory::{BomComponent, BomQuantity, Item, StockLedger};

/// One component's contribution to a single standard batch of its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentCost {
    pub item_id: ItemId,
    /// Usage for one batch, normalized to the component's base unit.
    pub amount: f64,
    pub unit: Unit,
    /// Share of the batch weight. `None` for piece-accounted components,
    /// which are priced per piece and stay out of percentage math.
    pub percent_of_batch: Option<f64>,
    pub partial_cost: f64,
}

/// `usage / batch_weight × 100` for weighable usage; `None` for pieces.
pub fn percentage_of_batch(quantity: BomQuantity, batch_weight: f64) -> Option<f64> {
    match quantity {
        BomQuantity::BatchPercent { percent } => Some(percent),
        BomQuantity::PerBatch { amount, unit } => {
            if unit.is_count() || !(batch_weight > 0.0) {
                None
            } else {
                Some(unit.to_base(amount) / batch_weight * 100.0)
            }
        }
    }
}

/// BOM cost rollup over the ledger's item graph.
///
/// A pure function of the current item costs: the same inputs always produce
/// the same result, and nothing here mutates state unless
/// [`BomCostCalculator::refresh_partial_costs`] is asked to write the cache
/// back.
#[derive(Debug)]
pub struct BomCostCalculator<'a> {
    ledger: &'a StockLedger,
}

impl<'a> BomCostCalculator<'a> {
    pub fn new(ledger: &'a StockLedger) -> Self {
        Self { ledger }
    }

    /// Cost of one unit of the item. Leaf items report their externally set
    /// `cost_per_unit`; composite items report the rolled-up cost of one
    /// standard batch.
    pub fn unit_cost(&self, item_id: ItemId) -> StockResult<f64> {
        let item = self.ledger.item(item_id)?;
        let mut visiting = HashSet::new();
        self.cost_of(&item, &mut visiting)
    }

    /// Per-component breakdown for one batch. Shared by the live-BOM path
    /// and the frozen-snapshot path (production tasks, daily reports).
    pub fn component_costs(
        &self,
        batch_weight: Option<f64>,
        components: &[BomComponent],
    ) -> StockResult<Vec<ComponentCost>> {
        let mut visiting = HashSet::new();
        self.component_costs_inner(batch_weight, components, &mut visiting)
    }

    /// Recompute the item's component cost cache and derived `cost_per_unit`,
    /// writing both back to the store. Returns the fresh unit cost.
    pub fn refresh_partial_costs(&self, item_id: ItemId) -> StockResult<f64> {
        let item = self.ledger.item(item_id)?;
        if !item.is_composite() {
            return Ok(item.cost_per_unit);
        }

        let costs = self.component_costs(item.standard_batch_weight, &item.components)?;
        let mut components = item.components.clone();
        for (component, cost) in components.iter_mut().zip(&costs) {
            component.partial_cost = cost.partial_cost;
        }
        self.ledger
            .update_components(item_id, item.standard_batch_weight, components)?;

        let unit_cost = sanitize(item_id, costs.iter().map(|c| c.partial_cost).sum());
        self.ledger.set_cost(item_id, unit_cost)?;
        Ok(unit_cost)
    }

    fn cost_of(&self, item: &Item, visiting: &mut HashSet<ItemId>) -> StockResult<f64> {
        if !item.is_composite() {
            return Ok(item.cost_per_unit);
        }
        if !visiting.insert(item.id) {
            return Err(StockError::cyclic_bom(format!(
                "costing item {} revisits itself",
                item.sku
            )));
        }
        let costs =
            self.component_costs_inner(item.standard_batch_weight, &item.components, visiting)?;
        visiting.remove(&item.id);
        Ok(sanitize(item.id, costs.iter().map(|c| c.partial_cost).sum()))
    }

    fn component_costs_inner(
        &self,
        batch_weight: Option<f64>,
        components: &[BomComponent],
        visiting: &mut HashSet<ItemId>,
    ) -> StockResult<Vec<ComponentCost>> {
        let mut costs = Vec::with_capacity(components.len());
        for component in components {
            costs.push(self.component_cost(batch_weight, component, visiting)?);
        }
        Ok(costs)
    }

    fn component_cost(
        &self,
        batch_weight: Option<f64>,
        component: &BomComponent,
        visiting: &mut HashSet<ItemId>,
    ) -> StockResult<ComponentCost> {
        let zero = |unit: Unit| ComponentCost {
            item_id: component.item_id,
            amount: 0.0,
            unit,
            percent_of_batch: None,
            partial_cost: 0.0,
        };

        let item = match self.ledger.item(component.item_id) {
            Ok(item) => item,
            Err(StockError::ItemNotFound(_)) => {
                warn!(
                    component = %component.item_id,
                    "component item missing; contributing zero cost"
                );
                return Ok(zero(Unit::Pieces));
            }
            Err(other) => return Err(other),
        };

        // Resolve the usage for one batch, normalized to a base unit.
        let (amount, unit) = match component.quantity {
            BomQuantity::PerBatch { amount, unit } => (unit.to_base(amount), unit.base()),
            BomQuantity::BatchPercent { percent } => match batch_weight {
                Some(weight) if weight > 0.0 => (percent / 100.0 * weight, Unit::Grams),
                _ => {
                    warn!(
                        component = %item.sku,
                        "percentage component without a batch weight; contributing zero cost"
                    );
                    return Ok(zero(Unit::Grams));
                }
            },
        };

        if unit.base() != item.unit.base() {
            warn!(
                component = %item.sku,
                usage_unit = %unit,
                item_unit = %item.unit,
                "usage unit does not match the item's unit; contributing zero cost"
            );
            return Ok(zero(unit));
        }

        let cost_per_base = self.cost_per_base_unit(&item, visiting)?;
        let partial_cost = sanitize(item.id, amount * cost_per_base);
        let percent_of_batch = if unit.is_count() {
            None
        } else {
            batch_weight.and_then(|weight| {
                percentage_of_batch(
                    BomQuantity::PerBatch { amount, unit },
                    weight,
                )
            })
        };

        Ok(ComponentCost {
            item_id: component.item_id,
            amount,
            unit,
            percent_of_batch,
            partial_cost,
        })
    }

    /// Cost of one base unit (gram, milliliter, piece) of the item.
    fn cost_per_base_unit(&self, item: &Item, visiting: &mut HashSet<ItemId>) -> StockResult<f64> {
        let unit_cost = self.cost_of(item, visiting)?;
        if item.unit.is_count() {
            // Per piece, whether externally set or one rolled-up batch.
            return Ok(unit_cost);
        }
        if !item.is_composite() {
            return Ok(unit_cost / item.unit.base_factor());
        }
        // A composite priced by mass spreads its batch cost over the batch
        // weight.
        match item.standard_batch_weight {
            Some(weight) if weight > 0.0 => Ok(unit_cost / weight),
            _ => {
                warn!(
                    item = %item.sku,
                    "composite mass component without a batch weight; contributing zero cost"
                );
                Ok(0.0)
            }
        }
    }
}

/// Coerce non-finite results to zero and flag the item, instead of letting
/// NaN/Infinity reach downstream aggregates.
fn sanitize(item_id: ItemId, value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        warn!(item = %item_id, value, "non-finite cost coerced to zero");
        0.0
    }
}
