use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use batchline_core::{ItemId, StockResult};
use batchline_costing::BomCostCalculator;
use batchline_inventory::StockLedger;
use batchline_production::{ProductionTask, TaskStore};

/// Gross profit for one product on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReportRow {
    pub item_id: ItemId,
    pub product_sku: String,
    pub product_name: String,
    pub produced_quantity: f64,
    pub defected_quantity: f64,
    pub material_cost: f64,
    pub product_value: f64,
    pub gross_profit: f64,
    pub gross_profit_percent: f64,
}

/// Derived rollup for one calendar date. Recomputable at any time; carries no
/// volatile field, so identical inputs serialize byte-identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub rows: Vec<DailyReportRow>,
    pub total_material_cost: f64,
    pub total_product_value: f64,
    pub total_gross_profit: f64,
}

#[derive(Debug, Default)]
struct ProductAccumulator {
    produced: f64,
    defected: f64,
    material_cost: f64,
}

/// Joins the day's completed production with the BOM cost model.
#[derive(Debug)]
pub struct DailyCostAggregator<'a> {
    ledger: &'a StockLedger,
    tasks: &'a TaskStore,
}

impl<'a> DailyCostAggregator<'a> {
    pub fn new(ledger: &'a StockLedger, tasks: &'a TaskStore) -> Self {
        Self { ledger, tasks }
    }

    /// Compute the gross-profit report for `date`.
    ///
    /// Material cost uses each task's frozen BOM quantities (falling back to
    /// the live BOM) priced at current component costs. One malformed row
    /// degrades to zero with a warning; it never aborts the report.
    pub fn report(&self, date: NaiveDate) -> StockResult<DailyReport> {
        let calculator = BomCostCalculator::new(self.ledger);
        let mut by_product: BTreeMap<ItemId, ProductAccumulator> = BTreeMap::new();

        for task in self.tasks.completed_on(date)? {
            let Some(output_id) = task.output_item() else {
                continue;
            };
            let batches = task.produced_quantity + task.defected_quantity;
            if batches <= 0.0 {
                continue;
            }

            let batch_cost = self.batch_cost(&calculator, &task, output_id)?;
            let entry = by_product.entry(output_id).or_default();
            entry.produced += task.produced_quantity;
            entry.defected += task.defected_quantity;
            entry.material_cost += coerce_finite(output_id, batch_cost * batches);
        }

        let mut rows = Vec::with_capacity(by_product.len());
        for (item_id, acc) in by_product {
            let Ok(item) = self.ledger.item(item_id) else {
                warn!(%item_id, "produced item no longer exists; dropped from report");
                continue;
            };
            let product_value = coerce_finite(item_id, acc.produced * item.sale_price);
            let material_cost = coerce_finite(item_id, acc.material_cost);
            let gross_profit = product_value - material_cost;
            let gross_profit_percent = if product_value == 0.0 {
                0.0
            } else {
                coerce_finite(item_id, gross_profit / product_value * 100.0)
            };
            rows.push(DailyReportRow {
                item_id,
                product_sku: item.sku,
                product_name: item.name,
                produced_quantity: acc.produced,
                defected_quantity: acc.defected,
                material_cost,
                product_value,
                gross_profit,
                gross_profit_percent,
            });
        }
        rows.sort_by(|a, b| a.product_sku.cmp(&b.product_sku));

        Ok(DailyReport {
            date,
            total_material_cost: rows.iter().map(|r| r.material_cost).sum(),
            total_product_value: rows.iter().map(|r| r.product_value).sum(),
            total_gross_profit: rows.iter().map(|r| r.gross_profit).sum(),
            rows,
        })
    }

    fn batch_cost(
        &self,
        calculator: &BomCostCalculator<'_>,
        task: &ProductionTask,
        output_id: ItemId,
    ) -> StockResult<f64> {
        let (batch_weight, components) = match &task.bom {
            Some(snapshot) => (
                snapshot.standard_batch_weight,
                snapshot.components.clone(),
            ),
            None => {
                let item = self.ledger.item(output_id)?;
                (item.standard_batch_weight, item.components)
            }
        };
        let costs = calculator.component_costs(batch_weight, &components)?;
        Ok(costs.iter().map(|c| c.partial_cost).sum())
    }
}

fn coerce_finite(item_id: ItemId, value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        warn!(%item_id, value, "non-finite report value coerced to zero");
        0.0
    }
}
