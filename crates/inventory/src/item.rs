use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use batchline_core::{ItemId, StockError, StockResult, Unit};

/// Category of a stocked item.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemCategory {
    RawMaterial,
    Packaging,
    Disposable,
    SemiFinished,
    Finished,
}

impl ItemCategory {
    /// Packaging and disposables are counted per piece and priced per piece.
    pub fn is_piece_accounted(self) -> bool {
        matches!(self, ItemCategory::Packaging | ItemCategory::Disposable)
    }
}

/// Usage of one component for a single standard batch.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BomQuantity {
    /// Absolute usage for one batch, in the given unit.
    PerBatch { amount: f64, unit: Unit },
    /// Percentage of the parent's `standard_batch_weight`.
    BatchPercent { percent: f64 },
}

impl BomQuantity {
    pub(crate) fn validate(&self) -> StockResult<()> {
        match *self {
            BomQuantity::PerBatch { amount, .. } => {
                if !amount.is_finite() || amount <= 0.0 {
                    return Err(StockError::validation(format!(
                        "component amount must be positive and finite, got {amount}"
                    )));
                }
            }
            BomQuantity::BatchPercent { percent } => {
                if !percent.is_finite() || percent <= 0.0 || percent > 100.0 {
                    return Err(StockError::validation(format!(
                        "component percentage must be within (0, 100], got {percent}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// One entry in an item's bill of materials.
///
/// `partial_cost` caches the component's last computed contribution to the
/// parent's batch cost; the costing layer refreshes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BomComponent {
    pub item_id: ItemId,
    pub quantity: BomQuantity,
    #[serde(default)]
    pub partial_cost: f64,
}

impl BomComponent {
    pub fn per_batch(item_id: ItemId, amount: f64, unit: Unit) -> Self {
        Self {
            item_id,
            quantity: BomQuantity::PerBatch { amount, unit },
            partial_cost: 0.0,
        }
    }

    pub fn batch_percent(item_id: ItemId, percent: f64) -> Self {
        Self {
            item_id,
            quantity: BomQuantity::BatchPercent { percent },
            partial_cost: 0.0,
        }
    }
}

/// Durable record for one stocked item.
///
/// `quantity` is an authoritative cache derived from the ledger: it always
/// equals the sum of all movement deltas since creation. All quantity changes
/// go through [`crate::StockLedger`]; nothing else mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub sku: String,
    pub name: String,
    pub category: ItemCategory,
    pub quantity: f64,
    pub min_quantity: f64,
    pub unit: Unit,
    /// Externally set for leaf items; derived by the costing layer for
    /// composite items.
    pub cost_per_unit: f64,
    pub sale_price: f64,
    /// Weight of one standard batch in grams. Required for composite items.
    pub standard_batch_weight: Option<f64>,
    pub components: Vec<BomComponent>,
    pub created_at: DateTime<Utc>,
}

impl Item {
    pub fn new(sku: impl Into<String>, name: impl Into<String>, category: ItemCategory, unit: Unit) -> Self {
        Self {
            id: ItemId::new(),
            sku: sku.into(),
            name: name.into(),
            category,
            quantity: 0.0,
            min_quantity: 0.0,
            unit,
            cost_per_unit: 0.0,
            sale_price: 0.0,
            standard_batch_weight: None,
            components: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_quantity(mut self, quantity: f64) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn with_min_quantity(mut self, min_quantity: f64) -> Self {
        self.min_quantity = min_quantity;
        self
    }

    pub fn with_cost_per_unit(mut self, cost_per_unit: f64) -> Self {
        self.cost_per_unit = cost_per_unit;
        self
    }

    pub fn with_sale_price(mut self, sale_price: f64) -> Self {
        self.sale_price = sale_price;
        self
    }

    pub fn with_batch(mut self, standard_batch_weight: f64, components: Vec<BomComponent>) -> Self {
        self.standard_batch_weight = Some(standard_batch_weight);
        self.components = components;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// An item with components is costed by rolling up its BOM.
    pub fn is_composite(&self) -> bool {
        !self.components.is_empty()
    }

    pub fn is_below_minimum(&self) -> bool {
        self.quantity < self.min_quantity
    }

    /// Structural validation applied before the item is accepted into the
    /// store. Referential checks (cycles) run against the stored item graph
    /// in the ledger, not here.
    pub fn validate(&self) -> StockResult<()> {
        if self.sku.trim().is_empty() {
            return Err(StockError::validation("sku cannot be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(StockError::validation("name cannot be empty"));
        }
        if !self.quantity.is_finite() || self.quantity < 0.0 {
            return Err(StockError::validation(format!(
                "quantity must be non-negative and finite, got {}",
                self.quantity
            )));
        }
        if !self.min_quantity.is_finite() || self.min_quantity < 0.0 {
            return Err(StockError::validation("min_quantity must be non-negative and finite"));
        }
        if !self.cost_per_unit.is_finite() || self.cost_per_unit < 0.0 {
            return Err(StockError::validation("cost_per_unit must be non-negative and finite"));
        }
        if !self.sale_price.is_finite() || self.sale_price < 0.0 {
            return Err(StockError::validation("sale_price must be non-negative and finite"));
        }
        if let Some(weight) = self.standard_batch_weight {
            if !weight.is_finite() || weight <= 0.0 {
                return Err(StockError::validation(format!(
                    "standard_batch_weight must be positive and finite, got {weight}"
                )));
            }
        }
        for component in &self.components {
            if component.item_id == self.id {
                return Err(StockError::cyclic_bom(format!(
                    "item {} lists itself as a component",
                    self.sku
                )));
            }
            component.quantity.validate()?;
        }
        Ok(())
    }
}
