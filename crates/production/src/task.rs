use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use batchline_core::{ItemId, StockError, StockResult, TaskId};
use batchline_inventory::{BomComponent, Item};

/// Production task lifecycle.
///
/// `Pending → InProgress → Completed`, with `Cancelled` reachable from the
/// two non-terminal states. Only `Completed` production tasks participate in
/// ledger finalization and daily aggregation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

/// What a task is for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Produces the referenced item and consumes its BOM on finalization.
    Production { item_id: ItemId },
    /// Free-form work (cleaning, maintenance) with no material effect.
    Constant { label: String },
}

/// Frozen copy of the BOM a task will consume.
///
/// Captured when the task is created so later edits to the item's BOM never
/// change the task's material accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BomSnapshot {
    pub standard_batch_weight: Option<f64>,
    pub components: Vec<BomComponent>,
}

impl BomSnapshot {
    pub fn capture(item: &Item) -> Self {
        Self {
            standard_batch_weight: item.standard_batch_weight,
            components: item.components.clone(),
        }
    }
}

/// A unit of production work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionTask {
    pub id: TaskId,
    pub kind: TaskKind,
    pub planned_quantity: f64,
    pub produced_quantity: f64,
    pub defected_quantity: f64,
    /// Frozen at creation for production tasks; `None` for constant tasks.
    pub bom: Option<BomSnapshot>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProductionTask {
    /// Create a production task for `item`, freezing its current BOM.
    pub fn production(item: &Item, planned_quantity: f64) -> Self {
        Self {
            id: TaskId::new(),
            kind: TaskKind::Production { item_id: item.id },
            planned_quantity,
            produced_quantity: 0.0,
            defected_quantity: 0.0,
            bom: Some(BomSnapshot::capture(item)),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Create a non-production (constant) task.
    pub fn constant(label: impl Into<String>, planned_quantity: f64) -> Self {
        Self {
            id: TaskId::new(),
            kind: TaskKind::Constant {
                label: label.into(),
            },
            planned_quantity,
            produced_quantity: 0.0,
            defected_quantity: 0.0,
            bom: None,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn with_results(mut self, produced_quantity: f64, defected_quantity: f64) -> Self {
        self.produced_quantity = produced_quantity;
        self.defected_quantity = defected_quantity;
        self
    }

    pub fn is_production(&self) -> bool {
        matches!(self.kind, TaskKind::Production { .. })
    }

    pub fn output_item(&self) -> Option<ItemId> {
        match self.kind {
            TaskKind::Production { item_id } => Some(item_id),
            TaskKind::Constant { .. } => None,
        }
    }

    /// `Pending → InProgress`.
    pub fn start(&mut self) -> StockResult<()> {
        match self.status {
            TaskStatus::Pending => {
                self.status = TaskStatus::InProgress;
                Ok(())
            }
            other => Err(StockError::validation(format!(
                "task {} cannot start from {other:?}",
                self.id
            ))),
        }
    }

    /// `Pending | InProgress → Completed`.
    pub fn complete(&mut self, at: DateTime<Utc>) -> StockResult<()> {
        match self.status {
            TaskStatus::Pending | TaskStatus::InProgress => {
                self.status = TaskStatus::Completed;
                self.completed_at = Some(at);
                Ok(())
            }
            other => Err(StockError::validation(format!(
                "task {} cannot complete from {other:?}",
                self.id
            ))),
        }
    }

    /// `Pending | InProgress → Cancelled`.
    pub fn cancel(&mut self) -> StockResult<()> {
        match self.status {
            TaskStatus::Pending | TaskStatus::InProgress => {
                self.status = TaskStatus::Cancelled;
                Ok(())
            }
            other => Err(StockError::validation(format!(
                "task {} cannot cancel from {other:?}",
                self.id
            ))),
        }
    }
}
