use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, NaiveDate, Utc};

use batchline_core::{ItemId, StockError, StockResult, TaskId};
use batchline_costing::BomCostCalculator;
use batchline_inventory::StockLedger;

use crate::task::{ProductionTask, TaskStatus};

/// In-memory production task store.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<TaskId, ProductionTask>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StockResult<std::sync::RwLockReadGuard<'_, HashMap<TaskId, ProductionTask>>> {
        self.tasks
            .read()
            .map_err(|_| StockError::validation("task store lock poisoned"))
    }

    fn write(
        &self,
    ) -> StockResult<std::sync::RwLockWriteGuard<'_, HashMap<TaskId, ProductionTask>>> {
        self.tasks
            .write()
            .map_err(|_| StockError::validation("task store lock poisoned"))
    }

    pub fn insert(&self, task: ProductionTask) -> StockResult<TaskId> {
        let mut tasks = self.write()?;
        if tasks.contains_key(&task.id) {
            return Err(StockError::validation(format!(
                "task already exists: {}",
                task.id
            )));
        }
        let task_id = task.id;
        tasks.insert(task_id, task);
        Ok(task_id)
    }

    /// Create a production task for `item_id`.
    ///
    /// Refreshes the item's cached component costs first, so the frozen BOM
    /// snapshot carries the cost of materials as of task creation.
    pub fn create_production(
        &self,
        ledger: &StockLedger,
        item_id: ItemId,
        planned_quantity: f64,
    ) -> StockResult<TaskId> {
        BomCostCalculator::new(ledger).refresh_partial_costs(item_id)?;
        let item = ledger.item(item_id)?;
        self.insert(ProductionTask::production(&item, planned_quantity))
    }

    pub fn get(&self, task_id: TaskId) -> StockResult<ProductionTask> {
        self.read()?
            .get(&task_id)
            .cloned()
            .ok_or(StockError::TaskNotFound(task_id))
    }

    /// Record actual output for a task that is still open.
    pub fn record_results(
        &self,
        task_id: TaskId,
        produced_quantity: f64,
        defected_quantity: f64,
    ) -> StockResult<()> {
        if !produced_quantity.is_finite() || produced_quantity < 0.0 {
            return Err(StockError::validation(
                "produced_quantity must be non-negative and finite",
            ));
        }
        if !defected_quantity.is_finite() || defected_quantity < 0.0 {
            return Err(StockError::validation(
                "defected_quantity must be non-negative and finite",
            ));
        }
        self.update(task_id, |task| {
            if task.status.is_terminal() {
                return Err(StockError::validation(format!(
                    "task {task_id} is already {:?}",
                    task.status
                )));
            }
            task.produced_quantity = produced_quantity;
            task.defected_quantity = defected_quantity;
            Ok(())
        })
    }

    pub fn start(&self, task_id: TaskId) -> StockResult<()> {
        self.update(task_id, ProductionTask::start)
    }

    pub fn cancel(&self, task_id: TaskId) -> StockResult<()> {
        self.update(task_id, ProductionTask::cancel)
    }

    pub(crate) fn mark_completed(&self, task_id: TaskId, at: DateTime<Utc>) -> StockResult<()> {
        self.update(task_id, |task| task.complete(at))
    }

    fn update(
        &self,
        task_id: TaskId,
        f: impl FnOnce(&mut ProductionTask) -> StockResult<()>,
    ) -> StockResult<()> {
        let mut tasks = self.write()?;
        let task = tasks
            .get_mut(&task_id)
            .ok_or(StockError::TaskNotFound(task_id))?;
        f(task)
    }

    /// Completed tasks whose completion fell on `date` (UTC), ordered by
    /// completion instant for deterministic reporting.
    pub fn completed_on(&self, date: NaiveDate) -> StockResult<Vec<ProductionTask>> {
        let tasks = self.read()?;
        let mut completed: Vec<ProductionTask> = tasks
            .values()
            .filter(|task| {
                task.status == TaskStatus::Completed
                    && task
                        .completed_at
                        .is_some_and(|at| at.date_naive() == date)
            })
            .cloned()
            .collect();
        completed.sort_by_key(|task| (task.completed_at, task.id));
        Ok(completed)
    }
}
