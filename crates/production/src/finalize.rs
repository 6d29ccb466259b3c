use chrono::{DateTime, Utc};
use tracing::{info, warn};

use batchline_core::{StockError, StockResult, TaskFailure, TaskId};
use batchline_inventory::{BomComponent, BomQuantity, LedgerTransaction, MovementKind, StockLedger};

use crate::store::TaskStore;
use crate::task::{ProductionTask, TaskStatus};

/// Failures beyond this count are suppressed from the report and only
/// counted.
pub const MAX_REPORTED_FAILURES: usize = 10;

/// Multi-status outcome of one finalize call.
///
/// Neither plain success nor plain failure: the caller can render
/// "7 of 10 tasks completed, 3 need attention".
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeReport {
    pub successful: Vec<TaskId>,
    pub failures: Vec<TaskFailure>,
    pub suppressed_failures: usize,
}

impl FinalizeReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.suppressed_failures == 0
    }
}

enum TaskEffect {
    /// Movements staged; mark the task completed after commit.
    Completed,
    /// Terminal already; nothing to do.
    AlreadyCompleted,
}

/// Transaction coordinator for production finalization.
///
/// The whole batch runs inside one ledger transaction. Each task stages its
/// movements behind a savepoint: a failing task rolls back to its savepoint
/// and is recorded as a per-task failure, leaving the other tasks intact.
/// The transaction commits once at the end, unless every task failed.
#[derive(Debug)]
pub struct ProductionFinalizer<'a> {
    ledger: &'a StockLedger,
    tasks: &'a TaskStore,
}

impl<'a> ProductionFinalizer<'a> {
    pub fn new(ledger: &'a StockLedger, tasks: &'a TaskStore) -> Self {
        Self { ledger, tasks }
    }

    /// Finalize a batch of tasks, stamping movements with the current time.
    pub fn finalize(&self, task_ids: &[TaskId]) -> StockResult<FinalizeReport> {
        self.finalize_at(task_ids, Utc::now())
    }

    /// Finalize a batch of tasks with an explicit business timestamp.
    pub fn finalize_at(
        &self,
        task_ids: &[TaskId],
        occurred_at: DateTime<Utc>,
    ) -> StockResult<FinalizeReport> {
        let mut tx = self.ledger.begin()?;
        let mut successful = Vec::new();
        let mut failures: Vec<TaskFailure> = Vec::new();
        let mut completions = Vec::new();

        for &task_id in task_ids {
            match self.finalize_one(&mut tx, task_id, occurred_at) {
                Ok(TaskEffect::Completed) => {
                    successful.push(task_id);
                    completions.push(task_id);
                }
                Ok(TaskEffect::AlreadyCompleted) => successful.push(task_id),
                Err(error) => {
                    warn!(%task_id, %error, "task skipped during finalize");
                    failures.push(TaskFailure { task_id, error });
                }
            }
        }

        if successful.is_empty() && !task_ids.is_empty() {
            // Dropping the transaction discards every staged write.
            drop(tx);
            return Err(StockError::BatchAllFailed { failures });
        }

        let movements = tx.commit();
        for task_id in completions {
            self.tasks.mark_completed(task_id, occurred_at)?;
        }
        info!(
            tasks = successful.len(),
            failed = failures.len(),
            movements,
            "finalize batch committed"
        );

        let suppressed_failures = failures.len().saturating_sub(MAX_REPORTED_FAILURES);
        failures.truncate(MAX_REPORTED_FAILURES);
        Ok(FinalizeReport {
            successful,
            failures,
            suppressed_failures,
        })
    }

    fn finalize_one(
        &self,
        tx: &mut LedgerTransaction<'_>,
        task_id: TaskId,
        occurred_at: DateTime<Utc>,
    ) -> StockResult<TaskEffect> {
        let task = self.tasks.get(task_id)?;
        match task.status {
            // Finalizing a finished task again must not touch the ledger.
            TaskStatus::Completed => return Ok(TaskEffect::AlreadyCompleted),
            TaskStatus::Cancelled => {
                return Err(StockError::validation(format!(
                    "task {task_id} is cancelled"
                )));
            }
            TaskStatus::Pending | TaskStatus::InProgress => {}
        }

        let Some(output_id) = task.output_item() else {
            // Constant/admin work consumes nothing.
            return Ok(TaskEffect::Completed);
        };
        let total_output = task.produced_quantity + task.defected_quantity;
        if total_output <= 0.0 {
            return Ok(TaskEffect::Completed);
        }

        let output = tx.item(output_id)?;
        // The frozen snapshot wins over the live BOM, so edits made after the
        // task started don't change its material accounting.
        let (batch_weight, components) = match &task.bom {
            Some(snapshot) => (
                snapshot.standard_batch_weight,
                snapshot.components.clone(),
            ),
            None => (output.standard_batch_weight, output.components.clone()),
        };
        let batch_weight = match batch_weight {
            Some(weight) if weight > 0.0 => weight,
            _ => {
                return Err(StockError::misconfigured_bom(format!(
                    "item {} has no standard batch weight",
                    output.sku
                )));
            }
        };
        if components.is_empty() {
            return Err(StockError::misconfigured_bom(format!(
                "item {} has no components",
                output.sku
            )));
        }

        let savepoint = tx.savepoint();
        match self.stage_task(
            tx,
            &task,
            batch_weight,
            &components,
            total_output,
            occurred_at,
        ) {
            Ok(()) => Ok(TaskEffect::Completed),
            Err(error) => {
                tx.rollback_to(savepoint);
                Err(error)
            }
        }
    }

    /// Stage every movement for one task: one `Used` deduction per component
    /// and, when anything non-defective came out, one `Produced` credit.
    fn stage_task(
        &self,
        tx: &mut LedgerTransaction<'_>,
        task: &ProductionTask,
        batch_weight: f64,
        components: &[BomComponent],
        total_output: f64,
        occurred_at: DateTime<Utc>,
    ) -> StockResult<()> {
        let reference = format!("task {}", task.id);
        for component in components {
            let per_batch = match component.quantity {
                BomQuantity::PerBatch { amount, unit } => unit.to_base(amount),
                BomQuantity::BatchPercent { percent } => percent / 100.0 * batch_weight,
            };
            let consumed = per_batch * total_output;
            if !consumed.is_finite() || consumed <= 0.0 {
                return Err(StockError::misconfigured_bom(format!(
                    "component {} resolves to a non-positive consumption",
                    component.item_id
                )));
            }
            tx.stage(
                component.item_id,
                -consumed,
                MovementKind::Used,
                Some(reference.clone()),
                occurred_at,
            )?;
        }

        if task.produced_quantity > 0.0 {
            let output_id = task
                .output_item()
                .ok_or_else(|| StockError::validation("production task without an output item"))?;
            tx.stage(
                output_id,
                task.produced_quantity,
                MovementKind::Produced,
                Some(reference),
                occurred_at,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchline_core::{ItemId, Unit};
    use batchline_inventory::{
        BomComponent, DeductionPolicy, Item, ItemCategory, LedgerConfig,
    };
    use proptest::prelude::*;

    struct World {
        ledger: StockLedger,
        tasks: TaskStore,
        flour: ItemId,
        dough: ItemId,
    }

    /// Flour priced 2.0/kg with 10 kg on hand (tracked in grams); dough made
    /// from 800 g of flour per batch.
    fn world() -> World {
        let ledger = StockLedger::new(LedgerConfig {
            deduction_policy: DeductionPolicy::Reject,
        });
        let flour = ledger
            .create_item(
                Item::new("RM-FLOUR", "Flour", ItemCategory::RawMaterial, Unit::Kilograms)
                    .with_cost_per_unit(2.0)
                    .with_quantity(10_000.0),
            )
            .unwrap();
        let dough = ledger
            .create_item(
                Item::new("SF-DOUGH", "Dough", ItemCategory::SemiFinished, Unit::Grams)
                    .with_sale_price(3.0)
                    .with_batch(
                        1000.0,
                        vec![BomComponent::per_batch(flour, 800.0, Unit::Grams)],
                    ),
            )
            .unwrap();
        World {
            ledger,
            tasks: TaskStore::new(),
            flour,
            dough,
        }
    }

    fn dough_task(world: &World, produced: f64, defected: f64) -> TaskId {
        let task_id = world
            .tasks
            .create_production(&world.ledger, world.dough, produced)
            .unwrap();
        world
            .tasks
            .record_results(task_id, produced, defected)
            .unwrap();
        task_id
    }

    #[test]
    fn finalizing_ten_dough_batches_moves_flour_and_dough() {
        let world = world();
        let task_id = dough_task(&world, 10.0, 0.0);

        let finalizer = ProductionFinalizer::new(&world.ledger, &world.tasks);
        let report = finalizer.finalize(&[task_id]).unwrap();

        assert_eq!(report.successful, vec![task_id]);
        assert!(report.is_clean());

        // 800 g x 10 batches deducted, 10 units credited.
        assert_eq!(world.ledger.item(world.flour).unwrap().quantity, 2_000.0);
        assert_eq!(world.ledger.item(world.dough).unwrap().quantity, 10.0);

        let flour_history = world.ledger.history(world.flour, None).unwrap();
        let used = flour_history.last().unwrap();
        assert_eq!(used.change, -8_000.0);
        assert_eq!(used.kind, MovementKind::Used);

        let dough_history = world.ledger.history(world.dough, None).unwrap();
        let produced = dough_history.last().unwrap();
        assert_eq!(produced.change, 10.0);
        assert_eq!(produced.kind, MovementKind::Produced);

        assert_eq!(
            world.tasks.get(task_id).unwrap().status,
            TaskStatus::Completed
        );
    }

    #[test]
    fn defects_consume_materials_but_credit_nothing() {
        let world = world();
        let task_id = dough_task(&world, 0.0, 2.0);

        let finalizer = ProductionFinalizer::new(&world.ledger, &world.tasks);
        finalizer.finalize(&[task_id]).unwrap();

        // 2 defective batches still ate 1600 g of flour.
        assert_eq!(world.ledger.item(world.flour).unwrap().quantity, 8_400.0);
        assert_eq!(world.ledger.item(world.dough).unwrap().quantity, 0.0);
        // No Produced movement was appended.
        assert_eq!(world.ledger.history(world.dough, None).unwrap().len(), 0);
    }

    #[test]
    fn a_failing_component_rolls_back_the_whole_task() {
        let world = world();
        let sugar = world
            .ledger
            .create_item(
                Item::new("RM-SUGAR", "Sugar", ItemCategory::RawMaterial, Unit::Grams)
                    .with_quantity(50.0),
            )
            .unwrap();
        world
            .ledger
            .update_components(
                world.dough,
                Some(1000.0),
                vec![
                    BomComponent::per_batch(world.flour, 800.0, Unit::Grams),
                    // 100 g per batch but only 50 g on hand.
                    BomComponent::per_batch(sugar, 100.0, Unit::Grams),
                ],
            )
            .unwrap();
        let task_id = dough_task(&world, 10.0, 0.0);

        let finalizer = ProductionFinalizer::new(&world.ledger, &world.tasks);
        let err = finalizer.finalize(&[task_id]).unwrap_err();
        match err {
            StockError::BatchAllFailed { failures } => {
                assert_eq!(failures.len(), 1);
                assert!(matches!(
                    failures[0].error,
                    StockError::InsufficientQuantity { .. }
                ));
            }
            other => panic!("expected batch-all-failed, got {other:?}"),
        }

        // Neither the flour deduction nor anything else is visible.
        assert_eq!(world.ledger.item(world.flour).unwrap().quantity, 10_000.0);
        assert_eq!(world.ledger.item(sugar).unwrap().quantity, 50.0);
        assert_eq!(world.ledger.item(world.dough).unwrap().quantity, 0.0);
        assert_eq!(
            world.tasks.get(task_id).unwrap().status,
            TaskStatus::Pending
        );
    }

    #[test]
    fn one_bad_task_does_not_block_the_batch() {
        let world = world();
        let good_one = dough_task(&world, 3.0, 0.0);
        let bad = dough_task(&world, 2.0, 0.0);
        let good_two = dough_task(&world, 4.0, 0.0);

        // Break the middle task: its frozen BOM references a removed item.
        let ghost = world
            .ledger
            .create_item(Item::new(
                "RM-GHOST",
                "Ghost",
                ItemCategory::RawMaterial,
                Unit::Grams,
            ))
            .unwrap();
        world
            .ledger
            .update_components(
                world.dough,
                Some(1000.0),
                vec![BomComponent::per_batch(ghost, 10.0, Unit::Grams)],
            )
            .unwrap();
        let bad = {
            // Re-freeze the BOM so the bad task points at the ghost item.
            world.tasks.cancel(bad).unwrap();
            let task_id = world
                .tasks
                .create_production(&world.ledger, world.dough, 2.0)
                .unwrap();
            world.tasks.record_results(task_id, 2.0, 0.0).unwrap();
            task_id
        };
        world.ledger.remove_item(ghost).unwrap();

        let finalizer = ProductionFinalizer::new(&world.ledger, &world.tasks);
        let report = finalizer.finalize(&[good_one, bad, good_two]).unwrap();

        assert_eq!(report.successful, vec![good_one, good_two]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].task_id, bad);
        assert!(matches!(
            report.failures[0].error,
            StockError::ItemNotFound(_)
        ));

        // 7 good batches: 5600 g of flour, 7 units of dough.
        assert_eq!(world.ledger.item(world.flour).unwrap().quantity, 4_400.0);
        assert_eq!(world.ledger.item(world.dough).unwrap().quantity, 7.0);
        assert_eq!(world.tasks.get(bad).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn all_failed_batch_commits_nothing() {
        let world = world();
        let missing_one = TaskId::new();
        let missing_two = TaskId::new();

        let finalizer = ProductionFinalizer::new(&world.ledger, &world.tasks);
        let err = finalizer.finalize(&[missing_one, missing_two]).unwrap_err();

        match err {
            StockError::BatchAllFailed { failures } => assert_eq!(failures.len(), 2),
            other => panic!("expected batch-all-failed, got {other:?}"),
        }
        assert_eq!(world.ledger.item(world.flour).unwrap().quantity, 10_000.0);
    }

    #[test]
    fn finalize_is_idempotent_for_completed_tasks() {
        let world = world();
        let task_id = dough_task(&world, 10.0, 0.0);
        let finalizer = ProductionFinalizer::new(&world.ledger, &world.tasks);

        finalizer.finalize(&[task_id]).unwrap();
        let flour_after = world.ledger.item(world.flour).unwrap().quantity;
        let movements_after = world.ledger.history(world.flour, None).unwrap().len();

        // Second call: reported successful, zero ledger effect.
        let report = finalizer.finalize(&[task_id]).unwrap();
        assert_eq!(report.successful, vec![task_id]);
        assert_eq!(
            world.ledger.item(world.flour).unwrap().quantity,
            flour_after
        );
        assert_eq!(
            world.ledger.history(world.flour, None).unwrap().len(),
            movements_after
        );
    }

    #[test]
    fn zero_output_production_task_completes_without_movements() {
        let world = world();
        let task_id = dough_task(&world, 0.0, 0.0);

        let finalizer = ProductionFinalizer::new(&world.ledger, &world.tasks);
        let report = finalizer.finalize(&[task_id]).unwrap();

        assert_eq!(report.successful, vec![task_id]);
        assert_eq!(world.ledger.item(world.flour).unwrap().quantity, 10_000.0);
        assert_eq!(
            world.tasks.get(task_id).unwrap().status,
            TaskStatus::Completed
        );
    }

    #[test]
    fn constant_task_completes_without_movements() {
        let world = world();
        let task_id = world
            .tasks
            .insert(ProductionTask::constant("deep clean", 1.0))
            .unwrap();

        let finalizer = ProductionFinalizer::new(&world.ledger, &world.tasks);
        let report = finalizer.finalize(&[task_id]).unwrap();

        assert_eq!(report.successful, vec![task_id]);
        assert_eq!(
            world.tasks.get(task_id).unwrap().status,
            TaskStatus::Completed
        );
    }

    #[test]
    fn missing_batch_weight_is_a_misconfiguration_failure() {
        let world = world();
        let loose = world
            .ledger
            .create_item(Item::new(
                "FP-LOOSE",
                "Loose",
                ItemCategory::Finished,
                Unit::Grams,
            ))
            .unwrap();
        world
            .ledger
            .update_components(
                loose,
                None,
                vec![BomComponent::per_batch(world.flour, 100.0, Unit::Grams)],
            )
            .unwrap();
        let task_id = world
            .tasks
            .create_production(&world.ledger, loose, 1.0)
            .unwrap();
        world.tasks.record_results(task_id, 1.0, 0.0).unwrap();

        let finalizer = ProductionFinalizer::new(&world.ledger, &world.tasks);
        match finalizer.finalize(&[task_id]).unwrap_err() {
            StockError::BatchAllFailed { failures } => {
                assert!(matches!(
                    failures[0].error,
                    StockError::MisconfiguredBom(_)
                ));
            }
            other => panic!("expected batch-all-failed, got {other:?}"),
        }
    }

    #[test]
    fn cancelled_task_cannot_be_finalized() {
        let world = world();
        let task_id = dough_task(&world, 10.0, 0.0);
        world.tasks.cancel(task_id).unwrap();
        let good = dough_task(&world, 1.0, 0.0);

        let finalizer = ProductionFinalizer::new(&world.ledger, &world.tasks);
        let report = finalizer.finalize(&[task_id, good]).unwrap();
        assert_eq!(report.successful, vec![good]);
        assert_eq!(report.failures[0].task_id, task_id);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: whether a finalize batch commits or aborts, every item's
        /// cached quantity stays equal to the sum of its recorded deltas.
        #[test]
        fn conservation_holds_after_finalize(
            produced in 0u32..20u32,
            defected in 0u32..5u32,
        ) {
            let world = world();
            let task_id = dough_task(&world, f64::from(produced), f64::from(defected));
            let finalizer = ProductionFinalizer::new(&world.ledger, &world.tasks);
            // Large runs overdraw the flour and abort; that's part of the
            // property space.
            let _ = finalizer.finalize(&[task_id]);

            for item in world.ledger.items().unwrap() {
                let recorded: f64 = world
                    .ledger
                    .history(item.id, None)
                    .unwrap()
                    .iter()
                    .map(|m| m.change)
                    .sum();
                prop_assert!((item.quantity - recorded).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn frozen_bom_shields_tasks_from_later_edits() {
        let world = world();
        let task_id = dough_task(&world, 10.0, 0.0);

        // Make the live BOM ruinously expensive after the task was created.
        world
            .ledger
            .update_components(
                world.dough,
                Some(1000.0),
                vec![BomComponent::per_batch(world.flour, 999.0, Unit::Grams)],
            )
            .unwrap();

        let finalizer = ProductionFinalizer::new(&world.ledger, &world.tasks);
        finalizer.finalize(&[task_id]).unwrap();

        // Consumption follows the frozen 800 g, not the edited 999 g.
        assert_eq!(world.ledger.item(world.flour).unwrap().quantity, 2_000.0);
    }
}
