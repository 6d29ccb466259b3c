//! End-to-end flow: items with BOMs, production tasks, finalize, snapshot,
//! daily report, stored idempotently.

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};

use batchline_core::Unit;
use batchline_costing::BomCostCalculator;
use batchline_inventory::{
    BomComponent, Item, ItemCategory, LedgerConfig, SnapshotReconstructor, StockLedger,
};
use batchline_production::{ProductionFinalizer, TaskStore};
use batchline_reporting::{DailyCostAggregator, ReportStore};

#[test]
fn bakery_day_flows_from_receipt_to_report() -> Result<()> {
    batchline_observability::init();

    let ledger = StockLedger::new(LedgerConfig::default());
    let tasks = TaskStore::new();

    let opened = Utc.with_ymd_and_hms(2025, 3, 9, 6, 0, 0).unwrap();

    // Leaf materials, stocked in base units (grams/pieces).
    let flour = ledger.create_item(
        Item::new("RM-FLOUR", "Flour", ItemCategory::RawMaterial, Unit::Kilograms)
            .with_cost_per_unit(2.0)
            .with_min_quantity(5_000.0)
            .with_created_at(opened),
    )?;
    let bag = ledger.create_item(
        Item::new("PK-BAG", "Paper Bag", ItemCategory::Packaging, Unit::Pieces)
            .with_cost_per_unit(0.05)
            .with_created_at(opened),
    )?;

    // Composite product: one batch = 1000 g, takes 800 g of flour and one bag.
    let dough = ledger.create_item(
        Item::new("SF-DOUGH", "Dough", ItemCategory::SemiFinished, Unit::Grams)
            .with_sale_price(3.0)
            .with_created_at(opened)
            .with_batch(
                1000.0,
                vec![
                    BomComponent::per_batch(flour, 800.0, Unit::Grams),
                    BomComponent::per_batch(bag, 1.0, Unit::Pieces),
                ],
            ),
    )?;

    // Morning deliveries.
    let morning = Utc.with_ymd_and_hms(2025, 3, 10, 7, 0, 0).unwrap();
    ledger.append_at(
        flour,
        20_000.0,
        batchline_inventory::MovementKind::Received,
        Some("PO-1001".into()),
        morning,
    )?;
    ledger.append_at(
        bag,
        100.0,
        batchline_inventory::MovementKind::Received,
        Some("PO-1002".into()),
        morning,
    )?;

    // One batch of dough costs 1.6 of flour plus a 0.05 bag.
    let calculator = BomCostCalculator::new(&ledger);
    let batch_cost = calculator.unit_cost(dough)?;
    assert!((batch_cost - 1.65).abs() < 1e-9);

    // Two production runs through the day.
    let noon = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
    let evening = Utc.with_ymd_and_hms(2025, 3, 10, 18, 0, 0).unwrap();

    let run_one = tasks.create_production(&ledger, dough, 10.0)?;
    tasks.start(run_one)?;
    tasks.record_results(run_one, 10.0, 0.0)?;

    let run_two = tasks.create_production(&ledger, dough, 6.0)?;
    tasks.record_results(run_two, 5.0, 1.0)?;

    let finalizer = ProductionFinalizer::new(&ledger, &tasks);
    let report = finalizer.finalize_at(&[run_one], noon)?;
    assert_eq!(report.successful, vec![run_one]);
    let report = finalizer.finalize_at(&[run_two], evening)?;
    assert_eq!(report.successful, vec![run_two]);

    // 16 batches consumed 12.8 kg of flour and 16 bags; 15 sellable units.
    assert_eq!(ledger.item(flour)?.quantity, 7_200.0);
    assert_eq!(ledger.item(bag)?.quantity, 84.0);
    assert_eq!(ledger.item(dough)?.quantity, 15.0);

    // Quantity conservation across every item.
    for item in ledger.items()? {
        let recorded: f64 = ledger
            .history(item.id, None)?
            .iter()
            .map(|m| m.change)
            .sum();
        assert!((item.quantity - recorded).abs() < 1e-9);
    }

    // Mid-day snapshot: the evening run hasn't happened yet.
    let snapshot = SnapshotReconstructor::new(&ledger);
    let mid_afternoon = Utc.with_ymd_and_hms(2025, 3, 10, 15, 0, 0).unwrap();
    assert_eq!(snapshot.quantity_at(flour, mid_afternoon)?, 12_000.0);
    assert_eq!(snapshot.quantity_at(dough, mid_afternoon)?, 10.0);
    // Before the items existed there was nothing on hand.
    assert_eq!(snapshot.quantity_at(flour, opened - Duration::days(1))?, 0.0);

    let valuation = snapshot.snapshot_all(mid_afternoon)?;
    assert!(valuation.diagnostics.is_empty());
    assert_eq!(valuation.lines.len(), 3);

    // Both runs together still leave the flour above its reorder threshold.
    assert!(ledger.items_below_minimum()?.is_empty());

    // Daily rollup: 16 batches of materials against 15 sold units.
    let aggregator = DailyCostAggregator::new(&ledger, &tasks);
    let daily = aggregator.report(noon.date_naive())?;
    assert_eq!(daily.rows.len(), 1);
    let row = &daily.rows[0];
    assert_eq!(row.produced_quantity, 15.0);
    assert_eq!(row.defected_quantity, 1.0);
    assert!((row.material_cost - 16.0 * 1.65).abs() < 1e-9);
    assert!((row.product_value - 45.0).abs() < 1e-9);
    assert!((row.gross_profit - (45.0 - 26.4)).abs() < 1e-9);

    // Recomputing and re-saving the report is idempotent.
    let reports = ReportStore::new();
    reports.upsert(daily.clone())?;
    reports.upsert(aggregator.report(noon.date_naive())?)?;
    let stored = reports.get(noon.date_naive())?.expect("report stored");
    assert_eq!(
        serde_json::to_string(&stored).unwrap(),
        serde_json::to_string(&daily).unwrap()
    );

    Ok(())
}

#[test]
fn finalize_survives_a_batch_with_one_broken_task() -> Result<()> {
    let ledger = StockLedger::new(LedgerConfig::default());
    let tasks = TaskStore::new();

    let flour = ledger.create_item(
        Item::new("RM-FLOUR", "Flour", ItemCategory::RawMaterial, Unit::Kilograms)
            .with_cost_per_unit(2.0)
            .with_quantity(50_000.0),
    )?;
    let butter = ledger.create_item(
        Item::new("RM-BUTTER", "Butter", ItemCategory::RawMaterial, Unit::Grams)
            .with_cost_per_unit(0.01)
            .with_quantity(5_000.0),
    )?;
    let dough = ledger.create_item(
        Item::new("SF-DOUGH", "Dough", ItemCategory::SemiFinished, Unit::Grams)
            .with_sale_price(3.0)
            .with_batch(
                1000.0,
                vec![BomComponent::per_batch(flour, 800.0, Unit::Grams)],
            ),
    )?;
    let pastry = ledger.create_item(
        Item::new("FP-PASTRY", "Pastry", ItemCategory::Finished, Unit::Grams)
            .with_sale_price(5.0)
            .with_batch(
                500.0,
                vec![BomComponent::per_batch(butter, 250.0, Unit::Grams)],
            ),
    )?;

    let task_one = tasks.create_production(&ledger, dough, 3.0)?;
    tasks.record_results(task_one, 3.0, 0.0)?;
    let task_two = tasks.create_production(&ledger, pastry, 2.0)?;
    tasks.record_results(task_two, 2.0, 0.0)?;
    let task_three = tasks.create_production(&ledger, dough, 4.0)?;
    tasks.record_results(task_three, 4.0, 0.0)?;

    // Break the middle task after its BOM was frozen.
    ledger.remove_item(butter)?;

    let outcome =
        ProductionFinalizer::new(&ledger, &tasks).finalize(&[task_one, task_two, task_three])?;

    assert_eq!(outcome.successful, vec![task_one, task_three]);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].task_id, task_two);

    // Only the dough runs touched the ledger: 7 batches of flour.
    assert_eq!(ledger.item(flour)?.quantity, 50_000.0 - 5_600.0);
    assert_eq!(ledger.item(dough)?.quantity, 7.0);
    assert_eq!(ledger.item(pastry)?.quantity, 0.0);

    Ok(())
}
