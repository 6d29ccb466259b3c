//! `batchline-production` — production tasks and ledger finalization.
//!
//! A production task carries a frozen copy of the BOM it will consume.
//! Finalization converts completed work into committed ledger movements with
//! task-level atomicity and batch-level partial success: one malformed task
//! never blocks the rest of the day's run.

pub mod finalize;
pub mod store;
pub mod task;

pub use finalize::{FinalizeReport, MAX_REPORTED_FAILURES, ProductionFinalizer};
pub use store::TaskStore;
pub use task::{BomSnapshot, ProductionTask, TaskKind, TaskStatus};
