//! `batchline-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! strongly-typed identifiers, the engine error taxonomy, and the explicit
//! unit-of-measure model shared by the ledger, costing and production crates.

pub mod error;
pub mod id;
pub mod unit;

pub use error::{StockError, StockResult, TaskFailure};
pub use id::{ItemId, MovementId, TaskId};
pub use unit::Unit;
