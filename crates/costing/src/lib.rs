//! `batchline-costing` — bill-of-materials cost rollup.
//!
//! Computes what one standard batch of a composite item costs by resolving
//! each component against the ledger, normalizing units, and rolling nested
//! semi-finished components up recursively. Malformed data degrades to a
//! logged zero, never to NaN in downstream aggregates.

pub mod bom;

pub use bom::{BomCostCalculator, ComponentCost, percentage_of_batch};
