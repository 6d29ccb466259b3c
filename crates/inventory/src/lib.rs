//! `batchline-inventory` — items, the stock ledger and point-in-time snapshots.
//!
//! The ledger is the single source of truth for quantity changes: every
//! mutation goes through an append that writes the immutable movement and the
//! cached item quantity together. Snapshots reconstruct historical quantities
//! by replaying movement deltas backward from the current quantity.

pub mod item;
pub mod ledger;
pub mod movement;
pub mod snapshot;

pub use item::{BomComponent, BomQuantity, Item, ItemCategory};
pub use ledger::{DeductionPolicy, LedgerConfig, LedgerTransaction, Savepoint, StockLedger};
pub use movement::{MovementKind, StockMovement};
pub use snapshot::{Snapshot, SnapshotDiagnostic, SnapshotLine, SnapshotReconstructor};
