//! Engine error model.

use thiserror::Error;

use crate::id::{ItemId, TaskId};

/// Result type used across the engine.
pub type StockResult<T> = Result<T, StockError>;

/// One task's failure inside a finalize batch.
///
/// Collected into the multi-status result rather than thrown; see
/// [`StockError::BatchAllFailed`] for the zero-success case.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFailure {
    pub task_id: TaskId,
    pub error: StockError,
}

/// Engine-level error.
///
/// Keep this focused on deterministic, business/domain failures. Per-task
/// errors during a batch finalize are collected into the multi-status result,
/// not propagated through this enum.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StockError {
    /// The referenced item does not exist.
    #[error("item not found: {0}")]
    ItemNotFound(ItemId),

    /// The referenced production task does not exist.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// A ledger movement failed validation (zero or non-finite change).
    #[error("invalid movement: {0}")]
    InvalidMovement(String),

    /// A bill of materials directly or transitively includes its own parent.
    #[error("cyclic bill of materials: {0}")]
    CyclicBom(String),

    /// A composite item is missing its batch weight or component list.
    #[error("misconfigured bill of materials: {0}")]
    MisconfiguredBom(String),

    /// Replaying the ledger produced a negative or non-finite quantity.
    #[error("ledger inconsistency: {0}")]
    LedgerInconsistency(String),

    /// A deduction would drive the item's quantity below zero.
    #[error("insufficient quantity for {item_id}: requested {requested}, available {available}")]
    InsufficientQuantity {
        item_id: ItemId,
        requested: f64,
        available: f64,
    },

    /// Every task in a finalize batch failed; nothing was committed.
    #[error("all {} tasks in the batch failed", .failures.len())]
    BatchAllFailed { failures: Vec<TaskFailure> },

    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),
}

impl StockError {
    pub fn invalid_movement(msg: impl Into<String>) -> Self {
        Self::InvalidMovement(msg.into())
    }

    pub fn cyclic_bom(msg: impl Into<String>) -> Self {
        Self::CyclicBom(msg.into())
    }

    pub fn misconfigured_bom(msg: impl Into<String>) -> Self {
        Self::MisconfiguredBom(msg.into())
    }

    pub fn ledger_inconsistency(msg: impl Into<String>) -> Self {
        Self::LedgerInconsistency(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
