use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use batchline_core::{ItemId, MovementId};

/// Why a quantity changed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    Received,
    Used,
    Produced,
    Sold,
    /// Manual correction after a physical stock count.
    StockCount,
    Spilled,
}

/// Immutable ledger entry: one signed quantity change for one item.
///
/// Created only by append; never updated or deleted. The ordered movement
/// sequence plus the item's current quantity reconstructs the quantity at any
/// past instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
    /// Positive = increase, negative = decrease. Never zero.
    pub change: f64,
    pub kind: MovementKind,
    /// Free-text batch/reference tag.
    pub reference: Option<String>,
}
