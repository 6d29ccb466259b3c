use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use batchline_core::{ItemId, MovementId, StockError, StockResult};

use crate::item::{BomComponent, Item};
use crate::movement::{MovementKind, StockMovement};

/// Tolerance for floating-point quantity comparisons.
pub(crate) const QTY_EPSILON: f64 = 1e-9;

/// What happens when a deduction would drive a quantity below zero.
///
/// One policy object, applied at the single choke point for every quantity
/// change; call sites never decide this individually.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum DeductionPolicy {
    /// Fail the operation with `InsufficientQuantity`.
    #[default]
    Reject,
    /// Clamp the applied change so the quantity lands on zero, record the
    /// clamped change, and warn. The recorded change always equals the
    /// applied delta, so quantity stays the sum of all recorded deltas.
    Floor,
}

/// Ledger configuration, supplied when the store is opened.
#[derive(Debug, Copy, Clone, Default)]
pub struct LedgerConfig {
    pub deduction_policy: DeductionPolicy,
}

#[derive(Debug, Default)]
pub(crate) struct LedgerState {
    pub(crate) items: HashMap<ItemId, Item>,
    pub(crate) movements: HashMap<ItemId, Vec<StockMovement>>,
}

impl LedgerState {
    pub(crate) fn item(&self, item_id: ItemId) -> StockResult<&Item> {
        self.items
            .get(&item_id)
            .ok_or(StockError::ItemNotFound(item_id))
    }
}

/// Resolve the delta that will actually be applied for a requested change.
fn resolve_change(
    item_id: ItemId,
    available: f64,
    change: f64,
    policy: DeductionPolicy,
) -> StockResult<f64> {
    if change >= 0.0 || available + change >= -QTY_EPSILON {
        return Ok(change);
    }
    match policy {
        DeductionPolicy::Reject => Err(StockError::InsufficientQuantity {
            item_id,
            requested: -change,
            available,
        }),
        DeductionPolicy::Floor => {
            if available <= QTY_EPSILON {
                return Err(StockError::InsufficientQuantity {
                    item_id,
                    requested: -change,
                    available,
                });
            }
            warn!(
                %item_id,
                requested = -change,
                available,
                "deduction clamped to available stock"
            );
            Ok(-available)
        }
    }
}

/// Walk the stored component graph from `components`; reaching `item_id`
/// means the candidate BOM would close a cycle.
fn ensure_acyclic(
    state: &LedgerState,
    item_id: ItemId,
    components: &[BomComponent],
) -> StockResult<()> {
    let mut stack: Vec<ItemId> = components.iter().map(|c| c.item_id).collect();
    let mut visited: HashSet<ItemId> = HashSet::new();
    while let Some(current) = stack.pop() {
        if current == item_id {
            return Err(StockError::cyclic_bom(format!(
                "item {item_id} transitively includes itself"
            )));
        }
        if !visited.insert(current) {
            continue;
        }
        if let Some(next) = state.items.get(&current) {
            stack.extend(next.components.iter().map(|c| c.item_id));
        }
    }
    Ok(())
}

/// Append-only stock ledger plus the item records it governs.
///
/// All state lives behind one `RwLock`. Every mutation, whether a single
/// append or a whole finalize batch, runs under the write lock, which
/// serializes per-item read-modify-write; readers take the read lock.
#[derive(Debug, Default)]
pub struct StockLedger {
    state: RwLock<LedgerState>,
    config: LedgerConfig,
}

impl StockLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            config,
        }
    }

    pub fn config(&self) -> LedgerConfig {
        self.config
    }

    pub(crate) fn read(&self) -> StockResult<RwLockReadGuard<'_, LedgerState>> {
        self.state
            .read()
            .map_err(|_| StockError::ledger_inconsistency("ledger lock poisoned"))
    }

    fn write(&self) -> StockResult<RwLockWriteGuard<'_, LedgerState>> {
        self.state
            .write()
            .map_err(|_| StockError::ledger_inconsistency("ledger lock poisoned"))
    }

    /// Insert a new item. A non-zero starting quantity is recorded as an
    /// opening stock-count movement so the quantity cache stays equal to the
    /// sum of recorded deltas from day one.
    pub fn create_item(&self, item: Item) -> StockResult<ItemId> {
        item.validate()?;
        let mut state = self.write()?;
        if state.items.contains_key(&item.id) {
            return Err(StockError::validation(format!(
                "item already exists: {}",
                item.sku
            )));
        }
        for component in &item.components {
            state.item(component.item_id)?;
        }
        ensure_acyclic(&state, item.id, &item.components)?;

        let item_id = item.id;
        let mut movements = Vec::new();
        if item.quantity != 0.0 {
            movements.push(StockMovement {
                id: MovementId::new(),
                item_id,
                occurred_at: item.created_at,
                change: item.quantity,
                kind: MovementKind::StockCount,
                reference: Some("opening balance".to_string()),
            });
        }
        state.movements.insert(item_id, movements);
        state.items.insert(item_id, item);
        Ok(item_id)
    }

    /// Remove an item and its movement log. Other items' BOMs may still
    /// reference it; consumers treat the dangling reference as a per-use
    /// error.
    pub fn remove_item(&self, item_id: ItemId) -> StockResult<Item> {
        let mut state = self.write()?;
        let item = state
            .items
            .remove(&item_id)
            .ok_or(StockError::ItemNotFound(item_id))?;
        state.movements.remove(&item_id);
        Ok(item)
    }

    pub fn item(&self, item_id: ItemId) -> StockResult<Item> {
        Ok(self.read()?.item(item_id)?.clone())
    }

    /// All items, ordered by SKU for deterministic listings.
    pub fn items(&self) -> StockResult<Vec<Item>> {
        let state = self.read()?;
        let mut items: Vec<Item> = state.items.values().cloned().collect();
        items.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(items)
    }

    pub fn items_below_minimum(&self) -> StockResult<Vec<Item>> {
        Ok(self
            .items()?
            .into_iter()
            .filter(Item::is_below_minimum)
            .collect())
    }

    /// Replace an item's batch weight and component list. Runs the same
    /// referential and cycle checks as creation.
    pub fn update_components(
        &self,
        item_id: ItemId,
        standard_batch_weight: Option<f64>,
        components: Vec<BomComponent>,
    ) -> StockResult<()> {
        if let Some(weight) = standard_batch_weight {
            if !weight.is_finite() || weight <= 0.0 {
                return Err(StockError::validation(format!(
                    "standard_batch_weight must be positive and finite, got {weight}"
                )));
            }
        }
        let mut state = self.write()?;
        state.item(item_id)?;
        for component in &components {
            if component.item_id == item_id {
                return Err(StockError::cyclic_bom(format!(
                    "item {item_id} lists itself as a component"
                )));
            }
            component.quantity.validate()?;
            state.item(component.item_id)?;
        }
        ensure_acyclic(&state, item_id, &components)?;
        let item = state
            .items
            .get_mut(&item_id)
            .ok_or(StockError::ItemNotFound(item_id))?;
        item.standard_batch_weight = standard_batch_weight;
        item.components = components;
        Ok(())
    }

    pub fn set_cost(&self, item_id: ItemId, cost_per_unit: f64) -> StockResult<()> {
        if !cost_per_unit.is_finite() || cost_per_unit < 0.0 {
            return Err(StockError::validation(format!(
                "cost_per_unit must be non-negative and finite, got {cost_per_unit}"
            )));
        }
        let mut state = self.write()?;
        let item = state
            .items
            .get_mut(&item_id)
            .ok_or(StockError::ItemNotFound(item_id))?;
        item.cost_per_unit = cost_per_unit;
        Ok(())
    }

    pub fn set_sale_price(&self, item_id: ItemId, sale_price: f64) -> StockResult<()> {
        if !sale_price.is_finite() || sale_price < 0.0 {
            return Err(StockError::validation(format!(
                "sale_price must be non-negative and finite, got {sale_price}"
            )));
        }
        let mut state = self.write()?;
        let item = state
            .items
            .get_mut(&item_id)
            .ok_or(StockError::ItemNotFound(item_id))?;
        item.sale_price = sale_price;
        Ok(())
    }

    /// Append a movement stamped with the current time.
    pub fn append(
        &self,
        item_id: ItemId,
        change: f64,
        kind: MovementKind,
        reference: Option<String>,
    ) -> StockResult<MovementId> {
        self.append_at(item_id, change, kind, reference, Utc::now())
    }

    /// Append a movement with an explicit business timestamp.
    ///
    /// The movement record and the cached quantity update happen under one
    /// write-lock scope: either both are visible afterwards or neither is.
    pub fn append_at(
        &self,
        item_id: ItemId,
        change: f64,
        kind: MovementKind,
        reference: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> StockResult<MovementId> {
        validate_change(change)?;
        let mut state = self.write()?;
        let available = state.item(item_id)?.quantity;
        let applied = resolve_change(item_id, available, change, self.config.deduction_policy)?;

        let movement = StockMovement {
            id: MovementId::new(),
            item_id,
            occurred_at,
            change: applied,
            kind,
            reference,
        };
        let movement_id = movement.id;
        debug!(%item_id, change = applied, ?kind, "movement appended");
        state.movements.entry(item_id).or_default().push(movement);
        let item = state
            .items
            .get_mut(&item_id)
            .ok_or(StockError::ItemNotFound(item_id))?;
        item.quantity = (item.quantity + applied).max(0.0);
        Ok(movement_id)
    }

    /// Movements for one item ordered by timestamp ascending, optionally
    /// restricted to those at or after `since`. Restartable: plain slice
    /// iteration over the returned buffer.
    pub fn history(
        &self,
        item_id: ItemId,
        since: Option<DateTime<Utc>>,
    ) -> StockResult<Vec<StockMovement>> {
        let state = self.read()?;
        state.item(item_id)?;
        let mut movements: Vec<StockMovement> = state
            .movements
            .get(&item_id)
            .map(|m| m.as_slice())
            .unwrap_or_default()
            .iter()
            .filter(|m| since.is_none_or(|s| m.occurred_at >= s))
            .cloned()
            .collect();
        movements.sort_by_key(|m| (m.occurred_at, m.id));
        Ok(movements)
    }

    /// Open a unit of work. The returned transaction holds the write lock for
    /// its whole lifetime; staged writes become visible only on commit.
    pub fn begin(&self) -> StockResult<LedgerTransaction<'_>> {
        Ok(LedgerTransaction {
            guard: self.write()?,
            policy: self.config.deduction_policy,
            staged: Vec::new(),
            deltas: HashMap::new(),
        })
    }
}

fn validate_change(change: f64) -> StockResult<()> {
    if change == 0.0 {
        return Err(StockError::invalid_movement("change cannot be zero"));
    }
    if !change.is_finite() {
        return Err(StockError::invalid_movement(format!(
            "change must be finite, got {change}"
        )));
    }
    Ok(())
}

/// Rollback point inside a [`LedgerTransaction`].
#[derive(Debug)]
pub struct Savepoint {
    staged_len: usize,
    deltas: HashMap<ItemId, f64>,
}

/// Unit of work over the ledger: stages movements and quantity deltas, then
/// commits them all at once. Dropping the transaction without committing
/// discards every staged write.
#[derive(Debug)]
pub struct LedgerTransaction<'a> {
    guard: RwLockWriteGuard<'a, LedgerState>,
    policy: DeductionPolicy,
    staged: Vec<StockMovement>,
    deltas: HashMap<ItemId, f64>,
}

impl LedgerTransaction<'_> {
    /// Mark a rollback point covering everything staged so far.
    pub fn savepoint(&self) -> Savepoint {
        Savepoint {
            staged_len: self.staged.len(),
            deltas: self.deltas.clone(),
        }
    }

    /// Discard everything staged after `savepoint`.
    pub fn rollback_to(&mut self, savepoint: Savepoint) {
        self.staged.truncate(savepoint.staged_len);
        self.deltas = savepoint.deltas;
    }

    pub fn item(&self, item_id: ItemId) -> StockResult<Item> {
        Ok(self.guard.item(item_id)?.clone())
    }

    /// Committed quantity plus every staged delta for the item.
    pub fn effective_quantity(&self, item_id: ItemId) -> StockResult<f64> {
        let committed = self.guard.item(item_id)?.quantity;
        Ok(committed + self.deltas.get(&item_id).copied().unwrap_or(0.0))
    }

    /// Stage one movement. Validation (existence, policy) runs against the
    /// effective quantity, so earlier staged deductions are taken into
    /// account.
    pub fn stage(
        &mut self,
        item_id: ItemId,
        change: f64,
        kind: MovementKind,
        reference: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> StockResult<MovementId> {
        validate_change(change)?;
        let available = self.effective_quantity(item_id)?;
        let applied = resolve_change(item_id, available, change, self.policy)?;

        let movement = StockMovement {
            id: MovementId::new(),
            item_id,
            occurred_at,
            change: applied,
            kind,
            reference,
        };
        let movement_id = movement.id;
        self.staged.push(movement);
        *self.deltas.entry(item_id).or_insert(0.0) += applied;
        Ok(movement_id)
    }

    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }

    /// Apply every staged write. Staging already validated each movement, so
    /// commit cannot leave a partial batch behind.
    pub fn commit(mut self) -> usize {
        let count = self.staged.len();
        for movement in self.staged.drain(..) {
            self.guard
                .movements
                .entry(movement.item_id)
                .or_default()
                .push(movement);
        }
        for (item_id, delta) in self.deltas.drain() {
            if let Some(item) = self.guard.items.get_mut(&item_id) {
                item.quantity = (item.quantity + delta).max(0.0);
            }
        }
        debug!(movements = count, "ledger transaction committed");
        count
    }
}
