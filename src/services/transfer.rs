//! Stock transfers between two locations of an item.
//!
//! A transfer is proposed first (pure validation against the current item,
//! yielding a [`TransferPlan`]) and committed afterwards. Commit re-validates
//! against the item as it is then, so a plan that went stale while the user
//! was confirming is rejected with `StaleStock` rather than over-drawing the
//! source. The last committed transfer or batch can be undone within the
//! undo window.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};
use validator::Validate;

use crate::errors::ServiceError;
use crate::metrics::{TRANSFERS_TOTAL, TRANSFER_FAILURES, TRANSFER_UNDOS};
use crate::models::inventory::paths;
use crate::models::{InventoryItem, InventoryLogEntry, LocationStock, LogType, StockLevels};
use crate::services::ledger::{raised_qty, Ledger, Mutation, Revert};
use crate::services::status::{classify, StockStatus};
use crate::store::FieldUpdate;

pub const DEFAULT_UNDO_WINDOW: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    #[validate(length(min = 1, message = "Item ID cannot be empty"))]
    pub item_id: String,

    #[validate(length(min = 1, message = "From location cannot be empty"))]
    pub from: String,

    #[validate(length(min = 1, message = "To location cannot be empty"))]
    pub to: String,

    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i64,

    #[serde(default)]
    pub reason: String,
}

/// Quantity at one end of a transfer, before and after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationChange {
    pub location: String,
    pub before: i64,
    pub after: i64,
    /// Classification of `after`, for the preview.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_after: Option<StockStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPlan {
    pub item_id: String,
    pub display_name: String,
    pub quantity: i64,
    #[serde(default)]
    pub reason: String,
    pub from: LocationChange,
    pub to: LocationChange,
    #[serde(default)]
    pub creates_destination: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchLine {
    pub item_id: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub from: String,
    pub to: String,
    pub lines: Vec<BatchLine>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPlan {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub reason: String,
    pub transfers: Vec<TransferPlan>,
    pub total_quantity: i64,
}

/// One committed (or reverted) movement of stock for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedMove {
    pub item_id: String,
    pub display_name: String,
    pub from: String,
    pub to: String,
    pub quantity: i64,
    pub before_from: i64,
    pub before_to: i64,
    pub after_from: i64,
    pub after_to: i64,
    pub created_destination: bool,
    pub log_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub moves: Vec<CommittedMove>,
    pub total_quantity: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoOutcome {
    /// Reverse movements that were applied, one per item.
    pub reverted: Vec<CommittedMove>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoStatus {
    pub available: bool,
    pub remaining_secs: u64,
    pub items: usize,
}

#[derive(Debug, Clone)]
struct UndoRecord {
    armed_at: Instant,
    moves: Vec<CommittedMove>,
    reason: String,
}

pub struct TransferEngine {
    ledger: Ledger,
    undo_window: Duration,
    last: Mutex<Option<UndoRecord>>,
}

impl TransferEngine {
    pub fn new(ledger: Ledger, undo_window: Duration) -> Self {
        Self {
            ledger,
            undo_window,
            last: Mutex::new(None),
        }
    }

    /// Validates a transfer against the current item. Nothing is written.
    #[instrument(skip(self, request), fields(item_id = %request.item_id, from = %request.from, to = %request.to, quantity = request.quantity))]
    pub async fn propose_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<TransferPlan, ServiceError> {
        let result = self.plan(request).await;
        if let Err(e) = &result {
            TRANSFER_FAILURES.with_label_values(&[e.code()]).inc();
        }
        result
    }

    async fn plan(&self, request: &TransferRequest) -> Result<TransferPlan, ServiceError> {
        request.validate()?;
        check_endpoints(&request.from, &request.to)?;
        let (item, _) = self.ledger.load(&request.item_id).await?;
        plan_for(&item, request)
    }

    /// Commits a plan. The item is re-read; if the source no longer holds
    /// the planned quantity the commit is rejected as stale.
    #[instrument(skip(self, plan), fields(item_id = %plan.item_id, quantity = plan.quantity))]
    pub async fn commit_transfer(
        &self,
        plan: &TransferPlan,
        reason: &str,
        actor: Option<&str>,
    ) -> Result<CommittedMove, ServiceError> {
        let result = self.commit_one(plan, reason, actor).await;
        match &result {
            Ok(committed) => {
                TRANSFERS_TOTAL.inc();
                info!(
                    item = %committed.display_name,
                    from = %committed.from,
                    to = %committed.to,
                    quantity = committed.quantity,
                    "transfer committed"
                );
                self.arm_undo(vec![committed.clone()], reason).await;
            }
            Err(e) => {
                TRANSFER_FAILURES.with_label_values(&[e.code()]).inc();
                warn!(error = %e, "transfer commit rejected");
            }
        }
        result
    }

    async fn commit_one(
        &self,
        plan: &TransferPlan,
        reason: &str,
        actor: Option<&str>,
    ) -> Result<CommittedMove, ServiceError> {
        if plan.quantity <= 0 {
            return Err(ServiceError::validation("Quantity must be at least 1"));
        }
        check_endpoints(&plan.from.location, &plan.to.location)?;
        let committed = self
            .ledger
            .mutate(&plan.item_id, |item| transfer_mutation(item, plan, reason, actor))
            .await?;
        let mut moved = committed.outcome;
        if let Some(entry) = committed.entries.first() {
            moved.log_id = entry.id.clone();
        }
        Ok(moved)
    }

    /// Validates a multi-item transfer between the same two locations.
    /// Zero-quantity lines are skipped.
    #[instrument(skip(self, request), fields(from = %request.from, to = %request.to, lines = request.lines.len()))]
    pub async fn propose_batch(&self, request: &BatchRequest) -> Result<BatchPlan, ServiceError> {
        check_endpoints(&request.from, &request.to)?;

        let mut seen = HashSet::new();
        let mut transfers = Vec::new();
        for line in &request.lines {
            if line.quantity < 0 {
                return Err(ServiceError::validation(format!(
                    "Quantity for {} must not be negative",
                    line.item_id
                )));
            }
            if line.quantity == 0 {
                continue;
            }
            if !seen.insert(line.item_id.as_str()) {
                return Err(ServiceError::validation(format!(
                    "Item {} selected more than once",
                    line.item_id
                )));
            }
            let single = TransferRequest {
                item_id: line.item_id.clone(),
                from: request.from.clone(),
                to: request.to.clone(),
                quantity: line.quantity,
                reason: request.reason.clone(),
            };
            transfers.push(self.propose_transfer(&single).await?);
        }
        if transfers.is_empty() {
            return Err(ServiceError::validation("No items selected for transfer"));
        }

        let total_quantity = transfers.iter().map(|t| t.quantity).sum();
        Ok(BatchPlan {
            from: request.from.clone(),
            to: request.to.clone(),
            reason: request.reason.clone(),
            transfers,
            total_quantity,
        })
    }

    /// Commits every line of a batch. If any line fails, lines already
    /// committed are reverted and the error is returned.
    #[instrument(skip(self, plan), fields(from = %plan.from, to = %plan.to, lines = plan.transfers.len()))]
    pub async fn commit_batch(
        &self,
        plan: &BatchPlan,
        actor: Option<&str>,
    ) -> Result<BatchOutcome, ServiceError> {
        if plan.transfers.is_empty() {
            return Err(ServiceError::validation("No items selected for transfer"));
        }
        let mut moves: Vec<CommittedMove> = Vec::with_capacity(plan.transfers.len());
        for line in &plan.transfers {
            if line.from.location != plan.from || line.to.location != plan.to {
                return Err(ServiceError::validation(
                    "Every batch line must use the batch locations",
                ));
            }
        }

        for line in &plan.transfers {
            match self.commit_one(line, &plan.reason, actor).await {
                Ok(moved) => {
                    TRANSFERS_TOTAL.inc();
                    moves.push(moved);
                }
                Err(e) => {
                    TRANSFER_FAILURES.with_label_values(&[e.code()]).inc();
                    warn!(item_id = %line.item_id, error = %e, committed = moves.len(), "batch line failed, rolling back");
                    for done in moves.iter().rev() {
                        if let Err(revert_err) = self
                            .revert_move(done, "Batch transfer rolled back", actor)
                            .await
                        {
                            error!(item_id = %done.item_id, error = %revert_err, "batch rollback failed");
                        }
                    }
                    return Err(e);
                }
            }
        }

        info!(lines = moves.len(), total = plan.total_quantity, "batch transfer committed");
        self.arm_undo(moves.clone(), &plan.reason).await;
        Ok(BatchOutcome {
            total_quantity: moves.iter().map(|m| m.quantity).sum(),
            moves,
        })
    }

    /// Reverts the last committed transfer or batch if its window is still
    /// open. Returns `None` when there is nothing to undo.
    #[instrument(skip(self))]
    pub async fn undo_last_transfer(
        &self,
        actor: Option<&str>,
    ) -> Result<Option<UndoOutcome>, ServiceError> {
        let record = {
            let mut slot = self.last.lock().await;
            match slot.take() {
                Some(record) if record.armed_at.elapsed() < self.undo_window => record,
                _ => return Ok(None),
            }
        };

        let reason = if record.reason.trim().is_empty() {
            "Transfer undone".to_string()
        } else {
            format!("Undo: {}", record.reason.trim())
        };
        let mut reverted = Vec::with_capacity(record.moves.len());
        for (index, moved) in record.moves.iter().enumerate().rev() {
            match self.revert_move(moved, &reason, actor).await {
                Ok(back) => reverted.push(back),
                Err(e) => {
                    // Keep what is left undoable for the rest of the window.
                    let mut slot = self.last.lock().await;
                    if slot.is_none() {
                        *slot = Some(UndoRecord {
                            armed_at: record.armed_at,
                            moves: record.moves[..=index].to_vec(),
                            reason: record.reason.clone(),
                        });
                    }
                    return Err(e);
                }
            }
        }
        info!(lines = reverted.len(), "transfer undone");
        Ok(Some(UndoOutcome { reverted }))
    }

    pub async fn undo_status(&self) -> UndoStatus {
        let slot = self.last.lock().await;
        match slot.as_ref() {
            Some(record) => {
                let remaining = self.undo_window.saturating_sub(record.armed_at.elapsed());
                UndoStatus {
                    available: !remaining.is_zero(),
                    remaining_secs: remaining.as_secs_f64().ceil() as u64,
                    items: record.moves.len(),
                }
            }
            None => UndoStatus {
                available: false,
                remaining_secs: 0,
                items: 0,
            },
        }
    }

    async fn arm_undo(&self, moves: Vec<CommittedMove>, reason: &str) {
        *self.last.lock().await = Some(UndoRecord {
            armed_at: Instant::now(),
            moves,
            reason: reason.to_string(),
        });
    }

    async fn revert_move(
        &self,
        moved: &CommittedMove,
        reason: &str,
        actor: Option<&str>,
    ) -> Result<CommittedMove, ServiceError> {
        let committed = self
            .ledger
            .mutate(&moved.item_id, |item| revert_mutation(item, moved, reason, actor))
            .await?;
        TRANSFER_UNDOS.inc();
        let mut back = committed.outcome;
        if let Some(entry) = committed.entries.first() {
            back.log_id = entry.id.clone();
        }
        Ok(back)
    }
}

fn check_endpoints(from: &str, to: &str) -> Result<(), ServiceError> {
    if from.trim().is_empty() || to.trim().is_empty() {
        return Err(ServiceError::validation("Location names cannot be empty"));
    }
    if from == to {
        return Err(ServiceError::validation(
            "Cannot transfer stock to the same location",
        ));
    }
    Ok(())
}

fn plan_for(item: &InventoryItem, request: &TransferRequest) -> Result<TransferPlan, ServiceError> {
    let available = item.qty_at(&request.from).ok_or_else(|| {
        ServiceError::not_found(format!(
            "{} has no stock entry at {}",
            item.display_name, request.from
        ))
    })?;
    if request.quantity > available {
        return Err(ServiceError::InsufficientStock {
            item: item.display_name.clone(),
            location: request.from.clone(),
            available,
            requested: request.quantity,
        });
    }
    let before_to = item.qty_at(&request.to);
    let after_from = available - request.quantity;
    let after_to = raised_qty(
        before_to.unwrap_or(0),
        request.quantity,
        &item.display_name,
        &request.to,
    )?;
    let to_levels = match before_to {
        Some(_) => item.effective_levels(&request.to),
        None => inherited_levels(item, &request.from),
    };

    Ok(TransferPlan {
        item_id: item.id.clone(),
        display_name: item.display_name.clone(),
        quantity: request.quantity,
        reason: request.reason.clone(),
        from: LocationChange {
            location: request.from.clone(),
            before: available,
            after: after_from,
            status_after: Some(classify(after_from, item.effective_levels(&request.from))),
        },
        to: LocationChange {
            location: request.to.clone(),
            before: before_to.unwrap_or(0),
            after: after_to,
            status_after: Some(classify(after_to, to_levels.or(item.default_levels()))),
        },
        creates_destination: before_to.is_none(),
    })
}

/// Levels for a location created by a transfer: item defaults, else the
/// source location's own levels.
fn inherited_levels(item: &InventoryItem, source: &str) -> StockLevels {
    let source_levels = item
        .locations
        .get(source)
        .map(LocationStock::levels)
        .unwrap_or_default();
    item.default_levels().or(source_levels)
}

fn transfer_mutation(
    item: &InventoryItem,
    plan: &TransferPlan,
    reason: &str,
    actor: Option<&str>,
) -> Result<Mutation<CommittedMove>, ServiceError> {
    let from = &plan.from.location;
    let to = &plan.to.location;
    let quantity = plan.quantity;

    let available = item.qty_at(from).ok_or_else(|| {
        ServiceError::not_found(format!("{} has no stock entry at {}", item.display_name, from))
    })?;
    if available < quantity {
        return Err(ServiceError::StaleStock {
            item: item.display_name.clone(),
            location: from.clone(),
            planned: plan.from.before,
            available,
            requested: quantity,
        });
    }

    let before_to = item.qty_at(to);
    let after_from = available - quantity;
    let after_to = raised_qty(before_to.unwrap_or(0), quantity, &item.display_name, to)?;

    let mut updates = vec![FieldUpdate::set(paths::qty(from), after_from)?];
    match before_to {
        Some(_) => updates.push(FieldUpdate::set(paths::qty(to), after_to)?),
        None => updates.push(FieldUpdate::set(
            paths::location(to),
            LocationStock::new(after_to, inherited_levels(item, from)),
        )?),
    }

    let entry = InventoryLogEntry::movement(
        LogType::Transfer,
        &item.id,
        &item.display_name,
        from,
        to,
        quantity,
        available,
        before_to.unwrap_or(0),
        after_to,
    )
    .with_reason(reason)
    .with_actor(actor);

    Ok(Mutation {
        updates,
        revert: Revert::Quantities {
            deltas: vec![(from.clone(), -quantity), (to.clone(), quantity)],
            created: before_to.is_none().then(|| to.clone()).into_iter().collect(),
        },
        audit: vec![entry],
        outcome: CommittedMove {
            item_id: item.id.clone(),
            display_name: item.display_name.clone(),
            from: from.clone(),
            to: to.clone(),
            quantity,
            before_from: available,
            before_to: before_to.unwrap_or(0),
            after_from,
            after_to,
            created_destination: before_to.is_none(),
            log_id: String::new(),
        },
    })
}

/// Puts both ends of a committed move back to their pre-transfer
/// quantities. Changes made at either location since the commit are
/// overwritten; a destination the transfer created is removed again.
fn revert_mutation(
    item: &InventoryItem,
    moved: &CommittedMove,
    reason: &str,
    actor: Option<&str>,
) -> Result<Mutation<CommittedMove>, ServiceError> {
    let at_from = item.qty_at(&moved.from);
    let at_to = item.qty_at(&moved.to);

    let mut updates = Vec::with_capacity(2);
    match at_from {
        Some(_) => updates.push(FieldUpdate::set(paths::qty(&moved.from), moved.before_from)?),
        // Source entry was removed after the transfer; bring it back.
        None => updates.push(FieldUpdate::set(
            paths::location(&moved.from),
            LocationStock::new(moved.before_from, inherited_levels(item, &moved.to)),
        )?),
    }
    let after_to = if moved.created_destination {
        updates.push(FieldUpdate::Delete(paths::location(&moved.to)));
        0
    } else {
        match at_to {
            Some(_) => updates.push(FieldUpdate::set(paths::qty(&moved.to), moved.before_to)?),
            None => updates.push(FieldUpdate::set(
                paths::location(&moved.to),
                LocationStock::new(moved.before_to, inherited_levels(item, &moved.from)),
            )?),
        }
        moved.before_to
    };

    let mut restore = Vec::with_capacity(2);
    for location in [&moved.from, &moved.to] {
        match item.locations.get(location) {
            Some(stock) => restore.push(FieldUpdate::set(paths::location(location), stock)?),
            None => restore.push(FieldUpdate::Delete(paths::location(location))),
        }
    }

    let entry = InventoryLogEntry::movement(
        LogType::TransferUndo,
        &item.id,
        &item.display_name,
        &moved.to,
        &moved.from,
        moved.quantity,
        at_to.unwrap_or(0),
        at_from.unwrap_or(0),
        moved.before_from,
    )
    .with_reason(reason)
    .with_actor(actor);

    Ok(Mutation {
        updates,
        revert: Revert::Restore(restore),
        audit: vec![entry],
        outcome: CommittedMove {
            item_id: item.id.clone(),
            display_name: item.display_name.clone(),
            from: moved.to.clone(),
            to: moved.from.clone(),
            quantity: moved.quantity,
            before_from: at_to.unwrap_or(0),
            before_to: at_from.unwrap_or(0),
            after_from: after_to,
            after_to: moved.before_from,
            created_destination: at_from.is_none(),
            log_id: String::new(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::inventory::INVENTORY_COLLECTION;
    use crate::models::inventory_log::INVENTORY_LOGS_COLLECTION;
    use crate::services::inventory::InventoryService;
    use crate::store::{DocumentStore, InMemoryStore, Precondition, Query};
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::sync::Arc;

    async fn engine() -> (Arc<InMemoryStore>, TransferEngine) {
        let store = Arc::new(InMemoryStore::new());
        store
            .create(
                INVENTORY_COLLECTION,
                Some("bandages"),
                json!({
                    "displayName": "Bandages",
                    "defaultPar": 8, "defaultMin": 3, "defaultMax": 20,
                    "locations": {
                        "StationA": {"qty": 10, "par": 8, "min": 3, "max": 20},
                        "StationB": {"qty": 2, "par": 8, "min": 3, "max": 20}
                    }
                }),
            )
            .await
            .unwrap();
        store
            .create(
                INVENTORY_COLLECTION,
                Some("gauze"),
                json!({"displayName": "Gauze", "locations": {"StationA": {"qty": 4, "par": 2, "min": 1, "max": 8}}}),
            )
            .await
            .unwrap();
        let ledger = Ledger::new(store.clone(), 5);
        (store, TransferEngine::new(ledger, DEFAULT_UNDO_WINDOW))
    }

    fn request(item: &str, from: &str, to: &str, quantity: i64) -> TransferRequest {
        TransferRequest {
            item_id: item.into(),
            from: from.into(),
            to: to.into(),
            quantity,
            reason: "restock".into(),
        }
    }

    async fn qty(engine: &TransferEngine, item: &str, location: &str) -> Option<i64> {
        engine.ledger.load(item).await.unwrap().0.qty_at(location)
    }

    async fn log_count(store: &InMemoryStore) -> usize {
        store
            .list(&Query::collection(INVENTORY_LOGS_COLLECTION))
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn proposal_reports_before_after_and_status() {
        let (_, engine) = engine().await;
        let plan = engine
            .propose_transfer(&request("bandages", "StationA", "StationB", 5))
            .await
            .unwrap();
        assert_eq!((plan.from.before, plan.from.after), (10, 5));
        assert_eq!((plan.to.before, plan.to.after), (2, 7));
        assert_eq!(plan.from.status_after, Some(StockStatus::Low));
        assert_eq!(plan.to.status_after, Some(StockStatus::Low));
        assert!(!plan.creates_destination);
    }

    #[tokio::test]
    async fn proposal_validation_errors() {
        let (store, engine) = engine().await;
        assert_matches!(
            engine.propose_transfer(&request("bandages", "StationA", "StationA", 1)).await,
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            engine.propose_transfer(&request("bandages", "StationA", "StationB", 0)).await,
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            engine.propose_transfer(&request("bandages", "Nowhere", "StationB", 1)).await,
            Err(ServiceError::NotFound(_))
        );
        assert_matches!(
            engine.propose_transfer(&request("missing", "StationA", "StationB", 1)).await,
            Err(ServiceError::NotFound(_))
        );
        assert_matches!(
            engine.propose_transfer(&request("bandages", "StationA", "StationB", 11)).await,
            Err(ServiceError::InsufficientStock { available: 10, requested: 11, .. })
        );
        assert_eq!(log_count(&store).await, 0);
    }

    #[tokio::test]
    async fn commit_moves_stock_and_logs_once() {
        let (store, engine) = engine().await;
        let plan = engine
            .propose_transfer(&request("bandages", "StationA", "StationB", 5))
            .await
            .unwrap();
        let moved = engine.commit_transfer(&plan, "restock", Some("Ana")).await.unwrap();
        assert_eq!((moved.after_from, moved.after_to), (5, 7));
        assert_eq!(qty(&engine, "bandages", "StationA").await, Some(5));
        assert_eq!(qty(&engine, "bandages", "StationB").await, Some(7));

        let logs = store
            .list(&Query::collection(INVENTORY_LOGS_COLLECTION))
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        let entry = InventoryLogEntry::from_document(&logs[0]).unwrap();
        assert_eq!(entry.log_type, LogType::Transfer);
        assert_eq!(entry.qty, 5);
        assert_eq!(entry.from.as_deref(), Some("StationA"));
        assert_eq!(entry.to.as_deref(), Some("StationB"));
        assert_eq!((entry.before_from, entry.before_to), (Some(10), Some(2)));
        assert_eq!(entry.actor.as_deref(), Some("Ana"));
        assert_eq!(entry.id, moved.log_id);
    }

    #[tokio::test]
    async fn stale_plan_is_rejected_without_writes() {
        let (store, engine) = engine().await;
        let plan = engine
            .propose_transfer(&request("bandages", "StationA", "StationB", 8))
            .await
            .unwrap();
        let drain = engine
            .propose_transfer(&request("bandages", "StationA", "StationB", 5))
            .await
            .unwrap();
        engine.commit_transfer(&drain, "", None).await.unwrap();

        assert_matches!(
            engine.commit_transfer(&plan, "", None).await,
            Err(ServiceError::StaleStock { planned: 10, available: 5, requested: 8, .. })
        );
        assert_eq!(qty(&engine, "bandages", "StationA").await, Some(5));
        assert_eq!(log_count(&store).await, 1);
    }

    #[tokio::test]
    async fn new_destination_inherits_levels_and_undo_removes_it() {
        let (_, engine) = engine().await;
        let plan = engine
            .propose_transfer(&request("gauze", "StationA", "Tent 3", 3))
            .await
            .unwrap();
        assert!(plan.creates_destination);
        engine.commit_transfer(&plan, "", None).await.unwrap();

        let (item, _) = engine.ledger.load("gauze").await.unwrap();
        let tent = item.locations["Tent 3"];
        assert_eq!((tent.qty, tent.par, tent.min, tent.max), (3, Some(2), Some(1), Some(8)));

        let undone = engine.undo_last_transfer(None).await.unwrap().unwrap();
        assert_eq!(undone.reverted.len(), 1);
        let (item, _) = engine.ledger.load("gauze").await.unwrap();
        assert_eq!(item.qty_at("StationA"), Some(4));
        assert!(!item.locations.contains_key("Tent 3"));
    }

    #[tokio::test]
    async fn undo_restores_quantities_and_keeps_history() {
        let (store, engine) = engine().await;
        let plan = engine
            .propose_transfer(&request("bandages", "StationA", "StationB", 5))
            .await
            .unwrap();
        engine.commit_transfer(&plan, "restock", None).await.unwrap();
        assert!(engine.undo_status().await.available);

        engine.undo_last_transfer(Some("Ana")).await.unwrap().unwrap();
        assert_eq!(qty(&engine, "bandages", "StationA").await, Some(10));
        assert_eq!(qty(&engine, "bandages", "StationB").await, Some(2));
        assert_eq!(log_count(&store).await, 2);

        assert!(engine.undo_last_transfer(None).await.unwrap().is_none());
        assert!(!engine.undo_status().await.available);
    }

    #[tokio::test(start_paused = true)]
    async fn undo_window_expires() {
        let (_, engine) = engine().await;
        let plan = engine
            .propose_transfer(&request("bandages", "StationA", "StationB", 1))
            .await
            .unwrap();
        engine.commit_transfer(&plan, "", None).await.unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        let status = engine.undo_status().await;
        assert!(status.available);
        assert_eq!(status.remaining_secs, 60);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!engine.undo_status().await.available);
        assert!(engine.undo_last_transfer(None).await.unwrap().is_none());
        assert_eq!(qty(&engine, "bandages", "StationA").await, Some(9));
    }

    #[tokio::test]
    async fn batch_rejects_duplicates_and_empty_selection() {
        let (_, engine) = engine().await;
        let duplicate = BatchRequest {
            from: "StationA".into(),
            to: "StationB".into(),
            lines: vec![
                BatchLine { item_id: "gauze".into(), quantity: 1 },
                BatchLine { item_id: "gauze".into(), quantity: 2 },
            ],
            reason: String::new(),
        };
        assert_matches!(
            engine.propose_batch(&duplicate).await,
            Err(ServiceError::ValidationError(_))
        );
        let empty = BatchRequest {
            lines: vec![BatchLine { item_id: "gauze".into(), quantity: 0 }],
            ..duplicate
        };
        assert_matches!(
            engine.propose_batch(&empty).await,
            Err(ServiceError::ValidationError(_))
        );
    }

    #[tokio::test]
    async fn failed_batch_line_rolls_back_committed_lines() {
        let (store, engine) = engine().await;
        let batch = engine
            .propose_batch(&BatchRequest {
                from: "StationA".into(),
                to: "StationB".into(),
                lines: vec![
                    BatchLine { item_id: "bandages".into(), quantity: 4 },
                    BatchLine { item_id: "gauze".into(), quantity: 4 },
                ],
                reason: "event setup".into(),
            })
            .await
            .unwrap();
        assert_eq!(batch.total_quantity, 8);

        // Gauze is drained between proposal and commit.
        let drain = engine
            .propose_transfer(&request("gauze", "StationA", "Tent", 2))
            .await
            .unwrap();
        engine.commit_transfer(&drain, "", None).await.unwrap();

        assert_matches!(
            engine.commit_batch(&batch, None).await,
            Err(ServiceError::StaleStock { .. })
        );
        assert_eq!(qty(&engine, "bandages", "StationA").await, Some(10));
        assert_eq!(qty(&engine, "bandages", "StationB").await, Some(2));

        let entries: Vec<LogType> = store
            .list(&Query::collection(INVENTORY_LOGS_COLLECTION))
            .await
            .unwrap()
            .iter()
            .map(|d| InventoryLogEntry::from_document(d).unwrap().log_type)
            .collect();
        assert_eq!(entries.iter().filter(|t| **t == LogType::TransferUndo).count(), 1);
        assert_eq!(entries.iter().filter(|t| **t == LogType::Transfer).count(), 2);
    }

    #[tokio::test]
    async fn batch_is_a_single_undo_unit() {
        let (_, engine) = engine().await;
        let batch = engine
            .propose_batch(&BatchRequest {
                from: "StationA".into(),
                to: "StationB".into(),
                lines: vec![
                    BatchLine { item_id: "bandages".into(), quantity: 3 },
                    BatchLine { item_id: "gauze".into(), quantity: 0 },
                    BatchLine { item_id: "gauze".into(), quantity: 1 },
                ],
                reason: String::new(),
            })
            .await;
        // A zero line followed by the same item is skipped, not a duplicate.
        let batch = batch.unwrap();
        let outcome = engine.commit_batch(&batch, None).await.unwrap();
        assert_eq!(outcome.moves.len(), 2);
        assert_eq!(engine.undo_status().await.items, 2);

        let undone = engine.undo_last_transfer(None).await.unwrap().unwrap();
        assert_eq!(undone.reverted.len(), 2);
        assert_eq!(qty(&engine, "bandages", "StationA").await, Some(10));
        assert_eq!(qty(&engine, "gauze", "StationA").await, Some(4));
        assert_eq!(qty(&engine, "gauze", "StationB").await, None);
    }

    #[tokio::test]
    async fn failed_audit_append_leaves_no_transfer() {
        let (store, engine) = engine().await;
        let plan = engine
            .propose_transfer(&request("bandages", "StationA", "StationB", 5))
            .await
            .unwrap();
        store.reject_appends(INVENTORY_LOGS_COLLECTION, true);
        assert!(engine.commit_transfer(&plan, "", None).await.is_err());
        assert_eq!(qty(&engine, "bandages", "StationA").await, Some(10));
        assert_eq!(qty(&engine, "bandages", "StationB").await, Some(2));
        assert!(!engine.undo_status().await.available);
    }

    #[tokio::test]
    async fn undo_restores_captured_quantities_over_later_changes() {
        let (store, engine) = engine().await;
        let plan = engine
            .propose_transfer(&request("bandages", "StationA", "StationB", 5))
            .await
            .unwrap();
        engine.commit_transfer(&plan, "restock", None).await.unwrap();

        // Stock used at the destination before the undo.
        let inventory = InventoryService::new(engine.ledger.clone(), true);
        inventory
            .decrease_stock("bandages", "StationB", 4, "used on shift", None)
            .await
            .unwrap();
        assert_eq!(qty(&engine, "bandages", "StationB").await, Some(3));

        let undone = engine.undo_last_transfer(None).await.unwrap().unwrap();
        assert_eq!(qty(&engine, "bandages", "StationA").await, Some(10));
        assert_eq!(qty(&engine, "bandages", "StationB").await, Some(2));
        let back = &undone.reverted[0];
        assert_eq!((back.before_from, back.after_from), (3, 2));
        assert_eq!((back.before_to, back.after_to), (5, 10));
        assert_eq!(log_count(&store).await, 3);
    }

    #[tokio::test]
    async fn transfer_into_a_full_destination_is_rejected() {
        let (store, engine) = engine().await;
        let plan = engine
            .propose_transfer(&request("bandages", "StationA", "StationB", 5))
            .await
            .unwrap();

        store
            .update(
                INVENTORY_COLLECTION,
                "bandages",
                &[FieldUpdate::set(paths::qty("StationB"), i64::MAX - 2).unwrap()],
                Precondition::None,
            )
            .await
            .unwrap();
        assert_matches!(
            engine.commit_transfer(&plan, "", None).await,
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            engine.propose_transfer(&request("bandages", "StationA", "StationB", 3)).await,
            Err(ServiceError::ValidationError(_))
        );
        assert_eq!(qty(&engine, "bandages", "StationA").await, Some(10));
        assert_eq!(qty(&engine, "bandages", "StationB").await, Some(i64::MAX - 2));
        assert_eq!(log_count(&store).await, 0);
        assert!(engine
            .propose_transfer(&request("bandages", "StationA", "StationB", 2))
            .await
            .is_ok());
    }
}
