//! Conditional ledger writes paired with their audit records.
//!
//! Every stock change goes through [`Ledger`]: the item is read with its
//! version, the caller's plan is computed against that snapshot, and the
//! resulting field updates are written with a version precondition. A
//! concurrent writer makes the precondition fail, in which case the item is
//! re-read and the plan re-validated. Once the write lands, the audit
//! entries are appended; if that fails the write is compensated so the
//! ledger and the audit trail stay in step.

use std::sync::Arc;

use tracing::{debug, error, instrument, warn};

use crate::errors::ServiceError;
use crate::models::inventory::{paths, INVENTORY_COLLECTION};
use crate::models::inventory_log::INVENTORY_LOGS_COLLECTION;
use crate::models::{InventoryItem, InventoryLogEntry};
use crate::store::{to_data, DocumentStore, FieldUpdate, Precondition, Query, StoreError};

/// How to take a committed mutation back.
#[derive(Debug, Clone, PartialEq)]
pub enum Revert {
    /// Subtract the applied deltas again and drop locations the mutation
    /// created. Computed against the item as it is when reverting.
    Quantities {
        deltas: Vec<(String, i64)>,
        created: Vec<String>,
    },
    /// Put fields back to their previous values.
    Restore(Vec<FieldUpdate>),
}

impl Revert {
    pub fn updates_for(&self, item: &InventoryItem) -> Result<Vec<FieldUpdate>, StoreError> {
        match self {
            Revert::Restore(updates) => Ok(updates.clone()),
            Revert::Quantities { deltas, created } => {
                let mut updates = Vec::with_capacity(deltas.len());
                for (location, delta) in deltas {
                    if created.contains(location) {
                        updates.push(FieldUpdate::Delete(paths::location(location)));
                    } else {
                        let current = item.qty_at(location).unwrap_or(0);
                        updates.push(FieldUpdate::set(
                            paths::qty(location),
                            current.saturating_sub(*delta).max(0),
                        )?);
                    }
                }
                Ok(updates)
            }
        }
    }
}

/// `current + amount` for a location's quantity, rejected when the sum does
/// not fit.
pub fn raised_qty(current: i64, amount: i64, item: &str, location: &str) -> Result<i64, ServiceError> {
    current.checked_add(amount).ok_or_else(|| {
        ServiceError::validation(format!(
            "{} at {} cannot hold {} more",
            item, location, amount
        ))
    })
}

/// A planned change to one item.
#[derive(Debug)]
pub struct Mutation<T> {
    pub updates: Vec<FieldUpdate>,
    pub revert: Revert,
    pub audit: Vec<InventoryLogEntry>,
    pub outcome: T,
}

/// Result of a committed mutation.
#[derive(Debug)]
pub struct Committed<T> {
    pub outcome: T,
    /// Item as written.
    pub item: InventoryItem,
    /// Audit entries as stored, with their server timestamps.
    pub entries: Vec<InventoryLogEntry>,
}

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn DocumentStore>,
    max_attempts: u32,
}

impl Ledger {
    pub fn new(store: Arc<dyn DocumentStore>, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Loads an item together with its document version.
    pub async fn load(&self, item_id: &str) -> Result<(InventoryItem, u64), ServiceError> {
        let doc = self
            .store
            .get(INVENTORY_COLLECTION, item_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Item {} not found", item_id)))?;
        Ok((InventoryItem::from_document(&doc)?, doc.version))
    }

    pub async fn load_all(&self) -> Result<Vec<InventoryItem>, ServiceError> {
        let docs = self
            .store
            .list(&Query::collection(INVENTORY_COLLECTION))
            .await?;
        docs.iter()
            .map(|doc| InventoryItem::from_document(doc).map_err(ServiceError::from))
            .collect()
    }

    /// Applies `plan` to the current item with a version precondition,
    /// re-planning on conflict, then appends the audit entries.
    #[instrument(skip(self, plan))]
    pub async fn mutate<T, F>(&self, item_id: &str, plan: F) -> Result<Committed<T>, ServiceError>
    where
        F: Fn(&InventoryItem) -> Result<Mutation<T>, ServiceError>,
    {
        for attempt in 1..=self.max_attempts {
            let (item, version) = self.load(item_id).await?;
            let mutation = plan(&item)?;
            if mutation.updates.is_empty() {
                return Ok(Committed {
                    outcome: mutation.outcome,
                    item,
                    entries: Vec::new(),
                });
            }

            let doc = match self
                .store
                .update(
                    INVENTORY_COLLECTION,
                    item_id,
                    &mutation.updates,
                    Precondition::Version(version),
                )
                .await
            {
                Ok(doc) => doc,
                Err(e) if e.is_version_conflict() => {
                    warn!(item_id, attempt, "concurrent ledger write, re-planning");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let written = InventoryItem::from_document(&doc)?;

            return match self.append_all(&mutation.audit).await {
                Ok(entries) => Ok(Committed {
                    outcome: mutation.outcome,
                    item: written,
                    entries,
                }),
                Err(append_err) => {
                    error!(item_id, error = %append_err, "audit append failed, compensating ledger write");
                    if let Err(revert_err) = self.compensate(item_id, &mutation.revert).await {
                        error!(item_id, error = %revert_err, "compensation failed; ledger change has no audit record");
                    }
                    Err(append_err)
                }
            };
        }
        Err(ServiceError::Conflict(format!(
            "Item {} kept changing; gave up after {} attempts",
            item_id, self.max_attempts
        )))
    }

    /// Creates a new item document and its audit entry.
    #[instrument(skip(self, item, audit), fields(name = %item.display_name))]
    pub async fn create(
        &self,
        item: &InventoryItem,
        audit: impl Fn(&str) -> InventoryLogEntry,
    ) -> Result<Committed<()>, ServiceError> {
        let doc = self
            .store
            .create(INVENTORY_COLLECTION, None, to_data(item)?)
            .await?;
        let created = InventoryItem::from_document(&doc)?;
        match self.append_all(&[audit(&doc.id)]).await {
            Ok(entries) => Ok(Committed {
                outcome: (),
                item: created,
                entries,
            }),
            Err(append_err) => {
                error!(item_id = %doc.id, error = %append_err, "audit append failed, removing created item");
                if let Err(e) = self
                    .store
                    .delete(INVENTORY_COLLECTION, &doc.id, Precondition::Version(doc.version))
                    .await
                {
                    error!(item_id = %doc.id, error = %e, "compensation failed; item has no audit record");
                }
                Err(append_err)
            }
        }
    }

    /// Deletes an item document. `audit` sees the item as read before the
    /// delete and may still refuse it.
    #[instrument(skip(self, audit))]
    pub async fn remove(
        &self,
        item_id: &str,
        audit: impl Fn(&InventoryItem) -> Result<InventoryLogEntry, ServiceError>,
    ) -> Result<Committed<()>, ServiceError> {
        for attempt in 1..=self.max_attempts {
            let doc = self
                .store
                .get(INVENTORY_COLLECTION, item_id)
                .await?
                .ok_or_else(|| ServiceError::not_found(format!("Item {} not found", item_id)))?;
            let item = InventoryItem::from_document(&doc)?;
            let entry = audit(&item)?;

            match self
                .store
                .delete(INVENTORY_COLLECTION, item_id, Precondition::Version(doc.version))
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_version_conflict() => {
                    warn!(item_id, attempt, "concurrent ledger write during delete, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            return match self.append_all(&[entry]).await {
                Ok(entries) => Ok(Committed {
                    outcome: (),
                    item,
                    entries,
                }),
                Err(append_err) => {
                    error!(item_id, error = %append_err, "audit append failed, restoring deleted item");
                    if let Err(e) = self
                        .store
                        .create(INVENTORY_COLLECTION, Some(item_id), doc.data.clone())
                        .await
                    {
                        error!(item_id, error = %e, "compensation failed; deletion has no audit record");
                    }
                    Err(append_err)
                }
            };
        }
        Err(ServiceError::Conflict(format!(
            "Item {} kept changing; gave up after {} attempts",
            item_id, self.max_attempts
        )))
    }

    async fn compensate(&self, item_id: &str, revert: &Revert) -> Result<(), ServiceError> {
        for _ in 0..self.max_attempts {
            let (item, version) = self.load(item_id).await?;
            let updates = revert.updates_for(&item)?;
            match self
                .store
                .update(
                    INVENTORY_COLLECTION,
                    item_id,
                    &updates,
                    Precondition::Version(version),
                )
                .await
            {
                Ok(_) => {
                    debug!(item_id, "ledger write compensated");
                    return Ok(());
                }
                Err(e) if e.is_version_conflict() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(ServiceError::Conflict(format!(
            "Could not compensate item {}",
            item_id
        )))
    }

    async fn append_all(
        &self,
        entries: &[InventoryLogEntry],
    ) -> Result<Vec<InventoryLogEntry>, ServiceError> {
        let mut stored = Vec::with_capacity(entries.len());
        for entry in entries {
            let doc = self
                .store
                .append_with_server_timestamp(INVENTORY_LOGS_COLLECTION, to_data(entry)?)
                .await?;
            stored.push(InventoryLogEntry::from_document(&doc)?);
        }
        Ok(stored)
    }
}
