use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::errors::ServiceError;
use crate::metrics::STOCK_MUTATIONS;
use crate::models::inventory::paths;
use crate::models::{InventoryItem, InventoryLogEntry, LocationStock, LogType, StockLevels};
use crate::services::ledger::{raised_qty, Ledger, Mutation, Revert};
use crate::services::status::{classify, worst_status, StockStatus};
use crate::store::FieldUpdate;

/// Request to create a new item on its first stock-in.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    #[validate(length(min = 1, max = 200, message = "Item name cannot be empty"))]
    pub display_name: String,

    #[validate(length(min = 1, message = "Location cannot be empty"))]
    pub location: String,

    #[validate(range(min = 0, message = "Quantity cannot be negative"))]
    pub qty: i64,

    #[serde(default)]
    pub levels: Option<StockLevels>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

/// The add-stock form: either an existing item id or a new display name.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddStockRequest {
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,

    #[validate(length(min = 1, message = "Location cannot be empty"))]
    pub location: String,

    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub qty: i64,

    #[serde(default)]
    pub levels: Option<StockLevels>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

/// Which thresholds a level edit applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "location", rename_all = "camelCase")]
pub enum LevelScope {
    Location(String),
    AllLocations,
    DefaultsOnly,
}

/// Result of a single-location quantity change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockChange {
    pub item_id: String,
    pub display_name: String,
    pub location: String,
    pub before: i64,
    pub after: i64,
    /// Applied delta; a decrease may apply less than requested.
    pub delta: i64,
    pub created_location: bool,
    pub status: StockStatus,
    /// Non-blocking replenishment prompt when a location runs out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advisory: Option<String>,
    pub log_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AddStockOutcome {
    Created { item: ItemView },
    ToppedUp { change: StockChange },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelChange {
    /// `None` for item defaults.
    pub location: Option<String>,
    pub field: String,
    pub before: Option<i64>,
    pub after: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelsOutcome {
    pub item: ItemView,
    pub changes: Vec<LevelChange>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteLocationOutcome {
    pub item_id: String,
    pub location: String,
    pub item_deleted: bool,
}

/// Per-location row of an item as shown in the inventory list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationView {
    pub name: String,
    pub qty: i64,
    pub levels: StockLevels,
    pub status: StockStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemView {
    pub id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub defaults: StockLevels,
    pub total_qty: i64,
    pub status: StockStatus,
    pub locations: Vec<LocationView>,
}

impl From<&InventoryItem> for ItemView {
    fn from(item: &InventoryItem) -> Self {
        let locations = item
            .locations
            .iter()
            .map(|(name, stock)| {
                let levels = item.effective_levels(name);
                LocationView {
                    name: name.clone(),
                    qty: stock.qty,
                    levels,
                    status: classify(stock.qty, levels),
                }
            })
            .collect();
        Self {
            id: item.id.clone(),
            display_name: item.display_name.clone(),
            unit: item.unit.clone(),
            size: item.size.clone(),
            category: item.category.clone(),
            defaults: item.default_levels(),
            total_qty: item.total_qty(),
            status: worst_status(item),
            locations,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemFilter {
    /// Case-insensitive substring of the display name.
    pub search: Option<String>,
    /// Only items stocked at this location.
    pub location: Option<String>,
    pub status: Option<StockStatus>,
}

#[derive(Clone)]
pub struct InventoryService {
    ledger: Ledger,
    cascade_delete_empty_items: bool,
}

impl InventoryService {
    pub fn new(ledger: Ledger, cascade_delete_empty_items: bool) -> Self {
        Self {
            ledger,
            cascade_delete_empty_items,
        }
    }

    /// Creates an item with its first location. Levels not given are derived
    /// from the quantity.
    #[instrument(skip(self, request), fields(name = %request.display_name, location = %request.location))]
    pub async fn create_item(
        &self,
        request: &NewItem,
        actor: Option<&str>,
    ) -> Result<ItemView, ServiceError> {
        request.validate()?;
        let name = request.display_name.trim();
        let location = request.location.trim();
        if name.is_empty() || location.is_empty() {
            return Err(ServiceError::validation(
                "Item name and location cannot be blank",
            ));
        }
        if self.find_by_name(name).await?.is_some() {
            return Err(ServiceError::DuplicateItem(name.to_string()));
        }

        let levels = request
            .levels
            .unwrap_or_default()
            .or(StockLevels::derived_from(request.qty));
        levels.check().map_err(ServiceError::InvalidStockLevels)?;

        let item = InventoryItem {
            id: String::new(),
            display_name: name.to_string(),
            unit: request.unit.clone(),
            size: request.size.clone(),
            category: request.category.clone(),
            default_par: None,
            default_min: None,
            default_max: None,
            locations: [(location.to_string(), LocationStock::new(request.qty, levels))]
                .into_iter()
                .collect(),
        };
        let committed = self
            .ledger
            .create(&item, |id| {
                InventoryLogEntry::at_location(
                    LogType::AddNewItem,
                    id,
                    name,
                    Some(location),
                    request.qty,
                    Some(request.qty),
                )
                .with_reason(format!("Added new item {}", name))
                .with_actor(actor)
            })
            .await?;
        STOCK_MUTATIONS.with_label_values(&["create"]).inc();
        info!(item_id = %committed.item.id, "item created");
        Ok(ItemView::from(&committed.item))
    }

    /// The add-stock page: tops up an existing item, or creates a new one.
    #[instrument(skip(self, request))]
    pub async fn add_stock(
        &self,
        request: &AddStockRequest,
        actor: Option<&str>,
    ) -> Result<AddStockOutcome, ServiceError> {
        request.validate()?;
        let item_id = request.item_id.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let name = request
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        match (item_id, name) {
            (Some(item_id), _) => {
                let change = self
                    .increase_stock(item_id, &request.location, request.qty, actor)
                    .await?;
                Ok(AddStockOutcome::ToppedUp { change })
            }
            (None, Some(name)) => {
                let item = self
                    .create_item(
                        &NewItem {
                            display_name: name.to_string(),
                            location: request.location.clone(),
                            qty: request.qty,
                            levels: request.levels,
                            unit: request.unit.clone(),
                            size: request.size.clone(),
                            category: request.category.clone(),
                        },
                        actor,
                    )
                    .await?;
                Ok(AddStockOutcome::Created { item })
            }
            (None, None) => Err(ServiceError::validation(
                "Choose an existing item or enter a new item name",
            )),
        }
    }

    /// Adds stock at a location, creating the location when absent.
    #[instrument(skip(self))]
    pub async fn increase_stock(
        &self,
        item_id: &str,
        location: &str,
        amount: i64,
        actor: Option<&str>,
    ) -> Result<StockChange, ServiceError> {
        if amount <= 0 {
            return Err(ServiceError::validation("Amount must be at least 1"));
        }
        let location = location.trim();
        if location.is_empty() {
            return Err(ServiceError::validation("Location cannot be empty"));
        }

        let committed = self
            .ledger
            .mutate(item_id, |item| {
                let before = item.qty_at(location);
                let after =
                    raised_qty(before.unwrap_or(0), amount, &item.display_name, location)?;
                let update = match before {
                    Some(_) => FieldUpdate::set(paths::qty(location), after)?,
                    None => FieldUpdate::set(
                        paths::location(location),
                        LocationStock::new(
                            after,
                            item.default_levels().or(StockLevels::derived_from(amount)),
                        ),
                    )?,
                };
                Ok(Mutation {
                    updates: vec![update],
                    revert: Revert::Quantities {
                        deltas: vec![(location.to_string(), amount)],
                        created: before
                            .is_none()
                            .then(|| location.to_string())
                            .into_iter()
                            .collect(),
                    },
                    audit: vec![InventoryLogEntry::at_location(
                        LogType::Topup,
                        &item.id,
                        &item.display_name,
                        Some(location),
                        amount,
                        Some(after),
                    )
                    .with_reason(format!("Added {}x {}", amount, item.display_name))
                    .with_actor(actor)],
                    outcome: (before, after),
                })
            })
            .await?;

        STOCK_MUTATIONS.with_label_values(&["increase"]).inc();
        let (before, after) = committed.outcome;
        Ok(stock_change(&committed.item, location, before, after, &committed.entries))
    }

    /// Removes stock from a location, clamping at zero. Reaching zero raises
    /// a replenishment advisory on the outcome.
    #[instrument(skip(self))]
    pub async fn decrease_stock(
        &self,
        item_id: &str,
        location: &str,
        amount: i64,
        reason: &str,
        actor: Option<&str>,
    ) -> Result<StockChange, ServiceError> {
        if amount <= 0 {
            return Err(ServiceError::validation("Amount must be at least 1"));
        }
        if reason.trim().is_empty() {
            return Err(ServiceError::validation("A reason is required to reduce stock"));
        }

        let committed = self
            .ledger
            .mutate(item_id, |item| {
                let before = item.qty_at(location).ok_or_else(|| {
                    ServiceError::not_found(format!(
                        "{} has no stock entry at {}",
                        item.display_name, location
                    ))
                })?;
                if before == 0 {
                    return Err(ServiceError::validation(format!(
                        "{} at {} is already empty",
                        item.display_name, location
                    )));
                }
                let applied = amount.min(before);
                let after = before - applied;
                Ok(Mutation {
                    updates: vec![FieldUpdate::set(paths::qty(location), after)?],
                    revert: Revert::Quantities {
                        deltas: vec![(location.to_string(), -applied)],
                        created: Vec::new(),
                    },
                    audit: vec![InventoryLogEntry::at_location(
                        LogType::Decrease,
                        &item.id,
                        &item.display_name,
                        Some(location),
                        -applied,
                        Some(after),
                    )
                    .with_reason(reason.trim())
                    .with_actor(actor)],
                    outcome: (Some(before), after),
                })
            })
            .await?;

        STOCK_MUTATIONS.with_label_values(&["decrease"]).inc();
        let (before, after) = committed.outcome;
        let mut change = stock_change(&committed.item, location, before, after, &committed.entries);
        if change.after == 0 {
            let advisory = format!(
                "{} at {} is now out of stock. Please replenish.",
                change.display_name, location
            );
            warn!(item_id, location, "location ran out of stock");
            change.advisory = Some(advisory);
        }
        Ok(change)
    }

    /// Sets PAR/MIN/MAX for the chosen scope. Values not given keep their
    /// current setting; the merged levels must stay ordered.
    #[instrument(skip(self))]
    pub async fn update_levels(
        &self,
        item_id: &str,
        levels: StockLevels,
        scope: &LevelScope,
        actor: Option<&str>,
    ) -> Result<LevelsOutcome, ServiceError> {
        if levels.is_empty() {
            return Err(ServiceError::validation("No levels given"));
        }
        levels.check().map_err(ServiceError::InvalidStockLevels)?;

        let committed = self
            .ledger
            .mutate(item_id, |item| level_mutation(item, levels, scope, actor))
            .await?;
        if !committed.outcome.is_empty() {
            STOCK_MUTATIONS.with_label_values(&["levels"]).inc();
        }
        Ok(LevelsOutcome {
            item: ItemView::from(&committed.item),
            changes: committed.outcome,
        })
    }

    /// Removes one location. When it was the item's last location and
    /// cascading is enabled the whole item is deleted.
    #[instrument(skip(self))]
    pub async fn delete_location(
        &self,
        item_id: &str,
        location: &str,
        actor: Option<&str>,
    ) -> Result<DeleteLocationOutcome, ServiceError> {
        let (item, _) = self.ledger.load(item_id).await?;
        if !item.locations.contains_key(location) {
            return Err(ServiceError::not_found(format!(
                "{} has no stock entry at {}",
                item.display_name, location
            )));
        }

        if self.cascade_delete_empty_items && item.locations.len() == 1 {
            self.ledger
                .remove(item_id, |current| {
                    let only_this = current.locations.len() == 1
                        && current.locations.contains_key(location);
                    if !only_this {
                        return Err(ServiceError::Conflict(format!(
                            "Locations of {} changed; retry the delete",
                            current.display_name
                        )));
                    }
                    Ok(delete_entry(current, Some(location), actor))
                })
                .await?;
            STOCK_MUTATIONS.with_label_values(&["delete"]).inc();
            info!(item_id, location, "last location removed, item deleted");
            return Ok(DeleteLocationOutcome {
                item_id: item_id.to_string(),
                location: location.to_string(),
                item_deleted: true,
            });
        }

        self.ledger
            .mutate(item_id, |current| {
                let stock = current.locations.get(location).ok_or_else(|| {
                    ServiceError::not_found(format!(
                        "{} has no stock entry at {}",
                        current.display_name, location
                    ))
                })?;
                Ok(Mutation {
                    updates: vec![FieldUpdate::Delete(paths::location(location))],
                    revert: Revert::Restore(vec![FieldUpdate::set(
                        paths::location(location),
                        stock,
                    )?]),
                    audit: vec![delete_entry(current, Some(location), actor)],
                    outcome: (),
                })
            })
            .await?;
        STOCK_MUTATIONS.with_label_values(&["delete"]).inc();
        Ok(DeleteLocationOutcome {
            item_id: item_id.to_string(),
            location: location.to_string(),
            item_deleted: false,
        })
    }

    #[instrument(skip(self))]
    pub async fn delete_item(&self, item_id: &str, actor: Option<&str>) -> Result<(), ServiceError> {
        self.ledger
            .remove(item_id, |item| Ok(delete_entry(item, None, actor)))
            .await?;
        STOCK_MUTATIONS.with_label_values(&["delete"]).inc();
        info!(item_id, "item deleted");
        Ok(())
    }

    pub async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<ItemView>, ServiceError> {
        let search = filter
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        let mut items: Vec<ItemView> = self
            .ledger
            .load_all()
            .await?
            .iter()
            .filter(|item| {
                search
                    .as_ref()
                    .map_or(true, |s| item.display_name.to_lowercase().contains(s))
            })
            .filter(|item| {
                filter
                    .location
                    .as_ref()
                    .map_or(true, |l| item.locations.contains_key(l))
            })
            .map(ItemView::from)
            .filter(|view| filter.status.map_or(true, |s| view.status == s))
            .collect();
        items.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
        });
        Ok(items)
    }

    pub async fn get_item(&self, item_id: &str) -> Result<ItemView, ServiceError> {
        let (item, _) = self.ledger.load(item_id).await?;
        Ok(ItemView::from(&item))
    }

    /// Case-insensitive lookup by display name.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<InventoryItem>, ServiceError> {
        Ok(self
            .ledger
            .load_all()
            .await?
            .into_iter()
            .find(|item| item.name_matches(name)))
    }

    /// Distinct location names across all items, sorted.
    pub async fn list_locations(&self) -> Result<Vec<String>, ServiceError> {
        let names: BTreeSet<String> = self
            .ledger
            .load_all()
            .await?
            .into_iter()
            .flat_map(|item| item.locations.into_keys())
            .collect();
        Ok(names.into_iter().collect())
    }

    pub async fn items_at(&self, location: &str) -> Result<Vec<ItemView>, ServiceError> {
        self.list_items(&ItemFilter {
            location: Some(location.to_string()),
            ..Default::default()
        })
        .await
    }
}

fn stock_change(
    item: &InventoryItem,
    location: &str,
    before: Option<i64>,
    after: i64,
    entries: &[InventoryLogEntry],
) -> StockChange {
    StockChange {
        item_id: item.id.clone(),
        display_name: item.display_name.clone(),
        location: location.to_string(),
        before: before.unwrap_or(0),
        after,
        delta: after - before.unwrap_or(0),
        created_location: before.is_none(),
        status: classify(after, item.effective_levels(location)),
        advisory: None,
        log_id: entries.first().map(|e| e.id.clone()).unwrap_or_default(),
    }
}

fn delete_entry(item: &InventoryItem, location: Option<&str>, actor: Option<&str>) -> InventoryLogEntry {
    let removed = match location {
        Some(location) => item.qty_at(location).unwrap_or(0),
        None => item.total_qty(),
    };
    let reason = match location {
        Some(location) => format!("Removed location {} from {}", location, item.display_name),
        None => format!("Deleted item {}", item.display_name),
    };
    InventoryLogEntry::at_location(
        LogType::Delete,
        &item.id,
        &item.display_name,
        location,
        -removed,
        None,
    )
    .with_reason(reason)
    .with_actor(actor)
}

const LEVEL_FIELDS: [&str; 3] = ["par", "min", "max"];

fn field_value(levels: &StockLevels, field: &str) -> Option<i64> {
    match field {
        "par" => levels.par,
        "min" => levels.min,
        _ => levels.max,
    }
}

fn level_mutation(
    item: &InventoryItem,
    levels: StockLevels,
    scope: &LevelScope,
    actor: Option<&str>,
) -> Result<Mutation<Vec<LevelChange>>, ServiceError> {
    let targets: Vec<Option<&str>> = match scope {
        LevelScope::DefaultsOnly => vec![None],
        LevelScope::AllLocations => {
            if item.locations.is_empty() {
                return Err(ServiceError::validation(format!(
                    "{} has no locations",
                    item.display_name
                )));
            }
            item.locations.keys().map(|l| Some(l.as_str())).collect()
        }
        LevelScope::Location(location) => {
            if !item.locations.contains_key(location) {
                return Err(ServiceError::not_found(format!(
                    "{} has no stock entry at {}",
                    item.display_name, location
                )));
            }
            vec![Some(location.as_str())]
        }
    };

    let mut updates = Vec::new();
    let mut restore = Vec::new();
    let mut audit = Vec::new();
    let mut changes = Vec::new();

    for target in targets {
        let (current, effective) = match target {
            Some(location) => (
                item.locations
                    .get(location)
                    .map(LocationStock::levels)
                    .unwrap_or_default(),
                item.effective_levels(location),
            ),
            None => (item.default_levels(), item.default_levels()),
        };
        levels
            .or(effective)
            .check()
            .map_err(ServiceError::InvalidStockLevels)?;

        for field in LEVEL_FIELDS {
            let Some(after) = field_value(&levels, field) else {
                continue;
            };
            let before = field_value(&current, field);
            if before == Some(after) {
                continue;
            }
            let path = match target {
                Some(location) => paths::level(location, field),
                None => paths::default_level(field),
            };
            updates.push(FieldUpdate::set(path.clone(), after)?);
            restore.push(match before {
                Some(value) => FieldUpdate::set(path, value)?,
                None => FieldUpdate::Delete(path),
            });
            let scope_label = target.unwrap_or("item defaults");
            audit.push(
                InventoryLogEntry::at_location(
                    LogType::for_level(field),
                    &item.id,
                    &item.display_name,
                    target,
                    0,
                    target.and_then(|l| item.qty_at(l)),
                )
                .with_reason(match before {
                    Some(before) => format!(
                        "{} for {} changed from {} to {}",
                        field.to_uppercase(),
                        scope_label,
                        before,
                        after
                    ),
                    None => format!("{} for {} set to {}", field.to_uppercase(), scope_label, after),
                })
                .with_actor(actor),
            );
            changes.push(LevelChange {
                location: target.map(str::to_string),
                field: field.to_string(),
                before,
                after,
            });
        }
    }

    Ok(Mutation {
        updates,
        revert: Revert::Restore(restore),
        audit,
        outcome: changes,
    })
}
