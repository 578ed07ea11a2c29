use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::instrument;

use crate::errors::ServiceError;
use crate::models::inventory::INVENTORY_COLLECTION;
use crate::models::{InventoryItem, StockLevels};
use crate::services::status::{classify, StockStatus};
use crate::store::{DocumentStore, Query, Subscription};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Kpis {
    pub total_items: usize,
    pub critical: usize,
    pub low: usize,
    pub overstock: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEntry {
    pub item_id: String,
    pub display_name: String,
    pub location: String,
    pub qty: i64,
    pub levels: StockLevels,
    pub status: StockStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSummary {
    pub location: String,
    pub item_count: usize,
    pub low_count: usize,
    pub critical_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub kpis: Kpis,
    pub alerts: Vec<AlertEntry>,
    pub locations: Vec<LocationSummary>,
}

/// Status of every stock entry: item id → location → status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StatusSnapshot(pub BTreeMap<String, BTreeMap<String, StockStatus>>);

impl StatusSnapshot {
    pub fn from_items(items: &[InventoryItem]) -> Self {
        Self(
            items
                .iter()
                .map(|item| {
                    let statuses = item
                        .locations
                        .iter()
                        .map(|(location, stock)| {
                            (location.clone(), classify(stock.qty, item.effective_levels(location)))
                        })
                        .collect();
                    (item.id.clone(), statuses)
                })
                .collect(),
        )
    }

    pub fn status(&self, item_id: &str, location: &str) -> Option<StockStatus> {
        self.0.get(item_id)?.get(location).copied()
    }
}

/// Builds the dashboard from a snapshot of all items.
pub fn summarize(items: &[InventoryItem], alert_limit: usize) -> Dashboard {
    let mut kpis = Kpis {
        total_items: items.len(),
        ..Default::default()
    };
    let mut alerts = Vec::new();
    let mut by_location: BTreeMap<&str, LocationSummary> = BTreeMap::new();

    for item in items {
        for (location, stock) in &item.locations {
            let levels = item.effective_levels(location);
            let status = classify(stock.qty, levels);
            let summary = by_location
                .entry(location.as_str())
                .or_insert_with(|| LocationSummary {
                    location: location.clone(),
                    item_count: 0,
                    low_count: 0,
                    critical_count: 0,
                });
            summary.item_count += 1;
            match status {
                StockStatus::Critical => {
                    kpis.critical += 1;
                    summary.critical_count += 1;
                }
                StockStatus::Low => {
                    kpis.low += 1;
                    summary.low_count += 1;
                }
                StockStatus::Overstock => kpis.overstock += 1,
                StockStatus::Ok => {}
            }
            if status.is_alert() {
                alerts.push(AlertEntry {
                    item_id: item.id.clone(),
                    display_name: item.display_name.clone(),
                    location: location.clone(),
                    qty: stock.qty,
                    levels,
                    status,
                });
            }
        }
    }

    alerts.sort_by(|a, b| {
        b.status
            .severity()
            .cmp(&a.status.severity())
            .then(a.qty.cmp(&b.qty))
            .then_with(|| a.display_name.cmp(&b.display_name))
    });
    alerts.truncate(alert_limit);

    Dashboard {
        kpis,
        alerts,
        locations: by_location.into_values().collect(),
    }
}

#[derive(Clone)]
pub struct DashboardService {
    store: Arc<dyn DocumentStore>,
    alert_limit: usize,
}

impl DashboardService {
    pub fn new(store: Arc<dyn DocumentStore>, alert_limit: usize) -> Self {
        Self { store, alert_limit }
    }

    #[instrument(skip(self))]
    pub async fn dashboard(&self) -> Result<Dashboard, ServiceError> {
        let docs = self
            .store
            .list(&Query::collection(INVENTORY_COLLECTION))
            .await?;
        Ok(summarize(&decode_items(&docs)?, self.alert_limit))
    }

    /// Subscribes to the inventory collection.
    pub async fn live(&self) -> Result<LiveInventoryView, ServiceError> {
        let subscription = self
            .store
            .subscribe(Query::collection(INVENTORY_COLLECTION))
            .await?;
        Ok(LiveInventoryView { subscription })
    }
}

/// Re-derives the status classification on every pushed inventory snapshot.
pub struct LiveInventoryView {
    subscription: Subscription,
}

impl LiveInventoryView {
    /// Next snapshot's statuses; `None` once the store closes the feed.
    pub async fn next(&mut self) -> Option<Result<StatusSnapshot, ServiceError>> {
        let docs = self.subscription.next().await?;
        Some(decode_items(&docs).map(|items| StatusSnapshot::from_items(&items)))
    }
}

fn decode_items(docs: &[crate::store::Document]) -> Result<Vec<InventoryItem>, ServiceError> {
    docs.iter()
        .map(|doc| InventoryItem::from_document(doc).map_err(ServiceError::from))
        .collect()
}
