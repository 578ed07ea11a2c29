use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::errors::ServiceError;
use crate::models::inventory_log::INVENTORY_LOGS_COLLECTION;
use crate::models::{ActivityKind, InventoryLogEntry};
use crate::store::{Direction, DocumentStore, FieldPath, Query, SERVER_TIMESTAMP_FIELD};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogFilter {
    pub kind: Option<ActivityKind>,
    /// Exact item name, case-insensitive.
    pub item: Option<String>,
    /// Matches the entry's location, source or destination.
    pub location: Option<String>,
    pub search: Option<String>,
    pub limit: Option<usize>,
}

impl LogFilter {
    fn matches(&self, entry: &InventoryLogEntry, search: Option<&str>) -> bool {
        if matches!(self.kind, Some(kind) if entry.log_type.activity() != kind) {
            return false;
        }
        if let Some(item) = self.item.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            if !entry.item.eq_ignore_ascii_case(item) {
                return false;
            }
        }
        if let Some(location) = self.location.as_deref().filter(|s| !s.is_empty()) {
            if !entry.locations().any(|l| l == location) {
                return false;
            }
        }
        match search {
            Some(needle) => haystack(entry).contains(needle),
            None => true,
        }
    }
}

fn haystack(entry: &InventoryLogEntry) -> String {
    let mut text = format!("{} {} {}", entry.item, entry.reason, entry.log_type);
    for location in entry.locations() {
        text.push(' ');
        text.push_str(location);
    }
    text.to_lowercase()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivitySummary {
    pub days: i64,
    pub add: usize,
    pub decrease: usize,
    pub transfer: usize,
    pub delete: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    pub locations: Vec<String>,
    pub items: Vec<String>,
}

#[derive(Clone)]
pub struct InventoryLogService {
    store: Arc<dyn DocumentStore>,
    activity_window_days: i64,
}

impl InventoryLogService {
    pub fn new(store: Arc<dyn DocumentStore>, activity_window_days: i64) -> Self {
        Self {
            store,
            activity_window_days,
        }
    }

    async fn newest_first(&self) -> Result<Vec<InventoryLogEntry>, ServiceError> {
        let query = Query::collection(INVENTORY_LOGS_COLLECTION).order_by(
            FieldPath::new([SERVER_TIMESTAMP_FIELD]),
            Direction::Descending,
        );
        self.store
            .list(&query)
            .await?
            .iter()
            .map(|doc| InventoryLogEntry::from_document(doc).map_err(ServiceError::from))
            .collect()
    }

    #[instrument(skip(self))]
    pub async fn list(&self, filter: &LogFilter) -> Result<Vec<InventoryLogEntry>, ServiceError> {
        let search = filter
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        let entries = self
            .newest_first()
            .await?
            .into_iter()
            .filter(|entry| filter.matches(entry, search.as_deref()));
        Ok(match filter.limit {
            Some(limit) => entries.take(limit).collect(),
            None => entries.collect(),
        })
    }

    /// Counts per activity over the trailing window ending at `now`.
    pub async fn activity_summary(&self, now: DateTime<Utc>) -> Result<ActivitySummary, ServiceError> {
        let since = now - Duration::days(self.activity_window_days);
        let mut summary = ActivitySummary {
            days: self.activity_window_days,
            ..Default::default()
        };
        for entry in self.newest_first().await? {
            let Some(at) = entry.timestamp else { continue };
            if at < since {
                // Newest first: everything after this is older still.
                break;
            }
            match entry.log_type.activity() {
                ActivityKind::Add => summary.add += 1,
                ActivityKind::Decrease => summary.decrease += 1,
                ActivityKind::Transfer => summary.transfer += 1,
                ActivityKind::Delete => summary.delete += 1,
                ActivityKind::Other => {}
            }
        }
        Ok(summary)
    }

    pub async fn filter_options(&self) -> Result<FilterOptions, ServiceError> {
        let mut locations = BTreeSet::new();
        let mut items = BTreeSet::new();
        for entry in self.newest_first().await? {
            locations.extend(entry.locations().map(str::to_string));
            if !entry.item.is_empty() {
                items.insert(entry.item.clone());
            }
        }
        Ok(FilterOptions {
            locations: locations.into_iter().collect(),
            items: items.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogType;
    use crate::store::{to_data, InMemoryStore};
    use serde_json::json;

    async fn seeded() -> (Arc<InMemoryStore>, InventoryLogService) {
        let store = Arc::new(InMemoryStore::new());
        let entries = vec![
            InventoryLogEntry::at_location(LogType::AddNewItem, "g", "Gauze", Some("Tent"), 10, Some(10)),
            InventoryLogEntry::movement(LogType::Transfer, "g", "Gauze", "Tent", "Stn. 1", 4, 10, 0, 4)
                .with_reason("Transferred 4x Gauze"),
            InventoryLogEntry::at_location(LogType::Decrease, "s", "Saline", Some("Stn. 1"), -2, Some(3))
                .with_reason("expired"),
        ];
        for entry in &entries {
            store
                .append_with_server_timestamp(INVENTORY_LOGS_COLLECTION, to_data(entry).unwrap())
                .await
                .unwrap();
        }
        (store.clone(), InventoryLogService::new(store, 7))
    }

    #[tokio::test]
    async fn lists_newest_first() {
        let (_, service) = seeded().await;
        let entries = service.list(&LogFilter::default()).await.unwrap();
        let types: Vec<_> = entries.iter().map(|e| e.log_type).collect();
        assert_eq!(types, vec![LogType::Decrease, LogType::Transfer, LogType::AddNewItem]);
    }

    #[tokio::test]
    async fn location_filter_matches_either_end() {
        let (_, service) = seeded().await;
        let filter = LogFilter {
            location: Some("Stn. 1".into()),
            ..Default::default()
        };
        assert_eq!(service.list(&filter).await.unwrap().len(), 2);

        let filter = LogFilter {
            kind: Some(ActivityKind::Transfer),
            item: Some("gauze".into()),
            ..Default::default()
        };
        assert_eq!(service.list(&filter).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn search_covers_reason_and_type() {
        let (_, service) = seeded().await;
        let by_reason = LogFilter {
            search: Some("EXPIRED".into()),
            ..Default::default()
        };
        assert_eq!(service.list(&by_reason).await.unwrap()[0].item, "Saline");
        let by_type = LogFilter {
            search: Some("add-new".into()),
            ..Default::default()
        };
        assert_eq!(service.list(&by_type).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn summary_skips_entries_outside_window() {
        let (store, service) = seeded().await;
        store
            .create(
                INVENTORY_LOGS_COLLECTION,
                Some("old"),
                json!({"type": "delete", "item": "Ice Pack", "timestamp": "2020-01-01T00:00:00.000000Z"}),
            )
            .await
            .unwrap();
        let summary = service.activity_summary(Utc::now()).await.unwrap();
        assert_eq!(
            summary,
            ActivitySummary {
                days: 7,
                add: 1,
                decrease: 1,
                transfer: 1,
                delete: 0
            }
        );

        let options = service.filter_options().await.unwrap();
        assert_eq!(options.locations, vec!["Stn. 1", "Tent"]);
        assert_eq!(options.items, vec!["Gauze", "Ice Pack", "Saline"]);
    }
}
