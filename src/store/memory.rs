use super::{
    apply_updates, timestamp_value, Document, DocumentStore, FieldUpdate, Precondition, Query,
    StoreError, Subscription, SERVER_TIMESTAMP_FIELD,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

struct Collection {
    docs: BTreeMap<String, Document>,
    tx: broadcast::Sender<Arc<Vec<Document>>>,
}

impl Collection {
    fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            docs: BTreeMap::new(),
            tx,
        }
    }

    fn snapshot(&self) -> Vec<Document> {
        self.docs.values().cloned().collect()
    }

    fn notify(&self) {
        // No receivers is not an error.
        let _ = self.tx.send(Arc::new(self.snapshot()));
    }
}

/// In-process [`DocumentStore`].
///
/// Mutations on one collection are serialised by the collection's map shard
/// lock, and subscribers see snapshots in mutation order. `set_offline` and
/// `reject_appends` simulate collaborator outages.
pub struct InMemoryStore {
    collections: DashMap<String, Collection>,
    channel_capacity: usize,
    offline: AtomicBool,
    rejected_appends: DashSet<String>,
    /// Last server timestamp handed out, in microseconds.
    last_append_micros: AtomicI64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_channel_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_channel_capacity(channel_capacity: usize) -> Self {
        Self {
            collections: DashMap::new(),
            channel_capacity: channel_capacity.max(1),
            offline: AtomicBool::new(false),
            rejected_appends: DashSet::new(),
            last_append_micros: AtomicI64::new(0),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes `append_with_server_timestamp` fail for `collection`.
    pub fn reject_appends(&self, collection: &str, reject: bool) {
        if reject {
            self.rejected_appends.insert(collection.to_string());
        } else {
            self.rejected_appends.remove(collection);
        }
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".into()));
        }
        Ok(())
    }

    /// Server clock for appends; strictly increasing so appends order by
    /// timestamp even within one microsecond.
    fn server_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_micros();
        let prev = self
            .last_append_micros
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        DateTime::from_timestamp_micros(now.max(prev + 1)).unwrap_or_else(Utc::now)
    }

    fn check_version(
        collection: &str,
        doc: &Document,
        precondition: Precondition,
    ) -> Result<(), StoreError> {
        match precondition {
            Precondition::Version(expected) if expected != doc.version => {
                Err(StoreError::VersionConflict {
                    collection: collection.to_string(),
                    id: doc.id.clone(),
                    expected,
                    actual: doc.version,
                })
            }
            _ => Ok(()),
        }
    }

    fn insert(&self, collection: &str, id: String, data: Value) -> Result<Document, StoreError> {
        if !data.is_object() {
            return Err(StoreError::InvalidDocument(
                "document data must be a JSON object".into(),
            ));
        }
        let mut entry = self
            .collections
            .entry(collection.to_string())
            .or_insert_with(|| Collection::new(self.channel_capacity));
        if entry.docs.contains_key(&id) {
            return Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id,
            });
        }
        let now = Utc::now();
        let doc = Document {
            id: id.clone(),
            version: 1,
            create_time: now,
            update_time: now,
            data,
        };
        entry.docs.insert(id, doc.clone());
        entry.notify();
        debug!(collection, id = %doc.id, "document created");
        Ok(doc)
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.ensure_online()?;
        Ok(self
            .collections
            .get(collection)
            .and_then(|c| c.docs.get(id).cloned()))
    }

    async fn list(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.ensure_online()?;
        Ok(self
            .collections
            .get(&query.collection)
            .map(|c| query.apply(&c.snapshot()))
            .unwrap_or_default())
    }

    async fn create(
        &self,
        collection: &str,
        id: Option<&str>,
        data: Value,
    ) -> Result<Document, StoreError> {
        self.ensure_online()?;
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.insert(collection, id, data)
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        updates: &[FieldUpdate],
        precondition: Precondition,
    ) -> Result<Document, StoreError> {
        self.ensure_online()?;
        let not_found = || StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        };
        let mut entry = self.collections.get_mut(collection).ok_or_else(not_found)?;
        let doc = entry.docs.get(id).ok_or_else(not_found)?;
        Self::check_version(collection, doc, precondition)?;

        // Apply to a copy so a failing update leaves the document untouched.
        let mut updated = doc.clone();
        apply_updates(&mut updated.data, updates)?;
        updated.version += 1;
        updated.update_time = Utc::now();

        entry.docs.insert(id.to_string(), updated.clone());
        entry.notify();
        debug!(collection, id, version = updated.version, "document updated");
        Ok(updated)
    }

    async fn delete(
        &self,
        collection: &str,
        id: &str,
        precondition: Precondition,
    ) -> Result<(), StoreError> {
        self.ensure_online()?;
        let not_found = || StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        };
        let mut entry = self.collections.get_mut(collection).ok_or_else(not_found)?;
        let doc = entry.docs.get(id).ok_or_else(not_found)?;
        Self::check_version(collection, doc, precondition)?;
        entry.docs.remove(id);
        entry.notify();
        debug!(collection, id, "document deleted");
        Ok(())
    }

    async fn append_with_server_timestamp(
        &self,
        collection: &str,
        mut data: Value,
    ) -> Result<Document, StoreError> {
        self.ensure_online()?;
        if self.rejected_appends.contains(collection) {
            return Err(StoreError::Unavailable(format!(
                "appends to {} are rejected",
                collection
            )));
        }
        let map = data.as_object_mut().ok_or_else(|| {
            StoreError::InvalidDocument("document data must be a JSON object".into())
        })?;
        map.insert(SERVER_TIMESTAMP_FIELD.to_string(), timestamp_value(self.server_timestamp()));
        self.insert(collection, Uuid::new_v4().to_string(), data)
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError> {
        self.ensure_online()?;
        // Receiver and initial snapshot are taken under the same shard lock so
        // no change falls between them.
        let entry = self
            .collections
            .entry(query.collection.clone())
            .or_insert_with(|| Collection::new(self.channel_capacity));
        let rx = entry.tx.subscribe();
        let initial = query.apply(&entry.snapshot());
        drop(entry);
        Ok(Subscription::new(query, initial, rx))
    }
}
