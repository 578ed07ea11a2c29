//! Document store abstraction.
//!
//! Ledger, audit log, staff roster and injury reports all live in a hosted
//! document database. The services only talk to it through [`DocumentStore`],
//! which offers CRUD over JSON documents, field-path partial updates with an
//! optional version precondition, append-with-server-timestamp, and live
//! subscriptions that push the full matching result set on every change.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

pub mod memory;
mod patch;

pub use memory::InMemoryStore;
pub use patch::apply_updates;

/// Field written by [`DocumentStore::append_with_server_timestamp`].
pub const SERVER_TIMESTAMP_FIELD: &str = "timestamp";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("document {collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },

    #[error("version conflict on {collection}/{id}: expected {expected}, found {actual}")]
    VersionConflict {
        collection: String,
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("invalid field path: {0}")]
    InvalidPath(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}

/// Path to a field inside a document, one segment per nesting level.
///
/// Segments are kept separate so that map keys containing dots (location
/// names such as "Stn. 1") are addressed unambiguously.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parses a dotted path such as `locations.StationA.qty`.
    pub fn parse(dotted: &str) -> Result<Self, StoreError> {
        let segments: Vec<String> = dotted.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(StoreError::InvalidPath(dotted.to_string()));
        }
        Ok(Self(segments))
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Resolves the path against a JSON value.
    pub fn lookup<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.0
            .iter()
            .try_fold(value, |current, segment| current.get(segment))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// A single partial update.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Set(FieldPath, Value),
    Delete(FieldPath),
}

impl FieldUpdate {
    pub fn set(path: FieldPath, value: impl Serialize) -> Result<Self, StoreError> {
        let value =
            serde_json::to_value(value).map_err(|e| StoreError::InvalidDocument(e.to_string()))?;
        Ok(FieldUpdate::Set(path, value))
    }

    pub fn path(&self) -> &FieldPath {
        match self {
            FieldUpdate::Set(path, _) | FieldUpdate::Delete(path) => path,
        }
    }
}

/// Write precondition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precondition {
    #[default]
    None,
    /// The document must currently be at exactly this version.
    Version(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub version: u64,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub data: Value,
}

impl Document {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            StoreError::InvalidDocument(format!("{}: {}", self.id, e))
        })
    }
}

/// Timestamps are stored as fixed-width RFC 3339 strings so that
/// lexicographic order equals chronological order.
pub fn timestamp_value(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Micros, true))
}

pub fn to_data(value: &impl Serialize) -> Result<Value, StoreError> {
    let data =
        serde_json::to_value(value).map_err(|e| StoreError::InvalidDocument(e.to_string()))?;
    if !data.is_object() {
        return Err(StoreError::InvalidDocument(
            "document data must be a JSON object".into(),
        ));
    }
    Ok(data)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Collection query: equality filters, one optional sort key, optional limit.
#[derive(Debug, Clone)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<(FieldPath, Value)>,
    pub order_by: Option<(FieldPath, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, path: FieldPath, value: impl Into<Value>) -> Self {
        self.filters.push((path, value.into()));
        self
    }

    pub fn order_by(mut self, path: FieldPath, direction: Direction) -> Self {
        self.order_by = Some((path, direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.filters
            .iter()
            .all(|(path, expected)| path.lookup(&doc.data) == Some(expected))
    }

    /// Applies filters, ordering and limit to a collection snapshot.
    pub fn apply(&self, docs: &[Document]) -> Vec<Document> {
        let mut out: Vec<Document> = docs.iter().filter(|d| self.matches(d)).cloned().collect();
        if let Some((path, direction)) = &self.order_by {
            out.sort_by(|a, b| {
                let ord = compare_values(path.lookup(&a.data), path.lookup(&b.data))
                    .then_with(|| a.id.cmp(&b.id));
                match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

/// Missing values sort first, then booleans, numbers and strings.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Live query. The first call to [`Subscription::next`] yields the result
/// set at subscription time; later calls yield it again after every change
/// to the collection, in store notification order.
pub struct Subscription {
    query: Query,
    initial: Option<Vec<Document>>,
    rx: broadcast::Receiver<Arc<Vec<Document>>>,
}

impl Subscription {
    pub(crate) fn new(
        query: Query,
        initial: Vec<Document>,
        rx: broadcast::Receiver<Arc<Vec<Document>>>,
    ) -> Self {
        Self {
            query,
            initial: Some(initial),
            rx,
        }
    }

    pub async fn next(&mut self) -> Option<Vec<Document>> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }
        loop {
            match self.rx.recv().await {
                Ok(snapshot) => return Some(self.query.apply(&snapshot)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // A later snapshot is already queued; it supersedes the skipped ones.
                    warn!(collection = %self.query.collection, skipped, "subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    async fn list(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Creates a document. A `None` id is assigned by the store.
    async fn create(
        &self,
        collection: &str,
        id: Option<&str>,
        data: Value,
    ) -> Result<Document, StoreError>;

    /// Applies partial updates atomically, bumping the version.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        updates: &[FieldUpdate],
        precondition: Precondition,
    ) -> Result<Document, StoreError>;

    async fn delete(
        &self,
        collection: &str,
        id: &str,
        precondition: Precondition,
    ) -> Result<(), StoreError>;

    /// Creates a document with a store-assigned id and sets
    /// [`SERVER_TIMESTAMP_FIELD`] from the store clock.
    async fn append_with_server_timestamp(
        &self,
        collection: &str,
        data: Value,
    ) -> Result<Document, StoreError>;

    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError>;
}
