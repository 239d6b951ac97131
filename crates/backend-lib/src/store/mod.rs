// ============================
// crates/backend-lib/src/store/mod.rs
// ============================
//! Document store port.
//!
//! Documents are JSON objects addressed by `collection/id`. Field paths are
//! dotted (`status.resolved`) and follow the camelCase names of the types in
//! `campus_safety_common`.
pub mod memory;

pub use memory::MemoryDocumentStore;

use crate::error::AppError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Result type for store operations
pub type StoreResult<T> = Result<T, AppError>;

pub const SOS_EVENTS: &str = "sos_events";
pub const SOS_SESSIONS: &str = "sos_sessions";
/// One claim per user holding the id of their unresolved SOS
pub const ACTIVE_SOS: &str = "active_sos";
pub const USERS: &str = "users";
pub const SAFE_WALKS: &str = "safe_walks";

/// A stored document together with its key
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn decode<T: DeserializeOwned>(self) -> StoreResult<T> {
        decode(self.data)
    }
}

/// A single field mutation inside an update
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Set { path: String, value: Value },
    /// Appends every value; duplicates are kept so timelines never collapse
    ArrayAppend { path: String, values: Vec<Value> },
    /// Replaced by the store clock when the write is applied
    ServerTimestamp { path: String },
    Delete { path: String },
}

impl FieldUpdate {
    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        FieldUpdate::Set {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Serialize `value` and set it; serialization failures surface as `AppError::Json`
    pub fn set_serialized<T: Serialize>(path: impl Into<String>, value: &T) -> StoreResult<Self> {
        Ok(FieldUpdate::Set {
            path: path.into(),
            value: serde_json::to_value(value)?,
        })
    }

    pub fn append<T: Serialize>(path: impl Into<String>, value: &T) -> StoreResult<Self> {
        Ok(FieldUpdate::ArrayAppend {
            path: path.into(),
            values: vec![serde_json::to_value(value)?],
        })
    }

    pub fn server_timestamp(path: impl Into<String>) -> Self {
        FieldUpdate::ServerTimestamp { path: path.into() }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        FieldUpdate::Delete { path: path.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    /// `value` must be an array; matches when the field equals any element
    In,
}

/// Query filter. A document missing the field never matches, whatever the operator.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub path: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            path: path.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    pub fn ne(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            path: path.into(),
            op: FilterOp::Ne,
            value: value.into(),
        }
    }

    pub fn one_of(path: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            path: path.into(),
            op: FilterOp::In,
            value: Value::Array(values),
        }
    }

    pub fn matches(&self, document: &Value) -> bool {
        let Some(field) = get_path(document, &self.path) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => *field == self.value,
            FilterOp::Ne => *field != self.value,
            FilterOp::In => self
                .value
                .as_array()
                .is_some_and(|candidates| candidates.contains(field)),
        }
    }
}

/// Guard checked against the current document before an op is applied
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    Exists,
    FieldEquals { path: String, value: Value },
}

impl Precondition {
    pub fn field_equals(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Precondition::FieldEquals {
            path: path.into(),
            value: value.into(),
        }
    }
}

/// One write inside an atomic [`DocumentStore::commit`]
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Fails with `Conflict` when the document exists
    Create {
        collection: String,
        id: String,
        data: Value,
    },
    Set {
        collection: String,
        id: String,
        data: Value,
    },
    /// Fails with `NotFound` when the document is absent
    Update {
        collection: String,
        id: String,
        updates: Vec<FieldUpdate>,
        precondition: Option<Precondition>,
    },
    /// Deleting an absent document is a no-op unless a precondition says otherwise
    Delete {
        collection: String,
        id: String,
        precondition: Option<Precondition>,
    },
}

impl WriteOp {
    pub fn create<T: Serialize>(collection: &str, id: &str, data: &T) -> StoreResult<Self> {
        Ok(WriteOp::Create {
            collection: collection.to_string(),
            id: id.to_string(),
            data: serde_json::to_value(data)?,
        })
    }

    pub fn set<T: Serialize>(collection: &str, id: &str, data: &T) -> StoreResult<Self> {
        Ok(WriteOp::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            data: serde_json::to_value(data)?,
        })
    }

    pub fn update(collection: &str, id: &str, updates: Vec<FieldUpdate>) -> Self {
        WriteOp::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            updates,
            precondition: None,
        }
    }

    pub fn delete(collection: &str, id: &str) -> Self {
        WriteOp::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
            precondition: None,
        }
    }

    /// Attach a precondition. Creates and sets ignore it.
    #[must_use]
    pub fn when(mut self, guard: Precondition) -> Self {
        match &mut self {
            WriteOp::Update { precondition, .. } | WriteOp::Delete { precondition, .. } => {
                *precondition = Some(guard);
            },
            WriteOp::Create { .. } | WriteOp::Set { .. } => {},
        }
        self
    }

    pub fn key(&self) -> (&str, &str) {
        match self {
            WriteOp::Create { collection, id, .. }
            | WriteOp::Set { collection, id, .. }
            | WriteOp::Update { collection, id, .. }
            | WriteOp::Delete { collection, id, .. } => (collection, id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Broadcast after every committed write
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub collection: String,
    pub id: String,
    pub kind: ChangeKind,
    /// New contents; `None` for deletions
    pub data: Option<Value>,
}

/// Collection/document database with atomic multi-document commits
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>>;

    /// Documents in `collection` matching every filter, ordered by id
    async fn query(&self, collection: &str, filters: &[Filter]) -> StoreResult<Vec<Document>>;

    /// Apply every op or none of them
    async fn commit(&self, ops: Vec<WriteOp>) -> StoreResult<()>;

    /// Change notifications for every committed write
    fn changes(&self) -> broadcast::Receiver<DocumentChange>;

    async fn set(&self, collection: &str, id: &str, data: Value) -> StoreResult<()> {
        self.commit(vec![WriteOp::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        }])
        .await
    }

    async fn create(&self, collection: &str, id: &str, data: Value) -> StoreResult<()> {
        self.commit(vec![WriteOp::Create {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        }])
        .await
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        updates: Vec<FieldUpdate>,
    ) -> StoreResult<()> {
        self.commit(vec![WriteOp::update(collection, id, updates)]).await
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        self.commit(vec![WriteOp::delete(collection, id)]).await
    }
}

/// Fetch and deserialize a document
pub async fn get_as<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
) -> StoreResult<Option<T>> {
    store
        .get(collection, id)
        .await?
        .map(decode)
        .transpose()
}

/// Query and deserialize every match
pub async fn query_as<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    filters: &[Filter],
) -> StoreResult<Vec<T>> {
    store
        .query(collection, filters)
        .await?
        .into_iter()
        .map(Document::decode)
        .collect()
}

pub fn decode<T: DeserializeOwned>(value: Value) -> StoreResult<T> {
    Ok(serde_json::from_value(value)?)
}

/// Live query: yields the current result set immediately, then again after
/// every change in the collection. `next` is cancel-safe.
pub struct QuerySubscription {
    store: Arc<dyn DocumentStore>,
    collection: String,
    filters: Vec<Filter>,
    changes: broadcast::Receiver<DocumentChange>,
    /// A snapshot is owed to the caller
    pending: bool,
}

impl QuerySubscription {
    pub fn new(store: Arc<dyn DocumentStore>, collection: &str, filters: Vec<Filter>) -> Self {
        // subscribe before the first read so no change is missed in between
        let changes = store.changes();
        Self {
            store,
            collection: collection.to_string(),
            filters,
            changes,
            pending: true,
        }
    }

    /// Next snapshot, or `None` once the store has shut down
    pub async fn next(&mut self) -> Option<StoreResult<Vec<Document>>> {
        while !self.pending {
            match self.changes.recv().await {
                Ok(change) if change.collection == self.collection => self.pending = true,
                Ok(_) => {},
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, collection = %self.collection, "query subscription lagged");
                    self.pending = true;
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
        let snapshot = self.store.query(&self.collection, &self.filters).await;
        self.pending = false;
        Some(snapshot)
    }
}

// ---------------------------------------------------------------------------
// Dotted path helpers
// ---------------------------------------------------------------------------

pub fn get_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |current, segment| current.get(segment))
}

/// Set a value, creating intermediate objects (and replacing non-objects) on the way
pub fn set_path(document: &mut Value, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = document;
    while let Some(segment) = segments.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Some(map) = current.as_object_mut() else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

pub fn remove_path(document: &mut Value, path: &str) {
    let (parent, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (get_path_mut(document, parent), leaf),
        None => (Some(document), path),
    };
    if let Some(Value::Object(map)) = parent {
        map.remove(leaf);
    }
}

fn get_path_mut<'a>(document: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    path.split('.')
        .try_fold(document, |current, segment| current.get_mut(segment))
}
