//! In-memory document store

use super::{
    get_path, remove_path, set_path, ChangeKind, Document, DocumentChange, DocumentStore, Filter,
    FieldUpdate, Precondition, StoreResult, WriteOp,
};
use crate::error::AppError;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

const CHANGE_CAPACITY: usize = 256;

type Collection = BTreeMap<String, Value>;

/// In-memory [`DocumentStore`]. Commits are serialized behind one write lock.
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, Collection>>,
    changes: broadcast::Sender<DocumentChange>,
    available: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            collections: RwLock::new(HashMap::new()),
            changes,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: every call fails with `StoreUnavailable` until re-enabled
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of documents in a collection (for testing purposes)
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::StoreUnavailable(
                "document store is unreachable".to_string(),
            ))
        }
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        self.ensure_available()?;
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn query(&self, collection: &str, filters: &[Filter]) -> StoreResult<Vec<Document>> {
        self.ensure_available()?;
        let collections = self.collections.read();
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .filter(|(_, data)| filters.iter().all(|filter| filter.matches(data)))
            .map(|(id, data)| Document {
                id: id.clone(),
                data: data.clone(),
            })
            .collect())
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        self.ensure_available()?;

        let applied = {
            let mut collections = self.collections.write();

            // stage against an overlay so a failing op leaves nothing behind
            let mut staged: Vec<((String, String), Option<Value>, ChangeKind)> = Vec::new();
            for op in ops {
                let (collection, id) = op.key();
                let key = (collection.to_string(), id.to_string());
                let current = staged
                    .iter()
                    .rev()
                    .find(|(staged_key, _, _)| *staged_key == key)
                    .map(|(_, value, _)| value.clone())
                    .unwrap_or_else(|| {
                        collections
                            .get(collection)
                            .and_then(|docs| docs.get(id))
                            .cloned()
                    });
                let (next, kind) = apply(op, current)?;
                staged.push((key, next, kind));
            }

            for ((collection, id), value, _) in &staged {
                let docs = collections.entry(collection.clone()).or_default();
                match value {
                    Some(value) => {
                        docs.insert(id.clone(), value.clone());
                    },
                    None => {
                        docs.remove(id);
                    },
                }
            }
            staged
        };

        for ((collection, id), data, kind) in applied {
            // no subscribers is fine
            let _ = self.changes.send(DocumentChange {
                collection,
                id,
                kind,
                data,
            });
        }
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<DocumentChange> {
        self.changes.subscribe()
    }
}

fn apply(op: WriteOp, current: Option<Value>) -> StoreResult<(Option<Value>, ChangeKind)> {
    match op {
        WriteOp::Create {
            collection,
            id,
            data,
        } => {
            if current.is_some() {
                return Err(AppError::Conflict(format!(
                    "{collection}/{id} already exists"
                )));
            }
            Ok((Some(data), ChangeKind::Created))
        },
        WriteOp::Set { data, .. } => {
            let kind = if current.is_some() {
                ChangeKind::Updated
            } else {
                ChangeKind::Created
            };
            Ok((Some(data), kind))
        },
        WriteOp::Update {
            collection,
            id,
            updates,
            precondition,
        } => {
            let Some(mut document) = current else {
                return Err(AppError::NotFound(format!("{collection}/{id}")));
            };
            check(precondition.as_ref(), Some(&document), &collection, &id)?;
            for update in updates {
                apply_field(&mut document, update);
            }
            Ok((Some(document), ChangeKind::Updated))
        },
        WriteOp::Delete {
            collection,
            id,
            precondition,
        } => {
            check(precondition.as_ref(), current.as_ref(), &collection, &id)?;
            Ok((None, ChangeKind::Deleted))
        },
    }
}

fn check(
    precondition: Option<&Precondition>,
    document: Option<&Value>,
    collection: &str,
    id: &str,
) -> StoreResult<()> {
    let holds = match (precondition, document) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(Precondition::Exists), Some(_)) => true,
        (Some(Precondition::FieldEquals { path, value }), Some(document)) => {
            get_path(document, path) == Some(value)
        },
    };
    if holds {
        Ok(())
    } else {
        Err(AppError::Conflict(format!(
            "precondition failed on {collection}/{id}"
        )))
    }
}

fn apply_field(document: &mut Value, update: FieldUpdate) {
    match update {
        FieldUpdate::Set { path, value } => set_path(document, &path, value),
        FieldUpdate::ArrayAppend { path, values } => {
            let mut items = match get_path(document, &path) {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            };
            items.extend(values);
            set_path(document, &path, Value::Array(items));
        },
        FieldUpdate::ServerTimestamp { path } => {
            let now = serde_json::to_value(Utc::now()).unwrap_or(Value::Null);
            set_path(document, &path, now);
        },
        FieldUpdate::Delete { path } => remove_path(document, &path),
    }
}
