use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{
    matches_all, ChangeEvent, ChangeKind, Document, DocumentStore, Fields, Filter, StoreError,
    CHANGE_FEED_CAPACITY,
};

/// Operations that can be made to fail, for exercising partial-failure paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Query,
    Get,
    Create,
    Update,
    Delete,
}

/// Process-local document store. Backs `BACKEND=memory` and the test suite.
pub struct MemoryDocumentStore {
    collections: Mutex<HashMap<String, Vec<Document>>>,
    failures: Mutex<HashSet<(StoreOp, String)>>,
    feed: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            collections: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashSet::new()),
            feed,
        }
    }

    /// Makes every subsequent `op` on `collection` fail with `Unavailable`.
    pub fn fail_on(&self, op: StoreOp, collection: &str) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((op, collection.to_string()));
    }

    /// Inserts a document under a caller-chosen id, replacing any previous one.
    pub fn insert_with_id(&self, collection: &str, id: &str, fields: Fields) {
        let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        let docs = collections.entry(collection.to_string()).or_default();
        docs.retain(|d| d.id != id);
        docs.push(Document {
            id: id.to_string(),
            fields,
        });
        drop(collections);
        self.notify(collection, id, ChangeKind::Created);
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(collection)
            .map_or(0, Vec::len)
    }

    fn check(&self, op: StoreOp, collection: &str) -> Result<(), StoreError> {
        let failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        if failures.contains(&(op, collection.to_string())) {
            return Err(StoreError::Unavailable(format!(
                "{op:?} on {collection} rejected"
            )));
        }
        Ok(())
    }

    fn notify(&self, collection: &str, id: &str, kind: ChangeKind) {
        // No receivers is fine.
        let _ = self.feed.send(ChangeEvent {
            collection: collection.to_string(),
            id: id.to_string(),
            kind,
        });
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> Result<Vec<Document>, StoreError> {
        self.check(StoreOp::Query, collection)?;
        let collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| matches_all(filters, &d.fields))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.check(StoreOp::Get, collection)?;
        let collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| d.id == id).cloned()))
    }

    async fn create(&self, collection: &str, fields: Fields) -> Result<String, StoreError> {
        self.check(StoreOp::Create, collection)?;
        let id = Uuid::new_v4().to_string();
        {
            let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
            collections
                .entry(collection.to_string())
                .or_default()
                .push(Document {
                    id: id.clone(),
                    fields,
                });
        }
        self.notify(collection, &id, ChangeKind::Created);
        Ok(id)
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        partial: Fields,
    ) -> Result<(), StoreError> {
        self.check(StoreOp::Update, collection)?;
        {
            let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
            let doc = collections
                .get_mut(collection)
                .and_then(|docs| docs.iter_mut().find(|d| d.id == id))
                .ok_or_else(|| StoreError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })?;
            doc.fields.extend(partial);
        }
        self.notify(collection, id, ChangeKind::Updated);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.check(StoreOp::Delete, collection)?;
        let removed = {
            let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
            match collections.get_mut(collection) {
                Some(docs) => {
                    let before = docs.len();
                    docs.retain(|d| d.id != id);
                    docs.len() != before
                }
                None => false,
            }
        };
        if removed {
            self.notify(collection, id, ChangeKind::Deleted);
        }
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }
}
