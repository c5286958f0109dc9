//! Document Store: the single seam between the service and the hosted
//! document database.
//!
//! Records are schemaless JSON objects addressed by `(collection, id)`.
//! Typed models go in and out through [`to_fields`] and [`Document::decode`].
//!
//! `AppState` holds an `Arc<dyn DocumentStore>`, chosen at startup by config.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

pub use memory::MemoryDocumentStore;
pub use postgres::PgDocumentStore;

pub const SUBMISSIONS: &str = "submissions";
pub const SUBMISSION_LOGS: &str = "submission_logs";
pub const SUBMISSION_HISTORY: &str = "submission_history";
pub const TASKS: &str = "tasks";
pub const USERS: &str = "users";
pub const ACTIVITY_LOGS: &str = "activity_logs";

/// Capacity of the in-process change feed. Slow subscribers that fall further
/// behind than this skip straight to a fresh snapshot.
pub const CHANGE_FEED_CAPACITY: usize = 256;

pub type Fields = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Malformed document: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// A stored record. `id` lives outside `fields`.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    /// Decodes into a typed model, exposing the document id as `id`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        let mut fields = self.fields.clone();
        fields.insert("id".to_string(), Value::String(self.id.clone()));
        Ok(serde_json::from_value(Value::Object(fields))?)
    }
}

/// Serializes a model into storable fields. Any `id` key is dropped.
pub fn to_fields<T: Serialize>(value: &T) -> Result<Fields, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(mut fields) => {
            fields.remove("id");
            Ok(fields)
        }
        other => Err(StoreError::Unavailable(format!(
            "expected an object, got {other}"
        ))),
    }
}

/// Equality filter on a top-level field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        fields.get(&self.field) == Some(&self.value)
    }
}

pub fn matches_all(filters: &[Filter], fields: &Fields) -> bool {
    filters.iter().all(|f| f.matches(fields))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub collection: String,
    pub id: String,
    pub kind: ChangeKind,
}

/// The document store trait. Implement this to swap backends without touching
/// the workflow or handler code.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Matching documents in insertion order.
    async fn query(&self, collection: &str, filters: &[Filter])
        -> Result<Vec<Document>, StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Inserts a new document under a generated id and returns that id.
    async fn create(&self, collection: &str, fields: Fields) -> Result<String, StoreError>;

    /// Merges `partial` into an existing document. Missing document is `NotFound`.
    async fn update(&self, collection: &str, id: &str, partial: Fields)
        -> Result<(), StoreError>;

    /// Deleting a missing document is not an error.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// Change feed for every write this store performs.
    fn changes(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// Fetches and decodes one typed record.
pub async fn get_as<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
) -> Result<Option<T>, StoreError> {
    store
        .get(collection, id)
        .await?
        .map(|doc| doc.decode())
        .transpose()
}

/// Queries and decodes typed records.
pub async fn query_as<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    filters: &[Filter],
) -> Result<Vec<T>, StoreError> {
    store
        .query(collection, filters)
        .await?
        .iter()
        .map(Document::decode)
        .collect()
}

/// Live view of a filtered collection.
///
/// Yields the current snapshot first, then a fresh snapshot after every change
/// to the watched collection. Dropping the subscription unsubscribes.
pub struct Subscription {
    store: Arc<dyn DocumentStore>,
    collection: String,
    filters: Vec<Filter>,
    feed: broadcast::Receiver<ChangeEvent>,
    primed: bool,
}

impl Subscription {
    pub fn new(store: Arc<dyn DocumentStore>, collection: &str, filters: Vec<Filter>) -> Self {
        let feed = store.changes();
        Self {
            store,
            collection: collection.to_string(),
            filters,
            feed,
            primed: false,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Waits for the next snapshot. Returns `None` once the store's feed closes.
    pub async fn next_snapshot(&mut self) -> Option<Result<Vec<Document>, StoreError>> {
        if self.primed {
            loop {
                match self.feed.recv().await {
                    Ok(event) if event.collection == self.collection => break,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Subscription on {} lagged by {skipped} events", self.collection);
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }
        self.primed = true;
        Some(self.store.query(&self.collection, &self.filters).await)
    }
}
