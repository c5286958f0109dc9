use async_trait::async_trait;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use super::{
    ChangeEvent, ChangeKind, Document, DocumentStore, Fields, Filter, StoreError,
    CHANGE_FEED_CAPACITY,
};

#[derive(Debug, FromRow)]
struct DocumentRow {
    id: String,
    data: Value,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        let fields = match row.data {
            Value::Object(map) => map,
            _ => Fields::new(),
        };
        Document { id: row.id, fields }
    }
}

/// Document store over a single JSONB `documents` table.
///
/// Equality filters compile to one `data @> $2` containment check. The change
/// feed is process-local: writes from other instances are not observed.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
    feed: broadcast::Sender<ChangeEvent>,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        let (feed, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { pool, feed }
    }

    fn notify(&self, collection: &str, id: &str, kind: ChangeKind) {
        let _ = self.feed.send(ChangeEvent {
            collection: collection.to_string(),
            id: id.to_string(),
            kind,
        });
    }
}

fn containment(filters: &[Filter]) -> Value {
    Value::Object(
        filters
            .iter()
            .map(|f| (f.field.clone(), f.value.clone()))
            .collect(),
    )
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, data
            FROM documents
            WHERE collection = $1 AND data @> $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(collection)
        .bind(containment(filters))
        .fetch_all(&self.pool)
        .await?;
        debug!("Query {collection} matched {} documents", rows.len());
        Ok(rows.into_iter().map(Document::from).collect())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT id, data FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Document::from))
    }

    async fn create(&self, collection: &str, fields: Fields) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO documents (collection, id, data) VALUES ($1, $2, $3)")
            .bind(collection)
            .bind(&id)
            .bind(Value::Object(fields))
            .execute(&self.pool)
            .await?;
        self.notify(collection, &id, ChangeKind::Created);
        Ok(id)
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        partial: Fields,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET data = data || $3, updated_at = now()
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(Value::Object(partial))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        self.notify(collection, id, ChangeKind::Updated);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            self.notify(collection, id, ChangeKind::Deleted);
        }
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }
}
