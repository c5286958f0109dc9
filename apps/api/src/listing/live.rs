use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::store::{DocumentStore, Filter, Subscription};

/// Locally mirrored copy of a remote collection, kept current by a store
/// subscription. Readers take cheap snapshots; nobody writes through it.
pub struct LiveCollection<T> {
    snapshot: watch::Receiver<Arc<Vec<T>>>,
    pump: JoinHandle<()>,
}

impl<T> LiveCollection<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    /// Starts mirroring `collection`. `prepare` runs on each decoded snapshot,
    /// e.g. to sort it before display.
    pub fn spawn(
        store: Arc<dyn DocumentStore>,
        collection: &str,
        filters: Vec<Filter>,
        prepare: fn(&mut [T]),
    ) -> Self {
        let (tx, rx) = watch::channel(Arc::new(Vec::new()));
        let mut subscription = Subscription::new(store, collection, filters);

        let pump = tokio::spawn(async move {
            while let Some(result) = subscription.next_snapshot().await {
                let docs = match result {
                    Ok(docs) => docs,
                    Err(e) => {
                        warn!("Live query on {} failed: {e}", subscription.collection());
                        continue;
                    }
                };
                let mut items: Vec<T> = docs
                    .iter()
                    .filter_map(|doc| match doc.decode() {
                        Ok(item) => Some(item),
                        Err(e) => {
                            warn!("Skipping undecodable document {}: {e}", doc.id);
                            None
                        }
                    })
                    .collect();
                prepare(items.as_mut_slice());
                if tx.send(Arc::new(items)).is_err() {
                    break;
                }
            }
        });

        Self {
            snapshot: rx,
            pump,
        }
    }

    /// Whatever the subscription last delivered.
    pub fn snapshot(&self) -> Arc<Vec<T>> {
        self.snapshot.borrow().clone()
    }

    /// Waits until a snapshot newer than the last one observed arrives.
    pub async fn changed(&mut self) -> bool {
        self.snapshot.changed().await.is_ok()
    }
}

impl<T> Drop for LiveCollection<T> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::{compute_view, sort_newest_first, ViewState};
    use crate::models::submission::{Submission, SubmissionStatus};
    use crate::store::{to_fields, MemoryDocumentStore, SUBMISSIONS};
    use chrono::{Duration, Utc};

    fn submission(title: &str, age_days: i64) -> Submission {
        Submission {
            id: String::new(),
            intern_id: "u1".to_string(),
            intern_name: "Asha".to_string(),
            title: title.to_string(),
            domain: "web".to_string(),
            description: None,
            links: vec![],
            file_details: vec![],
            status: SubmissionStatus::Pending,
            points: 0,
            feedback: None,
            submitted_at: Utc::now() - Duration::days(age_days),
            submission_date: None,
            task_id: None,
            task_name: None,
            is_resubmission: false,
            original_submission_id: None,
        }
    }

    #[tokio::test]
    async fn test_live_collection_feeds_listing_engine() {
        let store = Arc::new(MemoryDocumentStore::new());
        store
            .create(SUBMISSIONS, to_fields(&submission("older", 3)).unwrap())
            .await
            .unwrap();

        let mut live: LiveCollection<Submission> = LiveCollection::spawn(
            store.clone(),
            SUBMISSIONS,
            vec![Filter::eq("internId", "u1")],
            sort_newest_first,
        );
        assert!(live.changed().await);
        assert_eq!(live.snapshot().len(), 1);

        store
            .create(SUBMISSIONS, to_fields(&submission("newer", 1)).unwrap())
            .await
            .unwrap();
        assert!(live.changed().await);

        let items = live.snapshot();
        let state = ViewState::new(10);
        let view = compute_view(&items, &state.query(&["title"], 30));
        let titles: Vec<_> = view.page_items.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["newer", "older"]);
    }
}
