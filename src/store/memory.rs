//! In-process store for tests and dry runs.

use super::{
    record_key, MetadataStore, ObjectStore, PaperRecord, ProcessingRecord, UpsertOutcome,
};
use crate::error::StoreError;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct State {
    papers: HashMap<String, PaperRecord>,
    records: BTreeMap<String, ProcessingRecord>,
    blobs: BTreeMap<String, Vec<u8>>,
}

/// Both store traits over plain maps.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    inserts: AtomicUsize,
    /// Remaining `put` calls that fail before uploads succeed.
    failing_puts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` uploads fail with a retryable error.
    pub fn fail_next_puts(&self, n: usize) {
        self.failing_puts.store(n, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records ever inserted (updates excluded).
    pub fn insert_count(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<ProcessingRecord> {
        self.lock().records.values().cloned().collect()
    }

    pub fn blob_paths(&self) -> Vec<String> {
        self.lock().blobs.keys().cloned().collect()
    }
}

impl MetadataStore for MemoryStore {
    fn upsert_paper<'a>(&'a self, paper: &'a PaperRecord) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.lock().papers.insert(paper.paper_id.clone(), paper.clone());
            Ok(())
        })
    }

    fn find_paper<'a>(
        &'a self,
        paper_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<PaperRecord>, StoreError>> {
        Box::pin(async move { Ok(self.lock().papers.get(paper_id).cloned()) })
    }

    fn find_record<'a>(
        &'a self,
        paper_id: &'a str,
        question_number: &'a str,
    ) -> BoxFuture<'a, Result<Option<ProcessingRecord>, StoreError>> {
        Box::pin(async move {
            Ok(self
                .lock()
                .records
                .get(&record_key(paper_id, question_number))
                .cloned())
        })
    }

    fn upsert_record<'a>(
        &'a self,
        record: &'a ProcessingRecord,
    ) -> BoxFuture<'a, Result<UpsertOutcome, StoreError>> {
        Box::pin(async move {
            let previous = self.lock().records.insert(record.key(), record.clone());
            Ok(match previous {
                Some(_) => UpsertOutcome::Updated,
                None => {
                    self.inserts.fetch_add(1, Ordering::SeqCst);
                    UpsertOutcome::Inserted
                }
            })
        })
    }

    fn records_for_paper<'a>(
        &'a self,
        paper_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ProcessingRecord>, StoreError>> {
        Box::pin(async move {
            Ok(self
                .lock()
                .records
                .values()
                .filter(|r| r.paper_id == paper_id)
                .cloned()
                .collect())
        })
    }
}

impl ObjectStore for MemoryStore {
    fn put<'a>(
        &'a self,
        bucket: &'a str,
        path: &'a str,
        bytes: Vec<u8>,
    ) -> BoxFuture<'a, Result<String, StoreError>> {
        Box::pin(async move {
            let failing = self
                .failing_puts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(StoreError::Http {
                    endpoint: format!("memory://{bucket}/{path}"),
                    detail: "injected failure".into(),
                });
            }
            let key = format!("{bucket}/{path}");
            self.lock().blobs.insert(key.clone(), bytes);
            Ok(format!("memory://{key}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::record;

    #[tokio::test]
    async fn upsert_updates_in_place() {
        let store = MemoryStore::new();
        let mut r = record("4");
        assert_eq!(store.upsert_record(&r).await.unwrap(), UpsertOutcome::Inserted);
        r.topic = "2".into();
        assert_eq!(store.upsert_record(&r).await.unwrap(), UpsertOutcome::Updated);

        assert_eq!(store.records().len(), 1);
        assert_eq!(store.insert_count(), 1);
        let found = store.find_record(&r.paper_id, "4").await.unwrap().unwrap();
        assert_eq!(found.topic, "2");
        assert!(store.find_record(&r.paper_id, "5").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn injected_put_failures_are_consumed() {
        let store = MemoryStore::new();
        store.fail_next_puts(1);
        assert!(store.put("papers", "a/q1.pdf", vec![1]).await.is_err());
        let url = store.put("papers", "a/q1.pdf", vec![1]).await.unwrap();
        assert_eq!(url, "memory://papers/a/q1.pdf");
        assert_eq!(store.blob_paths(), vec!["papers/a/q1.pdf".to_string()]);
    }
}
