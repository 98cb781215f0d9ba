//! Filesystem store: a JSON index of papers and records plus a blob tree.
//!
//! ```text
//! <root>/index.json
//! <root>/blobs/<bucket>/<subject>/<year>/<season>/<paper>/<kind>/q<N>.pdf
//! ```
//!
//! The index is rewritten atomically after every change.

use super::{
    record_key, MetadataStore, ObjectStore, PaperRecord, ProcessingRecord, UpsertOutcome,
};
use crate::error::StoreError;
use crate::output::write_atomic;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Index {
    papers: BTreeMap<String, PaperRecord>,
    records: BTreeMap<String, ProcessingRecord>,
}

pub struct LocalStore {
    root: PathBuf,
    index: Mutex<Index>,
}

impl LocalStore {
    /// Open (or create) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| io_error(&root, e))?;

        let index_path = root.join("index.json");
        let index = match tokio::fs::read(&index_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Serialization(format!("{}: {e}", index_path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Index::default(),
            Err(e) => return Err(io_error(&index_path, e)),
        };
        debug!(
            "Opened local store at {} ({} papers, {} records)",
            root.display(),
            index.papers.len(),
            index.records.len()
        );
        Ok(Self {
            root,
            index: Mutex::new(index),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    async fn save(&self, index: &Index) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(index)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let path = self.index_path();
        write_atomic(&path, &bytes)
            .await
            .map_err(|e| io_error(&path, e))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl MetadataStore for LocalStore {
    fn upsert_paper<'a>(&'a self, paper: &'a PaperRecord) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut index = self.index.lock().await;
            let previous = index.papers.insert(paper.paper_id.clone(), paper.clone());
            if let Err(e) = self.save(&index).await {
                match previous {
                    Some(p) => index.papers.insert(paper.paper_id.clone(), p),
                    None => index.papers.remove(&paper.paper_id),
                };
                return Err(e);
            }
            Ok(())
        })
    }

    fn find_paper<'a>(
        &'a self,
        paper_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<PaperRecord>, StoreError>> {
        Box::pin(async move { Ok(self.index.lock().await.papers.get(paper_id).cloned()) })
    }

    fn find_record<'a>(
        &'a self,
        paper_id: &'a str,
        question_number: &'a str,
    ) -> BoxFuture<'a, Result<Option<ProcessingRecord>, StoreError>> {
        Box::pin(async move {
            let index = self.index.lock().await;
            Ok(index
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
            let mut index = self.index.lock().await;
            let key = record.key();
            let previous = index.records.insert(key.clone(), record.clone());
            // Memory must not run ahead of disk.
            if let Err(e) = self.save(&index).await {
                match previous {
                    Some(r) => index.records.insert(key, r),
                    None => index.records.remove(&key),
                };
                return Err(e);
            }
            Ok(if previous.is_some() {
                UpsertOutcome::Updated
            } else {
                UpsertOutcome::Inserted
            })
        })
    }

    fn records_for_paper<'a>(
        &'a self,
        paper_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ProcessingRecord>, StoreError>> {
        Box::pin(async move {
            let index = self.index.lock().await;
            Ok(index
                .records
                .values()
                .filter(|r| r.paper_id == paper_id)
                .cloned()
                .collect())
        })
    }
}

impl ObjectStore for LocalStore {
    fn put<'a>(
        &'a self,
        bucket: &'a str,
        path: &'a str,
        bytes: Vec<u8>,
    ) -> BoxFuture<'a, Result<String, StoreError>> {
        Box::pin(async move {
            let target = self.root.join("blobs").join(bucket).join(path);
            write_atomic(&target, &bytes)
                .await
                .map_err(|e| io_error(&target, e))?;
            Ok(format!("file://{}", target.display()))
        })
    }
}
