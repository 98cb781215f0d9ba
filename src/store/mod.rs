//! Persistence collaborators: metadata records and question PDFs.
//!
//! Two seams keep the pipeline independent of where results land:
//!
//! * [`MetadataStore`]: papers and per-question [`ProcessingRecord`]s,
//!   upserted by `(paper_id, question_number)`. Lookups return `Option`.
//! * [`ObjectStore`]: question sub-PDFs; `put` returns a URL.
//!
//! Implementations: [`MemoryStore`] (tests, dry runs), [`LocalStore`]
//! (JSON index + blob directory) and [`SupabaseStore`] (PostgREST and the
//! Storage REST API).

pub mod local;
pub mod memory;
pub mod supabase;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use supabase::{SupabaseConfig, SupabaseStore};

use crate::error::StoreError;
use crate::model::{ClassificationMethod, Difficulty, DocumentKind, LinkConfidence};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Identity of one exam paper within a subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PaperKey {
    pub subject: String,
    pub year: u16,
    pub season: String,
    pub paper: String,
}

impl PaperKey {
    /// Stable identifier used as the metadata primary key.
    pub fn paper_id(&self) -> String {
        format!("{}/{}/{}/{}", self.subject, self.year, self.season, self.paper)
    }

    /// Deterministic object path: `{subject}/{year}/{season}/{paper}/{kind}/q{N}.pdf`.
    pub fn object_path(&self, kind: DocumentKind, question_number: &str) -> String {
        format!("{}/{}/q{}.pdf", self.paper_id(), kind.tag(), question_number)
    }
}

impl fmt::Display for PaperKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} paper {}", self.subject, self.year, self.season, self.paper)
    }
}

/// One processed paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperRecord {
    pub paper_id: String,
    pub key: PaperKey,
    pub qp_path: PathBuf,
    pub ms_path: Option<PathBuf>,
    /// Questions the paper was segmented into.
    pub question_count: usize,
    pub low_linkage: bool,
    pub processed_at: DateTime<Utc>,
}

/// Persisted classification of one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub paper_id: String,
    pub question_number: String,
    pub topic: String,
    pub difficulty: Difficulty,
    pub confidence: f32,
    pub method: ClassificationMethod,
    pub needs_review: bool,
    pub link_confidence: LinkConfidence,
    pub qp_pages: Vec<usize>,
    pub ms_pages: Vec<usize>,
    pub qp_url: Option<String>,
    pub ms_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingRecord {
    /// Record key inside a store: `paper_id#question_number`.
    pub fn key(&self) -> String {
        record_key(&self.paper_id, &self.question_number)
    }

    /// A record counts toward idempotency only when it is complete.
    pub fn is_valid(&self) -> bool {
        !self.topic.trim().is_empty()
            && !self.question_number.trim().is_empty()
            && (0.0..=1.0).contains(&self.confidence)
            && !self.qp_pages.is_empty()
    }
}

pub fn record_key(paper_id: &str, question_number: &str) -> String {
    format!("{paper_id}#{question_number}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Relational metadata collaborator.
pub trait MetadataStore: Send + Sync {
    fn upsert_paper<'a>(&'a self, paper: &'a PaperRecord) -> BoxFuture<'a, Result<(), StoreError>>;

    fn find_paper<'a>(
        &'a self,
        paper_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<PaperRecord>, StoreError>>;

    fn find_record<'a>(
        &'a self,
        paper_id: &'a str,
        question_number: &'a str,
    ) -> BoxFuture<'a, Result<Option<ProcessingRecord>, StoreError>>;

    /// Insert, or update in place when `(paper_id, question_number)` exists.
    fn upsert_record<'a>(
        &'a self,
        record: &'a ProcessingRecord,
    ) -> BoxFuture<'a, Result<UpsertOutcome, StoreError>>;

    fn records_for_paper<'a>(
        &'a self,
        paper_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ProcessingRecord>, StoreError>>;
}

/// Blob collaborator for question PDFs.
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` at `path` (overwriting) and return its URL.
    fn put<'a>(
        &'a self,
        bucket: &'a str,
        path: &'a str,
        bytes: Vec<u8>,
    ) -> BoxFuture<'a, Result<String, StoreError>>;
}

/// Whether `paper_id` already has a valid record for every question.
pub async fn paper_is_complete(
    store: &dyn MetadataStore,
    paper_id: &str,
) -> Result<bool, StoreError> {
    let Some(paper) = store.find_paper(paper_id).await? else {
        return Ok(false);
    };
    if paper.question_count == 0 {
        return Ok(false);
    }
    let valid = store
        .records_for_paper(paper_id)
        .await?
        .iter()
        .filter(|r| r.is_valid())
        .count();
    Ok(valid >= paper.question_count)
}
