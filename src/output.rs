//! Batch results: per-paper reports, the run summary, and atomic file writes.

use crate::error::PaperError;
use crate::model::Classification;
use crate::pipeline::boundary::BoundaryAnomaly;
use crate::store::PaperKey;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

/// Write `bytes` to `path` via a sibling temp file and rename, so readers
/// never see a partial file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path).await
}

/// Outcome of one question inside a processed paper.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionReport {
    pub question_number: String,
    pub classification: Option<Classification>,
    pub error: Option<PaperError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperStatus {
    /// Every question classified and persisted.
    Completed,
    /// Segmented and linked only (`--segment-only`).
    Segmented,
    /// Some questions failed to persist.
    Partial,
    /// Already complete in the store.
    Skipped,
    /// Stopped before classification; see `error`.
    Failed,
}

/// Everything the batch learned about one paper.
#[derive(Debug, Clone, Serialize)]
pub struct PaperReport {
    pub index: usize,
    pub key: PaperKey,
    pub status: PaperStatus,
    pub questions: Vec<QuestionReport>,
    pub anomalies: Vec<BoundaryAnomaly>,
    pub linkage_rate: Option<f32>,
    pub low_linkage: bool,
    pub error: Option<PaperError>,
    pub duration_ms: u64,
}

impl PaperReport {
    pub fn new(index: usize, key: PaperKey, status: PaperStatus) -> Self {
        Self {
            index,
            key,
            status,
            questions: Vec::new(),
            anomalies: Vec::new(),
            linkage_rate: None,
            low_linkage: false,
            error: None,
            duration_ms: 0,
        }
    }

    pub fn failed(index: usize, key: PaperKey, error: PaperError) -> Self {
        let mut report = Self::new(index, key, PaperStatus::Failed);
        report.error = Some(error);
        report
    }

    pub fn classified_count(&self) -> usize {
        self.questions
            .iter()
            .filter(|q| q.classification.is_some() && q.error.is_none())
            .count()
    }

    pub fn failed_questions(&self) -> impl Iterator<Item = &QuestionReport> {
        self.questions.iter().filter(|q| q.error.is_some())
    }
}

/// A question that could not be persisted.
#[derive(Debug, Clone, Serialize)]
pub struct FailedQuestion {
    pub paper: String,
    pub question_number: String,
    pub error: String,
}

/// Aggregate counters for a batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub total_papers: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub questions_classified: usize,
    pub questions_failed: usize,
    pub needs_review: usize,
    pub anomaly_count: usize,
    pub rescan: Vec<PathBuf>,
    pub low_linkage: Vec<String>,
    pub failed_questions: Vec<FailedQuestion>,
    /// Stopped early by an operator interrupt.
    pub interrupted: bool,
    /// Index of the last paper that finished, if any.
    pub last_completed_index: Option<usize>,
    pub duration_ms: u64,
    #[serde(skip)]
    pub papers: Vec<PaperReport>,
}

impl BatchSummary {
    /// Fold one paper's report into the counters.
    pub fn record(&mut self, report: PaperReport) {
        match report.status {
            PaperStatus::Skipped => self.skipped += 1,
            PaperStatus::Failed => self.failed += 1,
            _ => self.processed += 1,
        }
        if let Some(PaperError::NeedsRescan { document, .. }) = &report.error {
            self.rescan.push(document.clone());
        }
        if report.low_linkage {
            self.low_linkage.push(report.key.paper_id());
        }
        self.anomaly_count += report.anomalies.len();
        self.questions_classified += report.classified_count();
        self.needs_review += report
            .questions
            .iter()
            .filter(|q| q.classification.as_ref().is_some_and(|c| c.needs_review))
            .count();
        for q in report.failed_questions() {
            self.questions_failed += 1;
            self.failed_questions.push(FailedQuestion {
                paper: report.key.paper_id(),
                question_number: q.question_number.clone(),
                error: q.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            });
        }
        self.papers.push(report);
    }

    /// Non-zero exit: a paper could not be read or a question not persisted.
    /// Linkage problems only warn.
    pub fn has_irrecoverable_failures(&self) -> bool {
        self.failed > 0 || self.questions_failed > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::key;

    #[tokio::test]
    async fn atomic_write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        write_atomic(&path, b"one").await.unwrap();
        write_atomic(&path, b"two").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"two");
        assert!(!dir.path().join("nested").join("state.json.tmp").exists());
    }

    #[test]
    fn summary_counts_failures() {
        let mut summary = BatchSummary::default();
        summary.record(PaperReport::new(0, key(), PaperStatus::Skipped));
        assert!(!summary.has_irrecoverable_failures());

        let mut low = PaperReport::new(1, key(), PaperStatus::Completed);
        low.low_linkage = true;
        summary.record(low);
        assert!(!summary.has_irrecoverable_failures());
        assert_eq!(summary.low_linkage.len(), 1);

        summary.record(PaperReport::failed(
            2,
            key(),
            PaperError::NeedsRescan {
                document: PathBuf::from("scan_qp.pdf"),
                reason: "no text".into(),
            },
        ));
        assert_eq!(summary.rescan, vec![PathBuf::from("scan_qp.pdf")]);
        assert_eq!((summary.processed, summary.skipped, summary.failed), (1, 1, 1));
        assert!(summary.has_irrecoverable_failures());
    }
}
