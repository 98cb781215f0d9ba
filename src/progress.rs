//! Progress-callback trait for batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the orchestrator walks the corpus. The CLI drives an
//! `indicatif` bar from these; tests count them.
//!
//! # Example
//!
//! ```rust
//! use grademax_pipeline::BatchProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct Counter(AtomicUsize);
//!
//! impl BatchProgressCallback for Counter {
//!     fn on_paper_complete(&self, _index: usize, _total: usize, _paper: &str, _ok: bool) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by the batch orchestrator. Every method has a no-op default.
///
/// Papers are processed sequentially, so calls never overlap, but the trait
/// is `Send + Sync` so a callback can be shared with other tasks.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first paper.
    ///
    /// # Arguments
    /// * `total_papers`: papers discovered in the corpus
    /// * `start_index` : first index that will be processed
    fn on_batch_start(&self, total_papers: usize, start_index: usize) {
        let _ = (total_papers, start_index);
    }

    /// Called when work on a paper begins.
    fn on_paper_start(&self, index: usize, total_papers: usize, paper_id: &str) {
        let _ = (index, total_papers, paper_id);
    }

    /// Called after each classified question is persisted.
    fn on_question_classified(&self, paper_id: &str, question_number: &str, topic: &str) {
        let _ = (paper_id, question_number, topic);
    }

    /// Called when a paper finishes, whether processed, skipped or failed.
    ///
    /// # Arguments
    /// * `success`: `false` when the paper failed or had failed questions
    fn on_paper_complete(&self, index: usize, total_papers: usize, paper_id: &str, success: bool) {
        let _ = (index, total_papers, paper_id, success);
    }

    /// Periodic throughput report.
    fn on_eta(&self, done: usize, remaining: usize, papers_per_min: f64, eta_secs: u64) {
        let _ = (done, remaining, papers_per_min, eta_secs);
    }

    /// Called once after the last paper, or after an interrupt.
    fn on_batch_complete(&self, processed: usize, failed: usize, interrupted: bool) {
        let _ = (processed, failed, interrupted);
    }
}

/// The default when no callback is configured.
pub struct NoopBatchProgress;

impl BatchProgressCallback for NoopBatchProgress {}

/// Type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
