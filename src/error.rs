//! Error types for the grademax pipeline.
//!
//! Four error types reflect the four places a failure can stop:
//!
//! * [`PipelineError`] (**fatal**): the batch cannot start at all (missing
//!   corpus directory, unreadable subject configuration, provider not
//!   configured). Returned as `Err` before any paper is touched.
//!
//! * [`PaperError`] (**per paper**): one document needs a re-scan
//!   or a question could not be persisted. Recorded in the batch summary; the
//!   batch moves on to the next paper.
//!
//! * [`ClassifierError`] (**tier-local**): a classifier tier failed. The chain
//!   retries or falls through to the next tier; it never escapes the chain.
//!
//! * [`StoreError`]: a metadata or object store call failed. Retried by the
//!   orchestrator, then folded into a [`PaperError::PersistenceFailed`].

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::retry::Retryable;

/// All fatal errors returned by the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The subject corpus directory does not exist.
    #[error("Corpus directory not found: '{path}'\nCheck the subject directory path.")]
    CorpusNotFound { path: PathBuf },

    /// The corpus directory exists but holds no recognisable question papers.
    #[error("No question papers found under '{path}'\nExpected files like 2019_jun_1p_qp.pdf / 2019_jun_1p_ms.pdf")]
    EmptyCorpus { path: PathBuf },

    /// The subject configuration (topic vocabulary) file is missing.
    #[error("Subject configuration not found: '{path}'")]
    SubjectConfigNotFound { path: PathBuf },

    /// The subject configuration could not be read or parsed.
    #[error("Invalid subject configuration '{path}': {detail}")]
    InvalidSubjectConfig { path: PathBuf, detail: String },

    /// The topic vocabulary is empty, has duplicate codes, or names an unknown default.
    #[error("Invalid topic vocabulary: {0}")]
    InvalidVocabulary(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install libpdfium system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// The checkpoint file could not be read or written.
    #[error("Checkpoint I/O failed for '{path}': {source}")]
    CheckpointFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The checkpoint file exists but is not valid JSON.
    #[error("Checkpoint '{path}' is corrupt: {detail}")]
    CorruptCheckpoint { path: PathBuf, detail: String },

    /// A store could not be opened.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single paper (or one of its questions).
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PaperError {
    /// The document has no usable text layer; it must be re-scanned.
    #[error("{document:?} needs manual re-scan: {reason}")]
    NeedsRescan { document: PathBuf, reason: String },

    /// The file could not be opened as a PDF.
    #[error("{document:?} is unreadable: {detail}")]
    Unreadable { document: PathBuf, detail: String },

    /// Sub-PDF extraction for a question failed.
    #[error("Question {question}: page extraction failed: {detail}")]
    ExtractionFailed { question: String, detail: String },

    /// Upload or record upsert failed after the retry budget.
    #[error("Question {question}: persistence failed after {attempts} attempts: {detail}")]
    PersistenceFailed {
        question: String,
        attempts: u32,
        detail: String,
    },

    /// A blocking task panicked or was cancelled.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PaperError {
    /// Whether this error means a document must be re-scanned by an operator.
    pub fn needs_rescan(&self) -> bool {
        matches!(self, PaperError::NeedsRescan { .. })
    }
}

/// A tier-local classification failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassifierError {
    /// Network or provider failure.
    #[error("{tier}: transport error: {detail}")]
    Transport { tier: String, detail: String },

    /// The call exceeded the per-call timeout.
    #[error("{tier}: timed out after {secs}s")]
    Timeout { tier: String, secs: u64 },

    /// Provider answered with a rate-limit response.
    #[error("{tier}: rate limited")]
    RateLimited {
        tier: String,
        retry_after_secs: Option<u64>,
    },

    /// Provider refused the request for a reason retrying cannot fix
    /// (authentication, unknown model, invalid request, configuration).
    #[error("{tier}: request rejected: {detail}")]
    Rejected { tier: String, detail: String },

    /// The reply was not the JSON object we asked for.
    #[error("{tier}: malformed response: {detail}")]
    Malformed { tier: String, detail: String },

    /// The reply named a topic outside the subject vocabulary.
    #[error("{tier}: topic '{topic}' is not in the vocabulary")]
    UnknownTopic { tier: String, topic: String },
}

impl Retryable for ClassifierError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClassifierError::Transport { .. }
                | ClassifierError::Timeout { .. }
                | ClassifierError::RateLimited { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ClassifierError::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

/// Failure of a metadata/object store call.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Local filesystem failure.
    #[error("Store I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The request never got a response.
    #[error("Request to {endpoint} failed: {detail}")]
    Http { endpoint: String, detail: String },

    /// The remote answered with a non-success status.
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// A record could not be (de)serialised.
    #[error("Serialisation failed: {0}")]
    Serialization(String),
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        match self {
            StoreError::Io { .. } | StoreError::Http { .. } => true,
            StoreError::Status { status, .. } => *status == 429 || *status >= 500,
            StoreError::Serialization(_) => false,
        }
    }
}
