//! # grademax-pipeline
//!
//! Segment past-exam PDFs into questions, link each question to its
//! mark-scheme pages, and label it with a topic and difficulty.
//!
//! ## Pipeline Overview
//!
//! ```text
//! subject dir
//!  │
//!  ├─ 1. Corpus    pair {year}_{season}_{paper}_{qp|ms}.pdf files
//!  ├─ 2. Layout    pdfium text segments → positioned lines (spawn_blocking)
//!  ├─ 3. Boundary  quality guard, QP rules / MS modern-or-legacy rules
//!  ├─ 4. Linker    exact pass, fuzzy pass, unlinked
//!  ├─ 5. Classify  primary LLM → secondary LLM → keyword fallback
//!  └─ 6. Persist   sub-PDF upload + record upsert, checkpoint per paper
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use grademax_pipeline::{
//!     configured_chain, discover_pairs, run_batch, MemoryStore, PdfiumReader, PipelineConfig,
//!     PipelineContext, SubjectConfig,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let subject = SubjectConfig::load(Path::new("physics.toml"))?;
//!     let vocabulary = Arc::new(subject.vocabulary()?);
//!     let config = PipelineConfig::builder()
//!         .boundary(subject.apply_overrides(&Default::default()))
//!         .build()?;
//!     let chain = configured_chain(&config, vocabulary.clone());
//!     let store = Arc::new(MemoryStore::new());
//!     let ctx = PipelineContext::new(
//!         config,
//!         chain,
//!         store.clone(),
//!         store,
//!         Arc::new(PdfiumReader::from_env()),
//!     );
//!     let pairs = discover_pairs(Path::new("corpus/physics"), vocabulary.subject()).await?;
//!     let summary = run_batch(&ctx, &pairs, CancellationToken::new()).await?;
//!     eprintln!("{} questions classified", summary.questions_classified);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `grademax` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod checkpoint;
pub mod classifier;
pub mod config;
pub mod corpus;
pub mod error;
pub mod manifest;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod rate_limit;
pub mod retry;
pub mod store;
pub mod subject;
pub mod topics;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{configured_chain, process_paper, run_batch, segment_paper, PipelineContext, SegmentedPaper};
pub use checkpoint::Checkpoint;
pub use classifier::{ClassificationRequest, Classifier, ClassifierChain};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use corpus::{discover_pairs, PaperPair};
pub use error::{ClassifierError, PaperError, PipelineError, StoreError};
pub use model::{Classification, ClassificationMethod, Difficulty, DocumentKind, LinkConfidence, LinkedQuestion, QuestionSpan};
pub use output::{BatchSummary, PaperReport, PaperStatus};
pub use pipeline::pdf::{DocumentReader, PdfiumReader};
pub use progress::{BatchProgressCallback, NoopBatchProgress};
pub use retry::RetryPolicy;
pub use store::{LocalStore, MemoryStore, MetadataStore, ObjectStore, PaperKey, SupabaseConfig, SupabaseStore};
pub use subject::SubjectConfig;
pub use topics::{TopicCode, TopicVocabulary};
