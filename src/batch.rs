//! Batch orchestrator: drive every paper of a subject through the pipeline.
//!
//! ```text
//! for each paper pair (from start_from / checkpoint):
//!   cancelled?            → stop, flush checkpoint
//!   already complete?     → skip
//!   read + segment QP/MS  → NeedsRescan / Unreadable stop this paper only
//!   link                  → manifest (optional)
//!   per question, ascending:
//!     classify (tier 1 → tier 2 → keyword)
//!     extract + upload sub-PDFs, upsert record   (retried once)
//!   upsert paper record
//!   checkpoint last_completed_index
//! ```
//!
//! Papers and questions run sequentially; the only suspension points are
//! LLM calls, rate-limit waits, store I/O and pdfium work on the blocking
//! pool. Fatal errors (`PipelineError`) abort the batch; everything a single
//! paper can throw is captured in its [`PaperReport`].

use crate::checkpoint::Checkpoint;
use crate::classifier::{ClassificationRequest, ClassifierChain};
use crate::config::PipelineConfig;
use crate::corpus::PaperPair;
use crate::error::{PaperError, PipelineError};
use crate::manifest::{DocumentManifest, PaperManifest};
use crate::model::{
    Classification, DetectedQuestion, Document, DocumentKind, LinkConfidence, LinkedQuestion,
};
use crate::output::{BatchSummary, PaperReport, PaperStatus, QuestionReport};
use crate::pipeline::boundary::{segment_document, Segmentation};
use crate::pipeline::linker::{link, normalize_question_number, LinkReport, PLAUSIBLE_CEILING};
use crate::pipeline::pdf::{extract_pages, read_document, DocumentReader};
use crate::progress::{BatchProgressCallback, NoopBatchProgress};
use crate::rate_limit::RequestLimiter;
use crate::store::{paper_is_complete, MetadataStore, ObjectStore, PaperRecord, ProcessingRecord};
use crate::topics::TopicVocabulary;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

static NOOP_PROGRESS: NoopBatchProgress = NoopBatchProgress;

// ── Context ──────────────────────────────────────────────────────────────

/// Everything a batch needs, built once before the first paper.
pub struct PipelineContext {
    pub config: PipelineConfig,
    pub chain: ClassifierChain,
    pub metadata: Arc<dyn MetadataStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub reader: Arc<dyn DocumentReader>,
}

impl PipelineContext {
    pub fn new(
        config: PipelineConfig,
        chain: ClassifierChain,
        metadata: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        reader: Arc<dyn DocumentReader>,
    ) -> Self {
        Self {
            config,
            chain,
            metadata,
            objects,
            reader,
        }
    }

    pub fn vocabulary(&self) -> &TopicVocabulary {
        self.chain.vocabulary()
    }

    fn progress(&self) -> &dyn BatchProgressCallback {
        self.config
            .progress_callback
            .as_deref()
            .unwrap_or(&NOOP_PROGRESS)
    }
}

/// A keyword-only chain carrying the config's threshold, retry, timeout and
/// rate limit. Add LLM tiers with `with_primary` / `with_secondary`.
pub fn configured_chain(config: &PipelineConfig, vocabulary: Arc<TopicVocabulary>) -> ClassifierChain {
    ClassifierChain::keyword_only(vocabulary)
        .with_threshold(config.threshold)
        .with_retry(config.retry)
        .with_timeout(config.tier_timeout())
        .with_limiter(Arc::new(RequestLimiter::per_minute(config.requests_per_minute)))
}

// ── Segmentation ─────────────────────────────────────────────────────────

/// Both documents of a paper, segmented and linked.
#[derive(Debug, Clone)]
pub struct SegmentedPaper {
    pub qp_document: Document,
    pub qp: Segmentation,
    pub ms_document: Option<Document>,
    pub ms: Option<Segmentation>,
    pub links: LinkReport,
}

impl SegmentedPaper {
    pub fn anomaly_count(&self) -> usize {
        self.qp.anomalies.len() + self.ms.as_ref().map_or(0, |m| m.anomalies.len())
    }

    pub fn manifest(&self, pair: &PaperPair) -> PaperManifest {
        PaperManifest {
            key: pair.key.clone(),
            question_paper: DocumentManifest {
                document: self.qp_document.clone(),
                spans: self.qp.spans(),
                anomalies: self.qp.anomalies.clone(),
            },
            mark_scheme: self.ms_document.as_ref().zip(self.ms.as_ref()).map(|(d, s)| {
                DocumentManifest {
                    document: d.clone(),
                    spans: s.spans(),
                    anomalies: s.anomalies.clone(),
                }
            }),
            markscheme_format: self.ms.as_ref().and_then(|s| s.format),
            links: self.links.linked.clone(),
            skipped: self.links.skipped.clone(),
            linkage_rate: self.links.linkage_rate(),
        }
    }
}

async fn segment_one(
    ctx: &PipelineContext,
    kind: DocumentKind,
    path: &Path,
) -> Result<(Document, Segmentation), PaperError> {
    let rules = &ctx.config.boundary;
    let pages = read_document(ctx.reader.clone(), path, rules.line_tolerance).await?;
    let document = Document {
        kind,
        path: path.to_path_buf(),
        page_count: pages.len(),
    };
    let segmentation =
        segment_document(kind, &pages, rules).map_err(|r| PaperError::NeedsRescan {
            document: path.to_path_buf(),
            reason: r.reason,
        })?;
    Ok((document, segmentation))
}

/// Read, segment and link one paper pair.
pub async fn segment_paper(
    ctx: &PipelineContext,
    pair: &PaperPair,
) -> Result<SegmentedPaper, PaperError> {
    let (qp_document, qp) = segment_one(ctx, DocumentKind::QuestionPaper, &pair.qp).await?;
    let (ms_document, ms) = match &pair.ms {
        Some(path) => {
            let (d, s) = segment_one(ctx, DocumentKind::MarkScheme, path).await?;
            (Some(d), Some(s))
        }
        None => (None, None),
    };

    let ms_spans = ms.as_ref().map(|s| s.spans()).unwrap_or_default();
    let links = link(&qp.spans(), &ms_spans, PLAUSIBLE_CEILING);
    debug!(
        "{}: {} questions, {} exact / {} fuzzy / {} unlinked",
        pair.key,
        links.linked.len(),
        links.count(LinkConfidence::Exact),
        links.count(LinkConfidence::Fuzzy),
        links.count(LinkConfidence::Unlinked),
    );
    Ok(SegmentedPaper {
        qp_document,
        qp,
        ms_document,
        ms,
        links,
    })
}

/// Text and mark total of every detected question with this normalised number.
fn collect_text(questions: &[DetectedQuestion], number: &str) -> (String, Option<u32>) {
    let matching: Vec<&DetectedQuestion> = questions
        .iter()
        .filter(|q| normalize_question_number(&q.span.question_number) == number)
        .collect();
    let text = matching
        .iter()
        .map(|q| q.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let marks = matching.iter().find_map(|q| q.marks);
    (text, marks)
}

// ── Per-paper processing ─────────────────────────────────────────────────

/// Segment, classify and persist one paper. Never fails: problems end up in
/// the returned report.
pub async fn process_paper(ctx: &PipelineContext, index: usize, pair: &PaperPair) -> PaperReport {
    let segmented = match segment_paper(ctx, pair).await {
        Ok(s) => s,
        Err(e) => {
            warn!("{}: {}", pair.key, e);
            return PaperReport::failed(index, pair.key.clone(), e);
        }
    };

    let mut report = PaperReport::new(index, pair.key.clone(), PaperStatus::Completed);
    report.anomalies = segmented.qp.anomalies.clone();
    if let Some(ms) = &segmented.ms {
        report.anomalies.extend(ms.anomalies.iter().cloned());
    }
    report.linkage_rate = Some(segmented.links.linkage_rate());
    report.low_linkage = segmented
        .links
        .is_low_linkage(ctx.config.low_linkage_threshold);
    if report.low_linkage {
        warn!(
            "{}: low linkage ({:.0}% of questions matched a mark scheme)",
            pair.key,
            segmented.links.linkage_rate() * 100.0
        );
    }
    if segmented.links.linked.is_empty() {
        warn!("{}: no questions detected", pair.key);
    }

    if let Some(dir) = &ctx.config.manifest_dir {
        match segmented.manifest(pair).write(dir).await {
            Ok(path) => debug!("Manifest written to {}", path.display()),
            Err(e) => warn!("{}: manifest not written: {}", pair.key, e),
        }
    }

    if ctx.config.segment_only {
        report.status = PaperStatus::Segmented;
        return report;
    }

    let paper_id = pair.key.paper_id();
    for linked in &segmented.links.linked {
        let question = classify_and_persist(ctx, pair, &segmented, linked).await;
        if let Some(c) = &question.classification {
            if question.error.is_none() {
                ctx.progress()
                    .on_question_classified(&paper_id, &linked.question_number, c.topic.as_str());
            }
        }
        report.questions.push(question);
    }

    let paper = PaperRecord {
        paper_id: paper_id.clone(),
        key: pair.key.clone(),
        qp_path: pair.qp.clone(),
        ms_path: pair.ms.clone(),
        question_count: segmented.links.linked.len(),
        low_linkage: report.low_linkage,
        processed_at: Utc::now(),
    };
    let metadata = ctx.metadata.as_ref();
    let paper_ref = &paper;
    let upserted = ctx
        .config
        .persistence_retry
        .run(&format!("{paper_id} paper record"), |_| {
            metadata.upsert_paper(paper_ref)
        })
        .await;
    if let Err((e, attempts)) = upserted {
        warn!("{}: paper record not saved: {}", pair.key, e);
        report.status = PaperStatus::Failed;
        report.error = Some(PaperError::PersistenceFailed {
            question: "*".into(),
            attempts,
            detail: e.to_string(),
        });
        return report;
    }

    if report.failed_questions().next().is_some() {
        report.status = PaperStatus::Partial;
    }
    report
}

async fn classify_and_persist(
    ctx: &PipelineContext,
    pair: &PaperPair,
    segmented: &SegmentedPaper,
    linked: &LinkedQuestion,
) -> QuestionReport {
    let number = linked.question_number.as_str();
    let (question_text, qp_marks) = collect_text(&segmented.qp.questions, number);
    let (ms_text, ms_marks) = match (&segmented.ms, &linked.ms_question_number) {
        (Some(ms), Some(ms_number)) => {
            let (text, marks) = collect_text(&ms.questions, ms_number);
            (Some(text).filter(|t| !t.trim().is_empty()), marks)
        }
        _ => (None, None),
    };

    let request = ClassificationRequest {
        question_number: number,
        question_text: &question_text,
        markscheme_text: ms_text.as_deref(),
        marks: qp_marks.or(ms_marks),
    };
    let outcome = ctx.chain.classify(&request).await;
    let classification = outcome.classification;

    let error = persist_question(ctx, pair, linked, &classification).await.err();
    if let Some(e) = &error {
        warn!("{}: {}", pair.key, e);
    }
    QuestionReport {
        question_number: linked.question_number.clone(),
        classification: Some(classification),
        error,
    }
}

/// Upload the question's sub-PDFs, then upsert its record. The record write
/// is last so an interrupted question is redone on resume.
async fn persist_question(
    ctx: &PipelineContext,
    pair: &PaperPair,
    linked: &LinkedQuestion,
    classification: &Classification,
) -> Result<ProcessingRecord, PaperError> {
    let qp_url = upload(ctx, pair, DocumentKind::QuestionPaper, &pair.qp, linked).await?;
    let ms_url = match &pair.ms {
        Some(ms_path) if !linked.ms_pages.is_empty() => {
            Some(upload(ctx, pair, DocumentKind::MarkScheme, ms_path, linked).await?)
        }
        _ => None,
    };

    let record = ProcessingRecord {
        paper_id: pair.key.paper_id(),
        question_number: linked.question_number.clone(),
        topic: classification.topic.as_str().to_string(),
        difficulty: classification.difficulty,
        confidence: classification.confidence,
        method: classification.method,
        needs_review: classification.needs_review,
        link_confidence: linked.link_confidence,
        qp_pages: linked.qp_pages.clone(),
        ms_pages: linked.ms_pages.clone(),
        qp_url: Some(qp_url),
        ms_url,
        updated_at: Utc::now(),
    };

    let metadata = ctx.metadata.as_ref();
    let record_ref = &record;
    let outcome = ctx
        .config
        .persistence_retry
        .run(&format!("Q{} record", linked.question_number), |_| {
            metadata.upsert_record(record_ref)
        })
        .await
        .map_err(|(e, attempts)| PaperError::PersistenceFailed {
            question: linked.question_number.clone(),
            attempts,
            detail: e.to_string(),
        })?;
    debug!("Q{}: record {:?}", linked.question_number, outcome);
    Ok(record)
}

async fn upload(
    ctx: &PipelineContext,
    pair: &PaperPair,
    kind: DocumentKind,
    source: &Path,
    linked: &LinkedQuestion,
) -> Result<String, PaperError> {
    let pages = match kind {
        DocumentKind::QuestionPaper => linked.qp_pages.clone(),
        DocumentKind::MarkScheme => linked.ms_pages.clone(),
    };
    let bytes = extract_pages(ctx.reader.clone(), source, pages)
        .await
        .map_err(|e| match e {
            PaperError::ExtractionFailed { detail, .. } => PaperError::ExtractionFailed {
                question: linked.question_number.clone(),
                detail,
            },
            other => other,
        })?;

    let objects = ctx.objects.as_ref();
    let bucket = ctx.config.bucket.as_str();
    let object_path = pair.key.object_path(kind, &linked.question_number);
    let path = object_path.as_str();
    ctx.config
        .persistence_retry
        .run(&format!("Q{} {kind} upload", linked.question_number), |_| {
            objects.put(bucket, path, bytes.clone())
        })
        .await
        .map_err(|(e, attempts)| PaperError::PersistenceFailed {
            question: linked.question_number.clone(),
            attempts,
            detail: e.to_string(),
        })
}

// ── Batch ────────────────────────────────────────────────────────────────

/// First index to process: `start_from`, or past the checkpoint on resume.
async fn resolve_start(
    ctx: &PipelineContext,
) -> Result<(usize, Checkpoint), PipelineError> {
    let subject = ctx.vocabulary().subject().to_string();
    let mut start = ctx.config.start_from;
    let mut checkpoint = Checkpoint::new(subject.clone());

    if let (true, Some(path)) = (ctx.config.resume, &ctx.config.checkpoint_path) {
        if let Some(saved) = Checkpoint::load(path).await? {
            if saved.subject != subject {
                return Err(PipelineError::InvalidConfig(format!(
                    "checkpoint {} belongs to subject '{}', not '{}'",
                    path.display(),
                    saved.subject,
                    subject
                )));
            }
            start = start.max(saved.resume_index());
            info!(
                "Resuming after index {:?} from {}",
                saved.last_completed_index,
                path.display()
            );
            checkpoint = saved;
        } else {
            info!("No checkpoint at {}; starting fresh", path.display());
        }
    }
    Ok((start, checkpoint))
}

/// Process `pairs` in order. Only configuration and checkpoint failures are
/// returned as errors; per-paper problems are counted in the summary.
pub async fn run_batch(
    ctx: &PipelineContext,
    pairs: &[PaperPair],
    cancel: CancellationToken,
) -> Result<BatchSummary, PipelineError> {
    let batch_start = Instant::now();
    let total = pairs.len();
    let (start, mut checkpoint) = resolve_start(ctx).await?;
    let progress = ctx.progress();

    let mut summary = BatchSummary {
        total_papers: total,
        last_completed_index: checkpoint.last_completed_index,
        ..BatchSummary::default()
    };
    if start >= total {
        warn!("Start index {start} is past the end of the corpus ({total} papers)");
    }
    info!(
        "Batch '{}': {} papers, starting at index {}",
        ctx.vocabulary().subject(),
        total,
        start
    );
    progress.on_batch_start(total, start);

    let mut done = 0usize;
    for (index, pair) in pairs.iter().enumerate().skip(start) {
        if cancel.is_cancelled() {
            warn!("Interrupted before paper {index}; stopping");
            summary.interrupted = true;
            break;
        }

        let paper_id = pair.key.paper_id();
        let paper_start = Instant::now();
        info!("[{}/{}] {}", index + 1, total, pair.key);
        progress.on_paper_start(index, total, &paper_id);

        let mut report = if ctx.config.skip_existing && !ctx.config.segment_only {
            match paper_is_complete(ctx.metadata.as_ref(), &paper_id).await {
                Ok(true) => {
                    info!("{}: already complete, skipping", pair.key);
                    PaperReport::new(index, pair.key.clone(), PaperStatus::Skipped)
                }
                Ok(false) => process_paper(ctx, index, pair).await,
                Err(e) => {
                    warn!("{}: completeness check failed ({e}); processing", pair.key);
                    process_paper(ctx, index, pair).await
                }
            }
        } else {
            process_paper(ctx, index, pair).await
        };
        report.duration_ms = paper_start.elapsed().as_millis() as u64;

        let success =
            report.status != PaperStatus::Failed && report.failed_questions().next().is_none();
        progress.on_paper_complete(index, total, &paper_id, success);
        summary.record(report);
        summary.last_completed_index = Some(index);

        checkpoint.mark_completed(index);
        if let Some(path) = &ctx.config.checkpoint_path {
            checkpoint.save(path).await?;
        }

        done += 1;
        if ctx.config.eta_every > 0 && done % ctx.config.eta_every == 0 {
            report_eta(progress, done, total - index - 1, batch_start.elapsed().as_secs_f64());
        }
    }

    if summary.interrupted {
        if let Some(path) = &ctx.config.checkpoint_path {
            checkpoint.save(path).await?;
        }
    }
    summary.duration_ms = batch_start.elapsed().as_millis() as u64;
    info!(
        "Batch done: {} processed, {} skipped, {} failed, {} questions classified ({} need review) in {}ms",
        summary.processed,
        summary.skipped,
        summary.failed,
        summary.questions_classified,
        summary.needs_review,
        summary.duration_ms
    );
    progress.on_batch_complete(summary.processed, summary.failed, summary.interrupted);
    Ok(summary)
}

fn report_eta(progress: &dyn BatchProgressCallback, done: usize, remaining: usize, elapsed_secs: f64) {
    let per_sec = if elapsed_secs > 0.0 {
        done as f64 / elapsed_secs
    } else {
        0.0
    };
    let eta_secs = if per_sec > 0.0 {
        (remaining as f64 / per_sec).round() as u64
    } else {
        0
    };
    info!(
        "Throughput: {:.2} papers/min, {} remaining, ETA {}s",
        per_sec * 60.0,
        remaining,
        eta_secs
    );
    progress.on_eta(done, remaining, per_sec * 60.0, eta_secs);
}
