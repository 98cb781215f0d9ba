//! CLI binary for grademax-pipeline.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, wires the stores and classifier tiers, and prints the
//! batch summary.

use anyhow::{bail, Context, Result};
use clap::Parser;
use grademax_pipeline::classifier::llm::{create_provider, LlmClassifier};
use grademax_pipeline::progress::ProgressCallback;
use grademax_pipeline::{
    configured_chain, discover_pairs, run_batch, BatchProgressCallback, BatchSummary, LocalStore,
    MemoryStore, MetadataStore, ObjectStore, PdfiumReader, PipelineConfig, PipelineContext,
    SubjectConfig, SupabaseConfig, SupabaseStore,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar over papers, with a log line per finished paper.
struct CliProgress {
    bar: ProgressBar,
    questions: AtomicUsize,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} papers  \
             ⏱ {elapsed_precise}  ETA {eta_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Processing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            questions: AtomicUsize::new(0),
        })
    }
}

impl BatchProgressCallback for CliProgress {
    fn on_batch_start(&self, total_papers: usize, start_index: usize) {
        self.bar.set_length(total_papers as u64);
        self.bar.set_position(start_index as u64);
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "{} papers, starting at index {start_index}",
                total_papers
            ))
        ));
    }

    fn on_paper_start(&self, _index: usize, _total: usize, paper_id: &str) {
        self.questions.store(0, Ordering::SeqCst);
        self.bar.set_message(paper_id.to_string());
    }

    fn on_question_classified(&self, paper_id: &str, question_number: &str, topic: &str) {
        let n = self.questions.fetch_add(1, Ordering::SeqCst) + 1;
        self.bar
            .set_message(format!("{paper_id}  Q{question_number} → {topic}  ({n} done)"));
    }

    fn on_paper_complete(&self, index: usize, total: usize, paper_id: &str, success: bool) {
        let mark = if success { green("✓") } else { red("✗") };
        self.bar.println(format!(
            "  {} [{:>3}/{:<3}] {:<32} {}",
            mark,
            index + 1,
            total,
            paper_id,
            dim(&format!("{} questions", self.questions.load(Ordering::SeqCst))),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _processed: usize, _failed: usize, _interrupted: bool) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Classify every paper of a subject into a local store
  grademax corpus/physics --subject-config subjects/physics.toml

  # Keyword fallback only, no API calls
  grademax corpus/physics --subject-config physics.toml --no-llm

  # Inspect segmentation without classifying
  grademax corpus/physics --subject-config physics.toml --segment-only --manifest-dir manifests/

  # Resume an interrupted run
  grademax corpus/physics --subject-config physics.toml --checkpoint physics.ckpt.json --resume

  # Publish to Supabase
  grademax corpus/physics --subject-config physics.toml --store supabase

CORPUS LAYOUT:
  {year}_{season}_{paper}_{qp|ms}.pdf, e.g. 2019_jun_1p_qp.pdf / 2019_jun_1p_ms.pdf.
  `_`, `-` or space separators; any case; subdirectories are searched.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (primary/secondary tiers)
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  SUPABASE_URL            Project URL for --store supabase
  SUPABASE_SERVICE_KEY    Service key for --store supabase
  PDFIUM_LIB_PATH         Path to libpdfium (otherwise the system library)
  RUST_LOG                Override log filter

EXIT STATUS:
  0 when every paper was read and every question persisted (low linkage and
  boundary anomalies only warn); 1 otherwise.
"#;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum StoreKind {
    Local,
    Memory,
    Supabase,
}

/// Segment exam papers into questions and classify them by topic.
#[derive(Parser, Debug)]
#[command(
    name = "grademax",
    version,
    about = "Segment exam-paper PDFs into questions, link mark schemes and classify by topic",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Subject corpus directory holding QP/MS PDFs.
    subject_dir: PathBuf,

    /// Subject TOML (topic vocabulary and boundary overrides).
    #[arg(long, env = "GRADEMAX_SUBJECT_CONFIG")]
    subject_config: PathBuf,

    /// First corpus index to process.
    #[arg(long, env = "GRADEMAX_START_FROM", default_value_t = 0)]
    start_from: usize,

    /// Skip papers already complete in the store (default).
    #[arg(long, overrides_with = "no_skip")]
    skip_existing: bool,

    /// Reprocess papers even when the store has them.
    #[arg(long, env = "GRADEMAX_NO_SKIP", overrides_with = "skip_existing")]
    no_skip: bool,

    /// Where results are written.
    #[arg(long, env = "GRADEMAX_STORE", value_enum, default_value = "local")]
    store: StoreKind,

    /// Root directory for `--store local`.
    #[arg(long, env = "GRADEMAX_STORE_DIR", default_value = "grademax-store")]
    store_dir: PathBuf,

    /// Object-store bucket (overrides the subject config).
    #[arg(long, env = "GRADEMAX_BUCKET")]
    bucket: Option<String>,

    /// Checkpoint file updated after every paper.
    #[arg(long, env = "GRADEMAX_CHECKPOINT")]
    checkpoint: Option<PathBuf>,

    /// Continue after the checkpoint's last completed paper.
    #[arg(long, env = "GRADEMAX_RESUME")]
    resume: bool,

    /// Primary (tier 1) model.
    #[arg(long, env = "GRADEMAX_PRIMARY_MODEL", default_value = "gpt-4.1-nano")]
    primary_model: String,

    /// Primary (tier 1) provider: openai, anthropic, gemini, ollama, ...
    #[arg(long, env = "GRADEMAX_PRIMARY_PROVIDER", default_value = "openai")]
    primary_provider: String,

    /// Secondary (tier 2) model. Tier 2 is disabled when unset.
    #[arg(long, env = "GRADEMAX_SECONDARY_MODEL")]
    secondary_model: Option<String>,

    /// Secondary (tier 2) provider; defaults to the primary provider.
    #[arg(long, env = "GRADEMAX_SECONDARY_PROVIDER")]
    secondary_provider: Option<String>,

    /// Keyword classification only.
    #[arg(long, env = "GRADEMAX_NO_LLM")]
    no_llm: bool,

    /// Confidence needed to accept an LLM answer.
    #[arg(long, env = "GRADEMAX_THRESHOLD", default_value_t = 0.7)]
    threshold: f32,

    /// Attempts per tier on transient failures.
    #[arg(long, env = "GRADEMAX_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// LLM requests per minute (0 = unlimited).
    #[arg(long, env = "GRADEMAX_RPM", default_value_t = 30)]
    rpm: u32,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "GRADEMAX_TIER_TIMEOUT", default_value_t = 60)]
    tier_timeout: u64,

    /// Write a segmentation manifest per paper here.
    #[arg(long, env = "GRADEMAX_MANIFEST_DIR")]
    manifest_dir: Option<PathBuf>,

    /// Stop after segmentation and linking.
    #[arg(long, env = "GRADEMAX_SEGMENT_ONLY")]
    segment_only: bool,

    /// Print the summary as JSON on stdout.
    #[arg(long, env = "GRADEMAX_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "GRADEMAX_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "GRADEMAX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "GRADEMAX_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless -v is given.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Subject and corpus ───────────────────────────────────────────────
    let subject = SubjectConfig::load(&cli.subject_config)?;
    let vocabulary = Arc::new(subject.vocabulary()?);
    let pairs = discover_pairs(&cli.subject_dir, vocabulary.subject()).await?;

    // ── pdfium ───────────────────────────────────────────────────────────
    let reader = PdfiumReader::from_env();
    reader.probe()?;

    // ── Config ───────────────────────────────────────────────────────────
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgress::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, &subject, progress)?;

    // ── Classifier tiers ─────────────────────────────────────────────────
    let mut chain = configured_chain(&config, vocabulary.clone());
    if !cli.no_llm && !cli.segment_only {
        let primary = create_provider(&cli.primary_provider, &cli.primary_model)?;
        chain = chain.with_primary(Arc::new(LlmClassifier::new("tier1", primary)));
        if let Some(model) = &cli.secondary_model {
            let provider_name = cli
                .secondary_provider
                .as_deref()
                .unwrap_or(&cli.primary_provider);
            let secondary = create_provider(provider_name, model)?;
            chain = chain.with_secondary(Arc::new(LlmClassifier::new("tier2", secondary)));
        }
    }

    // ── Stores ───────────────────────────────────────────────────────────
    let (metadata, objects): (Arc<dyn MetadataStore>, Arc<dyn ObjectStore>) = match cli.store {
        StoreKind::Local => {
            let store = Arc::new(
                LocalStore::open(&cli.store_dir)
                    .await
                    .with_context(|| format!("Failed to open store at {}", cli.store_dir.display()))?,
            );
            (store.clone(), store)
        }
        StoreKind::Memory => {
            let store = Arc::new(MemoryStore::new());
            (store.clone(), store)
        }
        StoreKind::Supabase => {
            let Some(supabase) = SupabaseConfig::from_env() else {
                bail!("--store supabase needs SUPABASE_URL and SUPABASE_SERVICE_KEY");
            };
            let store = Arc::new(SupabaseStore::new(supabase).context("Failed to build HTTP client")?);
            (store.clone(), store)
        }
    };

    // ── Interrupt handling ───────────────────────────────────────────────
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{} interrupt received; stopping after the current paper", cyan("⚠"));
                cancel.cancel();
            }
        });
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let ctx = PipelineContext::new(config, chain, metadata, objects, Arc::new(reader));
    let summary = run_batch(&ctx, &pairs, cancel).await.context("Batch failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?;
        println!("{json}");
    } else if !cli.quiet {
        print_summary(&summary);
    }

    if summary.has_irrecoverable_failures() {
        std::process::exit(1);
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(
    cli: &Cli,
    subject: &SubjectConfig,
    progress: Option<ProgressCallback>,
) -> Result<PipelineConfig> {
    let bucket = cli
        .bucket
        .clone()
        .or_else(|| subject.bucket.clone())
        .unwrap_or_else(|| "papers".to_string());

    let mut builder = PipelineConfig::builder()
        .boundary(subject.apply_overrides(&Default::default()))
        .threshold(cli.threshold)
        .max_retries(cli.max_retries)
        .requests_per_minute(cli.rpm)
        .tier_timeout_secs(cli.tier_timeout)
        .skip_existing(cli.skip_existing || !cli.no_skip)
        .start_from(cli.start_from)
        .resume(cli.resume)
        .segment_only(cli.segment_only)
        .bucket(bucket);

    if let Some(path) = &cli.checkpoint {
        builder = builder.checkpoint_path(path);
    }
    if let Some(dir) = &cli.manifest_dir {
        builder = builder.manifest_dir(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_summary(summary: &BatchSummary) {
    let ok = !summary.has_irrecoverable_failures();
    eprintln!(
        "{} {} processed, {} skipped, {} failed of {} papers  {}",
        if ok { green("✔") } else { red("✘") },
        bold(&summary.processed.to_string()),
        summary.skipped,
        summary.failed,
        summary.total_papers,
        dim(&format!("{}ms", summary.duration_ms)),
    );
    eprintln!(
        "   {} questions classified, {} need review, {} boundary anomalies",
        summary.questions_classified, summary.needs_review, summary.anomaly_count
    );
    for path in &summary.rescan {
        eprintln!("   {} needs re-scan: {}", red("✗"), path.display());
    }
    for paper in &summary.low_linkage {
        eprintln!("   {} low linkage: {}", cyan("⚠"), paper);
    }
    for q in &summary.failed_questions {
        eprintln!("   {} {} Q{}: {}", red("✗"), q.paper, q.question_number, q.error);
    }
    if summary.interrupted {
        eprintln!(
            "   {} interrupted; last completed index {:?}",
            cyan("⚠"),
            summary.last_completed_index
        );
    }
}
