//! Configuration for a batch run.
//!
//! Every orchestrator knob lives in [`PipelineConfig`], built via
//! [`PipelineConfigBuilder`]. Subject-specific detection tweaks come from the
//! subject TOML and are merged into [`PipelineConfig::boundary`] by the
//! caller with [`crate::subject::SubjectConfig::apply_overrides`].

use crate::error::PipelineError;
use crate::pipeline::boundary::BoundaryRules;
use crate::progress::ProgressCallback;
use crate::retry::RetryPolicy;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one batch over a subject corpus.
///
/// # Example
/// ```rust
/// use grademax_pipeline::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .threshold(0.75)
///     .requests_per_minute(20)
///     .start_from(3)
///     .build()
///     .unwrap();
/// assert_eq!(config.start_from, 3);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Detection rules after subject overrides.
    pub boundary: BoundaryRules,

    /// LLM acceptance threshold. Default: 0.70.
    ///
    /// A tier result below this escalates to the next tier.
    pub threshold: f32,

    /// Backoff for classifier tiers. Default: 3 attempts, 500 ms base.
    pub retry: RetryPolicy,

    /// Backoff for uploads and record upserts. Default: one retry.
    pub persistence_retry: RetryPolicy,

    /// Upper bound for a single tier call in seconds. Default: 60.
    pub tier_timeout_secs: u64,

    /// LLM requests per minute across all tiers; 0 disables limiting. Default: 30.
    pub requests_per_minute: u32,

    /// Skip papers whose records are already complete. Default: true.
    pub skip_existing: bool,

    /// First corpus index to process. Default: 0.
    pub start_from: usize,

    /// Continue after the checkpoint's last completed index. Default: false.
    pub resume: bool,

    /// Where `last_completed_index` is persisted. Default: none.
    pub checkpoint_path: Option<PathBuf>,

    /// Directory for per-paper segmentation manifests. Default: none.
    pub manifest_dir: Option<PathBuf>,

    /// Stop after linking: no classification, no persistence. Default: false.
    pub segment_only: bool,

    /// Object-store bucket for question PDFs. Default: "papers".
    pub bucket: String,

    /// Linkage rate below which a paper is reported. Default: 0.5.
    pub low_linkage_threshold: f32,

    /// Log throughput and ETA every N papers; 0 disables. Default: 5.
    pub eta_every: usize,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            boundary: BoundaryRules::default(),
            threshold: 0.7,
            retry: RetryPolicy::default(),
            persistence_retry: RetryPolicy::retry_once(500),
            tier_timeout_secs: 60,
            requests_per_minute: 30,
            skip_existing: true,
            start_from: 0,
            resume: false,
            checkpoint_path: None,
            manifest_dir: None,
            segment_only: false,
            bucket: "papers".to_string(),
            low_linkage_threshold: 0.5,
            eta_every: 5,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("boundary", &self.boundary)
            .field("threshold", &self.threshold)
            .field("retry", &self.retry)
            .field("persistence_retry", &self.persistence_retry)
            .field("tier_timeout_secs", &self.tier_timeout_secs)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("skip_existing", &self.skip_existing)
            .field("start_from", &self.start_from)
            .field("resume", &self.resume)
            .field("checkpoint_path", &self.checkpoint_path)
            .field("manifest_dir", &self.manifest_dir)
            .field("segment_only", &self.segment_only)
            .field("bucket", &self.bucket)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn tier_timeout(&self) -> Duration {
        Duration::from_secs(self.tier_timeout_secs)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn boundary(mut self, rules: BoundaryRules) -> Self {
        self.config.boundary = rules;
        self
    }

    pub fn threshold(mut self, t: f32) -> Self {
        self.config.threshold = t;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Shorthand for setting the tier attempt budget.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n.max(1);
        self
    }

    pub fn persistence_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.persistence_retry = policy;
        self
    }

    pub fn tier_timeout_secs(mut self, secs: u64) -> Self {
        self.config.tier_timeout_secs = secs;
        self
    }

    pub fn requests_per_minute(mut self, rpm: u32) -> Self {
        self.config.requests_per_minute = rpm;
        self
    }

    pub fn skip_existing(mut self, v: bool) -> Self {
        self.config.skip_existing = v;
        self
    }

    pub fn start_from(mut self, index: usize) -> Self {
        self.config.start_from = index;
        self
    }

    pub fn resume(mut self, v: bool) -> Self {
        self.config.resume = v;
        self
    }

    pub fn checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.checkpoint_path = Some(path.into());
        self
    }

    pub fn manifest_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.manifest_dir = Some(dir.into());
        self
    }

    pub fn segment_only(mut self, v: bool) -> Self {
        self.config.segment_only = v;
        self
    }

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.config.bucket = bucket.into();
        self
    }

    pub fn low_linkage_threshold(mut self, t: f32) -> Self {
        self.config.low_linkage_threshold = t;
        self
    }

    pub fn eta_every(mut self, n: usize) -> Self {
        self.config.eta_every = n;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if !(0.0..=1.0).contains(&c.threshold) {
            return Err(PipelineError::InvalidConfig(format!(
                "threshold must be within 0.0–1.0, got {}",
                c.threshold
            )));
        }
        if !(0.0..=1.0).contains(&c.low_linkage_threshold) {
            return Err(PipelineError::InvalidConfig(format!(
                "low-linkage threshold must be within 0.0–1.0, got {}",
                c.low_linkage_threshold
            )));
        }
        if c.retry.max_attempts == 0 || c.persistence_retry.max_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "retry policies need at least one attempt".into(),
            ));
        }
        if c.tier_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "tier timeout must be ≥ 1 second".into(),
            ));
        }
        if c.boundary.max_question_number == 0 {
            return Err(PipelineError::InvalidConfig(
                "max question number must be ≥ 1".into(),
            ));
        }
        if c.boundary.line_tolerance <= 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "line tolerance must be positive, got {}",
                c.boundary.line_tolerance
            )));
        }
        if c.resume && c.checkpoint_path.is_none() {
            return Err(PipelineError::InvalidConfig(
                "--resume needs a checkpoint path".into(),
            ));
        }
        if c.bucket.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("bucket must not be empty".into()));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.threshold, 0.7);
        assert_eq!(c.retry.max_attempts, 3);
        assert_eq!(c.retry.base_delay_ms, 500);
        assert_eq!(c.persistence_retry.max_attempts, 2);
        assert_eq!(c.tier_timeout(), Duration::from_secs(60));
        assert!(c.skip_existing);
        assert_eq!(c.eta_every, 5);
    }

    #[test]
    fn builder_rejects_out_of_range_threshold() {
        let err = PipelineConfig::builder().threshold(1.5).build().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn resume_requires_checkpoint() {
        assert!(PipelineConfig::builder().resume(true).build().is_err());
        let c = PipelineConfig::builder()
            .resume(true)
            .checkpoint_path("run.ckpt.json")
            .build()
            .unwrap();
        assert!(c.resume);
    }

    #[test]
    fn max_retries_never_drops_below_one() {
        let c = PipelineConfig::builder().max_retries(0).build().unwrap();
        assert_eq!(c.retry.max_attempts, 1);
    }
}
