//! Classifier tiers and the escalation chain.
//!
//! ## State machine
//!
//! ```text
//! Pending ──▶ Tier1Attempted ──▶ Terminal            (tier 1 confident)
//!                   │
//!                   ▼
//!             Tier2Attempted ──▶ Terminal            (tier 2 confident)
//!                   │
//!                   ▼
//!             KeywordFallback ──▶ Terminal           (best of LLM / keyword)
//! ```
//!
//! A tier escalates when it is not configured, fails after its retries,
//! times out, or answers below the confidence threshold. The keyword tier
//! never fails, so every question reaches `Terminal`.
//!
//! Every LLM call waits on the shared [`RequestLimiter`], runs under a
//! timeout, and is retried with the shared [`RetryPolicy`] on transient
//! errors. Malformed replies are not retried.

pub mod keyword;
pub mod llm;
pub mod response;

use crate::error::ClassifierError;
use crate::model::{Classification, ClassificationMethod, Difficulty};
use crate::rate_limit::RequestLimiter;
use crate::retry::RetryPolicy;
use crate::topics::{TopicCode, TopicVocabulary};
use futures::future::BoxFuture;
use keyword::KeywordClassifier;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a tier is asked to label.
#[derive(Debug, Clone, Copy)]
pub struct ClassificationRequest<'a> {
    pub question_number: &'a str,
    pub question_text: &'a str,
    pub markscheme_text: Option<&'a str>,
    pub marks: Option<u32>,
}

/// A validated answer from one LLM tier.
#[derive(Debug, Clone, PartialEq)]
pub struct TierVerdict {
    pub topic: TopicCode,
    pub difficulty: Difficulty,
    pub confidence: f32,
}

impl TierVerdict {
    fn into_classification(self, method: ClassificationMethod, needs_review: bool) -> Classification {
        Classification {
            topic: self.topic,
            difficulty: self.difficulty,
            confidence: self.confidence,
            method,
            needs_review,
        }
    }
}

/// An LLM-style classifier tier.
pub trait Classifier: Send + Sync {
    /// Tier label used in logs and errors.
    fn name(&self) -> &str;

    fn classify<'a>(
        &'a self,
        request: &'a ClassificationRequest<'a>,
        vocabulary: &'a TopicVocabulary,
    ) -> BoxFuture<'a, Result<TierVerdict, ClassifierError>>;
}

// ── Chain state ──────────────────────────────────────────────────────────

/// Position of one question in the escalation chain.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainState {
    Pending,
    Tier1Attempted {
        verdict: Option<TierVerdict>,
    },
    Tier2Attempted {
        tier1: Option<TierVerdict>,
        tier2: Option<TierVerdict>,
    },
    KeywordFallback {
        best_llm: Option<(ClassificationMethod, TierVerdict)>,
    },
    Terminal(Classification),
}

/// How a single tier call ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TierOutcome {
    Accepted { confidence: f32 },
    LowConfidence { confidence: f32 },
    Failed { error: String, attempts: u32 },
    NotConfigured,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierAttempt {
    pub method: ClassificationMethod,
    #[serde(flatten)]
    pub outcome: TierOutcome,
}

/// Final label plus the path taken to reach it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainOutcome {
    pub classification: Classification,
    pub trail: Vec<TierAttempt>,
}

// ── Chain ────────────────────────────────────────────────────────────────

/// Primary LLM → secondary LLM → keyword fallback.
pub struct ClassifierChain {
    primary: Option<Arc<dyn Classifier>>,
    secondary: Option<Arc<dyn Classifier>>,
    keyword: KeywordClassifier,
    vocabulary: Arc<TopicVocabulary>,
    threshold: f32,
    retry: RetryPolicy,
    timeout: Duration,
    limiter: Arc<RequestLimiter>,
}

impl ClassifierChain {
    /// A chain with only the keyword tier.
    pub fn keyword_only(vocabulary: Arc<TopicVocabulary>) -> Self {
        Self {
            primary: None,
            secondary: None,
            keyword: KeywordClassifier::new(&vocabulary),
            vocabulary,
            threshold: 0.7,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(60),
            limiter: Arc::new(RequestLimiter::unlimited()),
        }
    }

    pub fn with_primary(mut self, tier: Arc<dyn Classifier>) -> Self {
        self.primary = Some(tier);
        self
    }

    pub fn with_secondary(mut self, tier: Arc<dyn Classifier>) -> Self {
        self.secondary = Some(tier);
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_limiter(mut self, limiter: Arc<RequestLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn vocabulary(&self) -> &TopicVocabulary {
        &self.vocabulary
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn has_llm_tiers(&self) -> bool {
        self.primary.is_some() || self.secondary.is_some()
    }

    /// Drive one question from `Pending` to `Terminal`.
    pub async fn classify(&self, request: &ClassificationRequest<'_>) -> ChainOutcome {
        let mut state = ChainState::Pending;
        let mut trail = Vec::new();
        loop {
            state = match state {
                ChainState::Terminal(classification) => {
                    info!(
                        "Q{}: {} / {} ({:.2}, {})",
                        request.question_number,
                        classification.topic,
                        classification.difficulty,
                        classification.confidence,
                        classification.method
                    );
                    return ChainOutcome {
                        classification,
                        trail,
                    };
                }
                other => self.step(other, request, &mut trail).await,
            };
        }
    }

    /// Advance one transition.
    pub async fn step(
        &self,
        state: ChainState,
        request: &ClassificationRequest<'_>,
        trail: &mut Vec<TierAttempt>,
    ) -> ChainState {
        match state {
            ChainState::Pending => {
                let verdict = self
                    .run_tier(self.primary.as_deref(), ClassificationMethod::Tier1, request, trail)
                    .await;
                ChainState::Tier1Attempted { verdict }
            }

            ChainState::Tier1Attempted { verdict } => match verdict {
                Some(v) if v.confidence >= self.threshold => {
                    ChainState::Terminal(v.into_classification(ClassificationMethod::Tier1, false))
                }
                tier1 => {
                    let tier2 = self
                        .run_tier(self.secondary.as_deref(), ClassificationMethod::Tier2, request, trail)
                        .await;
                    ChainState::Tier2Attempted { tier1, tier2 }
                }
            },

            ChainState::Tier2Attempted { tier1, tier2 } => match tier2 {
                Some(v) if v.confidence >= self.threshold => {
                    ChainState::Terminal(v.into_classification(ClassificationMethod::Tier2, false))
                }
                tier2 => {
                    // Highest confidence wins, tier 2 on ties.
                    let best_llm = match (tier1, tier2) {
                        (Some(t1), Some(t2)) if t1.confidence > t2.confidence => {
                            Some((ClassificationMethod::Tier1, t1))
                        }
                        (_, Some(t2)) => Some((ClassificationMethod::Tier2, t2)),
                        (Some(t1), None) => Some((ClassificationMethod::Tier1, t1)),
                        (None, None) => None,
                    };
                    ChainState::KeywordFallback { best_llm }
                }
            },

            ChainState::KeywordFallback { best_llm } => {
                let fallback = self.keyword.classify(request);
                trail.push(TierAttempt {
                    method: ClassificationMethod::Keyword,
                    outcome: TierOutcome::Accepted {
                        confidence: fallback.confidence,
                    },
                });
                match best_llm {
                    Some((method, v)) if v.confidence >= fallback.confidence => {
                        debug!(
                            "Q{}: keeping low-confidence {method} answer ({:.2} >= keyword {:.2})",
                            request.question_number, v.confidence, fallback.confidence
                        );
                        ChainState::Terminal(v.into_classification(method, true))
                    }
                    _ => ChainState::Terminal(fallback),
                }
            }

            terminal @ ChainState::Terminal(_) => terminal,
        }
    }

    /// Call one tier with limiter, timeout and retry. `None` means the tier
    /// produced nothing usable.
    async fn run_tier(
        &self,
        tier: Option<&dyn Classifier>,
        method: ClassificationMethod,
        request: &ClassificationRequest<'_>,
        trail: &mut Vec<TierAttempt>,
    ) -> Option<TierVerdict> {
        let Some(tier) = tier else {
            trail.push(TierAttempt {
                method,
                outcome: TierOutcome::NotConfigured,
            });
            return None;
        };

        let label = format!("Q{} {}", request.question_number, tier.name());
        let result = self
            .retry
            .run(&label, |_attempt| self.attempt(tier, request))
            .await;

        match result {
            Ok(v) => {
                let outcome = if v.confidence >= self.threshold {
                    TierOutcome::Accepted {
                        confidence: v.confidence,
                    }
                } else {
                    debug!(
                        "Q{}: {} confidence {:.2} below threshold {:.2}",
                        request.question_number,
                        tier.name(),
                        v.confidence,
                        self.threshold
                    );
                    TierOutcome::LowConfidence {
                        confidence: v.confidence,
                    }
                };
                trail.push(TierAttempt { method, outcome });
                Some(v)
            }
            Err((e, attempts)) => {
                warn!("Q{}: {} gave up after {} attempts: {}", request.question_number, tier.name(), attempts, e);
                trail.push(TierAttempt {
                    method,
                    outcome: TierOutcome::Failed {
                        error: e.to_string(),
                        attempts,
                    },
                });
                None
            }
        }
    }

    async fn attempt(
        &self,
        tier: &dyn Classifier,
        request: &ClassificationRequest<'_>,
    ) -> Result<TierVerdict, ClassifierError> {
        self.limiter.acquire().await;
        let verdict = tokio::time::timeout(self.timeout, tier.classify(request, &self.vocabulary))
            .await
            .map_err(|_| ClassifierError::Timeout {
                tier: tier.name().to_string(),
                secs: self.timeout.as_secs(),
            })??;

        if !(0.0..=1.0).contains(&verdict.confidence) {
            return Err(ClassifierError::Malformed {
                tier: tier.name().to_string(),
                detail: format!("confidence {} outside [0, 1]", verdict.confidence),
            });
        }
        Ok(verdict)
    }
}

// ── Test doubles ─────────────────────────────────────────────────────────

/// Scripted tier for tests and dry runs: returns replies in order,
/// repeating the last one.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub enum MockReply {
        /// Answer with this topic code, difficulty and confidence.
        Verdict(&'static str, Difficulty, f32),
        Error(ClassifierError),
        /// Sleep longer than any test timeout.
        Hang,
    }

    pub struct MockClassifier {
        name: &'static str,
        replies: Mutex<Vec<MockReply>>,
        fallback: MockReply,
        calls: AtomicUsize,
    }

    impl MockClassifier {
        pub fn new(name: &'static str, reply: MockReply) -> Self {
            Self::with_sequence(name, vec![reply])
        }

        pub fn with_sequence(name: &'static str, mut replies: Vec<MockReply>) -> Self {
            replies.reverse();
            let fallback = replies.first().cloned().unwrap_or(MockReply::Hang);
            Self {
                name,
                replies: Mutex::new(replies),
                fallback,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn next_reply(&self) -> MockReply {
            let mut seq = self.replies.lock().unwrap_or_else(|e| e.into_inner());
            seq.pop().unwrap_or_else(|| self.fallback.clone())
        }
    }

    impl Classifier for MockClassifier {
        fn name(&self) -> &str {
            self.name
        }

        fn classify<'a>(
            &'a self,
            _request: &'a ClassificationRequest<'a>,
            vocabulary: &'a TopicVocabulary,
        ) -> BoxFuture<'a, Result<TierVerdict, ClassifierError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.next_reply();
            Box::pin(async move {
                match reply {
                    MockReply::Verdict(code, difficulty, confidence) => {
                        let topic = vocabulary.parse(code).ok_or_else(|| {
                            ClassifierError::UnknownTopic {
                                tier: self.name.to_string(),
                                topic: code.to_string(),
                            }
                        })?;
                        Ok(TierVerdict {
                            topic,
                            difficulty,
                            confidence,
                        })
                    }
                    MockReply::Error(e) => Err(e),
                    MockReply::Hang => {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Err(ClassifierError::Timeout {
                            tier: self.name.to_string(),
                            secs: 3600,
                        })
                    }
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockClassifier, MockReply};
    use super::*;
    use crate::topics::tests::physics;

    fn request() -> ClassificationRequest<'static> {
        ClassificationRequest {
            question_number: "3",
            question_text: "A wave has a wavelength of 2 m and a frequency of 5 Hz.",
            markscheme_text: None,
            marks: Some(2),
        }
    }

    fn chain() -> ClassifierChain {
        ClassifierChain::keyword_only(Arc::new(physics())).with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
        })
    }

    fn transport() -> ClassifierError {
        ClassifierError::Transport {
            tier: "mock".into(),
            detail: "connection reset".into(),
        }
    }

    #[tokio::test]
    async fn confident_tier1_is_terminal() {
        let t1 = Arc::new(MockClassifier::new("t1", MockReply::Verdict("2", Difficulty::Hard, 0.9)));
        let t2 = Arc::new(MockClassifier::new("t2", MockReply::Verdict("3", Difficulty::Easy, 0.95)));
        let chain = chain().with_primary(t1.clone()).with_secondary(t2.clone());

        let out = chain.classify(&request()).await;
        assert_eq!(out.classification.method, ClassificationMethod::Tier1);
        assert_eq!(out.classification.topic.as_str(), "2");
        assert!(!out.classification.needs_review);
        assert_eq!(t2.call_count(), 0);
    }

    #[tokio::test]
    async fn low_confidence_escalates_to_tier2() {
        let t1 = Arc::new(MockClassifier::new("t1", MockReply::Verdict("1", Difficulty::Easy, 0.55)));
        let t2 = Arc::new(MockClassifier::new("t2", MockReply::Verdict("3", Difficulty::Medium, 0.85)));
        let chain = chain().with_primary(t1.clone()).with_secondary(t2.clone());

        let out = chain.classify(&request()).await;
        assert_eq!(out.classification.method, ClassificationMethod::Tier2);
        assert!((out.classification.confidence - 0.85).abs() < 1e-6);
        assert_eq!(t1.call_count(), 1);
        assert_eq!(t2.call_count(), 1);
        assert_eq!(out.trail[0].outcome, TierOutcome::LowConfidence { confidence: 0.55 });
    }

    #[tokio::test]
    async fn timeouts_fall_through_to_keywords() {
        let t1 = Arc::new(MockClassifier::new("t1", MockReply::Hang));
        let t2 = Arc::new(MockClassifier::new("t2", MockReply::Hang));
        let chain = chain()
            .with_primary(t1.clone())
            .with_secondary(t2.clone())
            .with_timeout(Duration::from_millis(20));

        let out = chain.classify(&request()).await;
        assert_eq!(out.classification.method, ClassificationMethod::Keyword);
        assert_eq!(out.classification.topic.as_str(), "3");
        assert!(out.classification.confidence <= keyword::MAX_KEYWORD_CONFIDENCE);
        // Timeouts are transient, so each tier used its full budget.
        assert_eq!(t1.call_count(), 3);
        assert_eq!(t2.call_count(), 3);
        assert!(matches!(out.trail[0].outcome, TierOutcome::Failed { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_then_succeed() {
        let t1 = Arc::new(MockClassifier::with_sequence(
            "t1",
            vec![
                MockReply::Error(transport()),
                MockReply::Verdict("1", Difficulty::Medium, 0.8),
            ],
        ));
        let chain = chain().with_primary(t1.clone());
        let out = chain.classify(&request()).await;
        assert_eq!(out.classification.method, ClassificationMethod::Tier1);
        assert_eq!(t1.call_count(), 2);
    }

    #[tokio::test]
    async fn malformed_replies_are_not_retried() {
        let malformed = ClassifierError::Malformed {
            tier: "t1".into(),
            detail: "not json".into(),
        };
        let t1 = Arc::new(MockClassifier::new("t1", MockReply::Error(malformed)));
        let chain = chain().with_primary(t1.clone());
        let out = chain.classify(&request()).await;
        assert_eq!(t1.call_count(), 1);
        assert_eq!(out.classification.method, ClassificationMethod::Keyword);
        assert_eq!(out.trail[1].outcome, TierOutcome::NotConfigured);
    }

    #[tokio::test]
    async fn rejected_requests_move_to_next_tier_without_retry() {
        let rejected = ClassifierError::Rejected {
            tier: "t1".into(),
            detail: "Authentication error: invalid_api_key".into(),
        };
        let t1 = Arc::new(MockClassifier::new("t1", MockReply::Error(rejected)));
        let t2 = Arc::new(MockClassifier::new("t2", MockReply::Verdict("3", Difficulty::Easy, 0.9)));
        let chain = chain().with_primary(t1.clone()).with_secondary(t2.clone());

        let out = chain.classify(&request()).await;
        assert_eq!(t1.call_count(), 1);
        assert_eq!(out.classification.method, ClassificationMethod::Tier2);
        assert!(matches!(out.trail[0].outcome, TierOutcome::Failed { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn unknown_topic_is_a_tier_failure() {
        let t1 = Arc::new(MockClassifier::new("t1", MockReply::Verdict("Thermo", Difficulty::Easy, 0.99)));
        let chain = chain().with_primary(t1.clone());
        let out = chain.classify(&request()).await;
        assert_eq!(out.classification.method, ClassificationMethod::Keyword);
        assert_eq!(t1.call_count(), 1);
    }

    #[tokio::test]
    async fn low_llm_answer_beats_weaker_keyword_result() {
        let t1 = Arc::new(MockClassifier::new("t1", MockReply::Verdict("2", Difficulty::Easy, 0.5)));
        let t2 = Arc::new(MockClassifier::new("t2", MockReply::Verdict("2", Difficulty::Easy, 0.6)));
        let chain = chain().with_primary(t1).with_secondary(t2);

        // Two keyword hits for waves give 0.24; tier 2's 0.6 wins.
        let out = chain.classify(&request()).await;
        assert_eq!(out.classification.method, ClassificationMethod::Tier2);
        assert_eq!(out.classification.topic.as_str(), "2");
        assert!(out.classification.needs_review);
    }

    #[tokio::test]
    async fn keyword_only_chain() {
        let chain = chain();
        assert!(!chain.has_llm_tiers());
        let out = chain.classify(&request()).await;
        assert_eq!(out.classification.method, ClassificationMethod::Keyword);
        assert_eq!(out.classification.difficulty, Difficulty::Easy);
        assert_eq!(out.trail.len(), 3);
    }
}
