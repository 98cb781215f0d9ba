//! LLM tier: one chat completion per question through `edgequake-llm`.
//!
//! Prompt text lives in [`crate::prompts`], reply validation in
//! [`super::response`], and retry, timeout and rate limiting in the chain.
//! This type builds messages and maps provider errors onto
//! [`ClassifierError`].

use super::response::parse_verdict;
use super::{ClassificationRequest, Classifier, TierVerdict};
use crate::error::{ClassifierError, PipelineError};
use crate::prompts::{system_prompt, user_prompt};
use crate::rate_limit::parse_retry_after;
use crate::topics::TopicVocabulary;
use edgequake_llm::{
    ChatMessage, CompletionOptions, LLMProvider, LlmError, ProviderFactory, RetryStrategy,
};
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// A classifier tier backed by a chat-completion provider.
pub struct LlmClassifier {
    tier: String,
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
}

impl LlmClassifier {
    pub fn new(tier: impl Into<String>, provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            tier: tier.into(),
            provider,
            temperature: 0.0,
            max_tokens: 256,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

static RE_RETRY_AFTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)retry[- ]after:?\s*(\d+|[a-z]{3},[^;)\n]*)").unwrap()
});

/// A `Retry-After` value quoted in a provider's rate-limit message.
fn retry_after_hint(message: &str) -> Option<u64> {
    let caps = RE_RETRY_AFTER.captures(message)?;
    parse_retry_after(&caps[1]).map(|d| d.as_secs())
}

/// Map a provider error onto the chain's error classes.
///
/// Rate limits keep any quoted `Retry-After`. Everything else follows the
/// provider crate's own retry strategy: errors it would never retry become
/// [`ClassifierError::Rejected`] so the chain falls through at once.
pub fn classify_provider_error(tier: &str, error: &LlmError) -> ClassifierError {
    let tier = tier.to_string();
    match error {
        LlmError::RateLimited(message) => ClassifierError::RateLimited {
            tier,
            retry_after_secs: retry_after_hint(message),
        },
        LlmError::Timeout => ClassifierError::Timeout { tier, secs: 0 },
        LlmError::NetworkError(detail) => ClassifierError::Transport {
            tier,
            detail: detail.clone(),
        },
        other => match other.retry_strategy() {
            RetryStrategy::NoRetry | RetryStrategy::ReduceContext => ClassifierError::Rejected {
                tier,
                detail: other.to_string(),
            },
            _ => ClassifierError::Transport {
                tier,
                detail: other.to_string(),
            },
        },
    }
}

impl Classifier for LlmClassifier {
    fn name(&self) -> &str {
        &self.tier
    }

    fn classify<'a>(
        &'a self,
        request: &'a ClassificationRequest<'a>,
        vocabulary: &'a TopicVocabulary,
    ) -> BoxFuture<'a, Result<TierVerdict, ClassifierError>> {
        Box::pin(async move {
            let start = Instant::now();
            let messages = vec![
                ChatMessage::system(system_prompt(vocabulary)),
                ChatMessage::user(user_prompt(request)),
            ];
            let options = self.options();

            let response = self
                .provider
                .chat(&messages, Some(&options))
                .await
                .map_err(|e| classify_provider_error(&self.tier, &e))?;

            debug!(
                "Q{} {}: {} input tokens, {} output tokens, {:?}",
                request.question_number,
                self.tier,
                response.prompt_tokens,
                response.completion_tokens,
                start.elapsed()
            );

            parse_verdict(&response.content, vocabulary, &self.tier)
        })
    }
}

/// Instantiate a named provider with the given model.
///
/// The provider reads its API key (`OPENAI_API_KEY`, …) from the environment.
pub fn create_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        PipelineError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Retryable;

    #[test]
    fn transient_provider_errors_are_retryable() {
        let e = classify_provider_error("tier1", &LlmError::NetworkError("connection reset".into()));
        assert!(matches!(e, ClassifierError::Transport { .. }));
        assert!(e.is_retryable());

        let e = classify_provider_error("tier1", &LlmError::Timeout);
        assert!(matches!(e, ClassifierError::Timeout { .. }));

        let e = classify_provider_error("tier2", &LlmError::ApiError("503 Service Unavailable".into()));
        assert!(e.is_retryable());
    }

    #[test]
    fn permanent_provider_errors_fall_through_without_retry() {
        let permanent = [
            LlmError::AuthError("invalid_api_key".into()),
            LlmError::ModelNotFound("gpt-9".into()),
            LlmError::InvalidRequest("bad temperature".into()),
            LlmError::ConfigError("OPENAI_API_KEY not set".into()),
            LlmError::NotSupported("chat".into()),
            LlmError::TokenLimitExceeded { max: 8192, got: 9000 },
        ];
        for error in &permanent {
            let e = classify_provider_error("tier1", error);
            assert!(matches!(e, ClassifierError::Rejected { .. }), "{error} -> {e:?}");
            assert!(!e.is_retryable());
        }
    }

    #[test]
    fn rate_limit_keeps_quoted_retry_after() {
        let e = classify_provider_error(
            "tier1",
            &LlmError::RateLimited("429 Too Many Requests; Retry-After: 12".into()),
        );
        assert_eq!(
            e,
            ClassifierError::RateLimited {
                tier: "tier1".into(),
                retry_after_secs: Some(12),
            }
        );
        assert_eq!(e.retry_after(), Some(std::time::Duration::from_secs(12)));

        let e = classify_provider_error("tier1", &LlmError::RateLimited("slow down".into()));
        assert!(matches!(e, ClassifierError::RateLimited { retry_after_secs: None, .. }));
    }
}
