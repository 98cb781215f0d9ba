//! Strict parsing of LLM classifier replies.
//!
//! The reply must be a single JSON object
//! `{"topic": str, "difficulty": "easy|medium|hard", "confidence": number}`.
//! A surrounding ```` ```json ```` fence is tolerated. Anything else (prose,
//! unknown topic, bad difficulty, confidence outside `[0, 1]`) is a
//! malformed reply, which the chain treats as a tier failure.

use super::TierVerdict;
use crate::error::ClassifierError;
use crate::model::Difficulty;
use crate::topics::TopicVocabulary;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVerdict {
    topic: RawTopic,
    difficulty: String,
    confidence: f64,
}

/// Models sometimes send a numeric code as a number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTopic {
    Text(String),
    Number(serde_json::Number),
}

impl RawTopic {
    fn as_code(&self) -> String {
        match self {
            RawTopic::Text(s) => s.clone(),
            RawTopic::Number(n) => n.to_string(),
        }
    }
}

/// Remove one surrounding markdown code fence, if present.
pub fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line.
    match body.find('\n') {
        Some(nl) => body[nl + 1..].trim(),
        None => body.trim(),
    }
}

/// Parse and validate a reply against the vocabulary.
pub fn parse_verdict(
    content: &str,
    vocabulary: &TopicVocabulary,
    tier: &str,
) -> Result<TierVerdict, ClassifierError> {
    let malformed = |detail: String| ClassifierError::Malformed {
        tier: tier.to_string(),
        detail,
    };

    let body = strip_fences(content);
    let raw: RawVerdict = serde_json::from_str(body).map_err(|e| malformed(e.to_string()))?;

    let code = raw.topic.as_code();
    let topic = vocabulary
        .parse(&code)
        .ok_or_else(|| ClassifierError::UnknownTopic {
            tier: tier.to_string(),
            topic: code.clone(),
        })?;

    let difficulty: Difficulty = raw.difficulty.parse().map_err(malformed)?;

    if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
        return Err(malformed(format!(
            "confidence {} outside [0, 1]",
            raw.confidence
        )));
    }

    Ok(TierVerdict {
        topic,
        difficulty,
        confidence: raw.confidence as f32,
    })
}
