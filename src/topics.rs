//! Closed, per-subject topic vocabulary.
//!
//! A [`TopicCode`] can only be obtained from [`TopicVocabulary::parse`], so
//! any value of that type is a member of the vocabulary it came from.
//! Classifier output is converted at this boundary and rejected when the
//! code is unknown.

use crate::error::PipelineError;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// One topic entry: code, human name, optional description and keywords.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Topic {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub keywords: Vec<String>,
}

/// A topic code that is known to be in a [`TopicVocabulary`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TopicCode(Arc<str>);

impl TopicCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The closed set of topic codes for one subject.
#[derive(Debug, Clone)]
pub struct TopicVocabulary {
    subject: String,
    topics: Vec<Topic>,
    codes: Vec<TopicCode>,
    default_topic: TopicCode,
}

impl TopicVocabulary {
    /// Build a vocabulary, rejecting empty lists, duplicate codes and an
    /// unknown default topic.
    pub fn new(
        subject: impl Into<String>,
        topics: Vec<Topic>,
        default_code: &str,
    ) -> Result<Self, PipelineError> {
        let subject = subject.into();
        if topics.is_empty() {
            return Err(PipelineError::InvalidVocabulary(format!(
                "subject '{subject}' has no topics"
            )));
        }

        let mut seen = HashSet::new();
        for t in &topics {
            let code = t.code.trim();
            if code.is_empty() {
                return Err(PipelineError::InvalidVocabulary(format!(
                    "topic '{}' has an empty code",
                    t.name
                )));
            }
            if !seen.insert(code.to_lowercase()) {
                return Err(PipelineError::InvalidVocabulary(format!(
                    "duplicate topic code '{code}'"
                )));
            }
        }

        let codes: Vec<TopicCode> = topics
            .iter()
            .map(|t| TopicCode(Arc::from(t.code.trim())))
            .collect();

        let default_topic = codes
            .iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(default_code.trim()))
            .cloned()
            .ok_or_else(|| {
                PipelineError::InvalidVocabulary(format!(
                    "default topic '{default_code}' is not in the vocabulary"
                ))
            })?;

        Ok(Self {
            subject,
            topics,
            codes,
            default_topic,
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn codes(&self) -> &[TopicCode] {
        &self.codes
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn default_topic(&self) -> &TopicCode {
        &self.default_topic
    }

    /// Map a raw code onto the vocabulary (trimmed, case-insensitive).
    pub fn parse(&self, raw: &str) -> Option<TopicCode> {
        let raw = raw.trim();
        self.codes
            .iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(raw))
            .cloned()
    }

    /// Full entry for a code.
    pub fn topic(&self, code: &TopicCode) -> Option<&Topic> {
        self.codes
            .iter()
            .position(|c| c == code)
            .map(|i| &self.topics[i])
    }
}
