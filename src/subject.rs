//! Per-subject configuration: topic vocabulary plus boundary-rule overrides.
//!
//! One TOML file per subject drives the whole pipeline, so adding a subject
//! never means copying code:
//!
//! ```toml
//! subject = "physics"
//! default_topic = "1"
//! bucket = "papers"
//!
//! [[topics]]
//! code = "1"
//! name = "Forces and motion"
//! keywords = ["velocity", "acceleration"]
//!
//! [boundary]
//! left_margin = 90.0
//! markscheme_format = "legacy"
//! ```

use crate::error::PipelineError;
use crate::pipeline::boundary::{BoundaryRules, MarkSchemeFormat};
use crate::topics::{Topic, TopicVocabulary};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// On-disk subject configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectConfig {
    pub subject: String,
    pub default_topic: String,
    /// Object-store bucket for this subject's question PDFs.
    #[serde(default)]
    pub bucket: Option<String>,
    pub topics: Vec<TopicEntry>,
    #[serde(default)]
    pub boundary: Option<BoundaryOverrides>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicEntry {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Subject-specific tweaks to the default detection rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoundaryOverrides {
    pub left_margin: Option<f32>,
    pub max_question_number: Option<u32>,
    pub line_tolerance: Option<f32>,
    pub markscheme_format: Option<MarkSchemeFormat>,
}

impl SubjectConfig {
    /// Load and validate a subject file. Any failure here is fatal.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        if !path.exists() {
            return Err(PipelineError::SubjectConfigNotFound {
                path: path.to_path_buf(),
            });
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| PipelineError::InvalidSubjectConfig {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        let config = Self::from_toml(&content).map_err(|detail| {
            PipelineError::InvalidSubjectConfig {
                path: path.to_path_buf(),
                detail,
            }
        })?;
        debug!(
            "Loaded subject '{}' with {} topics from {}",
            config.subject,
            config.topics.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Build the closed vocabulary.
    pub fn vocabulary(&self) -> Result<TopicVocabulary, PipelineError> {
        let topics = self
            .topics
            .iter()
            .map(|t| Topic {
                code: t.code.clone(),
                name: t.name.clone(),
                description: t.description.clone(),
                keywords: t.keywords.clone(),
            })
            .collect();
        TopicVocabulary::new(self.subject.clone(), topics, &self.default_topic)
    }

    /// Apply this subject's overrides on top of `base`.
    pub fn apply_overrides(&self, base: &BoundaryRules) -> BoundaryRules {
        let mut rules = base.clone();
        if let Some(ref o) = self.boundary {
            if let Some(m) = o.left_margin {
                rules.left_margin = m;
            }
            if let Some(n) = o.max_question_number {
                rules.max_question_number = n;
            }
            if let Some(t) = o.line_tolerance {
                rules.line_tolerance = t;
            }
            if o.markscheme_format.is_some() {
                rules.markscheme_format = o.markscheme_format;
            }
        }
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHYSICS: &str = r#"
subject = "physics"
default_topic = "1"

[[topics]]
code = "1"
name = "Forces and motion"
keywords = ["velocity", "acceleration"]

[[topics]]
code = "2"
name = "Electricity"
description = "Circuits, current, charge"

[boundary]
left_margin = 72.5
markscheme_format = "legacy"
"#;

    #[test]
    fn parses_topics_and_overrides() {
        let cfg = SubjectConfig::from_toml(PHYSICS).expect("valid toml");
        assert_eq!(cfg.subject, "physics");
        assert_eq!(cfg.topics.len(), 2);
        assert!(cfg.topics[1].keywords.is_empty());

        let vocab = cfg.vocabulary().expect("valid vocabulary");
        assert_eq!(vocab.len(), 2);
        assert_eq!(vocab.default_topic().as_str(), "1");

        let rules = cfg.apply_overrides(&BoundaryRules::default());
        assert_eq!(rules.left_margin, 72.5);
        assert_eq!(rules.markscheme_format, Some(MarkSchemeFormat::Legacy));
        assert_eq!(rules.max_question_number, BoundaryRules::default().max_question_number);
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = SubjectConfig::load(Path::new("/no/such/subject.toml")).unwrap_err();
        assert!(matches!(err, PipelineError::SubjectConfigNotFound { .. }));
    }

    #[test]
    fn unknown_default_topic_is_rejected() {
        let cfg = SubjectConfig::from_toml(&PHYSICS.replace("default_topic = \"1\"", "default_topic = \"9\"")).unwrap();
        assert!(cfg.vocabulary().is_err());
    }
}
