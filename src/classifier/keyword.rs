//! Deterministic keyword tier. Always produces a classification.

use super::ClassificationRequest;
use crate::model::{Classification, ClassificationMethod, Difficulty};
use crate::topics::{TopicCode, TopicVocabulary};
use regex::Regex;
use tracing::{debug, warn};

/// Hits at which keyword confidence saturates.
const SATURATION_HITS: usize = 5;
/// Ceiling of keyword confidence, always below any sensible LLM threshold.
pub const MAX_KEYWORD_CONFIDENCE: f32 = 0.6;

/// Keyword matchers for every topic, compiled once per batch.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    topics: Vec<(TopicCode, Vec<Regex>)>,
    default_topic: TopicCode,
}

/// Case-insensitive whole-word matcher. `\b` is only applied at edges that
/// are word characters, so keywords like "e.m.f." still match.
fn keyword_regex(keyword: &str) -> Option<Regex> {
    let keyword = keyword.trim();
    let first = keyword.chars().next()?;
    let last = keyword.chars().last()?;
    let lead = if first.is_alphanumeric() { r"\b" } else { "" };
    let trail = if last.is_alphanumeric() { r"\b" } else { "" };
    Regex::new(&format!("(?i){lead}{}{trail}", regex::escape(keyword))).ok()
}

impl KeywordClassifier {
    pub fn new(vocabulary: &TopicVocabulary) -> Self {
        let topics = vocabulary
            .codes()
            .iter()
            .filter_map(|code| {
                let topic = vocabulary.topic(code)?;
                let matchers = topic
                    .keywords
                    .iter()
                    .filter_map(|k| keyword_regex(k))
                    .collect();
                Some((code.clone(), matchers))
            })
            .collect();
        Self {
            topics,
            default_topic: vocabulary.default_topic().clone(),
        }
    }

    /// Keyword hits per topic, in vocabulary order.
    pub fn hits(&self, text: &str) -> Vec<(TopicCode, usize)> {
        self.topics
            .iter()
            .map(|(code, matchers)| {
                let n = matchers.iter().map(|re| re.find_iter(text).count()).sum::<usize>();
                (code.clone(), n)
            })
            .collect()
    }

    pub fn classify(&self, request: &ClassificationRequest<'_>) -> Classification {
        let mut text = request.question_text.to_string();
        if let Some(ms) = request.markscheme_text {
            text.push('\n');
            text.push_str(ms);
        }

        // Highest count wins; the first topic in vocabulary order wins ties.
        let best = self
            .hits(&text)
            .into_iter()
            .fold(None::<(TopicCode, usize)>, |best, (code, n)| match best {
                Some((_, b)) if b >= n => best,
                _ => Some((code, n)),
            });

        let difficulty = heuristic_difficulty(request.marks, request.question_text);
        match best {
            Some((topic, hits)) if hits > 0 => {
                let confidence = (hits as f32 / SATURATION_HITS as f32).min(1.0) * MAX_KEYWORD_CONFIDENCE;
                debug!(
                    "Q{}: keyword tier picked {topic} ({hits} hits)",
                    request.question_number
                );
                Classification {
                    topic,
                    difficulty,
                    confidence,
                    method: ClassificationMethod::Keyword,
                    needs_review: false,
                }
            }
            _ => {
                warn!(
                    "Q{}: no keyword hits, using default topic {} (needs review)",
                    request.question_number, self.default_topic
                );
                Classification {
                    topic: self.default_topic.clone(),
                    difficulty,
                    confidence: 0.0,
                    method: ClassificationMethod::Keyword,
                    needs_review: true,
                }
            }
        }
    }
}

/// Difficulty from the question's mark total, or its length when the total
/// is unknown.
pub fn heuristic_difficulty(marks: Option<u32>, text: &str) -> Difficulty {
    match marks {
        Some(0..=2) => Difficulty::Easy,
        Some(3..=5) => Difficulty::Medium,
        Some(_) => Difficulty::Hard,
        None => match text.chars().count() {
            0..=199 => Difficulty::Easy,
            200..=599 => Difficulty::Medium,
            _ => Difficulty::Hard,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topics::tests::{physics, topic};

    fn request(text: &str) -> ClassificationRequest<'_> {
        ClassificationRequest {
            question_number: "1",
            question_text: text,
            markscheme_text: None,
            marks: None,
        }
    }

    #[test]
    fn most_hits_wins() {
        let k = KeywordClassifier::new(&physics());
        let c = k.classify(&request(
            "The current through the resistor rises as the voltage increases. Find the current.",
        ));
        assert_eq!(c.topic.as_str(), "2");
        assert_eq!(c.method, ClassificationMethod::Keyword);
        // "current" twice plus "voltage": 3/5 of the ceiling
        assert!((c.confidence - 0.36).abs() < 1e-6);
        assert!(!c.needs_review);
    }

    #[test]
    fn confidence_saturates_below_threshold() {
        let k = KeywordClassifier::new(&physics());
        let c = k.classify(&request(&"wavelength ".repeat(20)));
        assert_eq!(c.topic.as_str(), "3");
        assert_eq!(c.confidence, MAX_KEYWORD_CONFIDENCE);
    }

    #[test]
    fn ties_follow_vocabulary_order() {
        let k = KeywordClassifier::new(&physics());
        let c = k.classify(&request("frequency and velocity"));
        assert_eq!(c.topic.as_str(), "1");
    }

    #[test]
    fn whole_words_only() {
        let k = KeywordClassifier::new(&physics());
        let hits = k.hits("overcurrent forceful");
        assert!(hits.iter().all(|(_, n)| *n == 0));
    }

    #[test]
    fn no_hits_falls_back_to_default_and_flags_review() {
        let k = KeywordClassifier::new(&physics());
        let c = k.classify(&request("Describe what you see."));
        assert_eq!(c.topic.as_str(), "1");
        assert_eq!(c.confidence, 0.0);
        assert!(c.needs_review);
    }

    #[test]
    fn punctuated_keywords_match() {
        let v = TopicVocabulary::new("physics", vec![topic("E", "Electricity", &["e.m.f."])], "E").unwrap();
        let k = KeywordClassifier::new(&v);
        assert_eq!(k.hits("The e.m.f. of the cell")[0].1, 1);
    }

    #[test]
    fn difficulty_heuristic() {
        assert_eq!(heuristic_difficulty(Some(1), ""), Difficulty::Easy);
        assert_eq!(heuristic_difficulty(Some(4), ""), Difficulty::Medium);
        assert_eq!(heuristic_difficulty(Some(9), ""), Difficulty::Hard);
        assert_eq!(heuristic_difficulty(None, "short"), Difficulty::Easy);
        assert_eq!(heuristic_difficulty(None, &"x".repeat(300)), Difficulty::Medium);
        assert_eq!(heuristic_difficulty(None, &"x".repeat(900)), Difficulty::Hard);
    }
}
