//! Core data model shared by every pipeline stage.

use crate::topics::TopicCode;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Which half of a paper pair a document is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    QuestionPaper,
    MarkScheme,
}

impl DocumentKind {
    /// Short tag used in file names and storage paths.
    pub fn tag(&self) -> &'static str {
        match self {
            DocumentKind::QuestionPaper => "qp",
            DocumentKind::MarkScheme => "ms",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// An ingested PDF. Immutable once read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub kind: DocumentKind,
    pub path: PathBuf,
    pub page_count: usize,
}

// ── Line ─────────────────────────────────────────────────────────────────

static RE_QUESTION_CANDIDATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d{1,2})(?:\s+[A-Za-z(]|\.(?:\s|$)|\)|\(|\s*$)").unwrap()
});

static RE_TOTAL_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)total\s+for\s+question\s+(\d{1,2})(?:\s*[:=]?\s*(\d{1,3})\s*marks?)?")
        .unwrap()
});

pub(crate) static RE_HEADER_QUESTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bquestion").unwrap());
pub(crate) static RE_HEADER_SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:scheme|answers?)\b").unwrap());
pub(crate) static RE_HEADER_MARKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bmarks?\b").unwrap());

/// One row of extracted text on a page.
///
/// Coordinates are in PDF points with the origin at the *top* left of the
/// page, so `y` grows downwards in reading order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Line {
    pub text: String,
    /// 0-based page index.
    pub page: usize,
    pub y: f32,
    pub x_min: f32,
    pub x_max: f32,
    /// Average glyph height, a proxy for font size.
    pub height: f32,
    pub is_question_number_candidate: bool,
    pub is_total_marker: bool,
    pub is_table_header: bool,
}

impl Line {
    /// Build a line and compute its pattern flags.
    pub fn new(text: impl Into<String>, page: usize, y: f32, x_min: f32, x_max: f32, height: f32) -> Self {
        let text = text.into();
        let is_question_number_candidate = RE_QUESTION_CANDIDATE.is_match(&text);
        let is_total_marker = RE_TOTAL_MARKER.is_match(&text);
        let header_hits = [&*RE_HEADER_QUESTION, &*RE_HEADER_SCHEME, &*RE_HEADER_MARKS]
            .iter()
            .filter(|re| re.is_match(&text))
            .count();
        Self {
            text,
            page,
            y,
            x_min,
            x_max,
            height,
            is_question_number_candidate,
            is_total_marker,
            is_table_header: header_hits >= 2,
        }
    }

    /// Leading question number, if the line starts like a question.
    pub fn leading_number(&self) -> Option<u32> {
        RE_QUESTION_CANDIDATE
            .captures(&self.text)
            .and_then(|c| c[1].parse().ok())
    }

    /// `(question, marks)` from a "Total for Question N: M marks" marker.
    pub fn total_marker(&self) -> Option<(u32, Option<u32>)> {
        let caps = RE_TOTAL_MARKER.captures(&self.text)?;
        let question = caps[1].parse().ok()?;
        let marks = caps.get(2).and_then(|m| m.as_str().parse().ok());
        Some((question, marks))
    }
}

// ── Spans ────────────────────────────────────────────────────────────────

/// A contiguous page range attributed to one question number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionSpan {
    pub question_number: String,
    pub page_start: usize,
    pub page_end: usize,
    pub subparts: BTreeSet<String>,
}

impl QuestionSpan {
    pub fn new(question_number: impl Into<String>, page_start: usize, page_end: usize) -> Self {
        Self {
            question_number: question_number.into(),
            page_start,
            page_end: page_end.max(page_start),
            subparts: BTreeSet::new(),
        }
    }

    /// Every page index in the span, in order.
    pub fn pages(&self) -> Vec<usize> {
        (self.page_start..=self.page_end).collect()
    }
}

/// A span plus the text and mark total collected while it was open.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedQuestion {
    pub span: QuestionSpan,
    #[serde(skip)]
    pub text: String,
    pub marks: Option<u32>,
    /// Closed by an explicit "Total for Question N" marker.
    pub confirmed: bool,
}

// ── Linkage ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkConfidence {
    Exact,
    Fuzzy,
    Unlinked,
}

/// A question-paper question with its mark-scheme pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedQuestion {
    pub question_number: String,
    pub qp_pages: Vec<usize>,
    pub ms_pages: Vec<usize>,
    pub link_confidence: LinkConfidence,
    /// Normalised mark-scheme number the question was matched to.
    pub ms_question_number: Option<String>,
}

// ── Classification ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty '{other}'")),
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        })
    }
}

/// Which tier produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    Tier1,
    Tier2,
    Keyword,
}

impl fmt::Display for ClassificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClassificationMethod::Tier1 => "tier1",
            ClassificationMethod::Tier2 => "tier2",
            ClassificationMethod::Keyword => "keyword",
        })
    }
}

/// Terminal label for one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub topic: TopicCode,
    pub difficulty: Difficulty,
    pub confidence: f32,
    pub method: ClassificationMethod,
    pub needs_review: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str) -> Line {
        Line::new(text, 0, 100.0, 50.0, 300.0, 10.0)
    }

    #[test]
    fn question_number_candidates() {
        assert!(line("1 The diagram shows a car.").is_question_number_candidate);
        assert!(line("12. Calculate the speed").is_question_number_candidate);
        assert!(line("3(a) State the unit").is_question_number_candidate);
        assert!(line("4 (b)").is_question_number_candidate);
        assert!(line("7").is_question_number_candidate);
        assert!(!line("1.5 m/s is the speed").is_question_number_candidate);
        assert!(!line("123 apples").is_question_number_candidate);
        assert!(!line("The answer is 4").is_question_number_candidate);
        assert_eq!(line("12. Calculate").leading_number(), Some(12));
    }

    #[test]
    fn total_markers() {
        let l = line("(Total for Question 3 = 5 marks)");
        assert!(l.is_total_marker);
        assert_eq!(l.total_marker(), Some((3, Some(5))));

        let l = line("Total for question 11: 4 marks");
        assert_eq!(l.total_marker(), Some((11, Some(4))));

        let l = line("TOTAL FOR QUESTION 2");
        assert_eq!(l.total_marker(), Some((2, None)));

        assert!(!line("Total marks for paper: 90").is_total_marker);
    }

    #[test]
    fn table_header_needs_two_keywords() {
        assert!(line("Question number Scheme Marks").is_table_header);
        assert!(line("Question Answer").is_table_header);
        assert!(!line("Question 1 continued").is_table_header);
    }

    #[test]
    fn span_pages_are_inclusive() {
        let span = QuestionSpan::new("2", 3, 5);
        assert_eq!(span.pages(), vec![3, 4, 5]);
        let clamped = QuestionSpan::new("2", 4, 1);
        assert_eq!(clamped.page_end, 4);
    }

    #[test]
    fn difficulty_parses_loosely() {
        assert_eq!(" Hard ".parse::<Difficulty>(), Ok(Difficulty::Hard));
        assert!("extreme".parse::<Difficulty>().is_err());
    }
}
