//! Boundary detection: document [`Line`]s → ordered question spans.
//!
//! Two rule sets share one scanner:
//!
//! - **Question papers**: a question starts on a margin line whose leading
//!   number is greater than the open question's. `Total for Question N`
//!   closes the open span on the marker's page. Without a marker a span runs
//!   up to the next start, including pages that carry only boilerplate or
//!   no text, and the last open span runs to the end of the document.
//! - **Mark schemes**: either a modern table (header row "Question / Scheme
//!   / Marks", leading cell holds the number) or legacy free text (`(N)`,
//!   `N (a)`, `N.` at the margin). Rows repeating the open number continue it.
//!
//! Detection runs only after the page-quality guard has accepted the text
//! layer. Anomalies (gaps, backward steps, duplicates, out-of-range numbers)
//! are returned to
//! the caller and logged; they never abort detection.

use crate::model::{
    DetectedQuestion, DocumentKind, Line, QuestionSpan, RE_HEADER_MARKS, RE_HEADER_QUESTION,
    RE_HEADER_SCHEME,
};
use crate::pipeline::quality::{assess, QualityRules, QualityVerdict};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use tracing::{debug, warn};

// ── Rules ────────────────────────────────────────────────────────────────

/// Mark-scheme layout family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkSchemeFormat {
    /// Table with a "Question / Scheme / Marks" header row.
    Modern,
    /// Free text with inline `(N)` / `N (a)` / `N.` numbering.
    Legacy,
}

/// Tunable detection thresholds. Subject configs may override a subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryRules {
    /// Vertical band (points) for merging fragments into one line.
    pub line_tolerance: f32,
    /// A question number must start at or left of this x coordinate.
    pub left_margin: f32,
    /// Highest number a question paper may start a question with.
    pub max_question_number: u32,
    /// Largest forward jump accepted once a question is open.
    pub max_forward_jump: u32,
    /// Pages sampled by the mark-scheme format detector.
    pub format_sample_pages: usize,
    /// Forces the mark-scheme format instead of detecting it.
    pub markscheme_format: Option<MarkSchemeFormat>,
    pub quality: QualityRules,
}

impl Default for BoundaryRules {
    fn default() -> Self {
        Self {
            line_tolerance: 3.0,
            left_margin: 90.0,
            max_question_number: 30,
            max_forward_jump: 5,
            format_sample_pages: 4,
            markscheme_format: None,
            quality: QualityRules::default(),
        }
    }
}

// ── Results ──────────────────────────────────────────────────────────────

/// A data-quality finding about the detected numbering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoundaryAnomaly {
    /// Numbers jumped by more than one.
    Gap { after: String, next: String },
    /// The same number was detected more than once.
    Duplicate { number: String },
    /// A new number lower than the one before it.
    OutOfOrder { after: String, next: String },
    /// Number above the configured maximum.
    OutOfRange { number: String, max: u32 },
    /// Number that is not a plain integer.
    NonNumeric { number: String },
}

impl fmt::Display for BoundaryAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundaryAnomaly::Gap { after, next } => {
                write!(f, "numbering gap: question {after} followed by {next}")
            }
            BoundaryAnomaly::Duplicate { number } => write!(f, "question {number} detected twice"),
            BoundaryAnomaly::OutOfOrder { after, next } => {
                write!(f, "numbering out of order: question {after} followed by {next}")
            }
            BoundaryAnomaly::OutOfRange { number, max } => {
                write!(f, "question {number} exceeds maximum {max}")
            }
            BoundaryAnomaly::NonNumeric { number } => {
                write!(f, "question number '{number}' is not numeric")
            }
        }
    }
}

/// Output of boundary detection for one document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Segmentation {
    pub questions: Vec<DetectedQuestion>,
    pub anomalies: Vec<BoundaryAnomaly>,
    /// Mark-scheme format used; `None` for question papers.
    pub format: Option<MarkSchemeFormat>,
}

impl Segmentation {
    pub fn spans(&self) -> Vec<QuestionSpan> {
        self.questions.iter().map(|q| q.span.clone()).collect()
    }
}

/// The quality guard rejected the document's text layer.
#[derive(Debug, Clone, PartialEq)]
pub struct RescanRequired {
    pub reason: String,
}

// ── Patterns ─────────────────────────────────────────────────────────────

static RE_BOILERPLATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:turn\s+over|do\s+not\s+write\s+in\s+this\s+area|blank\s+page|page\s+\d+(?:\s+of\s+\d+)?|\d{1,3}|\*[A-Z0-9]{5,}\*|©.*)\s*$",
    )
    .unwrap()
});

/// Run of parenthesised labels at the start of a line, optionally after the
/// question number: `(a)`, `3(b)(ii)`, `(iv)`.
static RE_SUBPART_RUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:\d{1,2}\s*)?((?:\(\s*[a-z]{1,4}\s*\)\s*)+)").unwrap()
});

static RE_SUBPART_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\s*([a-z]{1,4})\s*\)").unwrap());

static RE_ROMAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:i|ii|iii|iv|v|vi|vii|viii|ix|x)$").unwrap());

static RE_LEGACY_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:\((\d{1,2})\)|(\d{1,2})\s*\(\s*[a-z]{1,4}\s*\)|(\d{1,2})\.(?:\s|$))")
        .unwrap()
});

static RE_MODERN_ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d{1,2})(?:\s*\(\s*[a-z]{1,4}\s*\))*(?:\s|$)").unwrap());

static RE_GUIDANCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)general\s+marking\s+guidance|marking\s+principles|mark\s+scheme\s+notes")
        .unwrap()
});

fn is_boilerplate(line: &Line) -> bool {
    RE_BOILERPLATE.is_match(&line.text)
}

fn legacy_number(line: &Line) -> Option<u32> {
    let caps = RE_LEGACY_NUMBER.captures(&line.text)?;
    (1..=3)
        .find_map(|i| caps.get(i))
        .and_then(|m| m.as_str().parse().ok())
}

fn modern_row_number(line: &Line) -> Option<u32> {
    RE_MODERN_ROW
        .captures(&line.text)
        .and_then(|c| c[1].parse().ok())
}

/// Whether any window of three consecutive lines carries all three header
/// keywords.
fn has_header_window(lines: &[Line]) -> bool {
    (0..lines.len()).any(|i| {
        let window = lines[i..lines.len().min(i + 3)]
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        RE_HEADER_QUESTION.is_match(&window)
            && RE_HEADER_SCHEME.is_match(&window)
            && RE_HEADER_MARKS.is_match(&window)
    })
}

fn is_guidance_page(lines: &[Line]) -> bool {
    lines.iter().any(|l| RE_GUIDANCE.is_match(&l.text))
}

// ── Open span builder ────────────────────────────────────────────────────

struct OpenQuestion {
    number: u32,
    page_start: usize,
    last_page: usize,
    subparts: BTreeSet<String>,
    current_letter: Option<String>,
    text: String,
}

impl OpenQuestion {
    fn new(number: u32, page: usize) -> Self {
        Self {
            number,
            page_start: page,
            last_page: page,
            subparts: BTreeSet::new(),
            current_letter: None,
            text: String::new(),
        }
    }

    fn push_line(&mut self, line: &Line) {
        self.record_subparts(&line.text);
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.text.push_str(&line.text);
        self.last_page = self.last_page.max(line.page);
    }

    fn record_subparts(&mut self, text: &str) {
        let Some(run) = RE_SUBPART_RUN.captures(text).and_then(|c| c.get(1)) else {
            return;
        };
        for caps in RE_SUBPART_LABEL.captures_iter(run.as_str()) {
            let label = caps[1].to_string();
            // "(i)" straight after "(h)" is the ninth letter, not a numeral.
            let roman = RE_ROMAN.is_match(&label)
                && !(label == "i" && self.current_letter.as_deref() == Some("h"));
            if roman {
                match &self.current_letter {
                    Some(letter) => self.subparts.insert(format!("{letter}.{label}")),
                    None => self.subparts.insert(label),
                };
            } else {
                self.subparts.insert(label.clone());
                self.current_letter = Some(label);
            }
        }
    }

    fn close(self, marks: Option<u32>, confirmed: bool) -> DetectedQuestion {
        let mut span = QuestionSpan::new(self.number.to_string(), self.page_start, self.last_page);
        span.subparts = self.subparts;
        DetectedQuestion {
            span,
            text: self.text,
            marks,
            confirmed,
        }
    }
}

// ── Scanner ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    QuestionPaper,
    Modern,
    Legacy,
}

struct Scanner<'a> {
    rules: &'a BoundaryRules,
    mode: Mode,
    done: Vec<DetectedQuestion>,
    open: Option<OpenQuestion>,
    last_started: u32,
    /// Page of the last non-boilerplate line fed.
    content_page: Option<usize>,
}

impl<'a> Scanner<'a> {
    fn new(rules: &'a BoundaryRules, mode: Mode) -> Self {
        Self {
            rules,
            mode,
            done: Vec::new(),
            open: None,
            last_started: 0,
            content_page: None,
        }
    }

    /// Number of the question this line would start, if any.
    fn start_number(&self, line: &Line) -> Option<u32> {
        if line.x_min > self.rules.left_margin {
            return None;
        }
        match self.mode {
            Mode::QuestionPaper => {
                if !line.is_question_number_candidate {
                    return None;
                }
                let n = line.leading_number()?;
                if !(1..=self.rules.max_question_number).contains(&n) {
                    debug!("Page {}: ignoring out-of-range start {n}", line.page);
                    return None;
                }
                if n <= self.last_started {
                    debug!(
                        "Page {}: ignoring {n}, question {} already open",
                        line.page, self.last_started
                    );
                    return None;
                }
                if self.last_started > 0 && n - self.last_started > self.rules.max_forward_jump {
                    debug!("Page {}: ignoring implausible jump to {n}", line.page);
                    return None;
                }
                Some(n)
            }
            Mode::Modern => {
                if !line.is_question_number_candidate {
                    return None;
                }
                modern_row_number(line)
            }
            Mode::Legacy => legacy_number(line),
        }
    }

    fn feed(&mut self, line: &Line) {
        let top_of_page = self.content_page != Some(line.page);
        if !is_boilerplate(line) {
            self.content_page = Some(line.page);
        }

        if let Some(n) = self.start_number(line) {
            let continues = self.open.as_ref().is_some_and(|q| q.number == n);
            if continues && self.mode != Mode::QuestionPaper {
                if let Some(q) = self.open.as_mut() {
                    q.push_line(line);
                }
                return;
            }
            // The closed question owns every page up to this start: the
            // previous page when the start heads its page, else this one.
            if let Some(q) = self.open.as_mut() {
                let end = if top_of_page {
                    line.page.saturating_sub(1)
                } else {
                    line.page
                };
                q.last_page = q.last_page.max(end);
            }
            self.finish(None, false);
            let mut q = OpenQuestion::new(n, line.page);
            q.push_line(line);
            self.open = Some(q);
            self.last_started = n;
            return;
        }

        if let Some((n, marks)) = line.total_marker() {
            if self.open.as_ref().is_some_and(|q| q.number == n) {
                if let Some(q) = self.open.as_mut() {
                    q.push_line(line);
                }
                self.finish(marks, true);
                return;
            }
            debug!("Page {}: total marker for {n} does not match open question", line.page);
        }

        if is_boilerplate(line) {
            return;
        }
        if let Some(q) = self.open.as_mut() {
            q.push_line(line);
        }
    }

    fn finish(&mut self, marks: Option<u32>, confirmed: bool) {
        if let Some(q) = self.open.take() {
            self.done.push(q.close(marks, confirmed));
        }
    }

    /// Close the open question at the last page of the document.
    fn into_questions(mut self, page_count: usize) -> Vec<DetectedQuestion> {
        if let Some(q) = self.open.as_mut() {
            q.last_page = q.last_page.max(page_count.saturating_sub(1));
        }
        self.finish(None, false);
        self.done
    }
}

// ── Public entry points ──────────────────────────────────────────────────

/// Pick the mark-scheme format from the first few pages.
pub fn detect_format(pages: &[Vec<Line>], rules: &BoundaryRules) -> MarkSchemeFormat {
    if let Some(forced) = rules.markscheme_format {
        return forced;
    }
    let sample = &pages[..pages.len().min(rules.format_sample_pages)];

    let header_hits = sample.iter().filter(|p| has_header_window(p)).count();
    if header_hits >= 1 {
        debug!("Mark-scheme format: modern ({header_hits} header pages)");
        return MarkSchemeFormat::Modern;
    }

    let legacy_hits = sample
        .iter()
        .flatten()
        .filter(|l| l.x_min <= rules.left_margin && legacy_number(l).is_some())
        .count();
    if legacy_hits >= 2 {
        debug!("Mark-scheme format: legacy ({legacy_hits} inline markers)");
        return MarkSchemeFormat::Legacy;
    }

    warn!("Mark-scheme format undetermined in first {} pages, assuming modern", sample.len());
    MarkSchemeFormat::Modern
}

/// Segment a question paper. Input is one `Vec<Line>` per page.
pub fn segment_question_paper(pages: &[Vec<Line>], rules: &BoundaryRules) -> Vec<DetectedQuestion> {
    let mut scanner = Scanner::new(rules, Mode::QuestionPaper);
    for line in pages.iter().flatten() {
        scanner.feed(line);
    }
    scanner.into_questions(pages.len())
}

/// Segment a mark scheme in the given format.
pub fn segment_markscheme(
    pages: &[Vec<Line>],
    rules: &BoundaryRules,
    format: MarkSchemeFormat,
) -> Vec<DetectedQuestion> {
    let mode = match format {
        MarkSchemeFormat::Modern => Mode::Modern,
        MarkSchemeFormat::Legacy => Mode::Legacy,
    };
    let mut scanner = Scanner::new(rules, mode);
    let mut in_table = false;

    for lines in pages {
        let started = scanner.open.is_some() || !scanner.done.is_empty();
        if !started && is_guidance_page(lines) {
            debug!("Skipping marking-guidance page");
            continue;
        }
        if mode == Mode::Modern {
            if !in_table && has_header_window(lines) {
                in_table = true;
            }
            if !in_table {
                continue;
            }
        }
        for line in lines {
            if mode == Mode::Modern && line.is_table_header {
                continue;
            }
            scanner.feed(line);
        }
    }
    scanner.into_questions(pages.len())
}

/// Check detected numbering: each number one more than the last, unique and
/// within range.
pub fn validate(questions: &[DetectedQuestion], max_question_number: u32) -> Vec<BoundaryAnomaly> {
    let mut anomalies = Vec::new();
    let mut seen = HashSet::new();
    let mut previous: Option<u32> = None;

    for q in questions {
        let label = &q.span.question_number;
        let Ok(n) = label.parse::<u32>() else {
            anomalies.push(BoundaryAnomaly::NonNumeric {
                number: label.clone(),
            });
            continue;
        };
        let first_sighting = seen.insert(n);
        if !first_sighting {
            anomalies.push(BoundaryAnomaly::Duplicate {
                number: label.clone(),
            });
        }
        if n > max_question_number {
            anomalies.push(BoundaryAnomaly::OutOfRange {
                number: label.clone(),
                max: max_question_number,
            });
        }
        if let Some(prev) = previous {
            if n > prev + 1 {
                anomalies.push(BoundaryAnomaly::Gap {
                    after: prev.to_string(),
                    next: label.clone(),
                });
            } else if n < prev && first_sighting {
                anomalies.push(BoundaryAnomaly::OutOfOrder {
                    after: prev.to_string(),
                    next: label.clone(),
                });
            }
        }
        previous = Some(n);
    }
    anomalies
}

/// Quality guard, format detection, segmentation and validation for one
/// document.
pub fn segment_document(
    kind: DocumentKind,
    pages: &[Vec<Line>],
    rules: &BoundaryRules,
) -> Result<Segmentation, RescanRequired> {
    if let QualityVerdict::NeedsRescan { reason } = assess(pages, &rules.quality) {
        return Err(RescanRequired { reason });
    }

    let (questions, format) = match kind {
        DocumentKind::QuestionPaper => (segment_question_paper(pages, rules), None),
        DocumentKind::MarkScheme => {
            let format = detect_format(pages, rules);
            (segment_markscheme(pages, rules, format), Some(format))
        }
    };

    let anomalies = validate(&questions, rules.max_question_number);
    for anomaly in &anomalies {
        warn!("{kind}: {anomaly}");
    }
    debug!("{kind}: detected {} questions", questions.len());

    Ok(Segmentation {
        questions,
        anomalies,
        format,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a page of lines from `(x_min, text)` pairs, 20pt apart.
    pub(crate) fn page(idx: usize, rows: &[(f32, &str)]) -> Vec<Line> {
        rows.iter()
            .enumerate()
            .map(|(i, (x, text))| Line::new(*text, idx, 60.0 + 20.0 * i as f32, *x, 500.0, 10.0))
            .collect()
    }

    fn numbers(questions: &[DetectedQuestion]) -> Vec<&str> {
        questions.iter().map(|q| q.span.question_number.as_str()).collect()
    }

    #[test]
    fn question_paper_spans_follow_margin_numbers() {
        let pages = vec![
            page(0, &[(300.0, "Physics Paper 1"), (300.0, "Answer ALL questions.")]),
            page(1, &[(50.0, "1 The diagram shows a trolley."), (60.0, "(a) State the unit of force."), (60.0, "(b) (i) Calculate the speed.")]),
            page(2, &[(60.0, "(ii) Explain your answer."), (200.0, "(Total for Question 1 = 6 marks)"), (50.0, "2 A wire carries a current.")]),
            page(3, &[(60.0, "(a) Draw the circuit."), (300.0, "Turn over")]),
            page(4, &[(50.0, "3 Light passes through a prism.")]),
        ];
        let qs = segment_question_paper(&pages, &BoundaryRules::default());
        assert_eq!(numbers(&qs), vec!["1", "2", "3"]);

        assert_eq!((qs[0].span.page_start, qs[0].span.page_end), (1, 2));
        assert!(qs[0].confirmed);
        assert_eq!(qs[0].marks, Some(6));
        let subparts: Vec<&str> = qs[0].span.subparts.iter().map(String::as_str).collect();
        assert_eq!(subparts, vec!["a", "b", "b.i", "b.ii"]);

        assert_eq!((qs[1].span.page_start, qs[1].span.page_end), (2, 3));
        assert!(!qs[1].confirmed);
        assert!(!qs[1].text.contains("Turn over"));
        assert_eq!((qs[2].span.page_start, qs[2].span.page_end), (4, 4));
    }

    #[test]
    fn pages_without_question_text_stay_in_the_open_span() {
        let pages = vec![
            page(0, &[(50.0, "1 A car accelerates from rest.")]),
            page(1, &[(100.0, "DO NOT WRITE IN THIS AREA"), (300.0, "Turn over")]),
            page(2, &[(50.0, "2 A wire carries a current.")]),
            page(3, &[]),
            page(4, &[(60.0, "(a) Calculate the resistance."), (50.0, "3 Light enters a prism.")]),
            page(5, &[(300.0, "BLANK PAGE")]),
        ];
        let qs = segment_question_paper(&pages, &BoundaryRules::default());
        let spans: Vec<(&str, usize, usize)> = qs
            .iter()
            .map(|q| (q.span.question_number.as_str(), q.span.page_start, q.span.page_end))
            .collect();
        assert_eq!(spans, vec![("1", 0, 1), ("2", 2, 4), ("3", 4, 5)]);
        assert!(!qs[0].text.contains("Turn over"));

        for pair in qs.windows(2) {
            assert!(pair[1].span.page_start <= pair[0].span.page_end + 1);
        }
    }

    #[test]
    fn markscheme_span_reaches_next_row_page() {
        let pages = vec![
            page(0, &[(50.0, "Question"), (150.0, "Scheme"), (400.0, "Marks"), (50.0, "1(a) newton")]),
            page(1, &[(400.0, "12")]),
            page(2, &[(50.0, "2(a) series circuit")]),
        ];
        let qs = segment_markscheme(&pages, &BoundaryRules::default(), MarkSchemeFormat::Modern);
        assert_eq!((qs[0].span.page_start, qs[0].span.page_end), (0, 1));
        assert_eq!((qs[1].span.page_start, qs[1].span.page_end), (2, 2));
    }

    #[test]
    fn numbers_outside_margin_or_backwards_are_ignored() {
        let pages = vec![
            page(0, &[(50.0, "1 Calculate the force.")]),
            page(1, &[(400.0, "2 marks"), (50.0, "1 (continued)"), (50.0, "2 State the law.")]),
            page(2, &[(50.0, "40 Extra"), (50.0, "29 Too far ahead")]),
        ];
        let qs = segment_question_paper(&pages, &BoundaryRules::default());
        assert_eq!(numbers(&qs), vec!["1", "2"]);
        assert_eq!(qs[0].span.page_end, 1);
    }

    #[test]
    fn spans_are_sorted_and_well_formed() {
        let pages: Vec<Vec<Line>> = (0..8)
            .map(|p| {
                let text = format!("{} Question text here.", p + 1);
                page(p, &[(50.0, text.as_str())])
            })
            .collect();
        let qs = segment_question_paper(&pages, &BoundaryRules::default());
        assert_eq!(qs.len(), 8);
        for pair in qs.windows(2) {
            assert!(pair[0].span.page_start <= pair[1].span.page_start);
        }
        assert!(qs.iter().all(|q| q.span.page_start <= q.span.page_end));
    }

    #[test]
    fn modern_markscheme_rows_continue_open_question() {
        let pages = vec![
            page(0, &[(100.0, "General Marking Guidance"), (50.0, "1. All candidates must receive the same treatment.")]),
            page(1, &[(50.0, "Question number"), (150.0, "Scheme"), (400.0, "Marks"), (50.0, "1(a) newton"), (50.0, "1(b) 3.2 m/s"), (50.0, "2(a) series circuit")]),
            page(2, &[(50.0, "Question"), (150.0, "Answer"), (400.0, "Marks"), (50.0, "2(b) 4 ohms"), (50.0, "3 refraction")]),
        ];
        let rules = BoundaryRules::default();
        assert_eq!(detect_format(&pages, &rules), MarkSchemeFormat::Modern);

        let qs = segment_markscheme(&pages, &rules, MarkSchemeFormat::Modern);
        assert_eq!(numbers(&qs), vec!["1", "2", "3"]);
        assert_eq!((qs[0].span.page_start, qs[0].span.page_end), (1, 1));
        assert_eq!((qs[1].span.page_start, qs[1].span.page_end), (1, 2));
        assert!(qs[1].span.subparts.contains("a") && qs[1].span.subparts.contains("b"));
    }

    #[test]
    fn legacy_markscheme_is_detected_and_segmented() {
        let pages = vec![
            page(0, &[(50.0, "(1) velocity = distance / time"), (80.0, "award 1 mark")]),
            page(1, &[(50.0, "2 (a) current = charge / time"), (50.0, "2 (b) 1.5 A"), (50.0, "3. wavelength decreases")]),
        ];
        let rules = BoundaryRules::default();
        assert_eq!(detect_format(&pages, &rules), MarkSchemeFormat::Legacy);
        let qs = segment_markscheme(&pages, &rules, MarkSchemeFormat::Legacy);
        assert_eq!(numbers(&qs), vec!["1", "2", "3"]);
        assert_eq!(qs[1].span.page_start, 1);
    }

    #[test]
    fn forced_format_wins() {
        let rules = BoundaryRules {
            markscheme_format: Some(MarkSchemeFormat::Legacy),
            ..BoundaryRules::default()
        };
        let pages = vec![page(0, &[(50.0, "Question Scheme Marks")])];
        assert_eq!(detect_format(&pages, &rules), MarkSchemeFormat::Legacy);
    }

    #[test]
    fn validation_reports_gaps_duplicates_and_range() {
        let q = |n: &str| DetectedQuestion {
            span: QuestionSpan::new(n, 0, 0),
            text: String::new(),
            marks: None,
            confirmed: false,
        };
        let anomalies = validate(&[q("1"), q("2"), q("4"), q("4"), q("31"), q("x")], 30);
        assert!(anomalies.contains(&BoundaryAnomaly::Gap { after: "2".into(), next: "4".into() }));
        assert!(anomalies.contains(&BoundaryAnomaly::Duplicate { number: "4".into() }));
        assert!(anomalies.contains(&BoundaryAnomaly::OutOfRange { number: "31".into(), max: 30 }));
        assert!(anomalies.contains(&BoundaryAnomaly::NonNumeric { number: "x".into() }));
        assert!(validate(&[q("1"), q("2"), q("3")], 30).is_empty());
    }

    #[test]
    fn validation_reports_backward_steps() {
        let q = |n: &str| DetectedQuestion {
            span: QuestionSpan::new(n, 0, 0),
            text: String::new(),
            marks: None,
            confirmed: false,
        };
        assert_eq!(
            validate(&[q("1"), q("3"), q("2")], 30),
            vec![
                BoundaryAnomaly::Gap { after: "1".into(), next: "3".into() },
                BoundaryAnomaly::OutOfOrder { after: "3".into(), next: "2".into() },
            ]
        );
        // A repeat going backwards is a duplicate, not also out of order.
        assert_eq!(
            validate(&[q("1"), q("2"), q("1")], 30),
            vec![BoundaryAnomaly::Duplicate { number: "1".into() }]
        );
    }

    #[test]
    fn poor_text_layer_needs_rescan() {
        let pages = vec![page(0, &[(50.0, "1")]), page(1, &[])];
        let result = segment_document(DocumentKind::QuestionPaper, &pages, &BoundaryRules::default());
        assert!(result.is_err());
    }
}
