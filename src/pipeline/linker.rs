//! Cross-document linking: question-paper spans × mark-scheme spans.
//!
//! Numbers from both documents are normalised, then matched in two passes:
//! identical numbers first (`Exact`), then a fuzzy pass over whatever is
//! left (`Fuzzy`). Questions still unmatched are kept as `Unlinked` with no
//! mark-scheme pages; that is a data-quality signal, not an error.

use crate::model::{LinkConfidence, LinkedQuestion, QuestionSpan};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info};

/// Question numbers above this are treated as extraction noise.
pub const PLAUSIBLE_CEILING: u32 = 50;

/// Canonical form of a question number.
///
/// Trims, lower-cases, drops a `q`/`question` prefix, parenthesised
/// sub-part suffixes and a trailing period, and strips leading zeros from
/// the numeric stem. A bare letter suffix is kept (`"12A"` → `"12a"`).
/// Non-numeric input is returned trimmed and lower-cased. Idempotent.
pub fn normalize_question_number(raw: &str) -> String {
    let mut s: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    for prefix in ["question", "q"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            if rest.starts_with(|c: char| c.is_ascii_digit()) {
                s = rest.to_string();
                break;
            }
        }
    }

    // "(3)" → "3"
    if s.starts_with('(') {
        if let Some(close) = s.find(')') {
            let inner = &s[1..close];
            if !inner.is_empty() && inner.chars().all(|c| c.is_ascii_digit()) {
                s = format!("{inner}{}", &s[close + 1..]);
            }
        }
    }

    let digits_end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    if digits_end == 0 {
        return s;
    }

    let stem = s[..digits_end].trim_start_matches('0');
    let stem = if stem.is_empty() { "0" } else { stem };

    let rest = &s[digits_end..];
    let rest = rest.split('(').next().unwrap_or_default();
    let rest = rest.trim_end_matches('.');
    if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphabetic()) {
        format!("{stem}{rest}")
    } else {
        stem.to_string()
    }
}

/// Leading integer of a normalised number.
fn numeric_stem(normalized: &str) -> Option<u32> {
    let end = normalized
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(normalized.len());
    normalized[..end].parse().ok()
}

fn sort_key(normalized: &str) -> (u32, String) {
    (numeric_stem(normalized).unwrap_or(u32::MAX), normalized.to_string())
}

// ── Report ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Question "0": cover-page furniture, never a real question.
    NotAQuestion,
    /// Above [`PLAUSIBLE_CEILING`].
    AboveCeiling,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedQuestion {
    pub question_number: String,
    pub reason: SkipReason,
}

/// Outcome of linking one paper.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkReport {
    /// Sorted ascending by numeric question number.
    pub linked: Vec<LinkedQuestion>,
    pub skipped: Vec<SkippedQuestion>,
}

impl LinkReport {
    pub fn count(&self, confidence: LinkConfidence) -> usize {
        self.linked
            .iter()
            .filter(|l| l.link_confidence == confidence)
            .count()
    }

    /// Share of questions that found mark-scheme pages. Zero when the paper
    /// has no questions.
    pub fn linkage_rate(&self) -> f32 {
        if self.linked.is_empty() {
            return 0.0;
        }
        let matched = self.linked.len() - self.count(LinkConfidence::Unlinked);
        matched as f32 / self.linked.len() as f32
    }

    pub fn is_low_linkage(&self, threshold: f32) -> bool {
        self.linkage_rate() < threshold
    }
}

// ── Linking ──────────────────────────────────────────────────────────────

struct Group {
    number: String,
    pages: BTreeSet<usize>,
}

/// Group spans by normalised number, merging the pages of duplicates.
fn group_spans(spans: &[QuestionSpan]) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    for span in spans {
        let number = normalize_question_number(&span.question_number);
        match groups.iter_mut().find(|g| g.number == number) {
            Some(g) => g.pages.extend(span.pages()),
            None => groups.push(Group {
                number,
                pages: span.pages().into_iter().collect(),
            }),
        }
    }
    groups
}

/// Link question-paper spans to mark-scheme spans.
pub fn link(qp: &[QuestionSpan], ms: &[QuestionSpan], ceiling: u32) -> LinkReport {
    let qp_groups = group_spans(qp);
    let ms_groups = group_spans(ms);
    let mut claimed: HashSet<usize> = HashSet::new();
    let mut report = LinkReport::default();
    let mut pending: Vec<&Group> = Vec::new();

    let linked_question = |q: &Group, m: Option<&Group>, confidence| LinkedQuestion {
        question_number: q.number.clone(),
        qp_pages: q.pages.iter().copied().collect(),
        ms_pages: m.map(|m| m.pages.iter().copied().collect()).unwrap_or_default(),
        link_confidence: confidence,
        ms_question_number: m.map(|m| m.number.clone()),
    };

    // Exact pass
    for q in &qp_groups {
        if q.number == "0" {
            debug!("Skipping question 0");
            report.skipped.push(SkippedQuestion {
                question_number: q.number.clone(),
                reason: SkipReason::NotAQuestion,
            });
            continue;
        }
        match ms_groups.iter().position(|m| m.number == q.number) {
            Some(idx) => {
                claimed.insert(idx);
                report
                    .linked
                    .push(linked_question(q, Some(&ms_groups[idx]), LinkConfidence::Exact));
            }
            None => pending.push(q),
        }
    }

    // Fuzzy pass
    pending.sort_by_key(|q| sort_key(&q.number));
    for q in pending {
        let value = numeric_stem(&q.number);
        if value.is_some_and(|v| v > ceiling) {
            debug!("Skipping question {} above ceiling {ceiling}", q.number);
            report.skipped.push(SkippedQuestion {
                question_number: q.number.clone(),
                reason: SkipReason::AboveCeiling,
            });
            continue;
        }

        let nearest = value.and_then(|v| {
            ms_groups
                .iter()
                .enumerate()
                .filter(|(idx, _)| !claimed.contains(idx))
                .filter_map(|(idx, m)| numeric_stem(&m.number).map(|mv| (idx, mv.abs_diff(v), mv)))
                .filter(|(_, dist, _)| *dist <= 1)
                .min_by_key(|(_, dist, mv)| (*dist, *mv))
                .map(|(idx, _, _)| idx)
        });

        let matched = nearest.or_else(|| {
            ms_groups.iter().position(|m| {
                let same_stem = numeric_stem(&m.number) == value;
                same_stem && (m.number.contains(&q.number) || q.number.contains(&m.number))
            })
        });

        match matched {
            Some(idx) => {
                claimed.insert(idx);
                debug!("Question {} fuzzy-linked to {}", q.number, ms_groups[idx].number);
                report
                    .linked
                    .push(linked_question(q, Some(&ms_groups[idx]), LinkConfidence::Fuzzy));
            }
            None => {
                debug!("Question {} has no mark-scheme match", q.number);
                report.linked.push(linked_question(q, None, LinkConfidence::Unlinked));
            }
        }
    }

    report.linked.sort_by_key(|l| sort_key(&l.question_number));
    info!(
        "Linked {} questions: {} exact, {} fuzzy, {} unlinked, {} skipped",
        report.linked.len(),
        report.count(LinkConfidence::Exact),
        report.count(LinkConfidence::Fuzzy),
        report.count(LinkConfidence::Unlinked),
        report.skipped.len()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spans(rows: &[(&str, usize, usize)]) -> Vec<QuestionSpan> {
        rows.iter()
            .map(|(n, s, e)| QuestionSpan::new(*n, *s, *e))
            .collect()
    }

    #[test]
    fn normalisation_strips_zeros_and_suffixes() {
        assert_eq!(normalize_question_number("01"), "1");
        assert_eq!(normalize_question_number("1"), "1");
        assert_eq!(normalize_question_number("007"), "7");
        assert_eq!(normalize_question_number("0"), "0");
        assert_eq!(normalize_question_number(" 3(a)(ii) "), "3");
        assert_eq!(normalize_question_number("4."), "4");
        assert_eq!(normalize_question_number("(5)"), "5");
        assert_eq!(normalize_question_number("Q12"), "12");
        assert_eq!(normalize_question_number("12A"), "12a");
        assert_eq!(normalize_question_number(" Extra "), "extra");
    }

    #[test]
    fn normalisation_is_idempotent() {
        for raw in ["01", "1", "0", "007", "3(a)", "12A", "q 04", "(5)", "Extra", "1.5", ""] {
            let once = normalize_question_number(raw);
            assert_eq!(normalize_question_number(&once), once, "input {raw:?}");
        }
    }

    #[test]
    fn identical_numbers_link_exactly() {
        let qp = spans(&[("1", 1, 2), ("2", 3, 3), ("3", 4, 6)]);
        let ms = spans(&[("1", 2, 2), ("2", 2, 3), ("3", 3, 4)]);
        let report = link(&qp, &ms, PLAUSIBLE_CEILING);
        assert_eq!(report.linked.len(), 3);
        assert_eq!(report.count(LinkConfidence::Exact), 3);
        assert_eq!(report.linked[2].ms_pages, vec![3, 4]);
        assert_eq!(report.linkage_rate(), 1.0);
    }

    #[test]
    fn question_zero_is_skipped() {
        let qp = spans(&[("0", 0, 0), ("1", 1, 1), ("2", 2, 2)]);
        let ms = spans(&[("0", 0, 0), ("1", 1, 1), ("2", 1, 1)]);
        let report = link(&qp, &ms, PLAUSIBLE_CEILING);
        assert_eq!(report.linked.len(), 2);
        assert!(report.linked.iter().all(|l| l.question_number != "0"));
        assert_eq!(report.skipped[0].reason, SkipReason::NotAQuestion);
    }

    #[test]
    fn fuzzy_pass_uses_nearest_then_same_stem() {
        let qp = spans(&[("1", 0, 0), ("3", 1, 1), ("5", 2, 2)]);
        let ms = spans(&[("1", 0, 0), ("4", 1, 1), ("5a", 2, 2)]);
        let report = link(&qp, &ms, PLAUSIBLE_CEILING);
        let by_number = |n: &str| report.linked.iter().find(|l| l.question_number == n).unwrap();

        assert_eq!(by_number("1").link_confidence, LinkConfidence::Exact);
        assert_eq!(by_number("3").link_confidence, LinkConfidence::Fuzzy);
        assert_eq!(by_number("3").ms_question_number.as_deref(), Some("4"));
        assert_eq!(by_number("5").link_confidence, LinkConfidence::Fuzzy);
        assert_eq!(by_number("5").ms_question_number.as_deref(), Some("5a"));
    }

    #[test]
    fn unmatched_questions_stay_unlinked() {
        let qp = spans(&[("1", 0, 0), ("2", 1, 1), ("3", 2, 2), ("9", 3, 3)]);
        let ms = spans(&[("1", 0, 0)]);
        let report = link(&qp, &ms, PLAUSIBLE_CEILING);
        let unlinked: Vec<_> = report
            .linked
            .iter()
            .filter(|l| l.link_confidence == LinkConfidence::Unlinked)
            .collect();
        // "2" takes nothing: the only neighbour "1" is already claimed.
        assert_eq!(unlinked.len(), 3);
        assert!(unlinked.iter().all(|l| l.ms_pages.is_empty() && !l.qp_pages.is_empty()));
        assert!(report.is_low_linkage(0.5));
    }

    #[test]
    fn numbers_above_ceiling_are_noise() {
        let qp = spans(&[("1", 0, 0), ("77", 5, 5)]);
        let ms = spans(&[("1", 0, 0), ("76", 1, 1)]);
        let report = link(&qp, &ms, PLAUSIBLE_CEILING);
        assert_eq!(report.linked.len(), 1);
        assert_eq!(report.skipped[0].reason, SkipReason::AboveCeiling);
    }

    #[test]
    fn duplicates_merge_and_output_is_sorted() {
        let qp = spans(&[("10", 9, 9), ("2", 1, 1), ("02", 3, 3), ("1", 0, 0)]);
        let ms = spans(&[("1", 0, 0), ("2", 0, 0), ("10", 4, 4)]);
        let report = link(&qp, &ms, PLAUSIBLE_CEILING);
        let numbers: Vec<&str> = report.linked.iter().map(|l| l.question_number.as_str()).collect();
        assert_eq!(numbers, vec!["1", "2", "10"]);
        assert_eq!(report.linked[1].qp_pages, vec![1, 3]);
        // One mark-scheme page shared by questions 1 and 2.
        assert_eq!(report.linked[0].ms_pages, report.linked[1].ms_pages);
    }
}
