//! Page-quality guard: decide whether a document's text layer is usable.
//!
//! Runs before boundary detection. A scanned paper without a text layer, or
//! one whose text is mostly replacement characters and `(cid:NN)` escapes,
//! would only produce garbage spans, so it is flagged for re-scan instead.

use crate::model::Line;
use crate::pipeline::layout::char_count;
use serde::{Deserialize, Serialize};

/// Thresholds for the quality guard.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityRules {
    /// Pages sampled (evenly spread across the document).
    pub sample_pages: usize,
    /// Minimum average non-whitespace characters per sampled page.
    pub min_chars_per_page: usize,
    /// Maximum share of corrupt glyphs among sampled characters.
    pub max_corruption_ratio: f32,
}

impl Default for QualityRules {
    fn default() -> Self {
        Self {
            sample_pages: 5,
            min_chars_per_page: 100,
            max_corruption_ratio: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QualityVerdict {
    Usable { avg_chars_per_page: f32 },
    NeedsRescan { reason: String },
}

impl QualityVerdict {
    pub fn is_usable(&self) -> bool {
        matches!(self, QualityVerdict::Usable { .. })
    }
}

/// Indices of up to `n` pages spread evenly over `total`.
pub fn sample_indices(total: usize, n: usize) -> Vec<usize> {
    if total == 0 || n == 0 {
        return Vec::new();
    }
    if total <= n {
        return (0..total).collect();
    }
    let mut picked: Vec<usize> = (0..n).map(|i| i * (total - 1) / (n - 1).max(1)).collect();
    picked.dedup();
    picked
}

/// Assess the text layer of a whole document.
pub fn assess(pages: &[Vec<Line>], rules: &QualityRules) -> QualityVerdict {
    let sample = sample_indices(pages.len(), rules.sample_pages);
    if sample.is_empty() {
        return QualityVerdict::NeedsRescan {
            reason: "document has no pages".into(),
        };
    }

    let mut chars = 0usize;
    let mut corrupt = 0usize;
    for &idx in &sample {
        let lines = &pages[idx];
        chars += char_count(lines);
        for line in lines {
            corrupt += line.text.chars().filter(|&c| c == '\u{FFFD}').count();
            corrupt += line.text.matches("(cid:").count() * 6;
        }
    }

    let avg = chars as f32 / sample.len() as f32;
    if avg < rules.min_chars_per_page as f32 {
        return QualityVerdict::NeedsRescan {
            reason: format!(
                "{avg:.0} extracted chars/page over {} sampled pages (minimum {})",
                sample.len(),
                rules.min_chars_per_page
            ),
        };
    }

    let ratio = corrupt as f32 / chars.max(1) as f32;
    if ratio > rules.max_corruption_ratio {
        return QualityVerdict::NeedsRescan {
            reason: format!("{:.1}% of sampled glyphs are corrupt", ratio * 100.0),
        };
    }

    QualityVerdict::Usable {
        avg_chars_per_page: avg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(text: &str, idx: usize) -> Vec<Line> {
        vec![Line::new(text, idx, 10.0, 50.0, 500.0, 10.0)]
    }

    #[test]
    fn sampling_spreads_over_document() {
        assert_eq!(sample_indices(3, 5), vec![0, 1, 2]);
        assert_eq!(sample_indices(9, 5), vec![0, 2, 4, 6, 8]);
        assert!(sample_indices(0, 5).is_empty());
        assert_eq!(sample_indices(10, 1), vec![0]);
    }

    #[test]
    fn text_rich_document_is_usable() {
        let body = "x".repeat(400);
        let pages: Vec<Vec<Line>> = (0..4).map(|i| page(&body, i)).collect();
        assert!(assess(&pages, &QualityRules::default()).is_usable());
    }

    #[test]
    fn image_only_document_needs_rescan() {
        let pages: Vec<Vec<Line>> = vec![Vec::new(); 6];
        match assess(&pages, &QualityRules::default()) {
            QualityVerdict::NeedsRescan { reason } => assert!(reason.contains("chars/page")),
            other => panic!("expected rescan, got {other:?}"),
        }
        assert!(!assess(&[], &QualityRules::default()).is_usable());
    }

    #[test]
    fn corrupt_glyphs_trigger_rescan() {
        let body = format!("{}{}", "a".repeat(150), "\u{FFFD}".repeat(50));
        let pages = vec![page(&body, 0), page(&body, 1)];
        match assess(&pages, &QualityRules::default()) {
            QualityVerdict::NeedsRescan { reason } => assert!(reason.contains("corrupt")),
            other => panic!("expected rescan, got {other:?}"),
        }
    }
}
