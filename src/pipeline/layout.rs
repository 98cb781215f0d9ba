//! Layout extraction: positioned text fragments → ordered [`Line`]s.
//!
//! pdfium hands back text segments (roughly one per word or style run) with
//! bounding boxes. Fragments whose top edges fall within `tolerance` points
//! of the first fragment of a line are merged into that line; lines are then
//! ordered top-to-bottom, left-to-right. The function is pure so it can be
//! exercised without a PDF.

use crate::model::Line;
use std::cmp::Ordering;

/// A positioned text fragment in top-down page coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub text: String,
    pub x_min: f32,
    pub x_max: f32,
    /// Distance from the top of the page to the fragment's top edge.
    pub top: f32,
    /// Distance from the top of the page to the fragment's bottom edge.
    pub bottom: f32,
}

impl Word {
    pub fn height(&self) -> f32 {
        (self.bottom - self.top).abs()
    }
}

/// Merge fragments of one page into lines.
///
/// Empty and whitespace-only fragments are dropped. An image-only page yields
/// an empty vector; the caller decides whether that means "needs OCR".
pub fn group_words_into_lines(words: &[Word], page: usize, tolerance: f32) -> Vec<Line> {
    let mut sorted: Vec<&Word> = words.iter().filter(|w| !w.text.trim().is_empty()).collect();
    sorted.sort_by(|a, b| cmp_f32(a.top, b.top).then(cmp_f32(a.x_min, b.x_min)));

    let mut groups: Vec<Vec<&Word>> = Vec::new();
    let mut anchor = f32::NEG_INFINITY;
    for word in sorted {
        match groups.last_mut() {
            Some(group) if (word.top - anchor).abs() <= tolerance => group.push(word),
            _ => {
                anchor = word.top;
                groups.push(vec![word]);
            }
        }
    }

    let mut lines: Vec<Line> = groups
        .into_iter()
        .map(|mut group| {
            group.sort_by(|a, b| cmp_f32(a.x_min, b.x_min));
            let text = group
                .iter()
                .map(|w| w.text.trim())
                .collect::<Vec<_>>()
                .join(" ");
            let y = group.iter().map(|w| w.top).fold(f32::INFINITY, f32::min);
            let x_min = group.iter().map(|w| w.x_min).fold(f32::INFINITY, f32::min);
            let x_max = group.iter().map(|w| w.x_max).fold(f32::NEG_INFINITY, f32::max);
            let height = group.iter().map(|w| w.height()).sum::<f32>() / group.len() as f32;
            Line::new(text, page, y, x_min, x_max, height)
        })
        .collect();

    lines.sort_by(|a, b| cmp_f32(a.y, b.y).then(cmp_f32(a.x_min, b.x_min)));
    lines
}

/// Total number of non-whitespace characters across a page's lines.
pub fn char_count(lines: &[Line]) -> usize {
    lines
        .iter()
        .map(|l| l.text.chars().filter(|c| !c.is_whitespace()).count())
        .sum()
}

fn cmp_f32(a: f32, b: f32) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}
