//! Segmentation stages, leaf first.
//!
//! ## Data Flow
//!
//! ```text
//! pdf ──▶ layout ──▶ quality ──▶ boundary ──▶ linker
//! (pdfium) (lines)   (guard)     (spans)      (QP × MS)
//! ```
//!
//! 1. [`pdf`]: positioned text from pdfium on the blocking pool; also cuts
//!    per-question sub-PDFs.
//! 2. [`layout`]: text fragments merged into ordered, flagged lines
//! 3. [`quality`]: rejects documents without a usable text layer
//! 4. [`boundary`]: question-paper and mark-scheme span detection
//! 5. [`linker`]: question numbers matched across the two documents
//!
//! Only [`pdf`] touches pdfium; the other stages are pure functions over
//! [`Line`](crate::model::Line)s.

pub mod boundary;
pub mod layout;
pub mod linker;
pub mod pdf;
pub mod quality;
