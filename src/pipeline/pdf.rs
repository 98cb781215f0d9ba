//! pdfium access: text layout reading and per-question page extraction.
//!
//! Everything here is blocking. Callers go through [`read_document`] and
//! [`extract_pages`], which move the work onto `spawn_blocking` because the
//! pdfium C++ library keeps thread-local state and must not stall the Tokio
//! worker threads.
//!
//! The [`DocumentReader`] trait is the seam between the pipeline and pdfium;
//! tests drive the whole batch with a scripted reader instead of real PDFs.

use crate::error::{PaperError, PipelineError};
use crate::model::Line;
use crate::pipeline::layout::{group_words_into_lines, Word};
use pdfium_render::prelude::*;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Environment variable naming an existing pdfium shared library.
pub const PDFIUM_LIB_ENV: &str = "PDFIUM_LIB_PATH";

/// Source of page text and page bytes.
pub trait DocumentReader: Send + Sync {
    /// Lines of every page, one `Vec` per page in page order.
    fn read_lines(&self, path: &Path, tolerance: f32) -> Result<Vec<Vec<Line>>, PaperError>;

    /// A new PDF holding only `pages` (0-based, ascending) of `path`.
    fn extract_pages(&self, path: &Path, pages: &[usize]) -> Result<Vec<u8>, PaperError>;
}

/// Read a document's lines on the blocking pool.
pub async fn read_document(
    reader: Arc<dyn DocumentReader>,
    path: &Path,
    tolerance: f32,
) -> Result<Vec<Vec<Line>>, PaperError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || reader.read_lines(&path, tolerance))
        .await
        .map_err(|e| PaperError::Internal(format!("Layout task panicked: {}", e)))?
}

/// Extract a page subset on the blocking pool.
pub async fn extract_pages(
    reader: Arc<dyn DocumentReader>,
    path: &Path,
    pages: Vec<usize>,
) -> Result<Vec<u8>, PaperError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || reader.extract_pages(&path, &pages))
        .await
        .map_err(|e| PaperError::Internal(format!("Extraction task panicked: {}", e)))?
}

/// Split sorted page indices into inclusive runs: `[1,2,3,7]` → `[(1,3),(7,7)]`.
pub fn contiguous_runs(pages: &[usize]) -> Vec<(usize, usize)> {
    let mut runs: Vec<(usize, usize)> = Vec::new();
    for &p in pages {
        match runs.last_mut() {
            Some((_, end)) if p == *end + 1 => *end = p,
            Some((_, end)) if p == *end => {}
            _ => runs.push((p, p)),
        }
    }
    runs
}

/// Reject files that do not start with the `%PDF` magic bytes.
pub fn check_pdf_magic(path: &Path) -> Result<(), PaperError> {
    let unreadable = |detail: String| PaperError::Unreadable {
        document: path.to_path_buf(),
        detail,
    };
    let mut file = std::fs::File::open(path).map_err(|e| unreadable(e.to_string()))?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)
        .map_err(|e| unreadable(format!("too short to be a PDF: {e}")))?;
    if &magic != b"%PDF" {
        return Err(unreadable(format!("not a PDF (magic bytes {magic:?})")));
    }
    Ok(())
}

// ── pdfium implementation ────────────────────────────────────────────────

/// [`DocumentReader`] backed by a pdfium shared library.
#[derive(Debug, Clone)]
pub struct PdfiumReader {
    library: Option<PathBuf>,
}

impl PdfiumReader {
    /// Use `PDFIUM_LIB_PATH` when set, otherwise the system library.
    pub fn from_env() -> Self {
        Self {
            library: std::env::var_os(PDFIUM_LIB_ENV).map(PathBuf::from),
        }
    }

    pub fn with_library(path: impl Into<PathBuf>) -> Self {
        Self {
            library: Some(path.into()),
        }
    }

    /// Bind once up front so a missing library fails the batch before any
    /// paper is touched.
    pub fn probe(&self) -> Result<(), PipelineError> {
        self.bind()
            .map(|_| ())
            .map_err(|e| PipelineError::PdfiumBindingFailed(format!("{:?}", e)))
    }

    fn bind(&self) -> Result<Pdfium, PdfiumError> {
        let bindings = match &self.library {
            Some(path) => Pdfium::bind_to_library(path)?,
            None => Pdfium::bind_to_system_library()?,
        };
        Ok(Pdfium::new(bindings))
    }

    fn bind_for(&self, path: &Path) -> Result<Pdfium, PaperError> {
        self.bind().map_err(|e| PaperError::Unreadable {
            document: path.to_path_buf(),
            detail: format!("pdfium unavailable: {:?}", e),
        })
    }
}

fn page_words(page: &PdfPage) -> Result<Vec<Word>, PdfiumError> {
    let height = page.height().value;
    let text = page.text()?;
    let words = text
        .segments()
        .iter()
        .map(|segment| {
            let bounds = segment.bounds();
            // pdfium's origin is bottom-left; flip to top-down.
            Word {
                text: segment.text(),
                x_min: bounds.left().value,
                x_max: bounds.right().value,
                top: height - bounds.top().value,
                bottom: height - bounds.bottom().value,
            }
        })
        .collect();
    Ok(words)
}

impl DocumentReader for PdfiumReader {
    fn read_lines(&self, path: &Path, tolerance: f32) -> Result<Vec<Vec<Line>>, PaperError> {
        check_pdf_magic(path)?;
        let pdfium = self.bind_for(path)?;
        let document = pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| PaperError::Unreadable {
                document: path.to_path_buf(),
                detail: format!("{:?}", e),
            })?;

        let mut pages = Vec::new();
        for (idx, page) in document.pages().iter().enumerate() {
            let words = page_words(&page).map_err(|e| PaperError::Unreadable {
                document: path.to_path_buf(),
                detail: format!("page {}: {:?}", idx + 1, e),
            })?;
            let lines = group_words_into_lines(&words, idx, tolerance);
            if lines.is_empty() {
                debug!("{}: page {} has no text layer", path.display(), idx + 1);
            }
            pages.push(lines);
        }

        info!("{}: read {} pages", path.display(), pages.len());
        Ok(pages)
    }

    fn extract_pages(&self, path: &Path, pages: &[usize]) -> Result<Vec<u8>, PaperError> {
        let label = pages
            .first()
            .map(|p| format!("page {}", p + 1))
            .unwrap_or_default();
        let failed = |detail: String| PaperError::ExtractionFailed {
            question: label.clone(),
            detail,
        };

        let pdfium = self.bind_for(path)?;
        let source = pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| failed(format!("{:?}", e)))?;
        let total = source.pages().len() as usize;

        let mut target = pdfium
            .create_new_pdf()
            .map_err(|e| failed(format!("{:?}", e)))?;

        for (start, end) in contiguous_runs(pages) {
            if end >= total {
                return Err(failed(format!(
                    "page {} out of range (document has {total})",
                    end + 1
                )));
            }
            let destination = target.pages().len();
            target
                .pages_mut()
                .copy_page_range_from_document(&source, start as u16..=end as u16, destination)
                .map_err(|e| failed(format!("{:?}", e)))?;
        }

        target
            .save_to_bytes()
            .map_err(|e| failed(format!("{:?}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn runs_group_consecutive_pages() {
        assert_eq!(contiguous_runs(&[1, 2, 3, 7]), vec![(1, 3), (7, 7)]);
        assert_eq!(contiguous_runs(&[4]), vec![(4, 4)]);
        assert_eq!(contiguous_runs(&[2, 2, 3]), vec![(2, 3)]);
        assert!(contiguous_runs(&[]).is_empty());
    }

    #[test]
    fn magic_bytes_are_checked() {
        let mut pdf = tempfile::NamedTempFile::new().unwrap();
        pdf.write_all(b"%PDF-1.7\n").unwrap();
        assert!(check_pdf_magic(pdf.path()).is_ok());

        let mut text = tempfile::NamedTempFile::new().unwrap();
        text.write_all(b"hello world").unwrap();
        assert!(matches!(
            check_pdf_magic(text.path()),
            Err(PaperError::Unreadable { .. })
        ));

        assert!(check_pdf_magic(Path::new("/no/such/file.pdf")).is_err());
    }
}
