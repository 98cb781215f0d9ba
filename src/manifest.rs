//! Intermediate per-paper segmentation manifest.
//!
//! Written after linking, before any classification, so segmentation can be
//! inspected (or diffed between rule changes) without spending LLM calls.

use crate::model::{Document, LinkedQuestion, QuestionSpan};
use crate::output::write_atomic;
use crate::pipeline::boundary::{BoundaryAnomaly, MarkSchemeFormat};
use crate::pipeline::linker::SkippedQuestion;
use crate::store::PaperKey;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentManifest {
    pub document: Document,
    pub spans: Vec<QuestionSpan>,
    pub anomalies: Vec<BoundaryAnomaly>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperManifest {
    pub key: PaperKey,
    pub question_paper: DocumentManifest,
    pub mark_scheme: Option<DocumentManifest>,
    pub markscheme_format: Option<MarkSchemeFormat>,
    pub links: Vec<LinkedQuestion>,
    pub skipped: Vec<SkippedQuestion>,
    pub linkage_rate: f32,
}

impl PaperManifest {
    /// `{dir}/{subject}_{year}_{season}_{paper}.json`
    pub fn path_in(&self, dir: &Path) -> PathBuf {
        let k = &self.key;
        dir.join(format!("{}_{}_{}_{}.json", k.subject, k.year, k.season, k.paper))
    }

    /// Write the manifest atomically and return its path.
    pub async fn write(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = self.path_in(dir);
        let bytes = serde_json::to_vec_pretty(self)?;
        write_atomic(&path, &bytes).await?;
        Ok(path)
    }
}
