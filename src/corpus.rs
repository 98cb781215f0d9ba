//! Corpus discovery: pair question papers with their mark schemes.
//!
//! Files are recognised by name, `{year}_{season}_{paper}_{qp|ms}.pdf`,
//! with `_`, `-` or a space between fields and any letter case, anywhere
//! below the subject directory. The resulting list is sorted by year, then
//! season (calendar order), then paper, and a pair's position in it is the
//! index used by `--start-from` and the checkpoint.

use crate::error::PipelineError;
use crate::model::DocumentKind;
use crate::store::PaperKey;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

static RE_PAPER_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d{4})[_\- ]([a-z]+)[_\- ]([a-z0-9]+)[_\- ](qp|ms)\.pdf$").unwrap()
});

/// A question paper and, when present, its mark scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperPair {
    pub key: PaperKey,
    pub qp: PathBuf,
    pub ms: Option<PathBuf>,
}

/// Parse a corpus file name into its paper key and document kind.
pub fn parse_file_name(subject: &str, name: &str) -> Option<(PaperKey, DocumentKind)> {
    let caps = RE_PAPER_FILE.captures(name.trim())?;
    let year = caps[1].parse().ok()?;
    let kind = if caps[4].eq_ignore_ascii_case("qp") {
        DocumentKind::QuestionPaper
    } else {
        DocumentKind::MarkScheme
    };
    Some((
        PaperKey {
            subject: subject.to_string(),
            year,
            season: caps[2].to_ascii_lowercase(),
            paper: caps[3].to_ascii_lowercase(),
        },
        kind,
    ))
}

/// Calendar position of a season label; unknown labels sort last.
fn season_rank(season: &str) -> u8 {
    match season {
        "jan" | "january" | "winter" => 1,
        "feb" | "february" | "mar" | "march" | "fm" => 2,
        "may" | "jun" | "june" | "mj" | "summer" => 6,
        "oct" | "nov" | "october" | "november" | "on" | "autumn" => 11,
        _ => u8::MAX,
    }
}

/// Leading digits of a paper label, so "2" sorts before "10".
fn paper_rank(paper: &str) -> u32 {
    let digits: String = paper.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(u32::MAX)
}

fn sort_key(key: &PaperKey) -> (u16, u8, String, u32, String) {
    (
        key.year,
        season_rank(&key.season),
        key.season.clone(),
        paper_rank(&key.paper),
        key.paper.clone(),
    )
}

/// Every `.pdf` below `dir`, in path order.
async fn list_pdfs(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
            {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Discover and pair the papers of one subject.
pub async fn discover_pairs(dir: &Path, subject: &str) -> Result<Vec<PaperPair>, PipelineError> {
    if !dir.is_dir() {
        return Err(PipelineError::CorpusNotFound {
            path: dir.to_path_buf(),
        });
    }
    let files = list_pdfs(dir)
        .await
        .map_err(|e| PipelineError::Internal(format!("Cannot read {}: {e}", dir.display())))?;

    let mut qps: BTreeMap<PaperKey, PathBuf> = BTreeMap::new();
    let mut mss: BTreeMap<PaperKey, PathBuf> = BTreeMap::new();
    for path in files {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let Some((key, kind)) = parse_file_name(subject, name) else {
            debug!("Ignoring unrecognised file {}", path.display());
            continue;
        };
        let slot = match kind {
            DocumentKind::QuestionPaper => &mut qps,
            DocumentKind::MarkScheme => &mut mss,
        };
        if let Some(existing) = slot.get(&key) {
            warn!(
                "Duplicate {kind} for {key}: keeping {}, ignoring {}",
                existing.display(),
                path.display()
            );
            continue;
        }
        slot.insert(key, path);
    }

    for (key, path) in &mss {
        if !qps.contains_key(key) {
            warn!("Mark scheme without question paper ignored: {} ({key})", path.display());
        }
    }

    let mut pairs: Vec<PaperPair> = qps
        .into_iter()
        .map(|(key, qp)| {
            let ms = mss.remove(&key);
            if ms.is_none() {
                warn!("No mark scheme for {key}; questions will be unlinked");
            }
            PaperPair { key, qp, ms }
        })
        .collect();
    if pairs.is_empty() {
        return Err(PipelineError::EmptyCorpus {
            path: dir.to_path_buf(),
        });
    }
    pairs.sort_by_key(|p| sort_key(&p.key));
    info!("Discovered {} papers for '{subject}' in {}", pairs.len(), dir.display());
    Ok(pairs)
}
