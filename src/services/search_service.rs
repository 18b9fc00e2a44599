use walkdir::WalkDir;

use crate::error::AppError;
use crate::models::ocr::OcrCache;
use crate::models::search::{FileResults, SearchResult};
use crate::scope_path::ScopedRoot;
use crate::services::document::DocumentLayout;

/// Substring search over every cached sidecar under the root. There is no
/// index; each call scans the sidecars as they are on disk right now.
#[derive(Debug, Clone)]
pub struct SearchService {
    root: ScopedRoot,
    layout: DocumentLayout,
}

fn normalize_query(query: &str) -> Result<String, AppError> {
    let normalized = query.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(AppError::InvalidArgument(
            "search query is empty".to_string(),
        ));
    }
    Ok(normalized)
}

/// One result per box whose text contains `query` (already lowercased).
///
/// `match_index` is the box's character offset in the page's box texts
/// joined by single spaces; `box_index` counts every box on the page.
pub fn match_boxes(cache: &OcrCache, file_path: &str, query: &str) -> Vec<SearchResult> {
    let mut results = Vec::new();
    for page in &cache.pages {
        let mut offset = 0usize;
        for (box_index, text_box) in page.boxes.iter().enumerate() {
            if text_box.text.to_lowercase().contains(query) {
                results.push(SearchResult {
                    file_path: file_path.to_string(),
                    page_number: page.page_number,
                    matched_text: text_box.text.clone(),
                    match_index: offset,
                    box_index,
                });
            }
            offset += text_box.text.chars().count() + 1;
        }
    }
    results
}

impl SearchService {
    pub fn new(root: ScopedRoot, layout: DocumentLayout) -> Self {
        Self { root, layout }
    }

    /// Matching documents with their number of matching boxes. Sidecars that
    /// cannot be read or parsed, or whose primary is gone, are skipped.
    pub fn search(&self, query: &str) -> Result<Vec<FileResults>, AppError> {
        let needle = normalize_query(query)?;
        let mut results = Vec::new();
        let mut scanned = 0usize;

        let entries = WalkDir::new(self.root.path())
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable entry during search");
                    None
                }
            })
            .filter(|e| e.file_type().is_file() && self.layout.is_sidecar(e.path()));

        for entry in entries {
            let Ok(scoped) = self.root.scoped(entry.path()) else {
                continue;
            };
            let doc = self.layout.locate(&scoped);
            if !doc.exists() {
                tracing::debug!(sidecar = %scoped.relative, "skipping sidecar without primary");
                continue;
            }

            let cache = match doc.read_sidecar() {
                Ok(cache) => cache,
                Err(err) => {
                    tracing::warn!(sidecar = %scoped.relative, error = %err, "skipping unreadable sidecar");
                    continue;
                }
            };
            scanned += 1;

            let matches = match_boxes(&cache, &doc.primary().relative, &needle);
            if !matches.is_empty() {
                results.push(FileResults {
                    query: needle.clone(),
                    file_path: doc.primary().relative.clone(),
                    occurrence_count: matches.len(),
                });
            }
        }

        tracing::debug!(query = %needle, scanned, hits = results.len(), "search finished");
        Ok(results)
    }

    /// Every matching box of one document, for highlighting.
    pub fn search_in_file(&self, query: &str, file_name: &str) -> Result<Vec<SearchResult>, AppError> {
        let needle = normalize_query(query)?;
        let doc = self.layout.locate(&self.root.resolve(file_name)?);
        if !doc.has_sidecar() {
            return Err(AppError::NotFound(doc.sidecar().relative.clone()));
        }

        let cache = doc.read_sidecar().map_err(|err| match err {
            AppError::Io(io) => AppError::from_io(io, &doc.sidecar().relative),
            other => other,
        })?;
        Ok(match_boxes(&cache, &doc.primary().relative, &needle))
    }
}
