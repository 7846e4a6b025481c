//! `komi build`: fetch every page in a manifest and write a fresh container.

use crate::error::{ErrorKind, Result};
use crate::manifest::Manifest;
use exn::ResultExt;
use komi_container::{ChapterRecord, Images};
use komi_fetch::{CancellationToken, Fetcher};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub path: PathBuf,
    pub chapters: usize,
    /// Chapters whose page images were stored.
    pub stored: usize,
    /// Keys of chapters left without images because a page never arrived.
    pub skipped: Vec<String>,
    pub bytes: u64,
}

impl Display for BuildReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "Stored {} of {} chapter(s) in {} ({} bytes)",
            self.stored,
            self.chapters,
            self.path.display(),
            self.bytes
        )?;
        if !self.skipped.is_empty() {
            write!(f, "; skipped: {}", self.skipped.join(", "))?;
        }
        Ok(())
    }
}

/// Fetch all pages of all chapters as one batch, then write the container.
///
/// A chapter is stored only if every one of its pages arrived; otherwise it
/// keeps its entry in the chapter table but gets no images, so a later build
/// can fill it in. If `cancel` fires, nothing is written.
#[instrument(skip_all, fields(chapters = manifest.chapters.len(), pages = manifest.page_count(), output = %output.display()))]
pub async fn build(manifest: &Manifest, fetcher: &Fetcher, cancel: &CancellationToken, output: &Path) -> Result<BuildReport> {
    let mut spans: Vec<Range<usize>> = Vec::with_capacity(manifest.chapters.len());
    let mut locations = Vec::with_capacity(manifest.page_count());
    for chapter in &manifest.chapters {
        let start = locations.len();
        locations.extend(chapter.pages.iter().cloned());
        spans.push(start..locations.len());
    }

    let mut results = fetcher.fetch_all(locations, cancel).await.into_iter();
    if cancel.is_cancelled() {
        exn::bail!(ErrorKind::Cancelled);
    }

    let mut images = Images::new();
    let mut skipped = Vec::new();
    for (chapter, span) in manifest.chapters.iter().zip(spans) {
        let pages: Vec<_> = results.by_ref().take(span.len()).collect();
        let failed = pages.iter().filter(|page| page.is_err()).count();
        if failed > 0 {
            if let Some(Err(err)) = pages.iter().find(|page| page.is_err()) {
                tracing::debug!(key = %chapter.record.key, error = ?err, "First page failure");
            }
            tracing::warn!(key = %chapter.record.key, failed, pages = span.len(), "Skipping incomplete chapter");
            skipped.push(chapter.record.key.clone());
            continue;
        }
        let blobs = pages.into_iter().filter_map(std::result::Result::ok).collect();
        images.insert(chapter.record.key.clone(), blobs);
    }

    let records: Vec<ChapterRecord> = manifest.chapters.iter().map(|chapter| chapter.record.clone()).collect();
    let bytes = komi_container::write(output, &records, &images).or_raise(|| ErrorKind::Container)?;
    tracing::info!(stored = images.len(), skipped = skipped.len(), bytes, "Container written");
    Ok(BuildReport { path: output.to_path_buf(), chapters: records.len(), stored: images.len(), skipped, bytes })
}
