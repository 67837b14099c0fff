//! Split engine abstraction and the lopdf-backed implementation.

/// Artifact naming helpers.
pub mod naming;

use crate::tasks::{ChapterSpec, ProgressReporter};
use async_trait::async_trait;
use lopdf::Document;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors produced while splitting a document.
#[derive(Debug, Error)]
pub enum SplitError {
    /// Source document could not be located.
    #[error("Source document missing: {0}")]
    SourceMissing(String),
    /// Chapter page range lies outside the document.
    #[error("Invalid page range: {0}")]
    InvalidRange(String),
    /// The PDF could not be parsed or written.
    #[error("PDF error: {0}")]
    Pdf(String),
    /// Filesystem failure while writing artifacts.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The task was cancelled while the split was running.
    #[error("Split cancelled")]
    Cancelled,
    /// The split engine stopped unexpectedly.
    #[error("Split aborted: {0}")]
    Aborted(String),
}

impl From<lopdf::Error> for SplitError {
    fn from(err: lopdf::Error) -> Self {
        Self::Pdf(err.to_string())
    }
}

/// Inputs for one split execution.
#[derive(Debug, Clone)]
pub struct SplitRequest {
    /// Path of the source PDF.
    pub source: PathBuf,
    /// Chapters to extract, in output order.
    pub chapters: Vec<ChapterSpec>,
    /// Directory receiving the artifacts.
    pub output_dir: PathBuf,
}

/// Copies page ranges of a document into per-chapter artifacts.
#[async_trait]
pub trait SplitEngine: Send + Sync {
    /// Produce one artifact per chapter and return their filenames in chapter order.
    async fn split(
        &self,
        request: SplitRequest,
        progress: ProgressReporter,
    ) -> Result<Vec<String>, SplitError>;
}

/// Split engine that rewrites PDFs with lopdf on the blocking thread pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfSplitEngine;

impl PdfSplitEngine {
    /// Create the engine.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SplitEngine for PdfSplitEngine {
    async fn split(
        &self,
        request: SplitRequest,
        progress: ProgressReporter,
    ) -> Result<Vec<String>, SplitError> {
        tokio::task::spawn_blocking(move || split_blocking(&request, &progress))
            .await
            .map_err(|err| SplitError::Aborted(err.to_string()))?
    }
}

fn split_blocking(
    request: &SplitRequest,
    progress: &ProgressReporter,
) -> Result<Vec<String>, SplitError> {
    if !request.source.is_file() {
        return Err(SplitError::SourceMissing(
            request.source.display().to_string(),
        ));
    }

    let source = Document::load(&request.source)?;
    let page_numbers: Vec<u32> = source.get_pages().keys().copied().collect();
    let total_pages = page_numbers.len() as u32;
    std::fs::create_dir_all(&request.output_dir)?;

    info!(
        source = %request.source.display(),
        pages = total_pages,
        chapters = request.chapters.len(),
        "Splitting document"
    );

    let total = request.chapters.len();
    let mut artifacts = Vec::with_capacity(total);
    for (index, chapter) in request.chapters.iter().enumerate() {
        if progress.is_cancelled() {
            return Err(SplitError::Cancelled);
        }

        if chapter.start_page > total_pages {
            return Err(SplitError::InvalidRange(format!(
                "chapter '{}' starts on page {} but the document has {} pages",
                chapter.title, chapter.start_page, total_pages
            )));
        }
        let end_page = chapter.end_page.min(total_pages);

        let filename = naming::artifact_filename(index, &chapter.title);
        extract_range(
            &source,
            &page_numbers,
            chapter.start_page,
            end_page,
            &request.output_dir.join(&filename),
        )?;
        debug!(artifact = %filename, start = chapter.start_page, end = end_page, "Wrote chapter");
        artifacts.push(filename);

        progress.report(naming::percent_complete(index + 1, total));
    }

    Ok(artifacts)
}

fn extract_range(
    source: &Document,
    page_numbers: &[u32],
    start: u32,
    end: u32,
    destination: &Path,
) -> Result<(), SplitError> {
    let mut chapter = source.clone();
    let outside: Vec<u32> = page_numbers
        .iter()
        .copied()
        .filter(|page| *page < start || *page > end)
        .collect();
    chapter.delete_pages(&outside);
    chapter.prune_objects();
    chapter.compress();

    let mut partial = destination.as_os_str().to_owned();
    partial.push(".tmp");
    let partial = PathBuf::from(partial);
    chapter.save(&partial)?;
    std::fs::rename(&partial, destination)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use lopdf::{Document, Object, Stream, dictionary};
    use std::path::Path;

    /// Write a PDF with `pages` blank pages.
    pub(crate) fn write_blank_pdf(path: &Path, pages: u32) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();
        for _ in 0..pages {
            let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).expect("write test pdf");
    }
}
