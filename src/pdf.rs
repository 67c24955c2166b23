use async_trait::async_trait;
use lopdf::Document;
use tracing::debug;

use crate::coordinator::ProfileExtractor;
use crate::error::ScrapeError;
use crate::parser::parse_linkedin_pdf_text;
use crate::profile::{CapturedDocument, StructuredProfile};

/// Linearized text of every page, in page order.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String, ScrapeError> {
    let document = Document::load_mem(bytes)
        .map_err(|e| ScrapeError::ExtractionFailure(format!("unreadable PDF: {}", e)))?;
    let pages: Vec<u32> = document.get_pages().keys().copied().collect();
    if pages.is_empty() {
        return Err(ScrapeError::ExtractionFailure("PDF has no pages".into()));
    }
    document
        .extract_text(&pages)
        .map_err(|e| ScrapeError::ExtractionFailure(format!("text extraction failed: {}", e)))
}

/// Extracts the profile in-process with the heuristic text parser.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalPdfExtractor;

#[async_trait]
impl ProfileExtractor for LocalPdfExtractor {
    async fn extract(&self, document: &CapturedDocument) -> Result<StructuredProfile, ScrapeError> {
        let bytes = document.data.clone();
        let text = tokio::task::spawn_blocking(move || extract_pdf_text(&bytes))
            .await
            .map_err(|e| ScrapeError::ExtractionFailure(format!("text extraction aborted: {}", e)))??;
        debug!("[PDF] extracted {} chars of text", text.len());

        let profile = parse_linkedin_pdf_text(&text);
        if profile.is_empty() {
            return Err(ScrapeError::ExtractionFailure(
                "no profile data found in PDF text".into(),
            ));
        }
        Ok(profile)
    }
}
