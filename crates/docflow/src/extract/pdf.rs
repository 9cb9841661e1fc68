use crate::error::ExtractError;
use crate::extract::{read_file, Extractor, FileInfo, Segment};

/// PDFs with embedded text: one segment per page that has any text.
pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn extensions(&self) -> &'static [&'static str] {
        &["pdf"]
    }

    fn convert(&self, file: &FileInfo) -> Result<Vec<Segment>, ExtractError> {
        let _span = tracing::info_span!("extract.pdf").entered();

        let bytes = read_file(&file.path)?;
        let doc = lopdf::Document::load_mem(&bytes)
            .map_err(|e| ExtractError::Pdf(format!("Failed to load PDF: {}", e)))?;

        let mut segments = Vec::new();
        for (page_num, _) in doc.get_pages() {
            match doc.extract_text(&[page_num]) {
                Ok(text) if !text.trim().is_empty() => {
                    segments.push(Segment::new(text).with_meta("page_label", page_num));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(page = page_num, error = %e, "Skipping unreadable PDF page");
                }
            }
        }

        Ok(segments)
    }
}
