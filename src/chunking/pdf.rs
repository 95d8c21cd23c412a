//! PDF text extraction (spec section 4.7), grounded on
//! `app/core/pdf_processor.py`'s page-by-page extraction and
//! encrypted-PDF handling. No crate in the corpus reads PDF text
//! directly, so this adapts `pdf-extract`, which returns whole-document
//! text rather than PyMuPDF's page objects; page boundaries are
//! approximated by the form-feed characters `pdf-extract` emits between
//! pages.
use std::path::Path;

use super::text::text_to_chunks;

/// Extracts all text from a PDF, page-separated, or `None` if the file
/// cannot be read or contains no extractable text.
pub fn extract_text_from_pdf(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    let raw = pdf_extract::extract_text_from_mem(&bytes).ok()?;

    let pages: Vec<&str> = raw.split('\u{c}').map(str::trim).filter(|p| !p.is_empty()).collect();
    if pages.is_empty() {
        return None;
    }
    Some(pages.join("\n\n"))
}

/// `pdf_to_chunks` (spec section 4.7): extracts text then runs it through
/// the same recursive splitter as plain text documents.
pub fn pdf_to_chunks(path: &Path, filename: &str, max_size: usize, min_size: usize) -> Vec<String> {
    match extract_text_from_pdf(path) {
        Some(text) if !text.trim().is_empty() => text_to_chunks(&text, filename, max_size, min_size),
        _ => Vec::new(),
    }
}
