use pdfium_render::prelude::*;
use tracing::warn;

use crate::error::{AppError, AppResult};

use super::text::chunk_text;
use super::{Extraction, IndexUnit};

/// Extract page text from a PDF. When the pdfium library cannot be bound
/// this degrades to a zero-page, empty result instead of failing the
/// pipeline; the warning below is the tracked defect signal for that path.
pub fn extract(bytes: &[u8]) -> AppResult<Extraction> {
    let pdfium = match bind_pdfium() {
        Some(pdfium) => pdfium,
        None => {
            return Ok(Extraction {
                units: Vec::new(),
                page_count: 0,
            })
        }
    };

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|err| AppError::validation(format!("failed to parse PDF: {err}")))?;

    let pages = document.pages();
    let page_count = u32::from(pages.len());

    let mut units = Vec::new();
    let mut ordinal = 0;
    for page_index in 0..pages.len() {
        let page = match pages.get(page_index) {
            Ok(page) => page,
            Err(err) => {
                warn!(page = page_index + 1, error = %err, "failed to load pdf page");
                continue;
            }
        };

        let text = page.text().map(|text| text.all()).unwrap_or_default();
        if text.trim().is_empty() {
            warn!(page = page_index + 1, "pdf page has no extractable text");
            continue;
        }

        let page_number = u32::from(page_index) + 1;
        for chunk in chunk_text(&text) {
            units.push(IndexUnit::text_chunk(chunk, ordinal, Some(page_number)));
            ordinal += 1;
        }
    }

    Ok(Extraction { units, page_count })
}

fn bind_pdfium() -> Option<Pdfium> {
    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Some(Pdfium::new(bindings)),
        Err(err) => {
            warn!(error = %err, "pdfium unavailable; degrading to empty pdf extraction");
            None
        }
    }
}
