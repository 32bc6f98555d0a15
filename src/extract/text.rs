use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;
use zip::ZipArchive;

use crate::error::{AppError, AppResult};

use super::{Extraction, IndexUnit};

pub(crate) const CHUNK_SIZE: usize = 1000;
pub(crate) const CHUNK_OVERLAP: usize = 200;

const TXT_LINES_PER_PAGE: u32 = 40;
const DOCX_LINES_PER_PAGE: u32 = 25;
const DOC_BYTES_PER_PAGE: u64 = 4096;

/// Split text into overlapping windows of `CHUNK_SIZE` characters. Texts
/// that fit in one window are kept whole; a short trailing window after
/// the first chunk is dropped, matching the ingester this replaces.
pub fn chunk_text(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    if chars.len() <= CHUNK_SIZE {
        return vec![text.to_string()];
    }

    let step = CHUNK_SIZE - CHUNK_OVERLAP;
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        if start > 0 && start + CHUNK_SIZE > chars.len() {
            break;
        }
        let end = (start + CHUNK_SIZE).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        start += step;
    }
    chunks
}

fn chunk_units(text: &str, page_number: Option<u32>, ordinal: &mut u32) -> Vec<IndexUnit> {
    chunk_text(text)
        .into_iter()
        .map(|chunk| {
            let unit = IndexUnit::text_chunk(chunk, *ordinal, page_number);
            *ordinal += 1;
            unit
        })
        .collect()
}

fn estimate_pages_by_lines(text: &str, lines_per_page: u32) -> u32 {
    let lines = text.lines().count() as u32;
    lines.div_ceil(lines_per_page)
}

pub fn extract_txt(bytes: &[u8]) -> Extraction {
    let text = String::from_utf8_lossy(bytes);
    let page_count = estimate_pages_by_lines(&text, TXT_LINES_PER_PAGE);

    let mut ordinal = 0;
    let units = if text.trim().is_empty() {
        Vec::new()
    } else {
        chunk_units(&text, None, &mut ordinal)
    };

    Extraction { units, page_count }
}

pub fn extract_docx(bytes: &[u8]) -> AppResult<Extraction> {
    let text = docx_text(bytes)?;
    let page_count = estimate_pages_by_lines(&text, DOCX_LINES_PER_PAGE);

    let mut ordinal = 0;
    let units = if text.trim().is_empty() {
        Vec::new()
    } else {
        chunk_units(&text, None, &mut ordinal)
    };

    Ok(Extraction { units, page_count })
}

/// Legacy binary DOC: no text extraction, page count estimated from the
/// byte size as a last-resort heuristic.
pub fn extract_doc(bytes: &[u8]) -> Extraction {
    let page_count = (bytes.len() as u64).div_ceil(DOC_BYTES_PER_PAGE) as u32;
    Extraction {
        units: Vec::new(),
        page_count,
    }
}

fn docx_text(bytes: &[u8]) -> AppResult<String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|err| AppError::validation(format!("not a DOCX archive: {err}")))?;
    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|err| AppError::validation(format!("DOCX missing word/document.xml: {err}")))?;

    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|err| AppError::validation(format!("unreadable DOCX body: {err}")))?;

    let mut reader = Reader::from_str(&xml);
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Text(fragment)) => {
                let value = fragment
                    .unescape()
                    .map_err(|err| AppError::validation(format!("malformed DOCX XML: {err}")))?;
                text.push_str(&value);
            }
            // Paragraph boundaries become line breaks so page estimation
            // sees the document's visual structure.
            Ok(Event::End(end)) if end.local_name().as_ref() == b"p" => text.push('\n'),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                return Err(AppError::validation(format!("malformed DOCX XML: {err}")));
            }
        }
    }

    Ok(text)
}
