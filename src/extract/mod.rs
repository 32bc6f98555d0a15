use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::error::{AppError, AppResult};

pub mod json;
pub mod pdf;
pub mod text;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Pdf,
    Doc,
    Docx,
    Json,
    Txt,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Doc => "doc",
            FileType::Docx => "docx",
            FileType::Json => "json",
            FileType::Txt => "txt",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pdf" => Some(FileType::Pdf),
            "doc" => Some(FileType::Doc),
            "docx" => Some(FileType::Docx),
            "json" => Some(FileType::Json),
            "txt" => Some(FileType::Txt),
            _ => None,
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "application/pdf" => Some(FileType::Pdf),
            "application/msword" => Some(FileType::Doc),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(FileType::Docx)
            }
            "application/json" => Some(FileType::Json),
            "text/plain" => Some(FileType::Txt),
            _ => None,
        }
    }
}

/// Resolve the file type from the declared content type, falling back to
/// the filename extension. Checked by upload callers before any job is
/// created; everything else is rejected.
pub fn detect_file_type(content_type: Option<&str>, filename: &str) -> Option<FileType> {
    if let Some(mime) = content_type {
        if let Some(file_type) = FileType::from_mime(mime) {
            return Some(file_type);
        }
    }

    mime_guess::from_path(filename)
        .first_raw()
        .and_then(FileType::from_mime)
}

pub fn is_allowed_file_type(content_type: Option<&str>, filename: &str) -> bool {
    detect_file_type(content_type, filename).is_some()
}

/// Which vector-index collection a unit lands in. A closed two-variant
/// selector, never an ad hoc class-name string at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    TextChunk,
    JsonField,
}

/// One indexable unit produced by extraction: a text chunk with its
/// provenance, or a flattened JSON field rendered as `path: value`.
#[derive(Debug, Clone)]
pub struct IndexUnit {
    pub kind: UnitKind,
    pub text: String,
    pub chunk_index: Option<u32>,
    pub page_number: Option<u32>,
    pub path: Option<String>,
    pub value: Option<String>,
    pub value_type: Option<&'static str>,
}

impl IndexUnit {
    pub fn text_chunk(text: String, chunk_index: u32, page_number: Option<u32>) -> Self {
        Self {
            kind: UnitKind::TextChunk,
            text,
            chunk_index: Some(chunk_index),
            page_number,
            path: None,
            value: None,
            value_type: None,
        }
    }

    pub fn json_field(path: String, value: String, value_type: &'static str) -> Self {
        Self {
            kind: UnitKind::JsonField,
            text: format!("{path}: {value}"),
            chunk_index: None,
            page_number: None,
            path: Some(path),
            value: Some(value),
            value_type: Some(value_type),
        }
    }
}

#[derive(Debug)]
pub struct Extraction {
    pub units: Vec<IndexUnit>,
    pub page_count: u32,
}

/// Turn a downloaded document into indexable units, dispatching on file
/// type. The source is a file on disk; the ingest worker hands over a
/// scoped temporary file rather than keeping the blob resident for the
/// whole pipeline.
pub fn extract_units(file_type: FileType, path: &Path) -> AppResult<Extraction> {
    let bytes = fs::read(path)?;
    match file_type {
        FileType::Pdf => pdf::extract(&bytes),
        FileType::Docx => text::extract_docx(&bytes),
        FileType::Txt => Ok(text::extract_txt(&bytes)),
        FileType::Doc => Ok(text::extract_doc(&bytes)),
        FileType::Json => {
            let value: Value = serde_json::from_slice(&bytes)
                .map_err(|err| AppError::validation(format!("invalid JSON document: {err}")))?;
            Ok(json::extract(&value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_type_from_content_type_first() {
        assert_eq!(
            detect_file_type(Some("application/pdf"), "notes.txt"),
            Some(FileType::Pdf)
        );
    }

    #[test]
    fn falls_back_to_extension() {
        assert_eq!(detect_file_type(None, "report.pdf"), Some(FileType::Pdf));
        assert_eq!(detect_file_type(None, "data.json"), Some(FileType::Json));
        assert_eq!(detect_file_type(None, "notes.txt"), Some(FileType::Txt));
    }

    #[test]
    fn rejects_unsupported_types() {
        assert!(!is_allowed_file_type(Some("image/png"), "photo.png"));
        assert!(!is_allowed_file_type(None, "archive.tar.gz"));
    }

    #[test]
    fn json_field_units_render_path_and_value() {
        let unit = IndexUnit::json_field("invoice.total".into(), "41.5".into(), "number");
        assert_eq!(unit.text, "invoice.total: 41.5");
        assert_eq!(unit.kind, UnitKind::JsonField);
    }

    #[test]
    fn extracts_units_from_a_file_on_disk() {
        use std::io::Write;

        let mut spool = tempfile::NamedTempFile::new().expect("temp file");
        spool.write_all(b"line one\nline two").expect("write");
        spool.flush().expect("flush");

        let extraction = extract_units(FileType::Txt, spool.path()).expect("extraction");
        assert_eq!(extraction.page_count, 1);
        assert_eq!(extraction.units.len(), 1);
        assert_eq!(extraction.units[0].text, "line one\nline two");
    }
}
