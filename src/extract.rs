//! Text extraction for uploaded policy documents (PDF, DOCX).
//!
//! Connectorless: callers supply bytes plus a content type, and this module
//! returns plain UTF-8 text with per-page granularity where the format
//! provides it. Unreadable or unsupported sources fail loudly with
//! [`Error::Extraction`].

use std::io::Read;

use crate::error::{Error, Result};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_TEXT: &str = "text/plain";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extraction result: the full concatenated text plus per-page texts.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub full_text: String,
    pub pages: Vec<String>,
    pub page_count: usize,
}

/// Extract plain text from document bytes.
pub fn extract(bytes: &[u8], content_type: &str) -> Result<ExtractedDocument> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_TEXT => extract_plain(bytes),
        other => Err(Error::Extraction(format!(
            "unsupported content-type: {}",
            other
        ))),
    }
}

fn extract_plain(bytes: &[u8]) -> Result<ExtractedDocument> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::Extraction(format!("not valid UTF-8: {}", e)))?
        .to_string();
    Ok(ExtractedDocument {
        page_count: 1,
        pages: vec![text.clone()],
        full_text: text,
    })
}

fn extract_pdf(bytes: &[u8]) -> Result<ExtractedDocument> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| Error::Extraction(format!("PDF extraction failed: {}", e)))?;
    let full_text = pages.join("\n\n");
    tracing::info!(
        pages = pages.len(),
        chars = full_text.len(),
        "extracted PDF text"
    );
    Ok(ExtractedDocument {
        page_count: pages.len(),
        full_text,
        pages,
    })
}

/// DOCX has no page concept at the XML level; the whole body is one "page".
fn extract_docx(bytes: &[u8]) -> Result<ExtractedDocument> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| Error::Extraction(format!("OOXML archive unreadable: {}", e)))?;

    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| Error::Extraction("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| Error::Extraction(format!("OOXML read failed: {}", e)))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(Error::Extraction(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    let text = extract_w_t_elements(&doc_xml)?;
    Ok(ExtractedDocument {
        page_count: 1,
        pages: vec![text.clone()],
        full_text: text,
    })
}

fn extract_w_t_elements(xml: &[u8]) -> Result<String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                } else if name.as_ref() == b"p" && !out.is_empty() {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(Error::Extraction(format!("OOXML parse failed: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_content_type_returns_error() {
        let err = extract(b"foo", "application/octet-stream").unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[test]
    fn plain_text_passes_through() {
        let doc = extract(b"Policy body text.", MIME_TEXT).unwrap();
        assert_eq!(doc.full_text, "Policy body text.");
        assert_eq!(doc.page_count, 1);
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract(b"not a zip", MIME_DOCX).unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }
}
