//! Document loading: format detection and text extraction.
//!
//! Plain text and Markdown are decoded as UTF-8 (lossily), PDFs go through
//! `pdf-extract`, and `.docx` files are unzipped and their `w:t` runs read
//! with `quick-xml`. Everything here is synchronous; callers on the async
//! runtime should use [`load_document_blocking`].

use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::LoadError;
use crate::models::Document;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Maps a file extension to the content type we know how to extract.
pub fn content_type_for(path: &Path) -> Result<&'static str, LoadError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "text" => Ok(MIME_TEXT),
        "md" | "markdown" => Ok(MIME_MARKDOWN),
        "pdf" => Ok(MIME_PDF),
        "docx" => Ok(MIME_DOCX),
        "" => Err(LoadError::UnsupportedFormat(format!(
            "{} has no file extension",
            path.display()
        ))),
        other => Err(LoadError::UnsupportedFormat(format!(".{}", other))),
    }
}

/// Reads and extracts a document from disk.
///
/// Fails with [`LoadError::TooLarge`] before reading when the file exceeds
/// `max_bytes`, and with [`LoadError::Empty`] when no text could be
/// extracted.
pub fn load_document(path: &Path, identifier: &str, max_bytes: u64) -> Result<Document, LoadError> {
    let content_type = content_type_for(path)?;
    let io_err = |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };

    let size = std::fs::metadata(path).map_err(io_err)?.len();
    if size > max_bytes {
        return Err(LoadError::TooLarge {
            path: path.to_path_buf(),
            size,
            limit: max_bytes,
        });
    }

    let bytes = std::fs::read(path).map_err(io_err)?;
    let text = extract_text(&bytes, content_type)?;
    if text.trim().is_empty() {
        return Err(LoadError::Empty(path.to_path_buf()));
    }

    Ok(Document {
        id: identifier.to_string(),
        source_path: path.to_path_buf(),
        content_type: content_type.to_string(),
        byte_count: bytes.len() as u64,
        text,
    })
}

/// [`load_document`] on the blocking thread pool.
pub async fn load_document_blocking(
    path: PathBuf,
    identifier: String,
    max_bytes: u64,
) -> Result<Document, LoadError> {
    let display = path.clone();
    tokio::task::spawn_blocking(move || load_document(&path, &identifier, max_bytes))
        .await
        .map_err(|e| LoadError::Io {
            path: display,
            source: std::io::Error::other(e.to_string()),
        })?
}

/// Extracts plain text from in-memory content of a known content type.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, LoadError> {
    match content_type {
        MIME_TEXT | MIME_MARKDOWN => Ok(String::from_utf8_lossy(bytes).into_owned()),
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        other => Err(LoadError::UnsupportedFormat(other.to_string())),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, LoadError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| LoadError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, LoadError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| LoadError::Ooxml(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| LoadError::Ooxml("word/document.xml not found".to_string()))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| LoadError::Ooxml(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(LoadError::Ooxml(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    extract_word_paragraphs(&doc_xml)
}

/// Collects `w:t` text runs, one paragraph per `w:p`, separated by blank
/// lines so the chunker sees the document's paragraph structure.
fn extract_word_paragraphs(xml: &[u8]) -> Result<String, LoadError> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let para = current.trim();
                    if !para.is_empty() {
                        paragraphs.push(para.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(LoadError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !current.trim().is_empty() {
        paragraphs.push(current.trim().to_string());
    }
    Ok(paragraphs.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
            .collect();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn content_type_by_extension() {
        assert_eq!(content_type_for(Path::new("a/notes.TXT")).unwrap(), MIME_TEXT);
        assert_eq!(content_type_for(Path::new("book.pdf")).unwrap(), MIME_PDF);
        assert_eq!(content_type_for(Path::new("essay.docx")).unwrap(), MIME_DOCX);
        assert!(matches!(
            content_type_for(Path::new("image.png")),
            Err(LoadError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            content_type_for(Path::new("README")),
            Err(LoadError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, LoadError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_text(b"not a zip", MIME_DOCX).unwrap_err();
        assert!(matches!(err, LoadError::Ooxml(_)));
    }

    #[test]
    fn docx_paragraphs_are_separated() {
        let bytes = docx_with_paragraphs(&["First paragraph.", "Second &amp; last."]);
        let text = extract_text(&bytes, MIME_DOCX).unwrap();
        assert_eq!(text, "First paragraph.\n\nSecond & last.");
    }

    #[test]
    fn load_rejects_blank_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.txt");
        std::fs::write(&path, "  \n\n ").unwrap();
        let err = load_document(&path, "id", 1024).unwrap_err();
        assert!(matches!(err, LoadError::Empty(_)));
    }

    #[test]
    fn load_rejects_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        std::fs::write(&path, "x".repeat(64)).unwrap();
        let err = load_document(&path, "id", 16).unwrap_err();
        assert!(matches!(err, LoadError::TooLarge { size: 64, .. }));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = load_document(Path::new("/no/such/file.txt"), "id", 1024).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn load_text_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "Chapter one.\n\nChapter two.").unwrap();
        let doc = load_document(&path, "abc", 1024).unwrap();
        assert_eq!(doc.id, "abc");
        assert_eq!(doc.byte_count, 26);
        assert_eq!(doc.content_type, MIME_TEXT);
        assert!(doc.text.contains("Chapter two."));
    }
}
