use crate::error::IngestError;
use lopdf::Document;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
}

impl DocumentFormat {
    pub fn from_filename(filename: &str) -> Result<Self, IngestError> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();

        if extension.eq_ignore_ascii_case("pdf") {
            Ok(DocumentFormat::Pdf)
        } else if extension.eq_ignore_ascii_case("docx") {
            Ok(DocumentFormat::Docx)
        } else {
            Err(IngestError::UnsupportedFormat(filename.to_string()))
        }
    }
}

/// Turns raw document bytes into prompt-safe plain text.
pub trait DocumentExtractor {
    fn extract(&self, bytes: &[u8], filename: &str) -> Result<String, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ResumeExtractor;

impl DocumentExtractor for ResumeExtractor {
    fn extract(&self, bytes: &[u8], filename: &str) -> Result<String, IngestError> {
        let text = match DocumentFormat::from_filename(filename)? {
            DocumentFormat::Pdf => extract_pdf_text(bytes)?,
            DocumentFormat::Docx => extract_docx_text(bytes)?,
        };

        let cleaned = strip_control_chars(&text);
        if cleaned.trim().is_empty() {
            return Err(IngestError::Extraction(format!(
                "document had no readable text: {filename}"
            )));
        }

        Ok(cleaned)
    }
}

/// Drops ASCII control bytes (0x00-0x1F, 0x7F). Line breaks go with them.
pub fn strip_control_chars(text: &str) -> String {
    text.chars().filter(|ch| !ch.is_ascii_control()).collect()
}

fn extract_pdf_text(bytes: &[u8]) -> Result<String, IngestError> {
    let document =
        Document::load_mem(bytes).map_err(|error| IngestError::Extraction(error.to_string()))?;

    let mut pages = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        let text = document
            .extract_text(&[page_no])
            .map_err(|error| IngestError::Extraction(error.to_string()))?;

        if !text.trim().is_empty() {
            pages.push(text);
        }
    }

    Ok(pages.join("\n"))
}

fn extract_docx_text(bytes: &[u8]) -> Result<String, IngestError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|error| IngestError::Extraction(format!("not a docx container: {error}")))?;

    read_document_xml(&mut archive).and_then(|xml| parse_document_xml(&xml))
}

fn read_document_xml<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<String, IngestError> {
    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|error| IngestError::Extraction(format!("missing word/document.xml: {error}")))?;

    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|error| IngestError::Extraction(format!("unreadable word/document.xml: {error}")))?;
    Ok(xml)
}

fn parse_document_xml(xml: &str) -> Result<String, IngestError> {
    let mut reader = Reader::from_str(xml);
    let mut text = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref element)) => {
                if element.local_name().as_ref() == b"t" {
                    in_text_run = true;
                }
            }
            Ok(Event::Empty(ref element)) => match element.local_name().as_ref() {
                b"tab" => text.push(' '),
                b"br" => text.push('\n'),
                _ => {}
            },
            Ok(Event::End(ref element)) => match element.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Text(ref content)) if in_text_run => {
                let decoded = content
                    .decode()
                    .map_err(|error| IngestError::Extraction(error.to_string()))?;
                text.push_str(&decoded);
            }
            Ok(Event::GeneralRef(ref reference)) if in_text_run => {
                if let Some(ch) = reference
                    .resolve_char_ref()
                    .map_err(|error| IngestError::Extraction(error.to_string()))?
                {
                    text.push(ch);
                } else {
                    let name = reference
                        .decode()
                        .map_err(|error| IngestError::Extraction(error.to_string()))?;
                    text.push_str(resolve_predefined_entity(&name));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(error) => {
                return Err(IngestError::Extraction(format!(
                    "docx xml parse error: {error}"
                )))
            }
        }
    }

    Ok(text)
}

fn resolve_predefined_entity(name: &str) -> &'static str {
    match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        _ => "",
    }
}
