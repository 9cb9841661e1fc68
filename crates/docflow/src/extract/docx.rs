use std::io::Read;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::ExtractError;
use crate::extract::{Extractor, FileInfo, Segment};

/// Word documents: the text of `word/document.xml`, one line per paragraph.
pub struct DocxExtractor;

impl Extractor for DocxExtractor {
    fn extensions(&self) -> &'static [&'static str] {
        &["docx"]
    }

    fn convert(&self, file: &FileInfo) -> Result<Vec<Segment>, ExtractError> {
        let handle = std::fs::File::open(&file.path).map_err(|e| ExtractError::ReadDocument {
            path: file.path.clone(),
            source: e,
        })?;

        let mut archive = zip::ZipArchive::new(handle)
            .map_err(|e| ExtractError::Docx(format!("Failed to open DOCX: {}", e)))?;

        let text = extract_docx_text(&mut archive)?;
        let paragraphs = text.lines().filter(|l| !l.trim().is_empty()).count();

        Ok(vec![Segment::new(text).with_meta("paragraphs", paragraphs)])
    }
}

fn extract_docx_text<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<String, ExtractError> {
    let mut document_xml = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::Docx(format!("Failed to find document.xml: {}", e)))?;

    let mut xml_content = String::new();
    document_xml
        .read_to_string(&mut xml_content)
        .map_err(|e| ExtractError::Docx(format!("Failed to read document.xml: {}", e)))?;

    parse_docx_xml(&xml_content)
}

fn parse_docx_xml(xml: &str) -> Result<String, ExtractError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut text = String::new();
    let mut in_text_element = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text_element = true;
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text_element = false,
                b"p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"tab" => text.push('\t'),
                b"br" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text_element {
                    let decoded = e.unescape().unwrap_or_default();
                    text.push_str(&decoded);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ExtractError::Docx(format!("XML parsing error: {}", e)));
            }
            _ => {}
        }
    }

    Ok(text)
}
