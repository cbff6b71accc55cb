use std::fs;
use std::io::{ Cursor, Read };
use std::path::Path;
use std::process::Command;

use log::warn;
use quick_xml::events::Event;
use quick_xml::Reader;
use uuid::Uuid;

use super::RagError;

/// Supported upload formats, keyed off the filename extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    Csv,
    Text,
    Image,
}

impl DocumentKind {
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let extension = Path::new(file_name)
            .extension()?
            .to_str()?
            .to_lowercase();

        match extension.as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "docx" => Some(DocumentKind::Docx),
            "csv" => Some(DocumentKind::Csv),
            "txt" | "md" | "markdown" => Some(DocumentKind::Text),
            "png" | "jpg" | "jpeg" | "tiff" | "bmp" => Some(DocumentKind::Image),
            _ => None,
        }
    }
}

/// Extract plain text from an uploaded file. Each format is one delegation:
/// pdf-extract for PDFs, the zip/quick-xml pair for DOCX, the csv crate for
/// CSV, and an external OCR executable for images.
pub fn extract_text(
    file_name: &str,
    data: &[u8],
    ocr_command: &str
) -> Result<String, RagError> {
    let kind = DocumentKind::from_file_name(file_name).ok_or_else(||
        RagError::UnsupportedFormat(file_name.to_string())
    )?;

    let text = match kind {
        DocumentKind::Pdf => extract_pdf(file_name, data)?,
        DocumentKind::Docx => extract_docx(file_name, data)?,
        DocumentKind::Csv => extract_csv(file_name, data)?,
        DocumentKind::Text => String::from_utf8_lossy(data).into_owned(),
        DocumentKind::Image => extract_image(file_name, data, ocr_command)?,
    };

    if text.trim().is_empty() {
        return Err(RagError::EmptyDocument(file_name.to_string()));
    }

    Ok(text)
}

fn extract_pdf(file_name: &str, data: &[u8]) -> Result<String, RagError> {
    pdf_extract::extract_text_from_mem(data).map_err(|e| RagError::Extraction {
        file_name: file_name.to_string(),
        reason: e.to_string(),
    })
}

fn extract_docx(file_name: &str, data: &[u8]) -> Result<String, RagError> {
    let extraction_error = |reason: String| RagError::Extraction {
        file_name: file_name.to_string(),
        reason,
    };

    let mut archive = zip::ZipArchive
        ::new(Cursor::new(data))
        .map_err(|e| extraction_error(format!("not a valid docx archive: {}", e)))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| extraction_error(format!("missing word/document.xml: {}", e)))?
        .read_to_string(&mut xml)
        .map_err(|e| extraction_error(format!("unreadable document.xml: {}", e)))?;

    parse_docx_xml(&xml).map_err(extraction_error)
}

/// Pull the text nodes out of a DOCX body, turning paragraph ends and
/// explicit breaks into newlines.
fn parse_docx_xml(xml: &str) -> Result<String, String> {
    let mut reader = Reader::from_str(xml);
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Text(t)) => {
                let fragment = t.unescape().map_err(|e| e.to_string())?;
                text.push_str(&fragment);
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"w:p" => {
                text.push('\n');
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"w:br" => {
                text.push('\n');
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"w:tab" => {
                text.push(' ');
            }
            Ok(Event::Eof) => {
                break;
            }
            Ok(_) => {}
            Err(e) => {
                return Err(format!("malformed document.xml: {}", e));
            }
        }
    }

    Ok(text)
}

/// Render CSV rows as "header: value" lines so column meaning survives
/// chunking and retrieval.
fn extract_csv(file_name: &str, data: &[u8]) -> Result<String, RagError> {
    let extraction_error = |reason: String| RagError::Extraction {
        file_name: file_name.to_string(),
        reason,
    };

    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(data);
    let headers = reader
        .headers()
        .map_err(|e| extraction_error(e.to_string()))?
        .clone();

    let mut text = String::new();
    for record in reader.records() {
        let record = record.map_err(|e| extraction_error(e.to_string()))?;
        let mut fields = Vec::with_capacity(record.len());
        for (i, value) in record.iter().enumerate() {
            if value.trim().is_empty() {
                continue;
            }
            match headers.get(i) {
                Some(header) if !header.trim().is_empty() => {
                    fields.push(format!("{}: {}", header.trim(), value.trim()));
                }
                _ => fields.push(value.trim().to_string()),
            }
        }
        if !fields.is_empty() {
            text.push_str(&fields.join(", "));
            text.push('\n');
        }
    }

    Ok(text)
}

/// OCR delegates to an external executable (tesseract by default), invoked
/// as `<command> <file> stdout`. The upload is staged in a temp file because
/// the tool reads from disk.
fn extract_image(file_name: &str, data: &[u8], ocr_command: &str) -> Result<String, RagError> {
    let extraction_error = |reason: String| RagError::Extraction {
        file_name: file_name.to_string(),
        reason,
    };

    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("png");
    let temp_path = std::env
        ::temp_dir()
        .join(format!("pharmgpt-ocr-{}.{}", Uuid::new_v4(), extension));

    fs
        ::write(&temp_path, data)
        .map_err(|e| extraction_error(format!("failed to stage image: {}", e)))?;

    let output = Command::new(ocr_command).arg(&temp_path).arg("stdout").output();

    if let Err(e) = fs::remove_file(&temp_path) {
        warn!("Failed to remove OCR temp file {}: {}", temp_path.display(), e);
    }

    let output = output.map_err(|e|
        extraction_error(format!("failed to run OCR command '{}': {}", ocr_command, e))
    )?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(extraction_error(format!("OCR exited with {}: {}", output.status, stderr)));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    #[test]
    fn kind_detection_follows_the_extension() {
        assert_eq!(DocumentKind::from_file_name("drug_guide.PDF"), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_file_name("notes.docx"), Some(DocumentKind::Docx));
        assert_eq!(DocumentKind::from_file_name("interactions.csv"), Some(DocumentKind::Csv));
        assert_eq!(DocumentKind::from_file_name("readme.md"), Some(DocumentKind::Text));
        assert_eq!(DocumentKind::from_file_name("label.jpeg"), Some(DocumentKind::Image));
        assert_eq!(DocumentKind::from_file_name("archive.tar.gz"), None);
        assert_eq!(DocumentKind::from_file_name("no_extension"), None);
    }

    #[test]
    fn plain_text_is_decoded_lossily() {
        let text = extract_text("notes.txt", "amoxicillin 500mg".as_bytes(), "tesseract").unwrap();
        assert_eq!(text, "amoxicillin 500mg");
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = extract_text("slides.pptx", b"data", "tesseract").unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFormat(_)));
    }

    #[test]
    fn blank_extraction_output_is_an_error() {
        let err = extract_text("empty.txt", b"  \n ", "tesseract").unwrap_err();
        assert!(matches!(err, RagError::EmptyDocument(_)));
    }

    #[test]
    fn csv_rows_render_with_header_labels() {
        let data = b"drug,class\nwarfarin,anticoagulant\nmetformin,biguanide\n";
        let text = extract_csv("drugs.csv", data).unwrap();
        assert_eq!(
            text,
            "drug: warfarin, class: anticoagulant\ndrug: metformin, class: biguanide\n"
        );
    }

    #[test]
    fn csv_skips_empty_fields_and_handles_ragged_rows() {
        let data = b"drug,class\naspirin,\nibuprofen,nsaid,extra\n";
        let text = extract_csv("drugs.csv", data).unwrap();
        assert!(text.contains("drug: aspirin\n"));
        assert!(text.contains("drug: ibuprofen, class: nsaid, extra"));
    }

    #[test]
    fn docx_xml_text_nodes_become_paragraph_lines() {
        let xml =
            r#"<?xml version="1.0"?><w:document><w:body><w:p><w:r><w:t>First line.</w:t></w:r></w:p><w:p><w:r><w:t>Second</w:t><w:t> line.</w:t></w:r></w:p></w:body></w:document>"#;
        let text = parse_docx_xml(xml).unwrap();
        assert_eq!(text, "First line.\nSecond line.\n");
    }

    #[test]
    fn docx_archive_round_trip_extracts_text() {
        let xml = r#"<w:document><w:body><w:p><w:r><w:t>Dosage guidance.</w:t></w:r></w:p></w:body></w:document>"#;

        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            writer
                .start_file("word/document.xml", SimpleFileOptions::default())
                .unwrap();
            writer.write_all(xml.as_bytes()).unwrap();
            writer.finish().unwrap();
        }

        let text = extract_text("guide.docx", buffer.get_ref(), "tesseract").unwrap();
        assert_eq!(text.trim(), "Dosage guidance.");
    }

    #[test]
    fn docx_without_document_xml_is_an_extraction_error() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            writer.start_file("other.xml", SimpleFileOptions::default()).unwrap();
            writer.write_all(b"<x/>").unwrap();
            writer.finish().unwrap();
        }

        let err = extract_text("guide.docx", buffer.get_ref(), "tesseract").unwrap_err();
        assert!(matches!(err, RagError::Extraction { .. }));
    }

    #[test]
    fn missing_ocr_binary_is_reported_not_panicked() {
        let err = extract_image("scan.png", b"fake image", "definitely-not-a-real-binary").unwrap_err();
        assert!(matches!(err, RagError::Extraction { .. }));
    }
}
