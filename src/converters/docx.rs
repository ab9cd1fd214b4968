//! Minimal DOCX (WordprocessingML) reading and writing.
//!
//! A DOCX file is a zip package; the body text lives in `word/document.xml`.
//! Writing produces the three parts Word needs to open a document
//! (`[Content_Types].xml`, `_rels/.rels`, `word/document.xml`), one paragraph
//! per input string. Reading walks `word/document.xml` in document order:
//! paragraphs end with a newline, table cells end with a tab, table rows end
//! with a newline.

use crate::error::OperationError;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const DOCUMENT_PART: &str = "word/document.xml";

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const DOCUMENT_HEAD: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>"#;

const DOCUMENT_TAIL: &str = "<w:sectPr/></w:body></w:document>";

fn zip_err(context: &str, e: impl std::fmt::Display) -> OperationError {
    OperationError::failed(format!("{context}: {e}"))
}

/// Write `paragraphs` as a DOCX file at `path`.
///
/// Line breaks inside a paragraph become `<w:br/>`.
pub fn write_paragraphs<S: AsRef<str>>(path: &Path, paragraphs: &[S]) -> Result<(), OperationError> {
    let mut body = String::from(DOCUMENT_HEAD);
    for para in paragraphs {
        body.push_str("<w:p><w:r>");
        for (i, line) in para.as_ref().split('\n').enumerate() {
            if i > 0 {
                body.push_str("<w:br/>");
            }
            body.push_str(r#"<w:t xml:space="preserve">"#);
            body.push_str(&quick_xml::escape::escape(line));
            body.push_str("</w:t>");
        }
        body.push_str("</w:r></w:p>");
    }
    body.push_str(DOCUMENT_TAIL);

    let file = File::create(path)
        .map_err(|e| OperationError::io(format!("create {}", path.display()), e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, content) in [
        ("[Content_Types].xml", CONTENT_TYPES),
        ("_rels/.rels", PACKAGE_RELS),
        (DOCUMENT_PART, body.as_str()),
    ] {
        zip.start_file(name, options)
            .map_err(|e| zip_err("DOCX write", e))?;
        zip.write_all(content.as_bytes())
            .map_err(|e| OperationError::io("DOCX write", e))?;
    }
    let mut writer = zip.finish().map_err(|e| zip_err("DOCX write", e))?;
    writer
        .flush()
        .map_err(|e| OperationError::io("DOCX flush", e))?;
    Ok(())
}

/// Extract the text of the DOCX at `path`.
pub fn read_text(path: &Path) -> Result<String, OperationError> {
    let file =
        File::open(path).map_err(|e| OperationError::io(format!("open {}", path.display()), e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| zip_err("Not a DOCX package", e))?;
    let mut xml = String::new();
    archive
        .by_name(DOCUMENT_PART)
        .map_err(|e| zip_err("DOCX has no word/document.xml", e))?
        .read_to_string(&mut xml)
        .map_err(|e| OperationError::io("read word/document.xml", e))?;
    document_text(&xml)
}

/// Text of a `word/document.xml` body.
pub fn document_text(xml: &str) -> Result<String, OperationError> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut in_text = false;
    let mut table_depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"tbl" => table_depth += 1,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(e)) if in_text => {
                let text = e.unescape().map_err(|e| zip_err("DOCX XML", e))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" if table_depth == 0 => out.push('\n'),
                b"p" => {
                    // Several paragraphs in one cell read as one line.
                    if !out.ends_with(['\t', '\n', ' ']) {
                        out.push(' ');
                    }
                }
                b"tc" => {
                    if out.ends_with(' ') {
                        out.pop();
                    }
                    out.push('\t');
                }
                b"tr" => out.push('\n'),
                b"tbl" => table_depth = table_depth.saturating_sub(1),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(zip_err("DOCX XML", e)),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn written_document_reads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.docx");
        write_paragraphs(&path, &["First <para> & more", "Second\nwith break"]).unwrap();

        let text = read_text(&path).unwrap();
        assert_eq!(text, "First <para> & more\nSecond\nwith break\n");
    }

    #[test]
    fn package_has_required_parts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.docx");
        write_paragraphs::<&str>(&path, &[]).unwrap();

        let mut archive = ZipArchive::new(File::open(&path).unwrap()).unwrap();
        for part in ["[Content_Types].xml", "_rels/.rels", DOCUMENT_PART] {
            assert!(archive.by_name(part).is_ok(), "missing {part}");
        }
    }

    #[test]
    fn tables_are_tab_separated() {
        let xml = r#"<w:document xmlns:w="w"><w:body>
            <w:p><w:r><w:t>Intro</w:t></w:r></w:p>
            <w:tbl>
              <w:tr><w:tc><w:p><w:r><w:t>A1</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>B1</w:t></w:r></w:p></w:tc></w:tr>
              <w:tr><w:tc><w:p><w:r><w:t>A2</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>B2</w:t></w:r></w:p></w:tc></w:tr>
            </w:tbl>
            <w:p><w:r><w:t xml:space="preserve">Outro </w:t><w:tab/><w:t>x</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let text = document_text(xml).unwrap();
        assert_eq!(text, "Intro\nA1\tB1\t\nA2\tB2\t\nOutro \tx\n");
    }

    #[test]
    fn non_zip_input_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fake.docx");
        std::fs::write(&path, b"plain text").unwrap();
        let err = read_text(&path).unwrap_err();
        assert!(err.to_string().contains("Not a DOCX package"), "got: {err}");
    }
}
