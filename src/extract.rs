//! Multi-format fragment extraction for case artifacts.
//!
//! Each supported format maps to an extractor that turns a stored file into
//! an ordered sequence of text fragments: one per PDF page, DOCX block, PPTX
//! slide, or XLSX sheet, and fixed-size slices for plain text (≈8000 chars)
//! and CSV (200-row batches). Fragments feed the rolling buffer in
//! [`crate::pipeline`]; empty fragments are kept so positions stay aligned
//! with the source.

use std::io::{BufRead, Read};
use std::path::Path;

use thiserror::Error;

/// Characters accumulated per plain-text fragment.
const TXT_FRAGMENT_CHARS: usize = 8000;
/// Rows accumulated per CSV fragment.
const CSV_FRAGMENT_ROWS: usize = 200;
/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("text decoding failed: {0}")]
    Encoding(String),
}

/// Closed registry of ingestible formats, keyed by file extension.
///
/// `.eml` is deliberately absent: raw emails are routed to the email parser,
/// never through the generic extractor. Unmapped extensions are the
/// pipeline's `UnsupportedFormat` error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Pdf,
    Docx,
    Pptx,
    Xlsx,
    Txt,
    Csv,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<FileFormat> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(FileFormat::Pdf),
            "docx" => Some(FileFormat::Docx),
            "pptx" => Some(FileFormat::Pptx),
            "xlsx" => Some(FileFormat::Xlsx),
            "txt" => Some(FileFormat::Txt),
            "csv" => Some(FileFormat::Csv),
            _ => None,
        }
    }

    pub fn from_file_name(name: &str) -> Option<FileFormat> {
        let ext = Path::new(name).extension()?.to_str()?;
        FileFormat::from_extension(ext)
    }

    /// Row-oriented content must be cut at line boundaries by the rolling
    /// buffer so spreadsheet rows never split mid-line.
    pub fn is_line_aligned(&self) -> bool {
        matches!(self, FileFormat::Xlsx)
    }
}

/// MIME type recorded for an uploaded file, by extension.
pub fn content_type_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "eml" => "message/rfc822",
        _ => "application/octet-stream",
    }
}

/// Ordered, finite sequence of raw text fragments. Each `extract_fragments`
/// call restarts extraction from the beginning of the file.
pub type Fragments = Box<dyn Iterator<Item = Result<String, ExtractError>> + Send>;

pub fn extract_fragments(format: FileFormat, path: &Path) -> Result<Fragments, ExtractError> {
    match format {
        FileFormat::Pdf => extract_pdf(path),
        FileFormat::Docx => extract_docx(path),
        FileFormat::Pptx => extract_pptx(path),
        FileFormat::Xlsx => extract_xlsx(path),
        FileFormat::Txt => extract_txt(path),
        FileFormat::Csv => extract_csv(path),
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, ExtractError> {
    std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })
}

// ============ PDF ============

/// One fragment per page. An empty page yields `""` so page positions stay
/// aligned with the source document.
fn extract_pdf(path: &Path) -> Result<Fragments, ExtractError> {
    let bytes = read_file(path)?;
    let pages = pdf_extract::extract_text_from_mem_by_pages(&bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(Box::new(pages.into_iter().map(Ok)))
}

// ============ OOXML helpers ============

fn open_archive(path: &Path) -> Result<zip::ZipArchive<std::io::Cursor<Vec<u8>>>, ExtractError> {
    let bytes = read_file(path)?;
    zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<Vec<u8>>>,
    name: &str,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Numbered part names like `ppt/slides/slide7.xml`, sorted by number.
fn numbered_entries(
    archive: &zip::ZipArchive<std::io::Cursor<Vec<u8>>>,
    prefix: &str,
) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

// ============ DOCX ============

/// One fragment per top-level block of the document body: paragraph text for
/// `w:p` blocks, tab-joined rows for `w:tbl` blocks.
fn extract_docx(path: &Path) -> Result<Fragments, ExtractError> {
    let mut archive = open_archive(path)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    let blocks = parse_docx_blocks(&xml)?;
    Ok(Box::new(blocks.into_iter().map(Ok)))
}

fn parse_docx_blocks(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut blocks: Vec<String> = Vec::new();
    let mut table_depth = 0usize;
    let mut in_text_run = false;
    let mut paragraph: Option<String> = None;
    let mut rows: Vec<Vec<String>> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"tbl" => {
                    table_depth += 1;
                    if table_depth == 1 {
                        rows.clear();
                    }
                }
                b"tr" if table_depth == 1 => rows.push(Vec::new()),
                b"tc" if table_depth == 1 => {
                    if let Some(row) = rows.last_mut() {
                        row.push(String::new());
                    }
                }
                b"p" if table_depth == 0 => paragraph = Some(String::new()),
                b"t" => in_text_run = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(t)) if in_text_run => {
                let text = t
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                if table_depth > 0 {
                    if let Some(cell) = rows.last_mut().and_then(|r| r.last_mut()) {
                        cell.push_str(&text);
                    }
                } else if let Some(p) = paragraph.as_mut() {
                    p.push_str(&text);
                }
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" if table_depth == 0 => {
                    if let Some(p) = paragraph.take() {
                        blocks.push(p);
                    }
                }
                b"tbl" => {
                    table_depth = table_depth.saturating_sub(1);
                    if table_depth == 0 {
                        let mut block = String::new();
                        for row in rows.drain(..) {
                            block.push_str(&row.join("\t"));
                            block.push('\n');
                        }
                        blocks.push(block);
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(blocks)
}

// ============ PPTX ============

/// One fragment per slide: a `Slide N:` header plus every text-bearing
/// shape's text, trailing whitespace trimmed. `N` is the slide's 1-based
/// position in deck order, not the archive's internal slide id, so headers
/// match what a reader sees when paging through the deck.
fn extract_pptx(path: &Path) -> Result<Fragments, ExtractError> {
    let mut archive = open_archive(path)?;
    let slide_names = numbered_entries(&archive, "ppt/slides/slide");

    let mut slides = Vec::with_capacity(slide_names.len());
    for (idx, name) in slide_names.iter().enumerate() {
        let xml = read_zip_entry_bounded(&mut archive, name)?;
        let mut text = format!("Slide {}:\n", idx + 1);
        text.push_str(&parse_pptx_slide(&xml)?);
        slides.push(text.trim_end().to_string());
    }
    Ok(Box::new(slides.into_iter().map(Ok)))
}

fn parse_pptx_slide(xml: &[u8]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut out = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text_run = true;
                }
            }
            Ok(quick_xml::events::Event::Text(t)) if in_text_run => {
                let text = t
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                // one line per paragraph, one blank-free break per shape
                b"p" | b"sp" => out.push('\n'),
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

// ============ XLSX ============

/// One fragment per sheet: a `Sheet: {name}` header line, then each row's
/// non-empty cell values tab-joined, one row per line.
fn extract_xlsx(path: &Path) -> Result<Fragments, ExtractError> {
    let mut archive = open_archive(path)?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let sheet_names = read_sheet_names(&mut archive)?;
    let sheet_files = numbered_entries(&archive, "xl/worksheets/sheet");

    let mut sheets = Vec::with_capacity(sheet_files.len());
    for (idx, file) in sheet_files.iter().enumerate() {
        let xml = read_zip_entry_bounded(&mut archive, file)?;
        let display_name = sheet_names
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("Sheet{}", idx + 1));
        let mut text = format!("Sheet: {}\n", display_name);
        text.push_str(&parse_xlsx_sheet(&xml, &shared_strings)?);
        sheets.push(text);
    }
    Ok(Box::new(sheets.into_iter().map(Ok)))
}

fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<Vec<u8>>>,
) -> Result<Vec<String>, ExtractError> {
    if !archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml")?;

    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut in_si = false;
    let mut in_text = false;
    let mut current = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"t" if in_si => in_text = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(t)) if in_text => {
                let text = t
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(strings)
}

/// Sheet display names from xl/workbook.xml, in document order (which
/// matches the numbered worksheet files for workbooks we ingest).
fn read_sheet_names(
    archive: &mut zip::ZipArchive<std::io::Cursor<Vec<u8>>>,
) -> Result<Vec<String>, ExtractError> {
    if !archive.file_names().any(|n| n == "xl/workbook.xml") {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/workbook.xml")?;

    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut names = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) | Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"sheet" {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"name" {
                            let value = attr
                                .unescape_value()
                                .map_err(|err| ExtractError::Ooxml(err.to_string()))?;
                            names.push(value.into_owned());
                        }
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(names)
}

fn parse_xlsx_sheet(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut out = String::new();
    let mut row_cells: Vec<String> = Vec::new();
    let mut in_row = false;
    let mut cell_is_shared = false;
    let mut in_value = false;
    let mut in_inline_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    in_row = true;
                    row_cells.clear();
                }
                b"c" => {
                    cell_is_shared = e.attributes().flatten().any(|a| {
                        a.key.as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" => in_value = true,
                b"t" => in_inline_text = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(t)) if in_row && (in_value || in_inline_text) => {
                let raw = t
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                let value = if in_value && cell_is_shared {
                    raw.trim()
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared_strings.get(i))
                        .cloned()
                        .unwrap_or_default()
                } else {
                    raw.into_owned()
                };
                if !value.is_empty() {
                    row_cells.push(value);
                }
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_value = false,
                b"t" => in_inline_text = false,
                b"c" => cell_is_shared = false,
                b"row" => {
                    in_row = false;
                    out.push_str(&row_cells.join("\t"));
                    out.push('\n');
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

// ============ TXT ============

struct TxtFragments {
    reader: std::io::BufReader<std::fs::File>,
    path: String,
    buffer: String,
    done: bool,
}

impl Iterator for TxtFragments {
    type Item = Result<String, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    self.done = true;
                    if self.buffer.is_empty() {
                        return None;
                    }
                    return Some(Ok(std::mem::take(&mut self.buffer)));
                }
                Ok(_) => {
                    self.buffer.push_str(&line);
                    if self.buffer.len() >= TXT_FRAGMENT_CHARS {
                        return Some(Ok(std::mem::take(&mut self.buffer)));
                    }
                }
                Err(e) => {
                    self.done = true;
                    if e.kind() == std::io::ErrorKind::InvalidData {
                        return Some(Err(ExtractError::Encoding(format!(
                            "{} is not valid UTF-8",
                            self.path
                        ))));
                    }
                    return Some(Err(ExtractError::Io {
                        path: self.path.clone(),
                        source: e,
                    }));
                }
            }
        }
    }
}

/// Plain text has no natural page boundary; fragments are line-aligned
/// slices of at least 8000 characters.
fn extract_txt(path: &Path) -> Result<Fragments, ExtractError> {
    let file = std::fs::File::open(path).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(Box::new(TxtFragments {
        reader: std::io::BufReader::new(file),
        path: path.display().to_string(),
        buffer: String::new(),
        done: false,
    }))
}

// ============ CSV ============

/// Batches of 200 data rows, each row's non-empty fields tab-joined. The
/// first record is treated as a header and skipped.
fn extract_csv(path: &Path) -> Result<Fragments, ExtractError> {
    let bytes = read_file(path)?;
    let content = String::from_utf8(bytes)
        .map_err(|_| ExtractError::Encoding(format!("{} is not valid UTF-8", path.display())))?;

    let rows: Vec<String> = parse_csv_records(&content)
        .into_iter()
        .skip(1) // header
        .map(|fields| {
            fields
                .into_iter()
                .filter(|f| !f.is_empty())
                .collect::<Vec<_>>()
                .join("\t")
        })
        .collect();

    let batches: Vec<String> = rows
        .chunks(CSV_FRAGMENT_ROWS)
        .map(|batch| batch.join("\n"))
        .collect();

    Ok(Box::new(batches.into_iter().map(Ok)))
}

/// Minimal RFC 4180 record parser: quoted fields may contain commas,
/// newlines, and doubled quotes.
fn parse_csv_records(content: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.is_empty() => in_quotes = true,
            ',' if !in_quotes => record.push(std::mem::take(&mut field)),
            '\r' if !in_quotes => {}
            '\n' if !in_quotes => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, content) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(content.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    fn write_temp(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn registry_maps_known_extensions() {
        assert_eq!(FileFormat::from_extension("PDF"), Some(FileFormat::Pdf));
        assert_eq!(FileFormat::from_extension("docx"), Some(FileFormat::Docx));
        assert_eq!(FileFormat::from_extension("pptx"), Some(FileFormat::Pptx));
        assert_eq!(FileFormat::from_extension("xlsx"), Some(FileFormat::Xlsx));
        assert_eq!(FileFormat::from_extension("txt"), Some(FileFormat::Txt));
        assert_eq!(FileFormat::from_extension("csv"), Some(FileFormat::Csv));
        assert_eq!(FileFormat::from_extension("exe"), None);
        assert_eq!(FileFormat::from_extension("eml"), None);
    }

    #[test]
    fn format_from_file_name_uses_last_extension() {
        assert_eq!(
            FileFormat::from_file_name("deposition.2024.pdf"),
            Some(FileFormat::Pdf)
        );
        assert_eq!(FileFormat::from_file_name("no_extension"), None);
    }

    #[test]
    fn only_spreadsheets_are_line_aligned() {
        assert!(FileFormat::Xlsx.is_line_aligned());
        assert!(!FileFormat::Pdf.is_line_aligned());
        assert!(!FileFormat::Csv.is_line_aligned());
    }

    #[test]
    fn corrupt_zip_is_an_ooxml_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_temp(&tmp, "bad.docx", b"not a zip");
        let err = extract_fragments(FileFormat::Docx, &path).err().unwrap();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn corrupt_pdf_is_a_pdf_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_temp(&tmp, "bad.pdf", b"not a pdf");
        let err = extract_fragments(FileFormat::Pdf, &path).err().unwrap();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn docx_paragraphs_and_tables_become_blocks() {
        let xml = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
<w:p><w:r><w:t>First paragraph.</w:t></w:r></w:p>
<w:tbl>
  <w:tr><w:tc><w:p><w:r><w:t>a1</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>b1</w:t></w:r></w:p></w:tc></w:tr>
  <w:tr><w:tc><w:p><w:r><w:t>a2</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>b2</w:t></w:r></w:p></w:tc></w:tr>
</w:tbl>
<w:p><w:r><w:t>Last paragraph.</w:t></w:r></w:p>
</w:body></w:document>"#;
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_temp(&tmp, "doc.docx", &write_zip(&[("word/document.xml", xml)]));

        let blocks: Vec<String> = extract_fragments(FileFormat::Docx, &path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0], "First paragraph.");
        assert_eq!(blocks[1], "a1\tb1\na2\tb2\n");
        assert_eq!(blocks[2], "Last paragraph.");
    }

    #[test]
    fn pptx_yields_one_fragment_per_slide_with_header() {
        let slide = |text: &str| {
            format!(
                r#"<?xml version="1.0"?><p:sld xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#,
                text
            )
        };
        let slide1 = slide("intro");
        let slide2 = slide("conclusion");
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_temp(
            &tmp,
            "deck.pptx",
            &write_zip(&[
                ("ppt/slides/slide2.xml", slide2.as_str()),
                ("ppt/slides/slide1.xml", slide1.as_str()),
            ]),
        );

        let slides: Vec<String> = extract_fragments(FileFormat::Pptx, &path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(slides.len(), 2);
        assert_eq!(slides[0], "Slide 1:\nintro");
        assert_eq!(slides[1], "Slide 2:\nconclusion");
    }

    #[test]
    fn xlsx_yields_sheet_header_and_tab_joined_rows() {
        let workbook = r#"<?xml version="1.0"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheets><sheet name="Invoices" sheetId="1" r:id="rId1" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"/></sheets></workbook>"#;
        let shared = r#"<?xml version="1.0"?><sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="2" uniqueCount="2"><si><t>acme</t></si><si><t>total</t></si></sst>"#;
        let sheet = r#"<?xml version="1.0"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
<row r="2"><c r="A2"><v>42</v></c><c r="B2"><v>19.5</v></c></row>
</sheetData></worksheet>"#;
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_temp(
            &tmp,
            "book.xlsx",
            &write_zip(&[
                ("xl/workbook.xml", workbook),
                ("xl/sharedStrings.xml", shared),
                ("xl/worksheets/sheet1.xml", sheet),
            ]),
        );

        let sheets: Vec<String> = extract_fragments(FileFormat::Xlsx, &path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(sheets.len(), 1);
        assert_eq!(sheets[0], "Sheet: Invoices\nacme\ttotal\n42\t19.5\n");
    }

    #[test]
    fn txt_fragments_are_line_aligned_slices() {
        let line = "x".repeat(99) + "\n"; // 100 chars per line
        let content = line.repeat(175); // 17500 chars
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_temp(&tmp, "notes.txt", content.as_bytes());

        let fragments: Vec<String> = extract_fragments(FileFormat::Txt, &path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments.concat(), content);
        // every fragment except the last crossed the 8000-char threshold
        for fragment in &fragments[..fragments.len() - 1] {
            assert!(fragment.len() >= 8000);
        }
    }

    #[test]
    fn csv_batches_rows_and_skips_header() {
        let mut content = String::from("name,amount,notes\n");
        for i in 0..250 {
            content.push_str(&format!("party{},{},\n", i, i * 10));
        }
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_temp(&tmp, "ledger.csv", content.as_bytes());

        let fragments: Vec<String> = extract_fragments(FileFormat::Csv, &path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].lines().count(), 200);
        assert_eq!(fragments[1].lines().count(), 50);
        assert!(fragments[0].starts_with("party0\t0"));
        assert!(!fragments[0].contains("name\tamount"));
    }

    #[test]
    fn csv_quoted_fields_keep_commas_and_newlines() {
        let records = parse_csv_records("a,\"b, with comma\",c\n\"multi\nline\",2,3\n");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], vec!["a", "b, with comma", "c"]);
        assert_eq!(records[1], vec!["multi\nline", "2", "3"]);
    }

    #[test]
    fn csv_doubled_quotes_unescape() {
        let records = parse_csv_records("\"she said \"\"hi\"\"\",x\n");
        assert_eq!(records[0][0], "she said \"hi\"");
    }
}
