//! XLSX (OOXML spreadsheet) reading into a cell grid.
//!
//! Only the first worksheet is read (lowest `xl/worksheets/sheetN.xml`).
//! Cells are placed by their `r` reference (`B7` → row 6, column 1) so
//! sparse sheets keep their layout; cells without a reference follow the
//! previous one. Formulas are ignored and their cached `<v>` value used.

use std::io::Read;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::warn;

/// Maximum cells to read from the sheet (avoids unbounded memory).
const MAX_CELLS: usize = 2_000_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Spreadsheet grid limits (Excel's own).
const MAX_ROWS: usize = 1_048_576;
const MAX_COLS: usize = 16_384;

/// XLSX reading error. Never panics; the caller reports the file.
#[derive(Debug)]
pub enum XlsxError {
    Zip(String),
    Xml(String),
    NoWorksheet,
    TooLarge(String),
}

impl std::fmt::Display for XlsxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            XlsxError::Zip(e) => write!(f, "invalid XLSX archive: {}", e),
            XlsxError::Xml(e) => write!(f, "invalid XLSX XML: {}", e),
            XlsxError::NoWorksheet => write!(f, "XLSX file contains no worksheet"),
            XlsxError::TooLarge(e) => write!(f, "XLSX file too large: {}", e),
        }
    }
}

impl std::error::Error for XlsxError {}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

/// Read the first worksheet of an XLSX file as rows of optional cells.
pub fn read_first_sheet(bytes: &[u8]) -> Result<Vec<Vec<Option<String>>>, XlsxError> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| XlsxError::Zip(e.to_string()))?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let sheet = first_worksheet_name(&archive).ok_or(XlsxError::NoWorksheet)?;
    let xml = read_zip_entry_bounded(&mut archive, &sheet, MAX_XML_ENTRY_BYTES)?;
    read_sheet_cells(&xml, &shared_strings)
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, XlsxError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| XlsxError::Zip(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| XlsxError::Zip(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(XlsxError::TooLarge(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// The shared string table; a workbook without one has none.
fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, XlsxError> {
    if archive.index_for_name("xl/sharedStrings.xml").is_none() {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    // Phonetic runs (<rPh>) repeat the text in another script.
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => in_phonetic = true,
                b"t" => in_t = !in_phonetic,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => {
                strings.push(String::new());
            }
            Ok(Event::Text(te)) if in_t => {
                let text = te.unescape().map_err(|e| XlsxError::Xml(e.to_string()))?;
                if let Some(s) = current.as_mut() {
                    s.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"rPh" => in_phonetic = false,
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(XlsxError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn first_worksheet_name(archive: &Archive<'_>) -> Option<String> {
    archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .min_by_key(|name| {
            name.trim_start_matches("xl/worksheets/sheet")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(u32::MAX)
        })
        .map(|s| s.to_string())
}

/// Parse an A1-style reference into zero-based `(row, col)`.
pub fn parse_cell_ref(r: &str) -> Option<(usize, usize)> {
    let split = r.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = r.split_at(split);
    if letters.is_empty() || !letters.bytes().all(|b| b.is_ascii_alphabetic()) {
        return None;
    }
    let mut col = 0usize;
    for b in letters.bytes() {
        col = col
            .checked_mul(26)?
            .checked_add((b.to_ascii_uppercase() - b'A') as usize + 1)?;
    }
    let row: usize = digits.parse().ok()?;
    if row == 0 {
        return None;
    }
    Some((row - 1, col - 1))
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(a.value.as_ref()).into_owned())
}

/// Render a numeric cell: integral values lose their `.0`.
fn format_number(raw: &str) -> String {
    match raw.trim().parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        _ => raw.trim().to_string(),
    }
}

#[derive(Default)]
struct CellState {
    kind: Option<String>,
    value: String,
    inline: String,
}

impl CellState {
    fn resolve(self, shared_strings: &[String]) -> Option<String> {
        let value = match self.kind.as_deref() {
            Some("s") => {
                let i: usize = self.value.trim().parse().ok()?;
                shared_strings.get(i)?.clone()
            }
            Some("inlineStr") => self.inline,
            Some("b") => match self.value.trim() {
                "1" => "TRUE".to_string(),
                "0" => "FALSE".to_string(),
                other => other.to_string(),
            },
            Some("str") | Some("e") | Some("d") => self.value,
            _ => format_number(&self.value),
        };
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    }
}

fn read_sheet_cells(
    xml: &[u8],
    shared_strings: &[String],
) -> Result<Vec<Vec<Option<String>>>, XlsxError> {
    let mut grid: Vec<Vec<Option<String>>> = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut row: usize = 0;
    let mut next_row: usize = 0;
    let mut col: usize = 0;
    let mut cell: Option<(usize, usize, CellState)> = None;
    let mut in_v = false;
    let mut in_inline_t = false;
    let mut cell_count = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row = attr(&e, b"r")
                        .and_then(|r| r.parse::<usize>().ok())
                        .filter(|r| *r > 0)
                        .map(|r| r - 1)
                        .unwrap_or(next_row);
                    next_row = row + 1;
                    col = 0;
                }
                b"c" => {
                    let (r, c) = attr(&e, b"r")
                        .and_then(|r| parse_cell_ref(&r))
                        .unwrap_or((row, col));
                    col = c + 1;
                    cell = Some((
                        r,
                        c,
                        CellState {
                            kind: attr(&e, b"t"),
                            ..Default::default()
                        },
                    ));
                }
                b"v" => in_v = cell.is_some(),
                b"t" => in_inline_t = cell.is_some(),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"row" => {
                    next_row = attr(&e, b"r")
                        .and_then(|r| r.parse::<usize>().ok())
                        .unwrap_or(next_row + 1);
                }
                b"c" => {
                    col = attr(&e, b"r")
                        .and_then(|r| parse_cell_ref(&r))
                        .map(|(_, c)| c + 1)
                        .unwrap_or(col + 1);
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_v || in_inline_t => {
                let text = te.unescape().map_err(|e| XlsxError::Xml(e.to_string()))?;
                if let Some((_, _, state)) = cell.as_mut() {
                    if in_v {
                        state.value.push_str(&text);
                    } else {
                        state.inline.push_str(&text);
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"t" => in_inline_t = false,
                b"c" => {
                    if let Some((r, c, state)) = cell.take() {
                        if r >= MAX_ROWS || c >= MAX_COLS {
                            return Err(XlsxError::TooLarge(format!(
                                "cell reference row {} column {} is outside the sheet",
                                r + 1,
                                c + 1
                            )));
                        }
                        if let Some(value) = state.resolve(shared_strings) {
                            if grid.len() <= r {
                                grid.resize_with(r + 1, Vec::new);
                            }
                            let cells = &mut grid[r];
                            if cells.len() <= c {
                                cells.resize(c + 1, None);
                            }
                            cells[c] = Some(value);
                            cell_count += 1;
                            if cell_count >= MAX_CELLS {
                                warn!(cells = cell_count, "XLSX cell limit reached; ignoring the rest of the sheet");
                                break;
                            }
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(XlsxError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(grid)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    /// Build a minimal XLSX archive in memory.
    pub(crate) fn build_xlsx(sheet_xml: &str, shared_strings: Option<&str>) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let opts = zip::write::SimpleFileOptions::default();
            zip.start_file("[Content_Types].xml", opts).unwrap();
            zip.write_all(b"<?xml version=\"1.0\"?><Types/>").unwrap();
            if let Some(ss) = shared_strings {
                zip.start_file("xl/sharedStrings.xml", opts).unwrap();
                zip.write_all(ss.as_bytes()).unwrap();
            }
            zip.start_file("xl/worksheets/sheet1.xml", opts).unwrap();
            zip.write_all(sheet_xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn test_parse_cell_ref() {
        assert_eq!(parse_cell_ref("A1"), Some((0, 0)));
        assert_eq!(parse_cell_ref("B7"), Some((6, 1)));
        assert_eq!(parse_cell_ref("AA10"), Some((9, 26)));
        assert_eq!(parse_cell_ref("7"), None);
        assert_eq!(parse_cell_ref("A0"), None);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number("12.0"), "12");
        assert_eq!(format_number("12"), "12");
        assert_eq!(format_number("12.5"), "12.5");
        assert_eq!(format_number("abc"), "abc");
    }

    #[test]
    fn test_reads_shared_inline_numeric_and_bool_cells() {
        let ss = r#"<sst><si><t>Description</t></si><si><r><t>Pressure </t></r><r><t>Gauge</t></r><rPh><t>ignored</t></rPh></si><si><t/></si><si><t>Code</t></si></sst>"#;
        let sheet = r#"<worksheet><sheetData>
            <row r="1"><c r="A1" t="s"><v>0</v></c><c r="C1" t="s"><v>3</v></c></row>
            <row r="2"><c r="A2" t="s"><v>1</v></c><c r="B2"><v>1250.0</v></c><c r="C2" t="inlineStr"><is><t>PG-100</t></is></c></row>
            <row r="4"><c r="A4" t="b"><v>1</v></c><c r="B4" t="s"><v>2</v></c></row>
        </sheetData></worksheet>"#;
        let grid = read_first_sheet(&build_xlsx(sheet, Some(ss))).unwrap();
        assert_eq!(grid.len(), 4);
        assert_eq!(
            grid[0],
            vec![Some("Description".to_string()), None, Some("Code".to_string())]
        );
        assert_eq!(grid[1][0].as_deref(), Some("Pressure Gauge"));
        assert_eq!(grid[1][1].as_deref(), Some("1250"));
        assert_eq!(grid[1][2].as_deref(), Some("PG-100"));
        assert!(grid[2].is_empty());
        assert_eq!(grid[3], vec![Some("TRUE".to_string())]);
    }

    #[test]
    fn test_cells_without_references_follow_previous() {
        let sheet = r#"<worksheet><sheetData>
            <row><c t="inlineStr"><is><t>a</t></is></c><c t="inlineStr"><is><t>b</t></is></c></row>
            <row><c><v>1</v></c><c><v>2</v></c></row>
        </sheetData></worksheet>"#;
        let grid = read_first_sheet(&build_xlsx(sheet, None)).unwrap();
        assert_eq!(grid[0], vec![Some("a".to_string()), Some("b".to_string())]);
        assert_eq!(grid[1], vec![Some("1".to_string()), Some("2".to_string())]);
    }

    #[test]
    fn test_invalid_zip_is_error() {
        assert!(matches!(read_first_sheet(b"not a zip"), Err(XlsxError::Zip(_))));
    }

    #[test]
    fn test_missing_worksheet_is_error() {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            zip.start_file("xl/workbook.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<workbook/>").unwrap();
            zip.finish().unwrap();
        }
        assert!(matches!(
            read_first_sheet(&buf.into_inner()),
            Err(XlsxError::NoWorksheet)
        ));
    }
}
