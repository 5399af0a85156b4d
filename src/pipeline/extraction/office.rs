//! Plain-text extraction for Word, Excel and text documents.
//!
//! DOCX and XLSX are read directly from their OOXML parts. Legacy `.doc`
//! goes through an external converter (`soffice`, then `antiword`) in a
//! temp directory that is removed when the attempt ends.

use std::io::{Cursor, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use quick_xml::events::Event;
use quick_xml::Reader;

use super::ExtractionError;
use crate::pipeline::cancel::{CancelToken, Interrupted};
use crate::pipeline::import::DocumentKind;

/// Zip-bomb guard for a single XML part.
const MAX_XML_ENTRY_BYTES: u64 = 32 * 1024 * 1024;

const XLSX_MAX_SHEETS: usize = 50;

const TOOL_POLL: Duration = Duration::from_millis(100);

type ZipReader<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

/// Extract plain text from a non-PDF document.
pub fn extract_office_text(
    kind: DocumentKind,
    bytes: &[u8],
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<String, ExtractionError> {
    match kind {
        DocumentKind::Docx => extract_docx(bytes),
        DocumentKind::Xlsx => extract_xlsx(bytes),
        DocumentKind::Doc => convert_doc(bytes, timeout, cancel),
        DocumentKind::Txt => Ok(decode_text(bytes)),
        other => Err(ExtractionError::UnsupportedFormat(other.to_string())),
    }
}

/// UTF-8 (lossy) with a leading BOM removed.
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

fn read_zip_entry_bounded(archive: &mut ZipReader<'_>, name: &str) -> Result<Vec<u8>, ExtractionError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractionError::Office(format!("{name}: {e}")))?;
    let mut out = Vec::new();
    entry.take(MAX_XML_ENTRY_BYTES).read_to_end(&mut out)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractionError::Office(format!(
            "ZIP entry {name} exceeds size limit ({MAX_XML_ENTRY_BYTES} bytes)"
        )));
    }
    Ok(out)
}

fn open_zip(bytes: &[u8]) -> Result<ZipReader<'_>, ExtractionError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ExtractionError::Office(e.to_string()))
}

// ── DOCX ──────────────────────────────────────────────────

/// Paragraphs become lines; table rows become `| a | b |` lines.
fn extract_docx(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut archive = open_zip(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    docx_xml_to_text(&xml)
}

fn docx_xml_to_text(xml: &[u8]) -> Result<String, ExtractionError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut lines: Vec<String> = Vec::new();
    let mut paragraph = String::new();
    let mut in_text = false;
    let mut row: Option<Vec<String>> = None;
    let mut cell: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"tr" => row = Some(Vec::new()),
                b"tc" => cell = Some(String::new()),
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if matches!(e.local_name().as_ref(), b"tab" | b"br") {
                    paragraph.push(' ');
                }
            }
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractionError::Office(e.to_string()))?;
                paragraph.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = std::mem::take(&mut paragraph);
                    let text = text.trim();
                    match cell.as_mut() {
                        Some(c) => {
                            if !c.is_empty() && !text.is_empty() {
                                c.push(' ');
                            }
                            c.push_str(text);
                        }
                        None => {
                            if !text.is_empty() {
                                lines.push(text.to_string());
                            }
                        }
                    }
                }
                b"tc" => {
                    if let (Some(r), Some(c)) = (row.as_mut(), cell.take()) {
                        r.push(c);
                    }
                }
                b"tr" => {
                    if let Some(r) = row.take() {
                        if r.iter().any(|c| !c.is_empty()) {
                            lines.push(format!("| {} |", r.join(" | ")));
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractionError::Office(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(lines.join("\n"))
}

// ── XLSX ──────────────────────────────────────────────────

/// Each sheet becomes `=== Sheet N (R rows) ===` followed by pipe rows.
fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut archive = open_zip(bytes)?;
    let shared_strings = if archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        read_shared_strings(&read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml")?)?
    } else {
        Vec::new()
    };

    let mut sheet_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    sheet_names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut sections = Vec::new();
    for (idx, name) in sheet_names.iter().take(XLSX_MAX_SHEETS).enumerate() {
        let xml = read_zip_entry_bounded(&mut archive, name)?;
        let rows = read_sheet_rows(&xml, &shared_strings)?;
        let mut section = format!("=== Sheet {} ({} rows) ===", idx + 1, rows.len());
        for r in &rows {
            section.push('\n');
            section.push_str(&r.join(" | "));
        }
        sections.push(section);
    }
    Ok(sections.join("\n\n"))
}

fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractionError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => strings.extend(current.take()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractionError::Office(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn read_sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<Vec<Vec<String>>, ExtractionError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell_is_shared = false;
    let mut cell_value = String::new();
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    cell_value.clear();
                    cell_is_shared = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                cell_value.push_str(&te.unescape().unwrap_or_default());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    let raw = cell_value.trim();
                    let text = if cell_is_shared {
                        raw.parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i).cloned())
                            .unwrap_or_default()
                    } else {
                        raw.to_string()
                    };
                    row.push(text);
                }
                b"row" => {
                    if row.iter().any(|c| !c.is_empty()) {
                        rows.push(std::mem::take(&mut row));
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractionError::Office(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

// ── Legacy DOC ────────────────────────────────────────────

/// Convert `.doc` to text with `soffice`, falling back to `antiword`.
fn convert_doc(bytes: &[u8], timeout: Duration, cancel: &CancelToken) -> Result<String, ExtractionError> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("input.doc");
    std::fs::write(&input, bytes)?;
    let out_dir = dir.path().to_string_lossy().into_owned();
    let input_arg = input.to_string_lossy().into_owned();

    let soffice = run_tool(
        dir.path(),
        "soffice",
        &[
            "--headless",
            "--convert-to",
            "txt:Text",
            "--outdir",
            out_dir.as_str(),
            input_arg.as_str(),
        ],
        timeout,
        cancel,
    );
    match soffice {
        Ok(()) => {
            let text = std::fs::read(dir.path().join("input.txt"))
                .map(|b| decode_text(&b))
                .unwrap_or_default();
            if !text.trim().is_empty() {
                return Ok(text);
            }
            tracing::warn!("soffice produced no text, trying antiword");
        }
        Err(ExtractionError::Interrupted(Interrupted::Cancelled { label })) => {
            return Err(Interrupted::Cancelled { label }.into());
        }
        Err(e) => tracing::warn!(error = %e, "soffice conversion failed, trying antiword"),
    }

    run_tool(
        dir.path(),
        "antiword",
        &[input_arg.as_str()],
        timeout,
        cancel,
    )?;
    let text = decode_text(&std::fs::read(dir.path().join("antiword.out"))?);
    if text.trim().is_empty() {
        return Err(ExtractionError::Conversion("antiword produced no text".into()));
    }
    Ok(text)
}

/// Run a converter with stdout captured to `<dir>/<program>.out`,
/// killing it on deadline or cancellation.
fn run_tool(
    dir: &Path,
    program: &str,
    args: &[&str],
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<(), ExtractionError> {
    let stdout = std::fs::File::create(dir.join(format!("{program}.out")))?;
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| ExtractionError::Conversion(format!("{program} not available: {e}")))?;

    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return if status.success() {
                Ok(())
            } else {
                Err(ExtractionError::Conversion(format!("{program} exited with {status}")))
            };
        }
        let interrupted = if cancel.is_cancelled() {
            Some(Interrupted::Cancelled {
                label: program.to_string(),
            })
        } else if started.elapsed() >= timeout {
            Some(Interrupted::TimedOut {
                label: program.to_string(),
                secs: timeout.as_secs(),
            })
        } else {
            None
        };
        if let Some(reason) = interrupted {
            let _ = child.kill();
            let _ = child.wait();
            return Err(reason.into());
        }
        std::thread::sleep(TOOL_POLL);
    }
}
