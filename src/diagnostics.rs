use crate::job::IndexData;
use crate::logging::{ChannelRegistry, LogChannel};
use crate::model::FixIt;
use crate::parse::{Diagnostic, DiagnosticSeverity};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum XmlEntryKind {
    None,
    Warning,
    Error,
    Fixit,
}

impl XmlEntryKind {
    fn as_str(self) -> &'static str {
        match self {
            XmlEntryKind::None => "none",
            XmlEntryKind::Warning => "warning",
            XmlEntryKind::Error => "error",
            XmlEntryKind::Fixit => "fixit",
        }
    }
}

/// One `<error .../>` element, keyed by start byte offset in the per-file
/// map so entries come out in document order.
#[derive(Debug, Clone)]
pub(crate) struct XmlEntry {
    pub kind: XmlEntryKind,
    pub message: String,
    pub line: u32,
    pub column: u32,
    pub end_offset: Option<u32>,
}

impl Default for XmlEntry {
    fn default() -> Self {
        Self {
            kind: XmlEntryKind::None,
            message: String::new(),
            line: 0,
            column: 0,
            end_offset: None,
        }
    }
}

pub(crate) type XmlEntries = BTreeMap<PathBuf, BTreeMap<u32, XmlEntry>>;

fn printf_fixit(text: &str) -> bool {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new("^%[A-Za-z0-9]+$").expect("printf fix-it pattern"))
        .is_match(text)
}

fn log_at(severity: DiagnosticSeverity, message: &str) {
    match severity {
        DiagnosticSeverity::Fatal | DiagnosticSeverity::Error => tracing::error!("{message}"),
        DiagnosticSeverity::Warning => tracing::warn!("{message}"),
        DiagnosticSeverity::Note => tracing::debug!("{message}"),
        DiagnosticSeverity::Ignored => {}
    }
}

/// Folds one diagnostic set into the staging buffer: text log lines, the
/// `CompilationError` channel, buffered XML entries, and fix-its. Runs
/// inside the indexing pass and touches nothing but the staging buffer and
/// the log channels.
pub(crate) fn process(
    data: &mut IndexData,
    diagnostics: &[Diagnostic],
    channels: &ChannelRegistry,
    ignore_printf_fixits: bool,
) {
    data.has_diags |= !diagnostics.is_empty();
    let xml_enabled = channels.enabled(LogChannel::CompilationErrorXml);

    for diag in diagnostics {
        let kind = match diag.severity {
            DiagnosticSeverity::Warning => XmlEntryKind::Warning,
            DiagnosticSeverity::Error | DiagnosticSeverity::Fatal => XmlEntryKind::Error,
            _ => XmlEntryKind::None,
        };

        log_at(diag.severity, &diag.message);
        if diag.severity != DiagnosticSeverity::Ignored {
            channels.write(LogChannel::CompilationError, &diag.message);
        }

        if xml_enabled && kind != XmlEntryKind::None {
            let mut ranges_ok = !diag.ranges.is_empty();
            for (i, range) in diag.ranges.iter().enumerate() {
                if i == 0 && range.start.offset == 0 && range.end_offset == 0 {
                    // degenerate range, fall back to the diagnostic location
                    ranges_ok = false;
                    break;
                }
                data.xml_entries
                    .entry(range.start.path.clone())
                    .or_default()
                    .insert(
                        range.start.offset,
                        XmlEntry {
                            kind,
                            message: diag.message.clone(),
                            line: range.start.line,
                            column: range.start.column,
                            end_offset: Some(range.end_offset),
                        },
                    );
            }
            if !ranges_ok {
                if let Some(pos) = &diag.pos {
                    data.xml_entries.entry(pos.path.clone()).or_default().insert(
                        pos.offset,
                        XmlEntry {
                            kind,
                            message: diag.message.clone(),
                            line: pos.line,
                            column: pos.column,
                            end_offset: None,
                        },
                    );
                }
            }
        }

        for fix in &diag.fix_its {
            let path = &fix.range.start.path;
            let start = fix.range.start.offset;
            let end = fix.range.end_offset;

            if ignore_printf_fixits && printf_fixit(&fix.text) {
                tracing::error!(
                    "Ignored fixit for {}: Replace {}-{} with [{}]",
                    path.display(),
                    start,
                    end,
                    fix.text
                );
                continue;
            }

            if xml_enabled {
                let entry = data
                    .xml_entries
                    .entry(path.clone())
                    .or_default()
                    .entry(start)
                    .or_default();
                entry.kind = XmlEntryKind::Fixit;
                if entry.message.is_empty() {
                    entry.message = format!("did you mean '{}'?", fix.text);
                    entry.line = fix.range.start.line;
                    entry.column = fix.range.start.column;
                }
                entry.end_offset = Some(end);
            }

            let message = format!(
                "Fixit for {}: Replace {}-{} with [{}]",
                path.display(),
                start,
                end,
                fix.text
            );
            log_at(diag.severity, &message);
            channels.write(LogChannel::CompilationError, &message);

            data.fix_its.entry(path.clone()).or_default().insert(FixIt {
                start,
                end,
                text: fix.text.clone(),
            });
        }
    }
}

/// Emits one checkstyle document: every buffered entry grouped by file,
/// then an empty stanza for each transitively depended file that produced
/// nothing. With no entries at all this is the "all files clean" envelope.
pub(crate) fn emit_checkstyle(
    channels: &ChannelRegistry,
    entries: &XmlEntries,
    dep_files: &std::collections::BTreeSet<PathBuf>,
) {
    if !channels.enabled(LogChannel::CompilationErrorXml) {
        return;
    }

    let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?><checkstyle>");
    for (path, by_offset) in entries {
        out.push_str(&format!(
            "<file name=\"{}\">",
            xml_escape(&path.to_string_lossy())
        ));
        for (offset, entry) in by_offset {
            let end = entry
                .end_offset
                .map(|e| format!("endOffset=\"{e}\" "))
                .unwrap_or_default();
            out.push_str(&format!(
                "<error line=\"{}\" column=\"{}\" startOffset=\"{}\" {}severity=\"{}\" message=\"{}\"/>",
                entry.line,
                entry.column,
                offset,
                end,
                entry.kind.as_str(),
                xml_escape(&entry.message)
            ));
        }
        out.push_str("</file>");
    }
    for path in dep_files {
        if !entries.contains_key(path) {
            out.push_str(&format!(
                "<file name=\"{}\"/>",
                xml_escape(&path.to_string_lossy())
            ));
        }
    }
    out.push_str("</checkstyle>");

    channels.write(LogChannel::CompilationErrorXml, &out);
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
