//! Resumable parser for multi-line log files.
//!
//! An entry starts with a line like
//!
//! ```text
//! 04 Jul 2022 14:27:28,743 DEBUG [ui] AbstractDialog:? - hide end
//! ```
//!
//! and owns every following line up to the next entry start, which is how
//! stack traces end up inside the message. Entry ids are byte offsets, so a
//! file can be parsed incrementally from the checkpoint returned by a
//! previous pass.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::ops::ControlFlow;
use std::path::Path;

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use thiserror::Error;
use tracing::debug;

use crate::types::{LogEntry, LogLevel};

static ENTRY_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{2} \w{3} \d{4}").unwrap_or_else(|_| unreachable!()));

/// Width of the `dd MMM yyyy HH:mm:ss,SSS` header.
const DATE_WIDTH: usize = 24;

/// Longest level token accepted after the date.
const MAX_LEVEL_WIDTH: usize = 7;

const DATE_FORMAT: &str = "%d %b %Y %H:%M:%S,%3f";

/// Why a single entry could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The text ended before the date header was complete.
    #[error("entry shorter than its date header")]
    TooShort,

    /// The header did not hold a valid date.
    #[error("invalid date header: {0}")]
    InvalidDate(String),

    /// The level token was missing, too long or unknown.
    #[error("invalid level token: {0:?}")]
    InvalidLevel(String),

    /// A structural delimiter was not found.
    #[error("missing {0}")]
    MissingDelimiter(&'static str),
}

/// Entries parsed in one pass plus how far the pass got.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    /// Completed entries in file order.
    pub entries: Vec<LogEntry>,
    /// Bytes consumed from the starting offset.
    ///
    /// Stops at the end of the last completed entry, so the unterminated
    /// tail is parsed again next time.
    pub bytes_consumed: u64,
}

/// Returns true if `line` begins a new entry.
#[must_use]
pub fn is_entry_start(line: &[u8]) -> bool {
    ENTRY_START.is_match(line)
}

/// Parses one complete entry whose text starts at byte `entry_id`.
pub fn parse_entry(text: &str, entry_id: u64) -> Result<LogEntry, ParseError> {
    let date = text.get(..DATE_WIDTH).ok_or(ParseError::TooShort)?;
    let timestamp = NaiveDateTime::parse_from_str(date, DATE_FORMAT)
        .map_err(|_| ParseError::InvalidDate(date.to_string()))?
        .and_utc()
        .timestamp_millis();

    let rest = &text[DATE_WIDTH..];
    let open = rest.find('[').ok_or(ParseError::MissingDelimiter("'[' before module"))?;
    let level_token = rest[..open].trim();
    if level_token.len() > MAX_LEVEL_WIDTH {
        return Err(ParseError::InvalidLevel(level_token.to_string()));
    }
    let level: LogLevel = level_token
        .parse()
        .map_err(|_| ParseError::InvalidLevel(level_token.to_string()))?;

    let rest = &rest[open + 1..];
    let close = rest.find(']').ok_or(ParseError::MissingDelimiter("']' after module"))?;
    let module = &rest[..close];

    let rest = rest[close + 1..]
        .strip_prefix(' ')
        .ok_or(ParseError::MissingDelimiter("space before class name"))?;
    let colon = rest.find(':').ok_or(ParseError::MissingDelimiter("':' after class name"))?;
    let class_name = &rest[..colon];

    let rest = &rest[colon..];
    let dash = rest.find(" - ").ok_or(ParseError::MissingDelimiter("' - ' before message"))?;
    let message = rest[dash + 3..].trim_end_matches(['\n', '\r']);

    Ok(LogEntry {
        entry_id,
        timestamp,
        level,
        module: module.to_string(),
        class_name: class_name.to_string(),
        message: message.to_string(),
    })
}

fn is_blank_line(line: &[u8]) -> bool {
    line.ends_with(b"\n") && line.iter().all(u8::is_ascii_whitespace)
}

/// Walks raw entries from `reader`, whose first byte sits at `start`.
///
/// `visit` receives each entry's offset and bytes and may stop the walk.
/// Returns the bytes consumed up to the end of the last accepted entry.
fn scan_entries<R, F>(mut reader: R, start: u64, emit_tail: bool, mut visit: F) -> io::Result<u64>
where
    R: BufRead,
    F: FnMut(u64, &[u8]) -> ControlFlow<()>,
{
    let mut consumed = 0u64;
    let mut pending: Vec<u8> = Vec::new();
    let mut line: Vec<u8> = Vec::new();

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }
        if pending.is_empty() {
            if is_blank_line(&line) {
                consumed += n as u64;
            } else {
                pending.extend_from_slice(&line);
            }
            continue;
        }
        if !is_entry_start(&line) {
            pending.extend_from_slice(&line);
            continue;
        }
        if visit(start + consumed, &pending).is_break() {
            return Ok(consumed);
        }
        consumed += pending.len() as u64;
        pending.clear();
        pending.extend_from_slice(&line);
    }

    let tail_is_blank = pending.iter().all(u8::is_ascii_whitespace);
    if emit_tail && !tail_is_blank && visit(start + consumed, &pending).is_continue() {
        consumed += pending.len() as u64;
    }
    Ok(consumed)
}

/// Parses complete entries from `reader`, whose first byte sits at `offset`.
///
/// A malformed entry ends the pass; everything before it is returned.
pub fn parse_reader<R: BufRead>(reader: R, offset: u64) -> io::Result<ParseOutcome> {
    let mut entries = Vec::new();
    let bytes_consumed = scan_entries(reader, offset, false, |entry_id, raw| {
        match parse_entry(&String::from_utf8_lossy(raw), entry_id) {
            Ok(entry) => {
                entries.push(entry);
                ControlFlow::Continue(())
            }
            Err(e) => {
                debug!(entry_id, error = %e, "stopping parse at malformed entry");
                ControlFlow::Break(())
            }
        }
    })?;
    Ok(ParseOutcome {
        entries,
        bytes_consumed,
    })
}

/// Reads log files for the indexing worker.
pub trait LogReader: Send + Sync {
    /// Parses the entries of `path` that start at or after `offset`.
    fn parse(&self, path: &Path, offset: u64) -> io::Result<ParseOutcome>;
}

/// Reads log files straight from disk with [`parse_file`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FileReader;

impl LogReader for FileReader {
    fn parse(&self, path: &Path, offset: u64) -> io::Result<ParseOutcome> {
        parse_file(path, offset)
    }
}

/// Parses complete entries of the file at `path` starting at `offset`.
///
/// Only I/O failures are errors; malformed content shortens the outcome.
pub fn parse_file(path: &Path, offset: u64) -> io::Result<ParseOutcome> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    if offset >= file_len {
        return Ok(ParseOutcome::default());
    }
    file.seek(SeekFrom::Start(offset))?;
    let mut outcome = parse_reader(BufReader::new(file), offset)?;
    outcome.bytes_consumed = outcome.bytes_consumed.min(file_len - offset);
    Ok(outcome)
}

/// Reads the single entry that starts exactly at `entry_id`.
///
/// Unlike [`parse_file`], an entry running to end of file is returned.
pub fn read_entry_at(path: &Path, entry_id: u64) -> io::Result<Option<LogEntry>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(entry_id))?;
    let mut found = None;
    scan_entries(BufReader::new(file), entry_id, true, |offset, raw| {
        if offset == entry_id {
            found = parse_entry(&String::from_utf8_lossy(raw), offset).ok();
        }
        ControlFlow::Break(())
    })?;
    Ok(found)
}

/// Reads the entry at `entry_id` without its message body.
pub fn read_entry_header(path: &Path, entry_id: u64) -> io::Result<Option<LogEntry>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(entry_id))?;
    let mut first_line = Vec::new();
    BufReader::new(file).read_until(b'\n', &mut first_line)?;
    if !is_entry_start(&first_line) {
        return Ok(None);
    }
    Ok(parse_entry(&String::from_utf8_lossy(&first_line), entry_id)
        .ok()
        .map(|mut entry| {
            entry.message.clear();
            entry
        }))
}

/// Reads every entry starting within `byte_range` bytes of `entry_id`.
pub fn nearby_entries(path: &Path, entry_id: u64, byte_range: u64) -> io::Result<Vec<LogEntry>> {
    let first = entry_id.saturating_sub(byte_range);
    let last = entry_id.saturating_add(byte_range);
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(first))?;

    let mut entries = Vec::new();
    scan_entries(BufReader::new(file), first, true, |offset, raw| {
        if offset > last {
            return ControlFlow::Break(());
        }
        // a window opening mid-entry yields a headless fragment first
        if let Ok(entry) = parse_entry(&String::from_utf8_lossy(raw), offset) {
            entries.push(entry);
        }
        ControlFlow::Continue(())
    })?;
    Ok(entries)
}
