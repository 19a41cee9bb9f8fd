//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use chrono::DateTime;
use logdex::{FileHits, IndexState, LogEntry, LogLevel};
use serde::Serialize;

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a serializable value to the output.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => {
                value.write_table(writer)?;
            }
        }
        Ok(())
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

/// Formats ms since the epoch as a UTC timestamp.
#[must_use]
pub fn format_millis(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms).map_or_else(
        || ms.to_string(),
        |time| time.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
    )
}

fn join_levels(levels: &BTreeSet<LogLevel>) -> String {
    levels.iter().map(|level| level.as_str()).collect::<Vec<_>>().join(",")
}

/// Result of an `index` or `rebuild` run.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    /// Final state.
    pub state: IndexState,
    /// Indexed files.
    pub files: usize,
    /// Indexed entries.
    pub entries: u64,
}

impl TableDisplay for IndexSummary {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "State:    {}", self.state)?;
        writeln!(writer, "Files:    {}", self.files)?;
        writeln!(writer, "Entries:  {}", self.entries)?;
        Ok(())
    }
}

/// One indexed file.
#[derive(Debug, Clone, Serialize)]
pub struct FileRow {
    /// File id.
    pub id: i16,
    /// File name.
    pub name: String,
    /// Bytes indexed so far.
    pub bytes_indexed: u64,
    /// Earliest entry time, ms.
    pub first: Option<i64>,
    /// Latest entry time, ms.
    pub last: Option<i64>,
    /// Levels present.
    pub levels: BTreeSet<LogLevel>,
}

/// File listing output.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct FileList(pub Vec<FileRow>);

impl TableDisplay for FileList {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.0.is_empty() {
            writeln!(writer, "No files indexed.")?;
            return Ok(());
        }
        writeln!(
            writer,
            "{:<5} {:<30} {:>12} {:<23} {:<23} LEVELS",
            "ID", "NAME", "BYTES", "FIRST", "LAST"
        )?;
        for row in &self.0 {
            writeln!(
                writer,
                "{:<5} {:<30} {:>12} {:<23} {:<23} {}",
                row.id,
                row.name,
                row.bytes_indexed,
                row.first.map(format_millis).unwrap_or_default(),
                row.last.map(format_millis).unwrap_or_default(),
                join_levels(&row.levels),
            )?;
        }
        Ok(())
    }
}

/// Search results grouped by file.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct GroupedResults(pub Vec<FileHits>);

impl TableDisplay for GroupedResults {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.0.is_empty() {
            writeln!(writer, "No matches.")?;
            return Ok(());
        }
        writeln!(
            writer,
            "{:<30} {:>8} {:<23} {:<23} LEVELS",
            "FILE", "MATCHES", "FIRST", "LAST"
        )?;
        for file in &self.0 {
            writeln!(
                writer,
                "{:<30} {:>8} {:<23} {:<23} {}",
                file.file_name,
                file.entry_ids.len(),
                format_millis(file.first),
                format_millis(file.last),
                join_levels(&file.levels),
            )?;
        }
        Ok(())
    }
}

/// A full entry with its file name.
#[derive(Debug, Clone, Serialize)]
pub struct EntryRow {
    /// File name.
    pub file: String,
    /// The entry.
    #[serde(flatten)]
    pub entry: LogEntry,
}

/// A list of full entries.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct EntryList(pub Vec<EntryRow>);

impl TableDisplay for EntryList {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.0.is_empty() {
            writeln!(writer, "No entries.")?;
            return Ok(());
        }
        for row in &self.0 {
            let entry = &row.entry;
            writeln!(
                writer,
                "{} {:<5} {}@{} [{}] {} - {}",
                format_millis(entry.timestamp),
                entry.level,
                row.file,
                entry.entry_id,
                entry.module,
                entry.class_name,
                entry.message,
            )?;
        }
        Ok(())
    }
}

/// One hit of a paginated search.
#[derive(Debug, Clone, Serialize)]
pub struct HitRow {
    /// File name.
    pub file: String,
    /// Entry offset.
    pub entry_id: u64,
    /// Level.
    pub level: LogLevel,
    /// Time, ms.
    pub timestamp: i64,
}

/// One page of hits plus the cursor for the next.
#[derive(Debug, Clone, Serialize)]
pub struct PageView {
    /// Hits in (file, offset) order.
    pub hits: Vec<HitRow>,
    /// Cursor for the next page.
    pub next: Option<String>,
}

impl TableDisplay for PageView {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "{:<30} {:>12} {:<5} TIME", "FILE", "OFFSET", "LEVEL")?;
        for hit in &self.hits {
            writeln!(
                writer,
                "{:<30} {:>12} {:<5} {}",
                hit.file,
                hit.entry_id,
                hit.level,
                format_millis(hit.timestamp)
            )?;
        }
        if let Some(next) = &self.next {
            writeln!(writer)?;
            writeln!(writer, "More results: --cursor {next}")?;
        }
        Ok(())
    }
}

/// Match counts per level.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct LevelCounts(pub BTreeMap<LogLevel, u64>);

impl TableDisplay for LevelCounts {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        for level in LogLevel::ALL {
            let count = self.0.get(&level).copied().unwrap_or(0);
            writeln!(writer, "{:<6} {count:>10}", level.as_str())?;
        }
        Ok(())
    }
}

/// Levels present per file.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct FileLevels(pub BTreeMap<String, BTreeSet<LogLevel>>);

impl TableDisplay for FileLevels {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        for (file, levels) in &self.0 {
            writeln!(writer, "{file:<30} {}", join_levels(levels))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render<T: Serialize + TableDisplay>(format: Format, value: &T) -> String {
        let mut buf = Vec::new();
        OutputFormat::new(format).write(&mut buf, value).expect("render");
        String::from_utf8(buf).expect("utf8")
    }

    #[test]
    fn formats_millis_as_utc() {
        assert_eq!(format_millis(1_656_944_848_743), "2022-07-04 14:27:28.743");
    }

    #[test]
    fn level_counts_list_every_level() {
        let counts = LevelCounts(BTreeMap::from([(LogLevel::Error, 3)]));
        let table = render(Format::Table, &counts);
        assert_eq!(table.lines().count(), 6);
        assert!(table.contains("ERROR"));

        let json = render(Format::Json, &counts);
        let value: serde_json::Value = serde_json::from_str(&json).expect("json");
        assert_eq!(value["ERROR"], 3);
    }

    #[test]
    fn page_view_prints_cursor() {
        let page = PageView {
            hits: vec![HitRow {
                file: "app.log".into(),
                entry_id: 64,
                level: LogLevel::Warn,
                timestamp: 0,
            }],
            next: Some("0-40".into()),
        };
        let table = render(Format::Table, &page);
        assert!(table.contains("app.log"));
        assert!(table.contains("--cursor 0-40"));
    }

    #[test]
    fn empty_file_list() {
        assert_eq!(render(Format::Table, &FileList(Vec::new())), "No files indexed.\n");
        assert_eq!(render(Format::Json, &FileList(Vec::new())), "[]\n");
    }

    #[test]
    fn entry_rows_flatten_in_json() {
        let rows = EntryList(vec![EntryRow {
            file: "app.log".into(),
            entry: LogEntry {
                entry_id: 0,
                timestamp: 0,
                level: LogLevel::Info,
                module: "core".into(),
                class_name: "Main".into(),
                message: "hello".into(),
            },
        }]);
        let value: serde_json::Value =
            serde_json::from_str(&render(Format::Json, &rows)).expect("json");
        assert_eq!(value[0]["file"], "app.log");
        assert_eq!(value[0]["module"], "core");
        assert_eq!(value[0]["level"], "INFO");
    }
}
