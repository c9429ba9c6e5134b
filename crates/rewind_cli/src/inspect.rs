//! Log dump and per-kind/per-thread statistics.

use indexmap::IndexMap;
use rewind_log::{EntryBody, LogCursor, LogEntry, LogError, RecordedEntry};
use serde::Serialize;
use std::io::{Read, Write};
use thiserror::Error;

/// Inspection errors
#[derive(Error, Debug)]
pub enum InspectError {
    /// The log could not be decoded
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// Writing the report failed
    #[error("output error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Output format for a dump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// One line of text per entry
    Text,
    /// One JSON object per line
    Json,
}

/// One dumped entry
#[derive(Debug, Serialize)]
pub struct EntryReport {
    /// Position in the log
    pub index: u64,
    /// Byte offset of the record
    pub offset: u64,
    /// Decoded record
    #[serde(flatten)]
    pub entry: LogEntry,
    /// Declared payload length
    pub payload_len: usize,
    /// Leading payload bytes in hex
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_preview: Option<String>,
}

impl EntryReport {
    /// Describe `recorded`, previewing at most `preview` payload bytes
    #[must_use]
    pub fn new(recorded: &RecordedEntry, preview: usize) -> Self {
        Self {
            index: recorded.index,
            offset: recorded.offset,
            entry: recorded.entry,
            payload_len: recorded.payload.len(),
            payload_preview: hex_preview(&recorded.payload, preview),
        }
    }
}

impl std::fmt::Display for EntryReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:>6} @{:<8} {}", self.index, self.offset, self.entry)?;
        if let Some(preview) = &self.payload_preview {
            write!(f, " [{}B] {}", self.payload_len, preview)?;
        }
        Ok(())
    }
}

/// Hex of the first `limit` bytes, `..` appended when cut short
#[must_use]
pub fn hex_preview(payload: &[u8], limit: usize) -> Option<String> {
    if payload.is_empty() {
        return None;
    }
    let shown = &payload[..payload.len().min(limit)];
    let mut text = hex::encode(shown);
    if shown.len() < payload.len() {
        text.push_str("..");
    }
    Some(text)
}

/// Write every entry of `log` to `out`. Returns the number of entries.
///
/// Entries before a decoding failure are written before the error is
/// returned.
///
/// # Errors
///
/// Returns error if the log is malformed or the output cannot be written
pub fn dump<R: Read, W: Write>(log: R, out: &mut W, format: Format, preview: usize) -> Result<u64, InspectError> {
    let mut count = 0;
    for recorded in LogCursor::new(log) {
        let report = EntryReport::new(&recorded?, preview);
        match format {
            Format::Text => writeln!(out, "{}", report)?,
            Format::Json => {
                serde_json::to_writer(&mut *out, &report)?;
                writeln!(out)?;
            }
        }
        count += 1;
    }
    out.flush()?;
    Ok(count)
}

/// Entry counts of a log, keyed in first-seen order
#[derive(Debug, Default, Serialize)]
pub struct LogSummary {
    /// Complete entries read
    pub entries: u64,
    /// Bytes covered by those entries
    pub bytes: u64,
    /// Entries per kind
    pub by_kind: IndexMap<String, u64>,
    /// Entries per header thread
    pub by_thread: IndexMap<String, u64>,
    /// Releases per tag
    pub releases: IndexMap<String, u64>,
    /// Why reading stopped early, if it did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Count the entries of `log`.
///
/// A malformed tail, such as a log cut short by a crash, ends the count and
/// is reported in [`LogSummary::error`].
pub fn summarize<R: Read>(log: R) -> LogSummary {
    let mut summary = LogSummary::default();
    let mut cursor = LogCursor::new(log);
    for recorded in cursor.by_ref() {
        match recorded {
            Ok(recorded) => summary.add(&recorded.entry),
            Err(e) => {
                tracing::warn!(error = %e, "log ends in a malformed record");
                summary.error = Some(e.to_string());
            }
        }
    }
    summary.bytes = cursor.offset();
    summary
}

impl LogSummary {
    fn add(&mut self, entry: &LogEntry) {
        self.entries += 1;
        *self.by_kind.entry(entry.kind().name().to_string()).or_default() += 1;
        *self.by_thread.entry(entry.thread.to_string()).or_default() += 1;
        if let EntryBody::Release { tag } = &entry.body {
            *self.releases.entry(tag.to_string()).or_default() += 1;
        }
    }

    /// Write as aligned text
    ///
    /// # Errors
    ///
    /// Returns error if the output cannot be written
    pub fn write_text<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        writeln!(out, "entries: {} ({} bytes)", self.entries, self.bytes)?;
        for (title, counts) in [
            ("by kind", &self.by_kind),
            ("by thread", &self.by_thread),
            ("releases", &self.releases),
        ] {
            if counts.is_empty() {
                continue;
            }
            writeln!(out, "{}:", title)?;
            for (key, count) in counts {
                writeln!(out, "  {:<20} {:>8}", key, count)?;
            }
        }
        if let Some(error) = &self.error {
            writeln!(out, "stopped early: {}", error)?;
        }
        Ok(())
    }
}
