//! Sequential walk over a recorded log, for offline inspection.
//!
//! Unlike [`crate::ReplayReader`] nothing is checked against a template: every
//! record is decoded and its payload collected as-is.

use crate::encoding::{decode, read_record, RECORD_SIZE};
use crate::entry::LogEntry;
use crate::error::LogError;
use std::io::Read;

/// One record with its payload and position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEntry {
    /// Zero-based position in the log
    pub index: u64,
    /// Byte offset of the fixed record
    pub offset: u64,
    /// Decoded record
    pub entry: LogEntry,
    /// Trailing payload, empty for kinds without one
    pub payload: Vec<u8>,
}

/// Iterator over every entry of a log
pub struct LogCursor<R> {
    inner: R,
    index: u64,
    offset: u64,
    failed: bool,
}

impl<R: Read> LogCursor<R> {
    /// Create a cursor at the start of the log
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            index: 0,
            offset: 0,
            failed: false,
        }
    }

    /// Byte offset of the next record
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    fn read_next(&mut self) -> Result<Option<RecordedEntry>, LogError> {
        let Some(record) = read_record(&mut self.inner)? else {
            return Ok(None);
        };
        let entry = decode(&record)?;
        // Declared length is untrusted; grow with the bytes present.
        let expected = entry.payload_len();
        let mut payload = Vec::new();
        (&mut self.inner)
            .take(expected as u64)
            .read_to_end(&mut payload)?;
        if payload.len() < expected {
            return Err(LogError::Truncated {
                expected,
                found: payload.len(),
            });
        }

        let recorded = RecordedEntry {
            index: self.index,
            offset: self.offset,
            entry,
            payload,
        };
        self.index += 1;
        self.offset += (RECORD_SIZE + recorded.payload.len()) as u64;
        Ok(Some(recorded))
    }
}

impl<R: Read> Iterator for LogCursor<R> {
    type Item = Result<RecordedEntry, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        // A bad record leaves the stream position undefined; stop after it.
        if self.failed {
            return None;
        }
        match self.read_next() {
            Ok(entry) => entry.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
