//! Record-mode log writer.

use crate::encoding::{encode, RECORD_SIZE};
use crate::entry::LogEntry;
use crate::error::LogError;
use std::fs::File;
use std::io::{self, Write};

/// Sink that can force written bytes to stable storage
pub trait Durable {
    /// Block until everything written so far is durable
    ///
    /// # Errors
    ///
    /// Returns error if the sync fails
    fn sync(&mut self) -> io::Result<()>;
}

impl Durable for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

impl Durable for Vec<u8> {
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: Durable + ?Sized> Durable for &mut T {
    fn sync(&mut self) -> io::Result<()> {
        (**self).sync()
    }
}

impl<T: Durable + ?Sized> Durable for Box<T> {
    fn sync(&mut self) -> io::Result<()> {
        (**self).sync()
    }
}

/// Appends entries to the log.
///
/// Nothing is buffered between two `append` calls beyond what the sink
/// itself does.
pub struct RecordWriter<W> {
    inner: W,
    appended: u64,
    bytes_written: u64,
}

impl<W: Write + Durable> RecordWriter<W> {
    /// Create a new writer
    #[must_use]
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            appended: 0,
            bytes_written: 0,
        }
    }

    /// Write an entry, then its payload for kinds that carry one.
    ///
    /// # Errors
    ///
    /// Returns error if the payload length differs from the one the entry
    /// declares, or on any write failure
    pub fn append(&mut self, entry: &LogEntry, payload: &[u8]) -> Result<(), LogError> {
        let declared = entry.payload_len();
        if declared != payload.len() {
            return Err(LogError::PayloadLength {
                kind: entry.kind(),
                declared,
                actual: payload.len(),
            });
        }

        self.inner.write_all(&encode(entry))?;
        if !payload.is_empty() {
            self.inner.write_all(payload)?;
        }

        self.appended += 1;
        self.bytes_written += (RECORD_SIZE + payload.len()) as u64;
        tracing::trace!(entry = %entry, "appended log entry");
        Ok(())
    }

    /// Force everything appended so far to stable storage.
    ///
    /// # Errors
    ///
    /// Returns error if flushing or syncing fails
    pub fn barrier(&mut self) -> Result<(), LogError> {
        self.inner.flush()?;
        self.inner.sync()?;
        Ok(())
    }

    /// Number of entries appended
    #[must_use]
    pub const fn appended(&self) -> u64 {
        self.appended
    }

    /// Bytes written, records and payloads
    #[must_use]
    pub const fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Get a reference to the sink
    #[must_use]
    pub const fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Consume and return the sink
    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryBody;
    use rewind_core::ThreadId;

    /// Accepts only a few bytes, then reports a zero-length write
    struct ShortSink {
        room: usize,
    }

    impl Write for ShortSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.room);
            self.room -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Durable for ShortSink {
        fn sync(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_append_fixed_record() {
        let mut writer = RecordWriter::new(Vec::new());
        writer
            .append(&LogEntry::syscall_ret(ThreadId::MAIN, 42), &[])
            .unwrap();
        assert_eq!(writer.appended(), 1);
        assert_eq!(writer.get_ref().len(), RECORD_SIZE);
    }

    #[test]
    fn test_append_payload_follows_record() {
        let mut writer = RecordWriter::new(Vec::new());
        let entry = LogEntry::data(ThreadId::MAIN, 4, 0x1000);
        writer.append(&entry, &[1, 2, 3, 4]).unwrap();
        let bytes = writer.into_inner();
        assert_eq!(bytes.len(), RECORD_SIZE + 4);
        assert_eq!(&bytes[RECORD_SIZE..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_append_rejects_payload_mismatch() {
        let mut writer = RecordWriter::new(Vec::new());
        let entry = LogEntry::snapshot(ThreadId::MAIN, 8);
        let err = writer.append(&entry, &[0; 4]).unwrap_err();
        assert!(matches!(
            err,
            LogError::PayloadLength {
                declared: 8,
                actual: 4,
                ..
            }
        ));

        let entry = LogEntry::syscall_ret(ThreadId::MAIN, 0);
        assert!(writer.append(&entry, &[0]).is_err());
        assert!(writer.get_ref().is_empty());
    }

    #[test]
    fn test_short_write_is_error() {
        let mut writer = RecordWriter::new(ShortSink { room: 10 });
        let entry = LogEntry::new(ThreadId::MAIN, EntryBody::Timestamp { low: 1, high: 2 });
        let err = writer.append(&entry, &[]).unwrap_err();
        assert!(matches!(err, LogError::Io(ref e) if e.kind() == io::ErrorKind::WriteZero));
        assert_eq!(writer.appended(), 0);
    }

    #[test]
    fn test_barrier_on_file() {
        let file = tempfile::tempfile().unwrap();
        let mut writer = RecordWriter::new(file);
        writer
            .append(&LogEntry::release(ThreadId::MAIN, "sched"), &[])
            .unwrap();
        writer.barrier().unwrap();
        let file = writer.into_inner();
        assert_eq!(file.metadata().unwrap().len(), RECORD_SIZE as u64);
    }
}
