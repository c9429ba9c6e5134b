//! rewind record/replay log
//!
//! A log is a flat file of fixed 24-byte records, some followed by a raw
//! payload. File order is the total order of the nondeterministic events of
//! one run. Record mode appends through [`RecordWriter`]; replay mode walks
//! the same file with [`ReplayReader`], which refuses any entry the replaying
//! process did not ask for.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cursor;
pub mod encoding;
pub mod entry;
pub mod error;
pub mod reader;
pub mod writer;

pub use cursor::{LogCursor, RecordedEntry};
pub use encoding::{decode, encode, RECORD_SIZE};
pub use entry::{
    CallerClass, EntryBody, EntryKind, LogEntry, ReleaseTag, MAX_CMDLINE_LENGTH, RELEASE_TAG_LEN,
};
pub use error::{Desync, LogError};
pub use reader::ReplayReader;
pub use writer::{Durable, RecordWriter};
