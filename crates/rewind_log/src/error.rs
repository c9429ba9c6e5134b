//! Log errors.
//!
//! [`LogError`] covers the file and the byte format. [`Desync`] is raised by
//! the replay reader when the recorded entry is not the one the replaying
//! process asked for: the two executions no longer agree on control flow and
//! there is no way to continue.

use crate::entry::{EntryKind, ReleaseTag};
use rewind_core::ThreadId;
use std::io;

/// Log I/O and format errors
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// Underlying read or write failed, including short writes
    #[error("log I/O error: {0}")]
    Io(#[from] io::Error),

    /// Record carries a tag that names no kind
    #[error("bad log entry: unknown kind {0}")]
    UnknownKind(u32),

    /// Record field holds a value its kind does not allow
    #[error("bad log entry: invalid {field} in {kind} entry: {value}")]
    InvalidField {
        /// Kind of the record
        kind: EntryKind,
        /// Field name
        field: &'static str,
        /// Raw value found
        value: u64,
    },

    /// Payload handed to the writer does not match the declared length
    #[error("payload of {kind} entry is {actual} bytes, record declares {declared}")]
    PayloadLength {
        /// Kind of the record
        kind: EntryKind,
        /// Length in the fixed record
        declared: usize,
        /// Length of the payload supplied
        actual: usize,
    },

    /// Log ends in the middle of a record or payload
    #[error("truncated log: needed {expected} bytes, found {found}")]
    Truncated {
        /// Bytes needed
        expected: usize,
        /// Bytes available
        found: usize,
    },
}

/// Replay desynchronization. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum Desync {
    /// Next recorded entry has another kind
    #[error("Log entry not expected. Log type: runtime/recorded={expected}/{recorded}")]
    KindMismatch {
        /// Kind the replaying process asked for
        expected: EntryKind,
        /// Kind found in the log
        recorded: EntryKind,
    },

    /// Next recorded entry belongs to another thread
    #[error("Log entry not expected. Thread id: runtime/recorded={expected}/{recorded} ({kind})")]
    ThreadMismatch {
        /// Kind of the entry
        kind: EntryKind,
        /// Thread of the template
        expected: ThreadId,
        /// Thread found in the log
        recorded: ThreadId,
    },

    /// Replaying process issued another syscall
    #[error("Log entry not expected. Syscall number: runtime/recorded={expected}/{recorded}")]
    SyscallMismatch {
        /// Syscall number issued now
        expected: u32,
        /// Syscall number recorded
        recorded: u32,
    },

    /// Token released from another code path
    #[error("Log entry not expected. Release: runtime/recorded={expected}/{recorded}")]
    ReleaseTagMismatch {
        /// Tag of the template
        expected: ReleaseTag,
        /// Tag found in the log
        recorded: ReleaseTag,
    },

    /// Payload length differs from the recorded one
    #[error("Log entry not expected. Data len: runtime/recorded={expected}/{recorded} ({kind})")]
    LengthMismatch {
        /// Kind of the entry
        kind: EntryKind,
        /// Length the replaying process declared
        expected: usize,
        /// Length recorded
        recorded: usize,
    },

    /// Dispatch counter sampled on the other side of the syscall
    #[error("Log entry not expected. Dispatch counter phase: runtime/recorded={expected}/{recorded}")]
    DispatchPhaseMismatch {
        /// Phase of the template (true = before)
        expected: bool,
        /// Phase recorded
        recorded: bool,
    },

    /// Recorded thread slot does not fit the slot table
    #[error("thread id number too big: {slot}")]
    SlotOutOfRange {
        /// Slot found in the log
        slot: u32,
    },

    /// Recorded command line is empty or too long
    #[error("Unsupported client command line length {len}")]
    CmdlineLength {
        /// Length found in the log
        len: u32,
    },

    /// Caller buffer does not match the length it declared
    #[error("{kind} template declares {declared} bytes but the buffer holds {buffer}")]
    BufferLength {
        /// Kind of the entry
        kind: EntryKind,
        /// Length in the template
        declared: usize,
        /// Length of the caller's buffer
        buffer: usize,
    },

    /// Template resolved through the wrong reader method for its payload
    #[error("{kind} entry cannot be resolved with {method}")]
    WrongResolver {
        /// Kind of the template
        kind: EntryKind,
        /// Reader method used
        method: &'static str,
    },

    /// Log ended while the replaying process still expected entries
    #[error("replay log exhausted")]
    EndOfLog,

    /// Log could not be read
    #[error(transparent)]
    Log(#[from] LogError),
}

impl From<io::Error> for Desync {
    fn from(err: io::Error) -> Self {
        Self::Log(LogError::Io(err))
    }
}
