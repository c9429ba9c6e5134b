//! Engine errors.

use rewind_core::{CoreError, ThreadId};
use rewind_log::{CallerClass, Desync, LogError};

/// Engine result type
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration or log-open failure
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Log write or sync failure
    #[error(transparent)]
    Log(#[from] LogError),

    /// Replay no longer follows the log
    #[error("replay diverged: {0}")]
    Desync(#[from] Desync),

    /// Some thread other than the main one asked for the token first
    #[error("first acquisition of the execution token must be by the main thread, not {0}")]
    FirstAcquireNotMain(ThreadId),

    /// Thread asked for the token for another reason than recorded
    #[error("caller class not expected for {thread}: runtime/recorded={runtime:?}/{recorded:?}")]
    CallerClassMismatch {
        /// Thread being admitted
        thread: ThreadId,
        /// Class it asked with
        runtime: CallerClass,
        /// Class found in the log
        recorded: CallerClass,
    },

    /// The log holds no further acquisitions
    #[error("replay schedule exhausted, {thread} cannot be admitted")]
    ScheduleExhausted {
        /// Thread that asked
        thread: ThreadId,
    },

    /// Slot is 0 or outside the slot table
    #[error("invalid thread slot {slot}")]
    InvalidSlot {
        /// Offending slot
        slot: ThreadId,
    },

    /// Slot already holds identifiers
    #[error("thread slot {slot} is already in use")]
    SlotOccupied {
        /// Offending slot
        slot: ThreadId,
    },

    /// Caller does not hold the execution token
    #[error("{caller} is not the running thread ({running})")]
    NotRunning {
        /// Thread that made the call
        caller: ThreadId,
        /// Thread holding the token
        running: ThreadId,
    },

    /// Memory layout value not on a page boundary
    #[error("{field} 0x{value:X} is not page aligned")]
    Misaligned {
        /// Which value
        field: &'static str,
        /// The value
        value: usize,
    },

    /// Client command line too long to record
    #[error("client command line is {len} bytes, only lengths below {limit} are supported")]
    CmdlineTooLong {
        /// Length of the joined command line
        len: usize,
        /// Exclusive upper bound
        limit: usize,
    },

    /// Initial stack pointer and stack top do not describe a recordable stack
    #[error("invalid client stack: top 0x{stack_top:X}, initial sp 0x{initial_sp:X}")]
    InvalidStack {
        /// Highest stack address
        stack_top: usize,
        /// Initial stack pointer
        initial_sp: usize,
    },

    /// Guest memory range not accessible
    #[error("guest memory 0x{addr:X}+{len} is not accessible")]
    GuestMemory {
        /// Start address
        addr: usize,
        /// Length
        len: usize,
    },

    /// Register state smaller than the comparison layout
    #[error("register state is {len} bytes, layout needs {needed}")]
    StateTooShort {
        /// Size supplied
        len: usize,
        /// Size the layout covers
        needed: usize,
    },

    /// Session already closed
    #[error("record/replay session is closed")]
    Closed,
}

impl EngineError {
    /// Whether the process must stop.
    ///
    /// Configuration errors are reported before anything is recorded or
    /// replayed; everything else happens mid-run and leaves the two
    /// executions out of step.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Core(_))
    }
}

/// Report a fatal error and terminate the process.
pub fn fatal(err: &EngineError) -> ! {
    tracing::error!(error = %err, "record/replay cannot continue");
    std::process::exit(1)
}
