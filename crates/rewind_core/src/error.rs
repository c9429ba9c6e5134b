//! Core error types for rewind.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
///
/// Everything here is reported before recording or replaying starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Thread slot outside the fixed slot table
    SlotOutOfRange {
        /// Offending slot
        slot: u32,
        /// Size of the slot table
        limit: usize,
    },

    /// No `--record-replay` option was given
    MissingMode,

    /// `--record-replay` carried something other than 1 or 2
    InvalidMode {
        /// Raw option value
        value: String,
    },

    /// Malformed option
    InvalidOption {
        /// Option name
        option: String,
        /// What was wrong with it
        reason: String,
    },

    /// The log file could not be opened or created
    LogOpen {
        /// Path that was tried
        path: String,
        /// Error reported by the OS
        reason: String,
    },

    /// Configuration could not be parsed
    ParseError {
        /// Error message
        message: String,
    },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SlotOutOfRange { slot, limit } => {
                write!(f, "Thread slot {} out of range (limit {})", slot, limit)
            }
            Self::MissingMode => write!(f, "Please specify --record-replay=1|2"),
            Self::InvalidMode { value } => {
                write!(f, "--record-replay argument can only be 1|2, got '{}'", value)
            }
            Self::InvalidOption { option, reason } => {
                write!(f, "Invalid option {}: {}", option, reason)
            }
            Self::LogOpen { path, reason } => write!(
                f,
                "Can't open or create log file for record and replay '{}' ({})",
                path, reason
            ),
            Self::ParseError { message } => write!(f, "Parse error: {}", message),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError {
            message: err.to_string(),
        }
    }
}
