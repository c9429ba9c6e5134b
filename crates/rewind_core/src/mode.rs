//! Process-wide record/replay mode.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Session mode. Fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RrMode {
    /// Neither recording nor replaying; every engine call is a no-op
    #[default]
    Inactive,
    /// Write every nondeterministic event to the log
    Record,
    /// Feed events back from the log and check for divergence
    Replay,
}

impl RrMode {
    /// Parse the numeric form used on the command line (`1` record, `2` replay)
    ///
    /// # Errors
    ///
    /// Returns error for anything but `1` or `2`
    pub fn from_option(value: &str) -> CoreResult<Self> {
        match value.trim() {
            "1" => Ok(Self::Record),
            "2" => Ok(Self::Replay),
            other => Err(CoreError::InvalidMode {
                value: other.to_string(),
            }),
        }
    }

    /// Whether the write path is active
    #[must_use]
    pub const fn is_record(self) -> bool {
        matches!(self, Self::Record)
    }

    /// Whether the read/compare path is active
    #[must_use]
    pub const fn is_replay(self) -> bool {
        matches!(self, Self::Replay)
    }

    /// Whether any log I/O happens at all
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Inactive)
    }
}

impl std::fmt::Display for RrMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactive => write!(f, "inactive"),
            Self::Record => write!(f, "record"),
            Self::Replay => write!(f, "replay"),
        }
    }
}
