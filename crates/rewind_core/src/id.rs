//! Thread identifiers.
//!
//! Two identifier spaces exist. A [`ThreadId`] is the small slot index the
//! instrumentation framework hands out, stable between record and replay. A
//! [`KernelTid`] is whatever the operating system assigned, which differs on
//! every run.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Number of thread slots in every per-thread table.
pub const MAX_THREAD_SLOTS: usize = 500;

/// Thread slot identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(u32);

impl ThreadId {
    /// No thread. Used as the header thread of scheduling entries, which are
    /// produced while nobody holds the execution token.
    pub const INVALID: Self = Self(0);

    /// The initial thread of the monitored process.
    pub const MAIN: Self = Self(1);

    /// Create from a raw slot number without range checking
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Create from a raw slot number
    ///
    /// # Errors
    ///
    /// Returns error if the slot does not fit the slot table
    pub fn checked(raw: u32) -> CoreResult<Self> {
        if (raw as usize) < MAX_THREAD_SLOTS {
            Ok(Self(raw))
        } else {
            Err(CoreError::SlotOutOfRange {
                slot: raw,
                limit: MAX_THREAD_SLOTS,
            })
        }
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Index into a slot table
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.0 as usize
    }

    /// Whether this names a real thread
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }

    /// Whether this is the initial thread
    #[must_use]
    pub const fn is_main(&self) -> bool {
        self.0 == Self::MAIN.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tid{}", self.0)
    }
}

impl From<u32> for ThreadId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Kernel-assigned thread identifier (an LWP id on Linux)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KernelTid(u32);

impl KernelTid {
    /// Create from raw value
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for KernelTid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lwp{}", self.0)
    }
}

impl From<u32> for KernelTid {
    fn from(value: u32) -> Self {
        Self(value)
    }
}
