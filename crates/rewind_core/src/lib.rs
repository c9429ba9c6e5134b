//! rewind core types
//!
//! Pure types shared by the log and the engine: thread identifiers, the
//! process-wide record/replay mode and session configuration. No I/O happens
//! here apart from parsing option strings.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod id;
pub mod mode;

// Re-exports
pub use config::{RrConfig, DEFAULT_LOG_NAME};
pub use error::{CoreError, CoreResult};
pub use id::{KernelTid, ThreadId, MAX_THREAD_SLOTS};
pub use mode::RrMode;
