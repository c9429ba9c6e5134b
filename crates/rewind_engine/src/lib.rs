//! Rewind record/replay engine
//!
//! Drives a [`Session`] through record or replay of a guest run: the client
//! command line and initial image, system call arguments, results and
//! memory effects, timestamp reads, and the order in which threads hold the
//! [`ExecutionToken`]. Replay feeds every recorded value back and treats a
//! mismatch in event order as fatal. Register state and dispatch counters
//! are compared too, but only counted as soft divergences.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cmdline;
pub mod error;
pub mod exit;
pub mod gate;
pub mod identity;
pub mod initimg;
pub mod schedule;
pub mod session;
pub mod verifier;

pub use cmdline::ClientCommandLine;
pub use error::{fatal, EngineError, EngineResult};
#[cfg(target_os = "linux")]
pub use exit::ClearChildTid;
pub use exit::{ExitProbe, SharedExitFlag};
pub use gate::{ExecutionToken, TokenGuard};
pub use identity::{IdentityMap, IdentityRecord};
pub use initimg::{BufferMemory, GuestMemory, StackImage, PAGE_SIZE};
pub use schedule::{Admission, ScheduleState, Turn};
pub use session::{DivergenceStats, LogChannel, LogSink, Session, SessionSummary};
pub use verifier::{FieldMismatch, GuestStateVerifier, RegisterField, RegisterLayout, X86Snapshot};
