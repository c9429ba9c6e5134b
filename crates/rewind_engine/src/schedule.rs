//! Execution token scheduling state.
//!
//! In replay the state names the thread the log admits next. It is only
//! touched by the thread holding the token, or by a waiter that has just
//! locked it to look.

use crate::error::{EngineError, EngineResult};
use rewind_core::ThreadId;
use rewind_log::CallerClass;

/// Whose turn it is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    /// Nobody has held the token yet
    NotStarted,
    /// This thread, for this reason, is admitted next
    Scheduled {
        /// Next holder
        thread: ThreadId,
        /// Why it asks
        class: CallerClass,
    },
    /// The log recorded no further acquisition
    Exhausted,
}

/// Outcome of checking a thread against the schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First acquisition of the process; nothing is logged
    First,
    /// The thread may run
    Admitted,
    /// Another thread is scheduled; yield and retry
    NotYet,
}

/// Scheduling state of a session
#[derive(Debug, Clone)]
pub struct ScheduleState {
    turn: Turn,
    exiting: Option<ThreadId>,
}

impl ScheduleState {
    /// Create the initial state
    #[must_use]
    pub const fn new() -> Self {
        Self {
            turn: Turn::NotStarted,
            exiting: None,
        }
    }

    /// Current turn
    #[must_use]
    pub const fn turn(&self) -> Turn {
        self.turn
    }

    /// Whether the first acquisition has happened
    #[must_use]
    pub fn started(&self) -> bool {
        self.turn != Turn::NotStarted
    }

    /// Check whether `thread` may take the token now.
    ///
    /// The caller class is only compared once it is `thread`'s turn.
    ///
    /// # Errors
    ///
    /// Returns error if the first acquirer is not the main thread, the class
    /// differs from the recorded one, or the schedule is exhausted
    pub fn admit(&self, thread: ThreadId, class: CallerClass) -> EngineResult<Admission> {
        match self.turn {
            Turn::NotStarted if thread.is_main() => Ok(Admission::First),
            Turn::NotStarted => Err(EngineError::FirstAcquireNotMain(thread)),
            Turn::Scheduled { thread: next, .. } if next != thread => Ok(Admission::NotYet),
            Turn::Scheduled { class: recorded, .. } if recorded != class => {
                Err(EngineError::CallerClassMismatch {
                    thread,
                    runtime: class,
                    recorded,
                })
            }
            Turn::Scheduled { .. } => Ok(Admission::Admitted),
            Turn::Exhausted => Err(EngineError::ScheduleExhausted { thread }),
        }
    }

    /// Record the first acquisition by the main thread
    pub fn start(&mut self) {
        self.turn = Turn::Scheduled {
            thread: ThreadId::MAIN,
            class: CallerClass::Normal,
        };
    }

    /// Admit `thread` next
    pub fn schedule(&mut self, thread: ThreadId, class: CallerClass) {
        self.turn = Turn::Scheduled { thread, class };
    }

    /// No acquisition follows in the log
    pub fn exhaust(&mut self) {
        self.turn = Turn::Exhausted;
    }

    /// Name the thread currently tearing down
    pub fn mark_exiting(&mut self, thread: ThreadId) {
        self.exiting = Some(thread);
    }

    /// Thread currently tearing down, if any
    #[must_use]
    pub const fn exiting(&self) -> Option<ThreadId> {
        self.exiting
    }

    /// Clear and return the exiting-thread marker
    pub fn take_exiting(&mut self) -> Option<ThreadId> {
        self.exiting.take()
    }
}

impl Default for ScheduleState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(raw: u32) -> ThreadId {
        ThreadId::from_raw(raw)
    }

    #[test]
    fn test_first_acquire_must_be_main() {
        let state = ScheduleState::new();
        assert_eq!(
            state.admit(ThreadId::MAIN, CallerClass::Normal).unwrap(),
            Admission::First
        );
        assert!(matches!(
            state.admit(tid(2), CallerClass::Normal),
            Err(EngineError::FirstAcquireNotMain(_))
        ));
    }

    #[test]
    fn test_only_scheduled_thread_admitted() {
        let mut state = ScheduleState::new();
        state.start();
        state.schedule(tid(3), CallerClass::Normal);
        assert_eq!(
            state.admit(tid(2), CallerClass::Normal).unwrap(),
            Admission::NotYet
        );
        assert_eq!(
            state.admit(tid(3), CallerClass::Normal).unwrap(),
            Admission::Admitted
        );
    }

    #[test]
    fn test_class_checked_on_turn_only() {
        let mut state = ScheduleState::new();
        state.schedule(tid(3), CallerClass::Preempt);
        // Not our turn: a differing class is not an error yet
        assert_eq!(
            state.admit(tid(2), CallerClass::Normal).unwrap(),
            Admission::NotYet
        );
        assert!(matches!(
            state.admit(tid(3), CallerClass::Normal),
            Err(EngineError::CallerClassMismatch { .. })
        ));
    }

    #[test]
    fn test_exhausted() {
        let mut state = ScheduleState::new();
        state.start();
        state.exhaust();
        assert!(state.started());
        assert!(matches!(
            state.admit(ThreadId::MAIN, CallerClass::Normal),
            Err(EngineError::ScheduleExhausted { .. })
        ));
    }

    #[test]
    fn test_exiting_marker() {
        let mut state = ScheduleState::new();
        assert_eq!(state.exiting(), None);
        state.mark_exiting(tid(4));
        assert_eq!(state.take_exiting(), Some(tid(4)));
        assert_eq!(state.take_exiting(), None);
    }
}
