//! Execution token.
//!
//! Only the thread holding the token runs client code. Recording logs the
//! order in which threads took it; replaying hands it out in that same
//! order, so threads that ask early yield until the log says it is their
//! turn.

use crate::error::EngineResult;
use crate::schedule::Admission;
use crate::session::Session;
use rewind_core::ThreadId;
use rewind_log::{CallerClass, ReleaseTag};
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// The process-wide execution token, guarding the session
#[derive(Debug)]
pub struct ExecutionToken {
    session: Mutex<Session>,
}

impl ExecutionToken {
    /// Wrap a session
    #[must_use]
    pub fn new(session: Session) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }

    /// Take the session back out
    #[must_use]
    pub fn into_inner(self) -> Session {
        self.session
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until `thread` may run, then hand it the session.
    ///
    /// In replay the calling thread yields until the log schedules it. Once
    /// admitted, it waits for the thread that exited last to leave the
    /// kernel, except on the very first acquisition.
    ///
    /// # Errors
    ///
    /// Returns error if the first caller is not the main thread, the caller
    /// class differs from the recorded one, the log has no further
    /// acquisitions, or on a log failure. All of these are fatal.
    pub fn acquire(&self, thread: ThreadId, class: CallerClass) -> EngineResult<TokenGuard<'_>> {
        loop {
            let mut session = self.lock();
            match session.admit(thread, class)? {
                Admission::NotYet => {
                    drop(session);
                    std::thread::yield_now();
                }
                Admission::First => return Ok(TokenGuard { session, thread }),
                Admission::Admitted => {
                    session.wait_for_exiting_thread();
                    return Ok(TokenGuard { session, thread });
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held execution token
///
/// Dropping the guard unlocks without logging a release; use
/// [`TokenGuard::release`] or [`TokenGuard::exit_thread`] on every path
/// that hands the token on.
#[derive(Debug)]
pub struct TokenGuard<'a> {
    session: MutexGuard<'a, Session>,
    thread: ThreadId,
}

impl TokenGuard<'_> {
    /// Thread holding the token
    #[must_use]
    pub const fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Hand the token on, tagged with why
    ///
    /// # Errors
    ///
    /// Returns error on a log failure, or if the recorded release has a
    /// different tag
    pub fn release(mut self, tag: impl Into<ReleaseTag>) -> EngineResult<()> {
        let thread = self.thread;
        self.session.release_token(thread, tag.into())
    }

    /// Release for the last time as the thread exits. The next thread to
    /// acquire waits for this one to leave the kernel.
    ///
    /// # Errors
    ///
    /// Returns error on a log failure or desync
    pub fn exit_thread(mut self) -> EngineResult<()> {
        let thread = self.thread;
        self.session.exit_thread(thread)
    }
}

impl Deref for TokenGuard<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl DerefMut for TokenGuard<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}
