//! Thread exit probes.
//!
//! A thread that gave up the token for the last time may still be tearing
//! down in the kernel. Before the next acquirer runs, the engine asks the
//! probe registered for that thread whether the OS has finished with it.

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Answers "has this thread's exit been observed by the OS yet?"
pub trait ExitProbe: Send + Sync + fmt::Debug {
    /// True once the thread is gone
    fn exit_observed(&self) -> bool;
}

/// Value the kernel stores on exit, or the threading library stores once the
/// thread is joined.
fn is_exit_value(value: i32) -> bool {
    value == 0 || value == -1
}

/// Linux `clear_child_tid` word of a client thread.
///
/// The kernel zeroes this word when the thread exits.
#[cfg(target_os = "linux")]
#[derive(Debug)]
pub struct ClearChildTid {
    addr: usize,
}

#[cfg(target_os = "linux")]
impl ClearChildTid {
    /// Create a probe polling the `i32` at `addr`.
    ///
    /// # Safety
    ///
    /// `addr` must point to a readable, aligned `i32` for as long as the
    /// probe is registered with a session.
    #[must_use]
    pub const unsafe fn new(addr: usize) -> Self {
        Self { addr }
    }

    /// Polled address
    #[must_use]
    pub const fn addr(&self) -> usize {
        self.addr
    }
}

#[cfg(target_os = "linux")]
impl ExitProbe for ClearChildTid {
    fn exit_observed(&self) -> bool {
        // SAFETY: validity of `addr` is the contract of `ClearChildTid::new`.
        let value = unsafe { std::ptr::read_volatile(self.addr as *const i32) };
        is_exit_value(value)
    }
}

/// In-process exit flag, cleared by whoever observes the thread's exit.
#[derive(Debug, Clone)]
pub struct SharedExitFlag(Arc<AtomicI32>);

impl SharedExitFlag {
    /// Create a flag holding `value`; anything but 0 or -1 means running
    #[must_use]
    pub fn new(value: i32) -> Self {
        Self(Arc::new(AtomicI32::new(value)))
    }

    /// Store a new value
    pub fn set(&self, value: i32) {
        self.0.store(value, Ordering::Release);
    }

    /// Mark the thread as exited
    pub fn clear(&self) {
        self.set(0);
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> i32 {
        self.0.load(Ordering::Acquire)
    }
}

impl ExitProbe for SharedExitFlag {
    fn exit_observed(&self) -> bool {
        is_exit_value(self.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_flag() {
        let flag = SharedExitFlag::new(4242);
        let probe = flag.clone();
        assert!(!probe.exit_observed());
        flag.clear();
        assert!(probe.exit_observed());
        flag.set(-1);
        assert!(probe.exit_observed());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_clear_child_tid() {
        let word = Box::new(AtomicI32::new(77));
        let probe = unsafe { ClearChildTid::new(word.as_ptr() as usize) };
        assert!(!probe.exit_observed());
        word.store(0, Ordering::SeqCst);
        assert!(probe.exit_observed());
        word.store(-1, Ordering::SeqCst);
        assert!(probe.exit_observed());
    }
}
