//! Initial client image.
//!
//! The initial stack holds environment-dependent bytes (environment
//! variables, auxiliary vector) that differ from run to run. Replay throws
//! away the stack it built and installs the recorded one.

use serde::{Deserialize, Serialize};

/// Page size assumed for the client address space
pub const PAGE_SIZE: usize = 4096;

/// Whether `addr` is on a page boundary
#[must_use]
pub const fn is_page_aligned(addr: usize) -> bool {
    addr % PAGE_SIZE == 0
}

/// Round down to a page boundary
#[must_use]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

/// Client stack as set up by the image loader
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackImage {
    /// Stack pointer the client starts with
    pub initial_sp: usize,
    /// Address of the auxiliary vector
    pub auxv: usize,
    /// End of the stack segment (the stack top)
    pub stack_end: usize,
    /// Page-aligned base of the used stack
    pub stack_base: usize,
}

impl StackImage {
    /// Create from the loader's stack pointer and auxv address
    #[must_use]
    pub const fn new(initial_sp: usize, auxv: usize) -> Self {
        Self {
            initial_sp,
            auxv,
            stack_end: 0,
            stack_base: 0,
        }
    }
}

/// Writable view of client memory
pub trait GuestMemory {
    /// The `len` bytes at client address `addr`, if accessible
    fn bytes_mut(&mut self, addr: usize, len: usize) -> Option<&mut [u8]>;
}

/// Client memory backed by a single buffer mapped at `base`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferMemory {
    base: usize,
    bytes: Vec<u8>,
}

impl BufferMemory {
    /// Map `bytes` at client address `base`
    #[must_use]
    pub const fn new(base: usize, bytes: Vec<u8>) -> Self {
        Self { base, bytes }
    }

    /// Zeroed region of `len` bytes at `base`
    #[must_use]
    pub fn zeroed(base: usize, len: usize) -> Self {
        Self::new(base, vec![0; len])
    }

    /// Backing bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl GuestMemory for BufferMemory {
    fn bytes_mut(&mut self, addr: usize, len: usize) -> Option<&mut [u8]> {
        let start = addr.checked_sub(self.base)?;
        let end = start.checked_add(len)?;
        self.bytes.get_mut(start..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_helpers() {
        assert!(is_page_aligned(0x0804_8000));
        assert!(!is_page_aligned(0xBFFF_FFFF));
        assert!(is_page_aligned(0xBFFF_FFFF + 1));
        assert_eq!(page_round_down(0xBFFF_E123), 0xBFFF_E000);
    }

    #[test]
    fn test_buffer_memory_bounds() {
        let mut mem = BufferMemory::zeroed(0x1000, 0x100);
        assert_eq!(mem.bytes_mut(0x1000, 0x100).map(|b| b.len()), Some(0x100));
        assert!(mem.bytes_mut(0x0FFF, 1).is_none());
        assert!(mem.bytes_mut(0x10F0, 0x20).is_none());
        mem.bytes_mut(0x1010, 2).unwrap().copy_from_slice(&[7, 8]);
        assert_eq!(&mem.as_bytes()[0x10..0x12], &[7, 8]);
    }
}
