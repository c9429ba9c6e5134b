//! Guest register state verification.
//!
//! Record logs the whole register state as an opaque snapshot. Replay reads
//! the recorded snapshot back and compares the fields of a [`RegisterLayout`]
//! against the live state. Divergences are counted, never fatal.

use crate::error::{EngineError, EngineResult};
use bytes::{Buf, BufMut};
use rewind_core::ThreadId;
use serde::{Deserialize, Serialize};

/// One comparable register inside a state image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterField {
    /// Register name used in reports
    pub name: String,
    /// Byte offset in the state image
    pub offset: usize,
    /// Width in bytes, 1 to 8
    pub width: usize,
}

impl RegisterField {
    /// Create a new field
    #[must_use]
    pub fn new(name: impl Into<String>, offset: usize, width: usize) -> Self {
        Self {
            name: name.into(),
            offset,
            width,
        }
    }

    fn end(&self) -> usize {
        self.offset + self.width
    }

    fn read(&self, state: &[u8]) -> u64 {
        let mut bytes = &state[self.offset..self.end()];
        bytes.get_uint_le(self.width.min(8))
    }
}

/// Which fields of a register state image are compared
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterLayout {
    fields: Vec<RegisterField>,
}

impl RegisterLayout {
    /// Create a layout from its fields
    #[must_use]
    pub fn new(fields: Vec<RegisterField>) -> Self {
        Self { fields }
    }

    /// General purpose and segment registers of the x86 guest state.
    ///
    /// The descriptor table pointers (LDT, GDT) point at blocks allocated by
    /// the runtime and legitimately differ between runs, so they are left
    /// out.
    #[must_use]
    pub fn x86_linux() -> Self {
        let dwords = ["EAX", "ECX", "EDX", "EBX", "ESP", "EBP", "ESI", "EDI", "EIP"];
        let segments = ["CS", "DS", "ES", "FS", "GS", "SS"];

        let mut fields = Vec::with_capacity(dwords.len() + segments.len());
        for (i, name) in dwords.iter().enumerate() {
            fields.push(RegisterField::new(*name, i * 4, 4));
        }
        let base = dwords.len() * 4;
        for (i, name) in segments.iter().enumerate() {
            fields.push(RegisterField::new(*name, base + i * 2, 2));
        }
        Self { fields }
    }

    /// Compared fields
    #[must_use]
    pub fn fields(&self) -> &[RegisterField] {
        &self.fields
    }

    /// Smallest state image every field fits in
    #[must_use]
    pub fn min_len(&self) -> usize {
        self.fields.iter().map(RegisterField::end).max().unwrap_or(0)
    }

    /// Fields whose value differs between the two images.
    ///
    /// Both images must be at least [`Self::min_len`] bytes.
    #[must_use]
    pub fn diff(&self, live: &[u8], recorded: &[u8]) -> Vec<FieldMismatch> {
        self.fields
            .iter()
            .filter(|field| live[field.offset..field.end()] != recorded[field.offset..field.end()])
            .map(|field| FieldMismatch {
                name: field.name.clone(),
                runtime: field.read(live),
                recorded: field.read(recorded),
            })
            .collect()
    }
}

impl Default for RegisterLayout {
    fn default() -> Self {
        Self::x86_linux()
    }
}

/// A register whose live value differs from the recorded one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMismatch {
    /// Register name
    pub name: String,
    /// Value now
    pub runtime: u64,
    /// Value at record time
    pub recorded: u64,
}

/// Compares register snapshots and tallies diverging calls
#[derive(Debug, Clone)]
pub struct GuestStateVerifier {
    layout: RegisterLayout,
    report_limit: u64,
    diverged: u64,
    scratch: Vec<u8>,
}

impl GuestStateVerifier {
    /// Create a verifier. Mismatching fields are reported in detail while
    /// fewer than `report_limit` calls have diverged.
    #[must_use]
    pub fn new(layout: RegisterLayout, report_limit: u64) -> Self {
        Self {
            layout,
            report_limit,
            diverged: 0,
            scratch: Vec::new(),
        }
    }

    /// Comparison layout
    #[must_use]
    pub const fn layout(&self) -> &RegisterLayout {
        &self.layout
    }

    /// Number of calls that found at least one mismatching field
    #[must_use]
    pub const fn diverged(&self) -> u64 {
        self.diverged
    }

    /// Reject a state image the layout does not fit in
    ///
    /// # Errors
    ///
    /// Returns error if `live` is shorter than the layout needs
    pub fn check_len(&self, live: &[u8]) -> EngineResult<()> {
        let needed = self.layout.min_len();
        if live.len() < needed {
            return Err(EngineError::StateTooShort {
                len: live.len(),
                needed,
            });
        }
        Ok(())
    }

    /// Zeroed scratch buffer of `len` bytes for the recorded image.
    ///
    /// Hand it back with [`Self::compare`].
    pub fn take_scratch(&mut self, len: usize) -> Vec<u8> {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        scratch.resize(len, 0);
        scratch
    }

    /// Compare `live` with the recorded image and keep the scratch buffer.
    ///
    /// Returns the mismatching fields; a non-empty result counts as one
    /// divergence however many fields differ.
    pub fn compare(&mut self, thread: ThreadId, live: &[u8], recorded: Vec<u8>) -> Vec<FieldMismatch> {
        let mismatches = self.layout.diff(live, &recorded);
        self.scratch = recorded;

        if mismatches.is_empty() {
            return mismatches;
        }
        if self.diverged < self.report_limit {
            for m in &mismatches {
                tracing::warn!(
                    thread = %thread,
                    "Guest {} not expected. runtime/recorded=0x{:X}/0x{:X}",
                    m.name,
                    m.runtime,
                    m.recorded
                );
            }
        }
        self.diverged += 1;
        mismatches
    }
}

/// x86 guest register image in the layout [`RegisterLayout::x86_linux`]
/// compares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct X86Snapshot {
    pub eax: u32,
    pub ecx: u32,
    pub edx: u32,
    pub ebx: u32,
    pub esp: u32,
    pub ebp: u32,
    pub esi: u32,
    pub edi: u32,
    pub eip: u32,
    pub cs: u16,
    pub ds: u16,
    pub es: u16,
    pub fs: u16,
    pub gs: u16,
    pub ss: u16,
    pub ldt: u32,
    pub gdt: u32,
}

impl X86Snapshot {
    /// Size of the byte image
    pub const SIZE: usize = 9 * 4 + 6 * 2 + 2 * 4;

    /// Byte image, little-endian
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        {
            let mut buf = &mut out[..];
            for reg in [
                self.eax, self.ecx, self.edx, self.ebx, self.esp, self.ebp, self.esi, self.edi,
                self.eip,
            ] {
                buf.put_u32_le(reg);
            }
            for seg in [self.cs, self.ds, self.es, self.fs, self.gs, self.ss] {
                buf.put_u16_le(seg);
            }
            buf.put_u32_le(self.ldt);
            buf.put_u32_le(self.gdt);
        }
        out
    }

    /// Parse a byte image
    #[must_use]
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let mut buf = &bytes[..];
        Self {
            eax: buf.get_u32_le(),
            ecx: buf.get_u32_le(),
            edx: buf.get_u32_le(),
            ebx: buf.get_u32_le(),
            esp: buf.get_u32_le(),
            ebp: buf.get_u32_le(),
            esi: buf.get_u32_le(),
            edi: buf.get_u32_le(),
            eip: buf.get_u32_le(),
            cs: buf.get_u16_le(),
            ds: buf.get_u16_le(),
            es: buf.get_u16_le(),
            fs: buf.get_u16_le(),
            gs: buf.get_u16_le(),
            ss: buf.get_u16_le(),
            ldt: buf.get_u32_le(),
            gdt: buf.get_u32_le(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn regs() -> X86Snapshot {
        X86Snapshot {
            eax: 4,
            ebx: 1,
            esp: 0xBFFF_F000,
            eip: 0x0804_8000,
            cs: 0x73,
            ss: 0x7B,
            ldt: 0x1000,
            gdt: 0x2000,
            ..X86Snapshot::default()
        }
    }

    #[test]
    fn test_x86_layout_offsets() {
        let layout = RegisterLayout::x86_linux();
        let names: Vec<_> = layout.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            ["EAX", "ECX", "EDX", "EBX", "ESP", "EBP", "ESI", "EDI", "EIP", "CS", "DS", "ES", "FS", "GS", "SS"]
        );
        let ss = &layout.fields()[14];
        assert_eq!((ss.offset, ss.width), (46, 2));
        assert_eq!(layout.min_len(), 48);
        assert_eq!(X86Snapshot::SIZE, 56);
    }

    #[test]
    fn test_snapshot_image() {
        let bytes = regs().to_bytes();
        assert_eq!(&bytes[32..36], &0x0804_8000u32.to_le_bytes());
        assert_eq!(&bytes[36..38], &0x73u16.to_le_bytes());
        assert_eq!(X86Snapshot::from_bytes(&bytes), regs());
    }

    #[test]
    fn test_descriptor_tables_ignored() {
        let mut other = regs();
        other.ldt = 0x9999;
        other.gdt = 0x8888;
        let layout = RegisterLayout::x86_linux();
        assert!(layout.diff(&regs().to_bytes(), &other.to_bytes()).is_empty());
    }

    #[test]
    fn test_one_count_per_call() {
        let mut verifier = GuestStateVerifier::new(RegisterLayout::x86_linux(), 10);
        let mut recorded = regs();
        recorded.eax = 5;
        recorded.ds = 0x2B;

        let scratch = verifier.take_scratch(X86Snapshot::SIZE);
        assert_eq!(scratch.len(), X86Snapshot::SIZE);
        let mismatches =
            verifier.compare(ThreadId::MAIN, &regs().to_bytes(), recorded.to_bytes().to_vec());
        assert_eq!(mismatches.len(), 2);
        assert_eq!(mismatches[0].name, "EAX");
        assert_eq!((mismatches[0].runtime, mismatches[0].recorded), (4, 5));
        assert_eq!(verifier.diverged(), 1);

        let same = regs().to_bytes();
        assert!(verifier.compare(ThreadId::MAIN, &same, same.to_vec()).is_empty());
        assert_eq!(verifier.diverged(), 1);
    }

    #[test]
    fn test_short_state_rejected() {
        let verifier = GuestStateVerifier::new(RegisterLayout::x86_linux(), 10);
        assert!(matches!(
            verifier.check_len(&[0u8; 20]),
            Err(EngineError::StateTooShort { len: 20, needed: 48 })
        ));
        assert!(verifier.check_len(&[0u8; 56]).is_ok());
    }

    #[test]
    fn test_custom_layout() {
        let layout = RegisterLayout::new(vec![RegisterField::new("RIP", 8, 8)]);
        let mut live = [0u8; 16];
        let recorded = [0u8; 16];
        live[0] = 1;
        assert!(layout.diff(&live, &recorded).is_empty());
        live[15] = 0x80;
        let diff = layout.diff(&live, &recorded);
        assert_eq!(diff[0].runtime, 0x8000_0000_0000_0000);
    }

    proptest! {
        #[test]
        fn prop_single_field_counts_once(field in 0usize..15, delta in 1u32..0xFFFF) {
            let layout = RegisterLayout::x86_linux();
            let live = regs().to_bytes();
            let mut recorded = live;
            let f = &layout.fields()[field];
            let bumped = (f.read(&live) as u32).wrapping_add(delta).to_le_bytes();
            recorded[f.offset..f.offset + f.width].copy_from_slice(&bumped[..f.width]);

            let mut verifier = GuestStateVerifier::new(layout.clone(), 10);
            let diff = verifier.compare(ThreadId::MAIN, &live, recorded.to_vec());
            prop_assert_eq!(diff.len(), 1);
            prop_assert_eq!(verifier.diverged(), 1);
        }
    }
}
