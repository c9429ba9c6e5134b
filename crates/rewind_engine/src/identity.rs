//! Thread identity map.
//!
//! The kernel hands out fresh thread ids on every run. During replay each
//! slot remembers the id seen at record time next to the one the kernel gave
//! this time, so syscalls that must reproduce a kernel-visible id can
//! translate in both directions. The table is small and fixed, so lookups
//! scan it.

use crate::error::{EngineError, EngineResult};
use crate::exit::ExitProbe;
use rewind_core::{KernelTid, ThreadId, MAX_THREAD_SLOTS};
use std::sync::Arc;

/// Identifiers of one thread slot
#[derive(Debug, Clone, Default)]
pub struct IdentityRecord {
    /// Kernel id at record time
    pub recorded: Option<KernelTid>,
    /// Kernel id in this run
    pub kernel: Option<KernelTid>,
    exit_probe: Option<Arc<dyn ExitProbe>>,
}

impl IdentityRecord {
    /// Whether the slot holds identifiers
    #[must_use]
    pub const fn is_occupied(&self) -> bool {
        self.recorded.is_some() || self.kernel.is_some()
    }

    /// Whether an exit probe is registered
    #[must_use]
    pub const fn has_exit_probe(&self) -> bool {
        self.exit_probe.is_some()
    }
}

/// Fixed table of [`IdentityRecord`]s indexed by thread slot
#[derive(Debug)]
pub struct IdentityMap {
    slots: Vec<IdentityRecord>,
}

impl IdentityMap {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: vec![IdentityRecord::default(); MAX_THREAD_SLOTS],
        }
    }

    /// Fill an empty slot.
    ///
    /// # Errors
    ///
    /// Returns error if the slot is invalid or already in use
    pub fn create(&mut self, slot: ThreadId, recorded: KernelTid, kernel: KernelTid) -> EngineResult<()> {
        let record = self.slot_mut(slot)?;
        if record.is_occupied() {
            return Err(EngineError::SlotOccupied { slot });
        }
        record.recorded = Some(recorded);
        record.kernel = Some(kernel);
        record.exit_probe = None;
        Ok(())
    }

    /// Kernel id in this run of the thread recorded as `recorded`
    #[must_use]
    pub fn lookup_by_record_id(&self, recorded: KernelTid) -> Option<KernelTid> {
        self.slots
            .iter()
            .find(|record| record.recorded == Some(recorded))
            .and_then(|record| record.kernel)
    }

    /// Record-time id of the thread the kernel now calls `kernel`
    #[must_use]
    pub fn lookup_by_replay_id(&self, kernel: KernelTid) -> Option<KernelTid> {
        self.slots
            .iter()
            .find(|record| record.kernel == Some(kernel))
            .and_then(|record| record.recorded)
    }

    /// Forget a slot's identifiers. A registered exit probe stays until the
    /// exit wait has consumed it.
    pub fn clear(&mut self, slot: ThreadId) {
        if let Some(record) = self.slots.get_mut(slot.slot()) {
            record.recorded = None;
            record.kernel = None;
        }
    }

    /// Attach an exit probe to a slot, replacing any previous one
    ///
    /// # Errors
    ///
    /// Returns error if the slot is invalid
    pub fn register_exit_probe(&mut self, slot: ThreadId, probe: Arc<dyn ExitProbe>) -> EngineResult<()> {
        self.slot_mut(slot)?.exit_probe = Some(probe);
        Ok(())
    }

    /// Detach and return a slot's exit probe
    pub fn take_exit_probe(&mut self, slot: ThreadId) -> Option<Arc<dyn ExitProbe>> {
        self.slots.get_mut(slot.slot())?.exit_probe.take()
    }

    /// Get a slot
    #[must_use]
    pub fn get(&self, slot: ThreadId) -> Option<&IdentityRecord> {
        self.slots.get(slot.slot())
    }

    /// Number of slots holding identifiers
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|r| r.is_occupied()).count()
    }

    fn slot_mut(&mut self, slot: ThreadId) -> EngineResult<&mut IdentityRecord> {
        if !slot.is_valid() {
            return Err(EngineError::InvalidSlot { slot });
        }
        self.slots
            .get_mut(slot.slot())
            .ok_or(EngineError::InvalidSlot { slot })
    }
}

impl Default for IdentityMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::SharedExitFlag;

    fn lwp(raw: u32) -> KernelTid {
        KernelTid::from_raw(raw)
    }

    #[test]
    fn test_bidirectional_lookup() {
        let mut map = IdentityMap::new();
        map.create(ThreadId::from_raw(2), lwp(1001), lwp(2001)).unwrap();
        map.create(ThreadId::from_raw(3), lwp(1002), lwp(2002)).unwrap();

        assert_eq!(map.lookup_by_record_id(lwp(1002)), Some(lwp(2002)));
        assert_eq!(map.lookup_by_replay_id(lwp(2001)), Some(lwp(1001)));
        assert_eq!(map.lookup_by_record_id(lwp(2001)), None);
        assert_eq!(map.occupied(), 2);
    }

    #[test]
    fn test_create_rejects_bad_slots() {
        let mut map = IdentityMap::new();
        let err = map.create(ThreadId::INVALID, lwp(1), lwp(2)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSlot { .. }));

        let err = map
            .create(ThreadId::from_raw(MAX_THREAD_SLOTS as u32), lwp(1), lwp(2))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidSlot { .. }));

        map.create(ThreadId::from_raw(4), lwp(1), lwp(2)).unwrap();
        let err = map.create(ThreadId::from_raw(4), lwp(3), lwp(4)).unwrap_err();
        assert!(matches!(err, EngineError::SlotOccupied { .. }));
    }

    #[test]
    fn test_clear_keeps_probe_and_allows_reuse() {
        let mut map = IdentityMap::new();
        let slot = ThreadId::from_raw(5);
        map.create(slot, lwp(10), lwp(20)).unwrap();
        map.register_exit_probe(slot, Arc::new(SharedExitFlag::new(1)))
            .unwrap();

        map.clear(slot);
        assert_eq!(map.lookup_by_record_id(lwp(10)), None);
        assert!(map.get(slot).unwrap().has_exit_probe());

        assert!(map.take_exit_probe(slot).is_some());
        assert!(map.take_exit_probe(slot).is_none());
        map.create(slot, lwp(11), lwp(21)).unwrap();
        assert_eq!(map.lookup_by_replay_id(lwp(21)), Some(lwp(11)));
    }
}
