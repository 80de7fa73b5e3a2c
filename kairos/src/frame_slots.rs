use kairos_shared::parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::frame_clock::SlotIndex;

/// Three copies of the frame state, indexed by [`SlotIndex`].
///
/// Update tasks write `slots.write(context.update_slot)` and render hooks read the render and
/// previous slots. Because the roles of [`crate::TripleBufferState`] are always distinct, the locks
/// are never contended as long as everyone accesses the slot of their role.
#[derive(Debug, Default)]
pub struct FrameSlots<T> {
    slots: [RwLock<T>; 3],
}

impl<T: Clone> FrameSlots<T> {
    pub fn new(initial: T) -> Self {
        Self {
            slots: [RwLock::new(initial.clone()), RwLock::new(initial.clone()), RwLock::new(initial)],
        }
    }
}

impl<T> FrameSlots<T> {
    pub fn read(&self, slot: SlotIndex) -> RwLockReadGuard<'_, T> {
        self.slots[slot.index()].read()
    }

    pub fn write(&self, slot: SlotIndex) -> RwLockWriteGuard<'_, T> {
        self.slots[slot.index()].write()
    }

    pub fn try_read(&self, slot: SlotIndex) -> Option<RwLockReadGuard<'_, T>> {
        self.slots[slot.index()].try_read()
    }

    pub fn try_write(&self, slot: SlotIndex) -> Option<RwLockWriteGuard<'_, T>> {
        self.slots[slot.index()].try_write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_independent() {
        let slots = FrameSlots::new(0u32);
        *slots.write(SlotIndex::ALL[1]) = 7;
        assert_eq!(*slots.read(SlotIndex::ALL[0]), 0);
        assert_eq!(*slots.read(SlotIndex::ALL[1]), 7);

        let _reader = slots.read(SlotIndex::ALL[2]);
        assert!(slots.try_write(SlotIndex::ALL[2]).is_none());
        assert!(slots.try_write(SlotIndex::ALL[0]).is_some());
    }
}
