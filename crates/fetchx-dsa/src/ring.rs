use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt;

/// Number of one-second slots in the delay wheel (ten minutes of coverage).
pub const WHEEL_SLOTS: usize = 600;

/// A value parked in a slot, addressed by the id it was scheduled under.
#[derive(Debug)]
pub struct Slotted<T> {
    pub id: u64,
    pub value: T,
}

/// A fixed-size circular array of FIFO slots driven by an external cursor.
///
/// Slot `i` holds the values that become due when the cursor reaches `i`.
/// A value inserted with offset `n` lands in `(position + n) % slot_count`,
/// so an offset equal to the slot count lands in the current slot and is only
/// due after a full revolution.
///
/// Ids must be handed out in increasing order by the caller. Because values are
/// appended at the back, every slot stays sorted by id, which is what lets
/// `pop_due` stop at a cutoff without scanning.
///
/// ## Mechanical Sympathy
/// - **One cursor, no per-entry timers**: the owner drives `advance` from a
///   single periodic tick regardless of how many values are parked.
/// - **Slot-local cancellation**: `remove` scans one slot, never the ring.
pub struct SlotRing<T> {
    slots: Vec<VecDeque<Slotted<T>>>,
    position: usize,
    len: usize,
}

impl<T> SlotRing<T> {
    pub fn new(slot_count: usize) -> Self {
        assert!(slot_count > 0, "SlotRing needs at least one slot");
        let mut slots = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            slots.push(VecDeque::new());
        }

        Self {
            slots,
            position: 0,
            len: 0,
        }
    }

    #[inline(always)]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    #[inline(always)]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Total number of parked values across all slots.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn slot_len(&self, slot: usize) -> usize {
        self.slots.get(slot).map_or(0, VecDeque::len)
    }

    /// Appends `value` to the slot `offset` ticks ahead of the cursor and
    /// returns the index of that slot.
    pub fn insert(&mut self, offset: usize, id: u64, value: T) -> usize {
        let count = self.slots.len();
        let slot = (self.position + offset % count) % count;
        self.slots[slot].push_back(Slotted { id, value });
        self.len += 1;
        slot
    }

    /// Removes the value parked under `id` in `slot`, if it is still there.
    pub fn remove(&mut self, slot: usize, id: u64) -> Option<T> {
        let queue = self.slots.get_mut(slot)?;
        let idx = queue.iter().position(|parked| parked.id == id)?;
        let removed = queue.remove(idx)?;
        self.len -= 1;
        Some(removed.value)
    }

    /// Moves the cursor one slot forward and returns the new position.
    pub fn advance(&mut self) -> usize {
        self.position = (self.position + 1) % self.slots.len();
        self.position
    }

    /// Pops the oldest value in `slot` whose id is at most `cutoff`.
    ///
    /// Intended to be called in a loop while the owner fires each value.
    /// The drain is live: a value removed from the slot between two calls is
    /// never returned, and values appended after the cutoff was taken stay
    /// parked for the next revolution.
    pub fn pop_due(&mut self, slot: usize, cutoff: u64) -> Option<Slotted<T>> {
        let queue = self.slots.get_mut(slot)?;
        if queue.front()?.id > cutoff {
            return None;
        }
        let popped = queue.pop_front()?;
        self.len -= 1;
        Some(popped)
    }

    /// Drops every parked value and rewinds the cursor to slot 0.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
        self.position = 0;
        self.len = 0;
    }
}

impl<T> fmt::Debug for SlotRing<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotRing")
            .field("slots", &self.slots.len())
            .field("position", &self.position)
            .field("len", &self.len)
            .finish()
    }
}

static_assertions::assert_impl_all!(SlotRing<alloc::string::String>: Send, Sync);

#[cfg(kani)]
mod proofs {
    use super::*;

    #[kani::proof]
    #[kani::unwind(4)]
    fn prove_insert_index_in_bounds() {
        let mut ring: SlotRing<u8> = SlotRing::new(3);
        let advances: u8 = kani::any();
        kani::assume(advances < 3);
        for _ in 0..advances {
            ring.advance();
        }

        // Any offset, including ones far past a revolution, must wrap into the ring.
        let offset: usize = kani::any();
        let slot = ring.insert(offset, 1, 0);
        assert!(slot < ring.slot_count());
        assert!(ring.remove(slot, 1).is_some());
    }
}
