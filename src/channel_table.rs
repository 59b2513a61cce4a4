//! The event loop's channel table: a growable free-list slab mapping a
//! stable [`EventId`] to a registered fd/timer, its interest mask, and its
//! read/write callbacks.
//!
//! Callbacks take `&mut EventLoop` rather than capturing one: a channel
//! holding a reference to the loop that owns its own table is inexpressible
//! without `Rc`/unsafe, so the loop instead reborrows itself into the
//! callback at dispatch time (see `EventLoop::run_once`).

use crate::event_loop::EventLoop;
use crate::sys::socket::RawSocket;

/// The interest mask a channel is registered for.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Interest {
    bits: u8,
}

const READABLE: u8 = 0b01;
const WRITABLE: u8 = 0b10;

impl Interest {
    pub const READABLE: Interest = Interest { bits: READABLE };
    pub const WRITABLE: Interest = Interest { bits: WRITABLE };

    pub fn none() -> Interest {
        Interest { bits: 0 }
    }

    pub fn is_readable(self) -> bool {
        self.bits & READABLE != 0
    }

    pub fn is_writable(self) -> bool {
        self.bits & WRITABLE != 0
    }

    pub fn with_readable(self, on: bool) -> Interest {
        Interest {
            bits: if on { self.bits | READABLE } else { self.bits & !READABLE },
        }
    }

    pub fn with_writable(self, on: bool) -> Interest {
        Interest {
            bits: if on { self.bits | WRITABLE } else { self.bits & !WRITABLE },
        }
    }
}

impl std::ops::BitOr for Interest {
    type Output = Interest;
    fn bitor(self, rhs: Interest) -> Interest {
        Interest { bits: self.bits | rhs.bits }
    }
}

/// A stable handle to a channel-table slot: the slot index plus the
/// generation stamped into it at registration time.
///
/// The generation guards against ABA: an id captured before a `delete_event`
/// and reused on a later `register_*` call compares unequal to the id of
/// whatever now occupies that slot, because the generation was bumped on
/// delete.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct EventId {
    index: u32,
    generation: u32,
}

impl EventId {
    fn new(index: u32, generation: u32) -> EventId {
        EventId { index, generation }
    }

    pub(crate) fn index(self) -> usize {
        self.index as usize
    }

    pub(crate) fn generation(self) -> u32 {
        self.generation
    }

    /// Packs into a single `u64` for storage in a backend's opaque
    /// user-data field (epoll's `u64`, kqueue's `udata`).
    pub(crate) fn to_u64(self) -> u64 {
        (u64::from(self.index) << 32) | u64::from(self.generation)
    }

    pub(crate) fn from_u64(bits: u64) -> EventId {
        EventId {
            index: (bits >> 32) as u32,
            generation: bits as u32,
        }
    }
}

pub(crate) const INVALID_EVENT_ID: EventId = EventId { index: u32::MAX, generation: 0 };

const INITIAL_CAPACITY: usize = 16;
const FREE_TAIL: u32 = u32::MAX;

/// One row of the channel table.
pub(crate) struct Channel {
    pub(crate) fd: Option<RawSocket>,
    pub(crate) interest: Interest,
    pub(crate) active: bool,
    pub(crate) is_timer: bool,
    generation: u32,
    /// Free-list link when `!active`; unused when `active`.
    next_free: u32,
    pub(crate) on_read: Option<Box<dyn FnMut(&mut EventLoop) + Send>>,
    pub(crate) on_write: Option<Box<dyn FnMut(&mut EventLoop) + Send>>,
}

impl Channel {
    fn free(generation: u32, next_free: u32) -> Channel {
        Channel {
            fd: None,
            interest: Interest::none(),
            active: false,
            is_timer: false,
            generation,
            next_free,
            on_read: None,
            on_write: None,
        }
    }
}

/// A growable, doubling, free-list-backed table of channels.
///
/// Allocation never shrinks and never invalidates an existing `EventId`
/// (indices are stable across grows; only the backing `Vec` reallocates).
pub struct ChannelTable {
    slots: Vec<Channel>,
    free_head: u32,
    active_count: usize,
}

impl ChannelTable {
    pub fn new() -> ChannelTable {
        ChannelTable::with_capacity(INITIAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> ChannelTable {
        let mut table = ChannelTable {
            slots: Vec::new(),
            free_head: FREE_TAIL,
            active_count: 0,
        };
        table.grow_to(capacity.next_power_of_two().max(INITIAL_CAPACITY));
        table
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn active_count(&self) -> usize {
        self.active_count
    }

    pub fn free_count(&self) -> usize {
        self.slots.len() - self.active_count
    }

    fn grow_to(&mut self, new_len: usize) {
        let old_len = self.slots.len();
        debug_assert!(new_len > old_len);
        // Link new slots in increasing order, tail pointing at whatever was
        // previously the head so existing free slots stay reachable; the new
        // head is the lowest new index, so allocation order starts at old_len.
        let old_head = self.free_head;
        for i in old_len..new_len {
            let next = if i + 1 < new_len { (i + 1) as u32 } else { old_head };
            self.slots.push(Channel::free(0, next));
        }
        self.free_head = old_len as u32;
    }

    fn grow(&mut self) {
        let old_len = self.slots.len();
        self.grow_to(old_len * 2);
    }

    /// Allocates a free slot, initializing it, and returns its id.
    pub(crate) fn insert(
        &mut self,
        fd: Option<RawSocket>,
        interest: Interest,
        is_timer: bool,
        on_read: Option<Box<dyn FnMut(&mut EventLoop) + Send>>,
        on_write: Option<Box<dyn FnMut(&mut EventLoop) + Send>>,
    ) -> EventId {
        if self.free_head == FREE_TAIL {
            self.grow();
        }
        let index = self.free_head;
        let slot = &mut self.slots[index as usize];
        self.free_head = slot.next_free;

        slot.fd = fd;
        slot.interest = interest;
        slot.active = true;
        slot.is_timer = is_timer;
        slot.on_read = on_read;
        slot.on_write = on_write;
        slot.next_free = FREE_TAIL;

        self.active_count += 1;
        EventId::new(index, slot.generation)
    }

    /// Validates that `id` still refers to the slot it was issued for.
    pub(crate) fn is_valid(&self, id: EventId) -> bool {
        self.slots
            .get(id.index())
            .is_some_and(|c| c.active && c.generation == id.generation())
    }

    pub(crate) fn get(&self, id: EventId) -> Option<&Channel> {
        self.slots.get(id.index()).filter(|c| c.active && c.generation == id.generation())
    }

    pub(crate) fn get_mut(&mut self, id: EventId) -> Option<&mut Channel> {
        let generation = id.generation();
        self.slots
            .get_mut(id.index())
            .filter(|c| c.active && c.generation == generation)
    }

    /// Disables interest and returns the slot to the free list, bumping its
    /// generation so any stale copy of `id` is rejected from now on.
    pub(crate) fn remove(&mut self, id: EventId) -> Option<Channel> {
        if !self.is_valid(id) {
            return None;
        }
        let index = id.index();
        let slot = &mut self.slots[index];
        let taken = std::mem::replace(slot, Channel::free(slot.generation.wrapping_add(1), self.free_head));
        self.free_head = index as u32;
        self.active_count -= 1;
        Some(taken)
    }

    /// Takes the read callback out of its slot, leaving the slot otherwise
    /// untouched, so it can be invoked without holding a borrow of the
    /// table (the callback may itself call back into the loop).
    pub(crate) fn take_on_read(&mut self, id: EventId) -> Option<Box<dyn FnMut(&mut EventLoop) + Send>> {
        self.get_mut(id).and_then(|c| c.on_read.take())
    }

    pub(crate) fn take_on_write(&mut self, id: EventId) -> Option<Box<dyn FnMut(&mut EventLoop) + Send>> {
        self.get_mut(id).and_then(|c| c.on_write.take())
    }

    /// Restores a previously-taken callback, but only if `id` is still the
    /// current occupant of its slot (the callback may have deleted itself).
    pub(crate) fn restore_on_read(&mut self, id: EventId, cb: Box<dyn FnMut(&mut EventLoop) + Send>) {
        if let Some(c) = self.get_mut(id) {
            c.on_read = Some(cb);
        }
    }

    pub(crate) fn restore_on_write(&mut self, id: EventId, cb: Box<dyn FnMut(&mut EventLoop) + Send>) {
        if let Some(c) = self.get_mut(id) {
            c.on_write = Some(cb);
        }
    }
}

impl Default for ChannelTable {
    fn default() -> ChannelTable {
        ChannelTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_delete_cycle_matches_scenario() {
        let mut table = ChannelTable::new();
        assert_eq!(table.len(), 16);

        let id0 = table.insert(None, Interest::none(), true, None, None);
        assert_eq!(id0.index(), 0);
        assert_eq!(table.active_count(), 1);

        table.remove(id0);
        assert_eq!(table.active_count(), 0);

        // Re-registering immediately reuses slot 0 (LIFO free list), with a
        // bumped generation.
        let id0_again = table.insert(None, Interest::none(), true, None, None);
        assert_eq!(id0_again.index(), 0);
        assert_ne!(id0_again.generation(), id0.generation());

        table.remove(id0_again);

        // Register 17 times: the table doubles to 32 on the 17th call.
        let mut ids = Vec::new();
        for _ in 0..17 {
            ids.push(table.insert(None, Interest::none(), false, None, None));
        }
        assert_eq!(table.len(), 32);
        assert_eq!(table.active_count(), 17);
    }

    #[test]
    fn stale_id_is_rejected_after_reuse() {
        let mut table = ChannelTable::new();
        let id = table.insert(None, Interest::none(), false, None, None);
        table.remove(id);
        let _reused = table.insert(None, Interest::none(), false, None, None);
        assert!(!table.is_valid(id));
        assert!(table.get(id).is_none());
    }

    #[test]
    fn active_and_free_count_sum_to_table_size() {
        let mut table = ChannelTable::new();
        let mut ids = Vec::new();
        for _ in 0..20 {
            ids.push(table.insert(None, Interest::none(), false, None, None));
        }
        assert_eq!(table.active_count() + table.free_count(), table.len());
        for id in ids.drain(..10) {
            table.remove(id);
        }
        assert_eq!(table.active_count() + table.free_count(), table.len());
        assert_eq!(table.active_count(), 10);
    }
}
