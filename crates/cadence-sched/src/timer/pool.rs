use super::{Callback, TimerHandle, TimerTag};
use crate::clock::{Seconds, TIME_NEVER};
use crate::error::{Result, SchedError};

#[derive(Debug, Clone)]
pub(crate) struct TimerEntry<E> {
    pub(crate) callback: Callback<E>,
    pub(crate) enabled: bool,
    /// Released automatically after firing once, unless re-armed during its own callback.
    pub(crate) temporary: bool,
    pub(crate) tag: TimerTag,
    /// Zero for one-shot timers.
    pub(crate) period: Seconds,
    pub(crate) start: Seconds,
    pub(crate) expire: Seconds,
}

impl<E> TimerEntry<E> {
    fn new(callback: Callback<E>, temporary: bool, tag: TimerTag) -> Self {
        Self {
            callback,
            enabled: false,
            temporary,
            tag,
            period: 0.0,
            start: 0.0,
            expire: TIME_NEVER,
        }
    }

    #[inline]
    pub(crate) fn is_periodic(&self) -> bool {
        self.period > 0.0
    }

    /// Position of this entry in the queue; disabled entries sort as "never".
    #[inline]
    pub(crate) fn sort_key(&self) -> Seconds {
        if self.enabled {
            self.expire
        } else {
            TIME_NEVER
        }
    }
}

#[derive(Debug)]
pub(super) struct Slot<E> {
    pub(super) generation: u32,
    pub(super) entry: Option<TimerEntry<E>>,
    pub(super) prev: Option<u32>,
    pub(super) next: Option<u32>,
    pub(super) linked: bool,
    next_free: Option<u32>,
}

/// Fixed-capacity arena of timer entries with an intrusive free list.
///
/// The pool also owns the links of the time-ordered queue; see the `queue` module for the
/// ordering operations.
#[derive(Debug)]
pub(crate) struct TimerPool<E> {
    pub(super) slots: Vec<Slot<E>>,
    free_head: Option<u32>,
    live: usize,
    pub(super) head: Option<u32>,
    pub(super) tail: Option<u32>,
}

impl<E> TimerPool<E> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|i| Slot {
                generation: 0,
                entry: None,
                prev: None,
                next: None,
                linked: false,
                next_free: (i + 1 < capacity).then(|| (i + 1) as u32),
            })
            .collect();
        Self {
            slots,
            free_head: (capacity > 0).then_some(0),
            live: 0,
            head: None,
            tail: None,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn live(&self) -> usize {
        self.live
    }

    /// Takes a slot from the free list and links the new (disarmed) entry into the queue.
    pub(crate) fn allocate(
        &mut self,
        callback: Callback<E>,
        temporary: bool,
        tag: TimerTag,
        epsilon: Seconds,
    ) -> Result<TimerHandle> {
        let index = self.free_head.ok_or(SchedError::PoolExhausted {
            capacity: self.capacity(),
        })?;
        let slot = &mut self.slots[index as usize];
        self.free_head = slot.next_free.take();
        slot.entry = Some(TimerEntry::new(callback, temporary, tag));
        let handle = TimerHandle::new(index, slot.generation);
        self.live += 1;
        self.insert(handle, epsilon);
        Ok(handle)
    }

    /// Unlinks the entry and returns its slot to the free list.
    ///
    /// Returns the released entry, or `None` if the handle was stale.
    pub(crate) fn release(&mut self, handle: TimerHandle) -> Option<TimerEntry<E>> {
        if !self.contains(handle) {
            return None;
        }
        self.remove(handle);
        let slot = &mut self.slots[handle.index()];
        let entry = slot.entry.take();
        slot.generation = slot.generation.wrapping_add(1);
        slot.next_free = self.free_head;
        self.free_head = Some(handle.index() as u32);
        self.live -= 1;
        entry
    }

    #[inline]
    pub(crate) fn contains(&self, handle: TimerHandle) -> bool {
        self.slots
            .get(handle.index())
            .is_some_and(|slot| slot.generation == handle.generation() && slot.entry.is_some())
    }

    pub(crate) fn get(&self, handle: TimerHandle) -> Option<&TimerEntry<E>> {
        let slot = self.slots.get(handle.index())?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.entry.as_ref()
    }

    pub(crate) fn get_mut(&mut self, handle: TimerHandle) -> Option<&mut TimerEntry<E>> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Handles of every live timer, in queue order.
    pub(crate) fn handles(&self) -> Vec<TimerHandle> {
        self.iter_queue()
            .map(|index| TimerHandle::new(index, self.slots[index as usize].generation))
            .collect()
    }

    /// Applies `delta` to the start and expire times of every live timer.
    ///
    /// Entries expiring at [`TIME_NEVER`] keep that value. Relative order is unchanged, so the
    /// queue does not need to be re-sorted.
    pub(crate) fn shift_all(&mut self, delta: Seconds) {
        for entry in self.slots.iter_mut().filter_map(|slot| slot.entry.as_mut()) {
            entry.start += delta;
            if entry.expire < TIME_NEVER {
                entry.expire += delta;
            }
        }
    }
}
