//! Time ordering over the live entries of a [`TimerPool`].
//!
//! The queue is a doubly-linked list threaded through the pool slots. Insertion walks from the
//! head, so same-instant entries keep their insertion order (FIFO). Two expire times closer than
//! `epsilon` count as the same instant, which keeps that order stable under floating-point
//! rounding.

use super::{TimerHandle, TimerPool};
use crate::clock::{Seconds, TIME_NEVER};

impl<E> TimerPool<E> {
    /// Links `handle` into the queue at the position given by its sort key.
    ///
    /// The entry is placed before the first entry whose key exceeds its own by more than
    /// `epsilon`. Already-linked or stale handles are ignored.
    pub(crate) fn insert(&mut self, handle: TimerHandle, epsilon: Seconds) {
        let Some(key) = self.get(handle).map(|entry| entry.sort_key()) else {
            return;
        };
        let index = handle.index() as u32;
        if self.slots[index as usize].linked {
            return;
        }

        let mut cursor = self.head;
        while let Some(at) = cursor {
            if self.key_at(at) - key > epsilon {
                break;
            }
            cursor = self.slots[at as usize].next;
        }

        let prev = match cursor {
            Some(before) => self.slots[before as usize].prev,
            None => self.tail,
        };
        {
            let slot = &mut self.slots[index as usize];
            slot.prev = prev;
            slot.next = cursor;
            slot.linked = true;
        }
        match prev {
            Some(p) => self.slots[p as usize].next = Some(index),
            None => self.head = Some(index),
        }
        match cursor {
            Some(n) => self.slots[n as usize].prev = Some(index),
            None => self.tail = Some(index),
        }
    }

    /// Unlinks `handle` from the queue without releasing it.
    pub(crate) fn remove(&mut self, handle: TimerHandle) {
        if !self.contains(handle) {
            return;
        }
        let index = handle.index();
        let (prev, next) = {
            let slot = &mut self.slots[index];
            if !slot.linked {
                return;
            }
            slot.linked = false;
            (slot.prev.take(), slot.next.take())
        };
        match prev {
            Some(p) => self.slots[p as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n as usize].prev = prev,
            None => self.tail = prev,
        }
    }

    /// Moves `handle` to the position matching its current sort key.
    pub(crate) fn reposition(&mut self, handle: TimerHandle, epsilon: Seconds) {
        self.remove(handle);
        self.insert(handle, epsilon);
    }

    pub(crate) fn head(&self) -> Option<TimerHandle> {
        self.head
            .map(|index| TimerHandle::new(index, self.slots[index as usize].generation))
    }

    /// Sort key of the queue head, or [`TIME_NEVER`] for an empty queue.
    pub(crate) fn head_key(&self) -> Seconds {
        self.head.map_or(TIME_NEVER, |index| self.key_at(index))
    }

    /// The queue head, if it is armed and due at or before `end` (within `epsilon`).
    pub(crate) fn head_due(&self, end: Seconds, epsilon: Seconds) -> Option<TimerHandle> {
        let head = self.head?;
        let key = self.key_at(head);
        (key < TIME_NEVER && key - end <= epsilon)
            .then(|| TimerHandle::new(head, self.slots[head as usize].generation))
    }

    pub(super) fn iter_queue(&self) -> impl Iterator<Item = u32> + '_ {
        std::iter::successors(self.head, move |&index| self.slots[index as usize].next)
    }

    fn key_at(&self, index: u32) -> Seconds {
        self.slots[index as usize]
            .entry
            .as_ref()
            .map_or(TIME_NEVER, |entry| entry.sort_key())
    }
}
