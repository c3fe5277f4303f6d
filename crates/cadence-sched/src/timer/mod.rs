//! Timer storage and ordering.
//!
//! Timers live in a fixed-capacity [`TimerPool`] and are addressed by generation-checked
//! [`TimerHandle`]s, so a handle kept after its timer was released (or after the slot was reused)
//! is detected instead of silently aliasing a different timer.
//!
//! Every live timer is linked exactly once into the pool's time-ordered queue (see `queue.rs`).

mod pool;
mod queue;

pub(crate) use pool::TimerPool;

use crate::processor::TriggerId;

/// Stable reference to a timer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    index: u32,
    generation: u32,
}

impl TimerHandle {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub(crate) fn generation(self) -> u32 {
        self.generation
    }
}

/// Owner tag stamped on timers at allocation, used for bulk cleanup with
/// [`crate::Scheduler::free_tagged`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TimerTag(pub u32);

impl TimerTag {
    /// Carried by the scheduler's own timers (run deadlines, delayed triggers, interleave boosts).
    /// [`crate::Scheduler::free_tagged`] never releases them.
    pub const SCHEDULER: Self = Self(u32::MAX);
}

/// What the scheduler should do with a timer once its host callback returns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimerAction {
    /// Free temporary one-shots, re-arm periodic timers one period later, and leave permanent
    /// one-shots disarmed.
    ///
    /// If the callback already re-armed, disabled, or removed its own timer through the scheduler
    /// API, the timer is left exactly as the callback left it.
    Default,
    /// Release the timer now, permanent or not.
    Remove,
    /// Re-arm the timer to fire again after the given delay, keeping its period.
    Rearm(crate::Seconds),
}

/// What runs when a timer expires.
#[derive(Debug, Clone)]
pub(crate) enum Callback<E> {
    /// Host-defined event, delivered through [`crate::Host::timer_fired`].
    Host(E),
    /// Broadcast a trigger.
    Trigger(TriggerId),
    /// Does nothing; used to force a synchronization point.
    Nop,
    /// Ends an interleave boost by removing its pulse timer.
    EndBoost(TimerHandle),
    /// Marks the end of a [`crate::Scheduler::run_until`] call.
    Deadline,
}
