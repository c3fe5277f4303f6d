//! Per-processor scheduling state.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;

use crate::clock::ProcessorClock;

/// Index of a processor in the scheduling table, in the order it was configured.
pub type ProcessorId = usize;

bitflags! {
    /// Reasons a processor is not allowed to run.
    ///
    /// A processor runs only while its mask is empty. Hosts may use any bit from
    /// [`SuspendReason::host`] upwards for their own hold lines.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct SuspendReason: u32 {
        /// Held in reset. Every processor starts with this bit set.
        const RESET = 1 << 0;
        /// Halted by the host or a device model.
        const HALT = 1 << 1;
        /// Spinning (clock running) until a trigger or a point in time.
        const SPIN = 1 << 2;
        /// Waiting for a trigger broadcast.
        const TRIGGER = 1 << 3;
        /// Yielding until the end of the current timeslice.
        const YIELD = 1 << 4;
        /// Disabled by the machine configuration.
        const DISABLE = 1 << 5;
    }
}

impl SuspendReason {
    /// First bit available to host-defined reasons.
    pub const FIRST_HOST_BIT: u32 = 8;

    /// Bits cleared when the trigger a processor waits on is broadcast.
    pub(crate) const WAITING: Self = Self::TRIGGER.union(Self::SPIN).union(Self::YIELD);

    /// Host-defined reason `n` (`0..24`).
    pub fn host(n: u32) -> Self {
        assert!(n < 32 - Self::FIRST_HOST_BIT, "host suspend reason out of range");
        Self::from_bits_retain(1 << (Self::FIRST_HOST_BIT + n))
    }
}

/// Identifier of a named wake-up condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerId(pub u64);

impl TriggerId {
    /// Broadcast at the end of every event firing pass to release yielding processors.
    pub const YIELD: TriggerId = TriggerId(u64::MAX);

    /// Start of the range handed out for internal spin-until-time triggers.
    pub(crate) const INTERNAL_BASE: u64 = 1 << 63;
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:#x}", self.0)
    }
}

/// Remaining-cycle counter shared between the scheduler and a processor interpreter.
///
/// The scheduler writes the burst budget before each burst and zeroes it to cut a burst short;
/// the interpreter decrements it as it executes and stops once it is no longer positive. It may
/// go negative when the last instruction overruns the budget.
#[derive(Debug, Clone, Default)]
pub struct CycleBudget(Rc<Cell<i64>>);

impl CycleBudget {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self) -> i64 {
        self.0.get()
    }

    #[inline]
    pub fn set(&self, cycles: i64) {
        self.0.set(cycles);
    }

    /// Charges `cycles` to the budget and returns what remains.
    #[inline]
    pub fn consume(&self, cycles: i64) -> i64 {
        let left = self.0.get() - cycles;
        self.0.set(left);
        left
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.0.get() <= 0
    }
}

/// Invoked with the number of cycles revoked from a running burst.
pub type BurnFn = Box<dyn FnMut(u64)>;

pub(crate) struct ProcessorEntry {
    pub(crate) index: ProcessorId,
    pub(crate) budget: CycleBudget,
    burn: Option<BurnFn>,
    /// Budget written at the start of the current burst.
    pub(crate) granted: i64,
    pub(crate) suspend: SuspendReason,
    /// Virtual time does not pass for this processor while it is suspended.
    pub(crate) nocount: bool,
    pub(crate) trigger: Option<TriggerId>,
    /// Cycles granted in the current burst but revoked before they ran.
    pub(crate) lost: i64,
    pub(crate) clock: ProcessorClock,
    /// Cycles executed plus cycles skipped while suspended-but-counting.
    pub(crate) total_cycles: u64,
}

impl ProcessorEntry {
    /// Creates an entry held in reset.
    pub(crate) fn new(index: ProcessorId, clock: ProcessorClock) -> Self {
        Self {
            index,
            budget: CycleBudget::new(),
            burn: None,
            granted: 0,
            suspend: SuspendReason::RESET,
            nocount: true,
            trigger: None,
            lost: 0,
            clock,
            total_cycles: 0,
        }
    }

    #[inline]
    pub(crate) fn is_suspended(&self) -> bool {
        !self.suspend.is_empty()
    }

    pub(crate) fn set_burn(&mut self, burn: BurnFn) {
        self.burn = Some(burn);
    }

    /// Cycles executed so far in the current burst.
    #[inline]
    pub(crate) fn cycles_run_in_burst(&self) -> i64 {
        self.granted - self.budget.get() - self.lost
    }

    /// Takes back whatever is left of the current burst budget.
    ///
    /// The unused cycles are recorded as lost, reported to the burn callback, and the budget cell
    /// is zeroed so the interpreter returns at its next budget check. Returns the revoked count.
    pub(crate) fn revoke_budget(&mut self) -> i64 {
        let left = self.budget.get();
        if left <= 0 {
            return 0;
        }
        self.lost += left;
        if let Some(burn) = self.burn.as_mut() {
            burn(left as u64);
        }
        self.budget.set(0);
        left
    }
}

impl fmt::Debug for ProcessorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorEntry")
            .field("index", &self.index)
            .field("budget", &self.budget.get())
            .field("burn", &self.burn.is_some())
            .field("granted", &self.granted)
            .field("suspend", &self.suspend)
            .field("nocount", &self.nocount)
            .field("trigger", &self.trigger)
            .field("lost", &self.lost)
            .field("clock", &self.clock)
            .field("total_cycles", &self.total_cycles)
            .finish()
    }
}
