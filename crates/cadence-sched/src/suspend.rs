//! Suspend, hold and trigger protocol.
//!
//! Suspension is a bitmask per processor: a processor runs only while no reason bit is set.
//! Ordinary suspension keeps virtual time passing for the processor (it is carried forward
//! whenever the others reach an event); a *hold* also stops its clock ("nocount"), and on release
//! the processor is resynchronized to the current instant instead of replaying missed time.
//!
//! Suspending the processor whose burst is in flight revokes the rest of its budget immediately.
//! This is the only preemption mechanism: the interpreter notices its zeroed budget at the next
//! instruction boundary.

use tracing::{debug, trace, warn};

use crate::clock::Seconds;
use crate::error::Result;
use crate::processor::{ProcessorId, SuspendReason, TriggerId};
use crate::scheduler::Scheduler;
use crate::timer::{Callback, TimerHandle};

impl<E: Clone> Scheduler<E> {
    /// Sets or clears `reason` in the suspension mask of `processor`. Time keeps passing for the
    /// processor while it is suspended this way.
    pub fn suspend(&mut self, processor: ProcessorId, reason: SuspendReason, suspend: bool) {
        self.set_suspended(processor, reason, suspend, false);
    }

    /// Like [`Scheduler::suspend`], but virtual time stops for the processor while it is held
    /// (reset lines, bus requests).
    pub fn hold(&mut self, processor: ProcessorId, reason: SuspendReason, hold: bool) {
        self.set_suspended(processor, reason, hold, true);
    }

    /// Whether any bit of `reason` is set for `processor`.
    pub fn is_suspended(&self, processor: ProcessorId, reason: SuspendReason) -> bool {
        self.processors[processor].suspend.intersects(reason)
    }

    /// Whether any bit of `reason` is set for `processor` and its clock is stopped.
    pub fn is_held(&self, processor: ProcessorId, reason: SuspendReason) -> bool {
        let entry = &self.processors[processor];
        entry.nocount && entry.suspend.intersects(reason)
    }

    pub(crate) fn set_suspended(
        &mut self,
        processor: ProcessorId,
        reason: SuspendReason,
        on: bool,
        nocount: bool,
    ) {
        let now = self.local_time();
        let is_active = self.active == Some(processor);
        let entry = &mut self.processors[processor];
        let was_suspended = entry.is_suspended();
        let was_nocount = entry.nocount;

        if on {
            entry.suspend |= reason;
            entry.nocount = if was_suspended {
                was_nocount || nocount
            } else {
                nocount
            };
        } else {
            entry.suspend -= reason;
        }

        if on && is_active && !was_suspended {
            let revoked = entry.revoke_budget();
            trace!(processor, revoked, "running processor suspended");
        } else if !on && was_suspended && !entry.is_suspended() {
            // A burst still in flight is settled by `account`, which adds what actually ran.
            if was_nocount && !is_active && now > entry.clock.time() {
                entry.clock.set_time(now);
                entry.lost = 0;
            }
            entry.nocount = false;
        }
        debug!(
            processor,
            mask = ?entry.suspend,
            nocount = entry.nocount,
            "suspension changed"
        );
    }

    /// Holds `processor` (clock stopped) until `trigger` is broadcast.
    pub fn await_trigger(&mut self, processor: ProcessorId, trigger: TriggerId) {
        self.processors[processor].trigger = Some(trigger);
        self.set_suspended(processor, SuspendReason::TRIGGER, true, true);
    }

    /// Suspends `processor` (clock running) until `trigger` is broadcast.
    pub fn spin_until_trigger(&mut self, processor: ProcessorId, trigger: TriggerId) {
        self.processors[processor].trigger = Some(trigger);
        self.set_suspended(processor, SuspendReason::SPIN, true, false);
    }

    /// Broadcasts `trigger`, releasing every processor waiting on it.
    ///
    /// The processor currently running (if any) has its burst cut short first, so whatever it does
    /// next is ordered after the processors woken here. Returns the number of processors woken.
    pub fn fire_trigger(&mut self, trigger: TriggerId) -> usize {
        if let Some(p) = self.active {
            self.processors[p].revoke_budget();
        }

        let mut woken = 0;
        for p in 0..self.processors.len() {
            let entry = &mut self.processors[p];
            let waiting =
                entry.trigger == Some(trigger) && entry.suspend.intersects(SuspendReason::WAITING);
            if !waiting {
                continue;
            }
            entry.trigger = None;
            self.set_suspended(p, SuspendReason::WAITING, false, false);
            woken += 1;
        }

        if woken == 0 {
            debug!(%trigger, "trigger fired with no waiting processors");
        } else {
            debug!(%trigger, woken, "trigger fired");
        }
        woken
    }

    /// Broadcasts `trigger` after `delay` seconds.
    pub fn fire_trigger_after(&mut self, delay: Seconds, trigger: TriggerId) -> Result<TimerHandle> {
        let timer = self.alloc_internal(Callback::Trigger(trigger), true)?;
        self.arm(timer, delay, None, Some(0.0));
        Ok(timer)
    }

    /// Suspends `processor` (clock running) for `duration` seconds.
    pub fn spin_until_time(&mut self, processor: ProcessorId, duration: Seconds) -> Result<()> {
        let trigger = TriggerId(self.next_internal_trigger);
        self.next_internal_trigger += 1;
        if self.next_internal_trigger == TriggerId::YIELD.0 {
            self.next_internal_trigger = TriggerId::INTERNAL_BASE;
        }
        self.fire_trigger_after(duration, trigger)?;
        self.spin_until_trigger(processor, trigger);
        Ok(())
    }

    /// Suspends `processor` (clock running) until the end of the current timeslice, that is, until
    /// the next event firing pass.
    pub fn yield_processor(&mut self, processor: ProcessorId) {
        self.processors[processor].trigger = Some(TriggerId::YIELD);
        self.set_suspended(processor, SuspendReason::YIELD, true, false);
    }

    pub(crate) fn release_yielders(&mut self) {
        let waiting = self
            .processors
            .iter()
            .any(|entry| entry.trigger == Some(TriggerId::YIELD));
        if waiting {
            self.fire_trigger(TriggerId::YIELD);
        }
    }

    /// Forces all processors to synchronize every `timeslice` seconds for the next `duration`
    /// seconds.
    ///
    /// A boost already in progress is replaced.
    pub fn boost_interleave(&mut self, timeslice: Seconds, duration: Seconds) -> Result<()> {
        if let Some(pulse) = self.boost.take() {
            if self.timers.contains(pulse) {
                self.timers.release(pulse);
            }
        }
        let pulse = self.alloc_internal(Callback::Nop, false)?;
        self.arm(pulse, timeslice, None, Some(timeslice));
        let end = match self.alloc_internal(Callback::EndBoost(pulse), true) {
            Ok(end) => end,
            Err(err) => {
                self.timers.release(pulse);
                return Err(err);
            }
        };
        self.arm(end, duration, None, Some(0.0));
        self.boost = Some(pulse);
        debug!(timeslice, duration, "interleave boosted");
        Ok(())
    }

    pub fn get_overclock(&self, processor: ProcessorId) -> f64 {
        self.processors[processor].clock.overclock()
    }

    /// Changes the overclock multiplier of `processor`.
    ///
    /// Only budgets computed from now on are affected. Non-positive factors are ignored.
    pub fn set_overclock(&mut self, processor: ProcessorId, factor: f64) {
        if !(factor > 0.0) || !factor.is_finite() {
            warn!(processor, factor, "ignoring invalid overclock factor");
            return;
        }
        self.processors[processor].clock.set_overclock(factor);
        debug!(processor, factor, "overclock changed");
    }
}
