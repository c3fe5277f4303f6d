//! Host-side glue: the dispatch loop that alternates processor bursts and event firing.

use tracing::{trace, warn};

use crate::clock::{Seconds, TIME_NEVER};
use crate::error::{Result, SchedError};
use crate::scheduler::{Scheduler, Slice};
use crate::timer::{Callback, TimerAction, TimerHandle};

/// The machine a [`Scheduler`] drives.
///
/// Both methods receive the scheduler mutably, so interpreters and device models can arm timers,
/// suspend processors and fire triggers while they run.
pub trait Host<E> {
    /// Runs `slice.processor` until its budget cell ([`Scheduler::budget`]) is exhausted and
    /// returns the cycles consumed, i.e. `slice.cycles` minus whatever is left in the cell.
    ///
    /// Cycles revoked while the burst was in flight are included in that count; the scheduler
    /// subtracts them itself.
    fn execute(&mut self, sched: &mut Scheduler<E>, slice: Slice) -> u64;

    /// Called when a host timer expires.
    fn timer_fired(&mut self, sched: &mut Scheduler<E>, timer: TimerHandle, event: &E)
        -> TimerAction;
}

/// Why [`Scheduler::run_until`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// Virtual time reached the deadline.
    Deadline,
    /// [`Scheduler::request_stop`] was called.
    Stopped,
    /// No processor can run and no event is pending.
    Stalled,
}

impl<E: Clone> Scheduler<E> {
    /// Returns the next burst to run, firing due events as needed.
    ///
    /// Returns `None` only when nothing can ever run again: every processor is suspended and the
    /// timer queue holds no armed timer. It also returns `None`, without doing anything, when
    /// called from inside a burst or a timer callback.
    pub fn next_slice<H: Host<E> + ?Sized>(&mut self, host: &mut H) -> Option<Slice> {
        if self.in_dispatch() {
            warn!("next_slice called from inside a burst or timer callback");
            return None;
        }
        loop {
            if let Some(slice) = self.schedule() {
                return Some(slice);
            }
            if self.fire_due(host) == 0 && self.timers.head_key() >= TIME_NEVER {
                return None;
            }
        }
    }

    /// Runs `host` until the absolute virtual time `deadline`.
    ///
    /// Processors stop exactly at the deadline (it bounds every burst like any other event);
    /// events due at the deadline have all fired when this returns [`RunExit::Deadline`].
    ///
    /// Calling it from [`Host::execute`] or [`Host::timer_fired`] fails with
    /// [`SchedError::Reentrant`].
    pub fn run_until<H: Host<E> + ?Sized>(
        &mut self,
        host: &mut H,
        deadline: Seconds,
    ) -> Result<RunExit> {
        if self.in_dispatch() {
            warn!("run_until called from inside a burst or timer callback");
            return Err(SchedError::Reentrant);
        }
        self.stop_requested = false;
        self.deadline_reached = false;
        if self.now() >= deadline {
            return Ok(RunExit::Deadline);
        }

        let marker = self.alloc_internal(Callback::Deadline, true)?;
        let delay = deadline - self.now();
        self.arm(marker, delay, None, Some(0.0));

        let exit = loop {
            if !self.timers.contains(marker) {
                warn!(?marker, "run deadline timer vanished; stopping");
                break RunExit::Stopped;
            }
            if let Some(slice) = self.schedule() {
                let ran = host.execute(self, slice);
                self.account(slice.processor, ran);
                if self.stop_requested {
                    break RunExit::Stopped;
                }
                continue;
            }

            let fired = self.fire_due(host);
            if self.deadline_reached {
                break RunExit::Deadline;
            }
            if self.stop_requested {
                break RunExit::Stopped;
            }
            if fired == 0 && self.timers.head_key() >= TIME_NEVER {
                break RunExit::Stalled;
            }
        };

        if self.timers.contains(marker) {
            self.timers.release(marker);
        }
        trace!(?exit, now = self.now(), "run loop exited");
        Ok(exit)
    }

    /// Runs `host` for `duration` seconds of virtual time from now.
    pub fn run_for<H: Host<E> + ?Sized>(
        &mut self,
        host: &mut H,
        duration: Seconds,
    ) -> Result<RunExit> {
        let deadline = self.now() + duration;
        self.run_until(host, deadline)
    }
}
