//! The scheduler context: processor table, timer queue and global clock.
//!
//! A host drives it with a two-phase loop:
//!
//! 1. [`Scheduler::schedule`] picks a processor and a cycle budget that ends no later than the
//!    next queued event;
//! 2. the host runs that processor and reports back through [`Scheduler::account`].
//!
//! Once no processor may run before the next event, [`Scheduler::fire_due`] fires every event due
//! at that instant. [`crate::Host`] and [`Scheduler::run_until`] wrap the whole loop.

use tracing::{debug, trace, warn};

use crate::clock::{ProcessorClock, Seconds, TIME_NEVER};
use crate::config::{ProcessorSpec, SchedulerConfig};
use crate::error::{Result, SchedError};
use crate::host::Host;
use crate::processor::{BurnFn, CycleBudget, ProcessorEntry, ProcessorId, TriggerId};
use crate::timer::{Callback, TimerAction, TimerHandle, TimerPool, TimerTag};

/// A burst granted by [`Scheduler::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    pub processor: ProcessorId,
    pub cycles: u64,
}

/// The timer currently being fired, and whether its callback changed it through the API.
#[derive(Debug, Clone, Copy)]
struct Firing {
    timer: TimerHandle,
    modified: bool,
}

#[derive(Debug)]
pub struct Scheduler<E> {
    pub(crate) config: SchedulerConfig,
    pub(crate) timers: TimerPool<E>,
    pub(crate) processors: Vec<ProcessorEntry>,
    /// Virtual instant execution is currently at, relative to `global_offset`.
    pub(crate) base_time: Seconds,
    /// Total amount removed from every stored time value by renormalization.
    pub(crate) global_offset: Seconds,
    /// Processor whose burst is in flight.
    pub(crate) active: Option<ProcessorId>,
    /// Round-robin cursor: the processor scanned first by the next pick.
    cursor: usize,
    firing: Option<Firing>,
    tag: TimerTag,
    pub(crate) next_internal_trigger: u64,
    pub(crate) boost: Option<TimerHandle>,
    pub(crate) deadline_reached: bool,
    pub(crate) stop_requested: bool,
}

impl<E: Clone> Scheduler<E> {
    /// Creates a scheduler for the given processors.
    ///
    /// Every processor starts held in reset ([`crate::SuspendReason::RESET`]) and must be released
    /// with [`Scheduler::hold`] before it is scheduled.
    pub fn new(config: SchedulerConfig, processors: &[ProcessorSpec]) -> Result<Self> {
        config.validate()?;
        if processors.is_empty() {
            return Err(SchedError::InvalidConfig("at least one processor is required"));
        }
        for spec in processors {
            spec.validate()?;
        }
        let processors = processors
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                ProcessorEntry::new(index, ProcessorClock::new(spec.clock_hz, spec.overclock))
            })
            .collect();
        Ok(Self {
            timers: TimerPool::with_capacity(config.timer_capacity),
            config,
            processors,
            base_time: 0.0,
            global_offset: 0.0,
            active: None,
            cursor: 0,
            firing: None,
            tag: TimerTag::default(),
            next_internal_trigger: TriggerId::INTERNAL_BASE,
            boost: None,
            deadline_reached: false,
            stop_requested: false,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }

    /// Budget cell the interpreter of `processor` must run against.
    pub fn budget(&self, processor: ProcessorId) -> CycleBudget {
        self.processors[processor].budget.clone()
    }

    /// Installs the callback told about cycles revoked from a running burst of `processor`.
    pub fn set_burn_callback(&mut self, processor: ProcessorId, burn: impl FnMut(u64) + 'static) {
        self.processors[processor].set_burn(Box::new(burn) as BurnFn);
    }

    /// Processor whose burst is in flight, if any.
    pub fn active_processor(&self) -> Option<ProcessorId> {
        self.active
    }

    /// Cycles the active processor has executed so far in its burst (`0` outside a burst).
    pub fn cycles_run_in_burst(&self) -> i64 {
        self.active
            .map_or(0, |p| self.processors[p].cycles_run_in_burst())
    }

    /// Cycles executed by `processor` since start, including the cycles it was credited while
    /// suspended without leaving the time base.
    pub fn total_cycles(&self, processor: ProcessorId) -> u64 {
        self.processors[processor].total_cycles
    }

    pub fn cycles_to_time(&self, processor: ProcessorId, cycles: i64) -> Seconds {
        self.processors[processor].clock.cycles_to_time(cycles)
    }

    pub fn time_to_cycles(&self, processor: ProcessorId, time: Seconds) -> f64 {
        self.processors[processor].clock.time_to_cycles(time)
    }

    /// Absolute virtual time `processor` has reached.
    pub fn processor_time(&self, processor: ProcessorId) -> Seconds {
        self.global_offset + self.processors[processor].clock.time()
    }

    /// Local (unrenormalized-offset) view of the current instant.
    ///
    /// Inside a burst this is the active processor's time plus the cycles it has run so far, so
    /// timers armed by device code are relative to the instruction being executed.
    pub(crate) fn local_time(&self) -> Seconds {
        match self.active {
            Some(p) => {
                let entry = &self.processors[p];
                entry.clock.time() + entry.clock.cycles_to_time(entry.cycles_run_in_burst())
            }
            None => self.base_time,
        }
    }

    /// Current absolute virtual time.
    pub fn now(&self) -> Seconds {
        self.global_offset + self.local_time()
    }

    // ---------------------------------------------------------------------------------------------
    // Timers
    // ---------------------------------------------------------------------------------------------

    /// Sets the owner tag stamped on timers allocated from now on. Returns the previous tag.
    pub fn set_timer_tag(&mut self, tag: TimerTag) -> TimerTag {
        std::mem::replace(&mut self.tag, tag)
    }

    pub fn live_timers(&self) -> usize {
        self.timers.live()
    }

    pub(crate) fn alloc_internal(
        &mut self,
        callback: Callback<E>,
        temporary: bool,
    ) -> Result<TimerHandle> {
        let tag = match callback {
            Callback::Host(_) => self.tag,
            _ => TimerTag::SCHEDULER,
        };
        self.timers
            .allocate(callback, temporary, tag, self.config.time_epsilon)
    }

    /// Allocates a permanent, initially disarmed timer delivering `event`.
    pub fn alloc_timer(&mut self, event: E) -> Result<TimerHandle> {
        self.alloc_internal(Callback::Host(event), false)
    }

    /// Arms `timer` to first fire `delay` seconds from now and then every `period` seconds
    /// (`period == 0` for a one-shot), delivering `event`.
    pub fn adjust_timer(&mut self, timer: TimerHandle, delay: Seconds, event: E, period: Seconds) {
        self.arm(timer, delay, Some(Callback::Host(event)), Some(period));
    }

    /// Allocates a permanent timer firing every `period` seconds, starting one period from now.
    pub fn pulse_timer(&mut self, period: Seconds, event: E) -> Result<TimerHandle> {
        let timer = self.alloc_timer(event)?;
        self.arm(timer, period, None, Some(period));
        Ok(timer)
    }

    /// Allocates a temporary one-shot timer firing `delay` seconds from now.
    ///
    /// The timer is released after it fires unless its own callback re-arms it.
    pub fn set_timer(&mut self, delay: Seconds, event: E) -> Result<TimerHandle> {
        let timer = self.alloc_internal(Callback::Host(event), true)?;
        self.arm(timer, delay, None, Some(0.0));
        Ok(timer)
    }

    /// Re-arms `timer` to fire `delay` seconds from now with its current event and period.
    pub fn reset_timer(&mut self, timer: TimerHandle, delay: Seconds) {
        self.arm(timer, delay, None, None);
    }

    pub(crate) fn arm(
        &mut self,
        timer: TimerHandle,
        delay: Seconds,
        callback: Option<Callback<E>>,
        period: Option<Seconds>,
    ) -> bool {
        let now = self.local_time();
        let Some(entry) = self.timers.get_mut(timer) else {
            warn!(?timer, "arming a stale timer handle");
            return false;
        };
        if let Some(callback) = callback {
            entry.callback = callback;
        }
        if let Some(period) = period {
            entry.period = period.max(0.0);
        }
        entry.enabled = true;
        entry.start = now;
        entry.expire = now + delay;
        let expire = entry.expire;
        self.timers.reposition(timer, self.config.time_epsilon);
        self.note_modified(timer);
        trace!(?timer, expire, "timer armed");

        if self.timers.head() == Some(timer) {
            self.preempt_for(expire);
        }
        true
    }

    /// Cuts the active burst short if it would run past `instant`.
    fn preempt_for(&mut self, instant: Seconds) {
        let Some(p) = self.active else {
            return;
        };
        let entry = &mut self.processors[p];
        let burst_end = entry.clock.time() + entry.clock.cycles_to_time(entry.granted - entry.lost);
        if instant < burst_end {
            let revoked = entry.revoke_budget();
            trace!(processor = p, revoked, "burst cut short by a new queue head");
        }
    }

    /// Releases `timer`.
    ///
    /// Removing an already-released handle is logged and reported as
    /// [`SchedError::DoubleRemoval`]; no state changes.
    pub fn remove_timer(&mut self, timer: TimerHandle) -> Result<()> {
        if !self.timers.contains(timer) {
            warn!(?timer, "removing a timer that was already released");
            return Err(SchedError::DoubleRemoval(timer));
        }
        self.note_modified(timer);
        self.timers.release(timer);
        Ok(())
    }

    /// Releases every live timer carrying `tag`. Returns how many were released.
    ///
    /// [`TimerTag::SCHEDULER`] is refused: those timers belong to the scheduler.
    pub fn free_tagged(&mut self, tag: TimerTag) -> usize {
        if tag == TimerTag::SCHEDULER {
            warn!("refusing to free the scheduler's own timers");
            return 0;
        }
        let doomed: Vec<_> = self
            .timers
            .handles()
            .into_iter()
            .filter(|&h| self.timers.get(h).is_some_and(|entry| entry.tag == tag))
            .collect();
        for &timer in &doomed {
            self.note_modified(timer);
            self.timers.release(timer);
        }
        debug!(tag = tag.0, count = doomed.len(), "freed tagged timers");
        doomed.len()
    }

    /// Enables or disables `timer`, returning whether it was enabled before.
    ///
    /// A disabled timer keeps its expire time but sorts as "never" until enabled again.
    pub fn enable_timer(&mut self, timer: TimerHandle, enable: bool) -> bool {
        let Some(entry) = self.timers.get_mut(timer) else {
            warn!(?timer, "enabling a stale timer handle");
            return false;
        };
        let prior = std::mem::replace(&mut entry.enabled, enable);
        let expire = entry.expire;
        self.timers.reposition(timer, self.config.time_epsilon);
        self.note_modified(timer);
        if enable && self.timers.head() == Some(timer) {
            self.preempt_for(expire);
        }
        prior
    }

    pub fn is_timer_enabled(&self, timer: TimerHandle) -> bool {
        self.timers.get(timer).is_some_and(|entry| entry.enabled)
    }

    /// Seconds since `timer` was last armed or, after it fired, since it fired.
    pub fn time_elapsed(&self, timer: TimerHandle) -> Option<Seconds> {
        let entry = self.timers.get(timer)?;
        Some(self.local_time() - entry.start)
    }

    /// Seconds until `timer` fires, or [`TIME_NEVER`] if it is disarmed.
    pub fn time_left(&self, timer: TimerHandle) -> Option<Seconds> {
        let entry = self.timers.get(timer)?;
        Some(if entry.enabled {
            entry.expire - self.local_time()
        } else {
            TIME_NEVER
        })
    }

    /// Absolute time `timer` was last armed or last fired.
    pub fn start_time(&self, timer: TimerHandle) -> Option<Seconds> {
        let entry = self.timers.get(timer)?;
        Some(self.global_offset + entry.start)
    }

    /// Absolute time `timer` fires next, or [`TIME_NEVER`] if it is disarmed.
    pub fn fire_time(&self, timer: TimerHandle) -> Option<Seconds> {
        let entry = self.timers.get(timer)?;
        Some(if entry.enabled {
            self.global_offset + entry.expire
        } else {
            TIME_NEVER
        })
    }

    /// Whether a burst or a timer callback is in progress.
    pub(crate) fn in_dispatch(&self) -> bool {
        self.active.is_some() || self.firing.is_some()
    }

    fn note_modified(&mut self, timer: TimerHandle) {
        if let Some(firing) = self.firing.as_mut() {
            if firing.timer == timer {
                firing.modified = true;
            }
        }
    }

    // ---------------------------------------------------------------------------------------------
    // Scheduling
    // ---------------------------------------------------------------------------------------------

    /// Picks the next processor to run and grants it the cycles needed to reach the next event.
    ///
    /// Scanning starts after the processor picked last. Returns `None` once every processor that
    /// is not suspended has reached the next event; suspended processors that keep counting time
    /// are then carried forward to that instant as well, and the caller should fire due events
    /// with [`Scheduler::fire_due`].
    pub fn schedule(&mut self) -> Option<Slice> {
        let target = self.timers.head_key();
        let count = self.processors.len();

        for step in 0..count {
            let p = (self.cursor + step) % count;
            let entry = &mut self.processors[p];
            if entry.is_suspended() || entry.clock.time() >= target {
                continue;
            }
            let cycles = entry.clock.cycles_until(target);
            if cycles <= 0 {
                continue;
            }
            entry.granted = cycles;
            entry.lost = 0;
            entry.budget.set(cycles);
            self.active = Some(p);
            self.cursor = (p + 1) % count;
            trace!(processor = p, cycles, target, "burst granted");
            return Some(Slice {
                processor: p,
                cycles: cycles as u64,
            });
        }

        if target < TIME_NEVER {
            self.catch_up_suspended(target);
        }
        None
    }

    /// Advances suspended-but-counting processors to `target`, crediting the skipped cycles.
    fn catch_up_suspended(&mut self, target: Seconds) {
        for entry in &mut self.processors {
            if !entry.is_suspended() || entry.nocount || entry.clock.time() >= target {
                continue;
            }
            let skipped = entry.clock.time_to_cycles(target - entry.clock.time()).round();
            entry.total_cycles += skipped as u64;
            entry.clock.set_time(target);
        }
    }

    /// Accounts for `cycles_ran` cycles executed by `processor` in the burst just finished.
    ///
    /// `cycles_ran` is the full count the interpreter consumed from its budget, including cycles
    /// that were revoked (and are therefore recorded as lost).
    pub fn account(&mut self, processor: ProcessorId, cycles_ran: u64) {
        let entry = &mut self.processors[processor];
        let executed = cycles_ran as i64 - entry.lost;
        if !(entry.is_suspended() && entry.nocount) {
            entry.clock.advance_cycles(executed);
        }
        entry.total_cycles += executed.max(0) as u64;
        entry.lost = 0;
        entry.granted = 0;
        trace!(processor, executed, time = entry.clock.time(), "burst accounted");

        self.renormalize_if_needed();
        self.base_time = self.processors[processor].clock.time();
        self.active = None;
    }

    fn renormalize_if_needed(&mut self) {
        let period = self.config.renormalize_period;
        while self.processors.iter().any(|p| p.clock.time() >= period) {
            for entry in &mut self.processors {
                entry.clock.shift(-period);
            }
            self.timers.shift_all(-period);
            self.base_time -= period;
            self.global_offset += period;
            debug!(global_offset = self.global_offset, "renormalized virtual time");
        }
    }

    /// Fires every event due at the instant the queue head expires.
    ///
    /// Call this after [`Scheduler::schedule`] returned `None`. Events fire in queue order; an
    /// event armed during this pass for the same instant fires in the same pass. Returns the
    /// number of events fired.
    ///
    /// Must not be called from a timer callback; a nested call fires nothing and returns `0`.
    pub fn fire_due<H: Host<E> + ?Sized>(&mut self, host: &mut H) -> usize {
        if self.firing.is_some() {
            warn!("fire_due called from inside a timer callback; ignoring");
            return 0;
        }
        let end = self.timers.head_key();
        let mut fired = 0;

        while let Some(timer) = self.timers.head_due(end, self.config.time_epsilon) {
            let Some(entry) = self.timers.get_mut(timer) else {
                break;
            };
            let periodic = entry.is_periodic();
            let callback = entry.callback.clone();
            self.base_time = entry.expire;
            if !periodic {
                // Disarm before the callback runs, so it sees itself as no longer pending.
                entry.enabled = false;
                self.timers.reposition(timer, self.config.time_epsilon);
            }

            self.firing = Some(Firing {
                timer,
                modified: false,
            });
            trace!(?timer, time = self.base_time, "timer fired");
            let action = match callback {
                Callback::Host(event) => host.timer_fired(self, timer, &event),
                Callback::Trigger(trigger) => {
                    self.fire_trigger(trigger);
                    TimerAction::Default
                }
                Callback::Nop => TimerAction::Default,
                Callback::EndBoost(pulse) => {
                    if self.timers.contains(pulse) {
                        self.timers.release(pulse);
                    }
                    if self.boost == Some(pulse) {
                        self.boost = None;
                    }
                    TimerAction::Default
                }
                Callback::Deadline => {
                    self.deadline_reached = true;
                    TimerAction::Default
                }
            };
            let modified = self.firing.take().is_some_and(|f| f.modified);
            self.finish_fire(timer, action, modified);
            fired += 1;
        }

        self.cursor = 0;
        if fired > 0 {
            self.release_yielders();
        }
        fired
    }

    fn finish_fire(&mut self, timer: TimerHandle, action: TimerAction, modified: bool) {
        let Some(entry) = self.timers.get_mut(timer) else {
            // Removed by its own callback.
            return;
        };
        match action {
            TimerAction::Remove => {
                self.timers.release(timer);
            }
            TimerAction::Rearm(delay) => {
                self.arm(timer, delay, None, None);
            }
            TimerAction::Default if modified => {}
            TimerAction::Default => {
                if entry.is_periodic() {
                    entry.start = entry.expire;
                    entry.expire += entry.period;
                    self.timers.reposition(timer, self.config.time_epsilon);
                } else if entry.temporary {
                    self.timers.release(timer);
                } else {
                    entry.start = entry.expire;
                }
            }
        }
    }

    /// Asks [`Scheduler::run_until`] to return after the current burst or firing pass.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }
}
