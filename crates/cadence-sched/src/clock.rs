//! Virtual time units and per-processor cycle/time conversion.
//!
//! Virtual time is kept as floating-point seconds. Each processor owns a [`ProcessorClock`] that
//! accumulates the virtual time it has reached and converts between elapsed seconds and elapsed
//! cycles at `overclock * nominal_hz`.
//!
//! The accumulators are periodically renormalized by the scheduler (see
//! [`crate::SchedulerConfig::renormalize_period`]), so the magnitude of every stored time value stays
//! small and the conversion precision does not degrade as the emulated machine runs.

/// Virtual time, in seconds.
pub type Seconds = f64;

/// Expire time of a timer that will never fire.
pub const TIME_NEVER: Seconds = 1.0e30;

/// Largest budget granted for a single burst.
///
/// Only reached when nothing bounds the burst (an empty timer queue).
pub const MAX_BURST_CYCLES: i64 = i32::MAX as i64;

/// Fraction of a cycle tolerated as floating-point noise when computing a burst budget.
///
/// Without it a processor that is behind its target by `1e-18` seconds would be granted a whole
/// extra cycle.
const CYCLE_ROUNDING_SLACK: f64 = 1.0e-6;

#[inline]
pub fn time_in_hz(hz: f64) -> Seconds {
    1.0 / hz
}

#[inline]
pub fn time_in_msec(ms: f64) -> Seconds {
    ms * 1.0e-3
}

#[inline]
pub fn time_in_usec(us: f64) -> Seconds {
    us * 1.0e-6
}

#[inline]
pub fn time_in_nsec(ns: f64) -> Seconds {
    ns * 1.0e-9
}

/// Clock state of a single emulated processor.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorClock {
    nominal_hz: f64,
    overclock: f64,
    cycles_per_second: f64,
    seconds_per_cycle: f64,
    /// Virtual time this processor has reached (relative to the scheduler's global offset).
    time: Seconds,
}

impl ProcessorClock {
    pub fn new(nominal_hz: f64, overclock: f64) -> Self {
        let mut clock = Self {
            nominal_hz,
            overclock,
            cycles_per_second: 0.0,
            seconds_per_cycle: 0.0,
            time: 0.0,
        };
        clock.recompute();
        clock
    }

    fn recompute(&mut self) {
        self.cycles_per_second = self.overclock * self.nominal_hz;
        self.seconds_per_cycle = 1.0 / self.cycles_per_second;
    }

    pub fn nominal_hz(&self) -> f64 {
        self.nominal_hz
    }

    pub fn overclock(&self) -> f64 {
        self.overclock
    }

    /// Changes the overclock multiplier.
    ///
    /// Only future conversions are affected; the accumulated time is left untouched.
    pub fn set_overclock(&mut self, overclock: f64) {
        self.overclock = overclock;
        self.recompute();
    }

    pub fn cycles_per_second(&self) -> f64 {
        self.cycles_per_second
    }

    pub fn seconds_per_cycle(&self) -> f64 {
        self.seconds_per_cycle
    }

    #[inline]
    pub fn time(&self) -> Seconds {
        self.time
    }

    #[inline]
    pub(crate) fn set_time(&mut self, time: Seconds) {
        self.time = time;
    }

    #[inline]
    pub fn cycles_to_time(&self, cycles: i64) -> Seconds {
        cycles as f64 * self.seconds_per_cycle
    }

    #[inline]
    pub fn time_to_cycles(&self, time: Seconds) -> f64 {
        time * self.cycles_per_second
    }

    /// Number of whole cycles needed to carry this processor from its current time up to
    /// `target`, rounded up.
    ///
    /// Returns `0` when the processor has already reached `target`, and saturates at
    /// [`MAX_BURST_CYCLES`].
    pub fn cycles_until(&self, target: Seconds) -> i64 {
        let cycles = self.time_to_cycles(target - self.time);
        if cycles <= CYCLE_ROUNDING_SLACK {
            return 0;
        }
        let cycles = (cycles - CYCLE_ROUNDING_SLACK).ceil();
        if cycles >= MAX_BURST_CYCLES as f64 {
            MAX_BURST_CYCLES
        } else {
            cycles as i64
        }
    }

    /// Advances the accumulator by `cycles` executed cycles.
    #[inline]
    pub fn advance_cycles(&mut self, cycles: i64) {
        self.time += self.cycles_to_time(cycles);
    }

    #[inline]
    pub(crate) fn shift(&mut self, delta: Seconds) {
        self.time += delta;
    }
}
