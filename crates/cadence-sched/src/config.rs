use serde::{Deserialize, Serialize};

use crate::clock::Seconds;
use crate::error::{Result, SchedError};

/// Start-time configuration of a [`crate::Scheduler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Number of timer slots. The pool never grows; allocation past this fails with
    /// [`SchedError::PoolExhausted`].
    pub timer_capacity: usize,
    /// Expire times closer than this are treated as the same instant when ordering timers.
    ///
    /// Must stay well below the shortest timer period the machine uses; the default (1 ps) is
    /// several orders of magnitude below any real hardware clock period and far above the
    /// rounding error of values bounded by `renormalize_period`.
    pub time_epsilon: Seconds,
    /// Amount subtracted from every stored time value once a processor's accumulator reaches it.
    pub renormalize_period: Seconds,
}

impl SchedulerConfig {
    pub const DEFAULT_TIMER_CAPACITY: usize = 256;

    pub fn validate(&self) -> Result<()> {
        if self.timer_capacity == 0 {
            return Err(SchedError::InvalidConfig("timer_capacity must be non-zero"));
        }
        if self.timer_capacity > u32::MAX as usize {
            return Err(SchedError::InvalidConfig("timer_capacity does not fit a timer handle"));
        }
        if !(self.renormalize_period > 0.0) {
            return Err(SchedError::InvalidConfig("renormalize_period must be positive"));
        }
        if !(self.time_epsilon >= 0.0) || self.time_epsilon >= self.renormalize_period {
            return Err(SchedError::InvalidConfig(
                "time_epsilon must be non-negative and below renormalize_period",
            ));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timer_capacity: Self::DEFAULT_TIMER_CAPACITY,
            time_epsilon: 1.0e-12,
            renormalize_period: 1.0,
        }
    }
}

/// Static description of one emulated processor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessorSpec {
    /// Nominal clock rate in cycles per second.
    pub clock_hz: f64,
    /// Initial overclock multiplier.
    #[serde(default = "default_overclock")]
    pub overclock: f64,
}

fn default_overclock() -> f64 {
    1.0
}

impl ProcessorSpec {
    pub fn new(clock_hz: f64) -> Self {
        Self {
            clock_hz,
            overclock: default_overclock(),
        }
    }

    pub fn with_overclock(mut self, overclock: f64) -> Self {
        self.overclock = overclock;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.clock_hz > 0.0) || !self.clock_hz.is_finite() {
            return Err(SchedError::InvalidConfig("processor clock_hz must be positive"));
        }
        if !(self.overclock > 0.0) || !self.overclock.is_finite() {
            return Err(SchedError::InvalidConfig("processor overclock must be positive"));
        }
        Ok(())
    }
}
