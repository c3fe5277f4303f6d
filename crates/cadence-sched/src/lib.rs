//! Virtual-time scheduling for multi-processor emulation hosts.
//!
//! An emulated machine made of several processors plus timed hardware (video beam position,
//! serial baud clocks, watchdogs, periodic interrupts) runs on a single host thread. The
//! [`Scheduler`] gives each processor the illusion of continuous, independently clocked execution
//! by running them one burst at a time:
//!
//! - each processor has a [`ProcessorClock`] accumulating the virtual time it has reached;
//! - timed callbacks live in a fixed-capacity, time-ordered timer queue addressed by
//!   [`TimerHandle`]s;
//! - a burst never runs past the next queued event, and an event fires only once every running
//!   processor has reached its instant;
//! - processors can be suspended, held (clock stopped), or parked on a [`TriggerId`] until another
//!   processor or device broadcasts it.
//!
//! Time values are kept small by periodic renormalization: once a processor's accumulator passes
//! [`SchedulerConfig::renormalize_period`], that amount moves from every stored time into a global
//! offset. Reported absolute times ([`Scheduler::now`], [`Scheduler::fire_time`], ...) do not
//! change.
//!
//! The crate is single-threaded by construction. Timer callbacks and interpreters receive the
//! scheduler mutably (see [`Host`]) and may call back into any public operation.

mod clock;
mod config;
mod error;
mod host;
mod processor;
mod scheduler;
mod suspend;
mod timer;

pub use clock::{
    time_in_hz, time_in_msec, time_in_nsec, time_in_usec, ProcessorClock, Seconds,
    MAX_BURST_CYCLES, TIME_NEVER,
};
pub use config::{ProcessorSpec, SchedulerConfig};
pub use error::{Result, SchedError};
pub use host::{Host, RunExit};
pub use processor::{BurnFn, CycleBudget, ProcessorId, SuspendReason, TriggerId};
pub use scheduler::{Scheduler, Slice};
pub use timer::{TimerAction, TimerHandle, TimerTag};
