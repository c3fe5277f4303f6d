use thiserror::Error;

use crate::timer::TimerHandle;

pub type Result<T> = std::result::Result<T, SchedError>;

/// Errors surfaced by the scheduler core.
///
/// None of these are fatal to the scheduler itself: state is left consistent and the host decides
/// whether, for example, running out of timer slots should abort its machine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedError {
    /// Every timer slot is in use.
    ///
    /// The pool never grows at runtime; size it through [`crate::SchedulerConfig::timer_capacity`].
    #[error("timer pool exhausted (capacity {capacity})")]
    PoolExhausted { capacity: usize },

    /// The handle refers to a timer that was already released.
    #[error("timer {0:?} was already removed")]
    DoubleRemoval(TimerHandle),

    /// The dispatch loop was entered from inside a burst or a timer callback.
    #[error("dispatch loop entered from inside a burst or timer callback")]
    Reentrant,

    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(&'static str),
}
