#![allow(dead_code)]

use cadence_sched::{
    CycleBudget, Host, ProcessorId, ProcessorSpec, Scheduler, SchedulerConfig, Slice,
    SuspendReason, TimerAction, TimerHandle,
};

pub type Sched = Scheduler<u32>;
pub type InsnHook = Box<dyn FnMut(&mut Sched, ProcessorId, u64)>;
pub type FireHook = Box<dyn FnMut(&mut Sched, TimerHandle, u32) -> TimerAction>;

/// Scheduler with the given processor clocks, all released from reset.
pub fn running_scheduler(clocks: &[f64]) -> Sched {
    let specs: Vec<_> = clocks.iter().map(|&hz| ProcessorSpec::new(hz)).collect();
    let mut sched = Scheduler::new(SchedulerConfig::default(), &specs).unwrap();
    for p in 0..clocks.len() {
        sched.hold(p, SuspendReason::RESET, false);
    }
    sched
}

/// A machine of fixed-cost synthetic interpreters.
pub struct Machine {
    pub budgets: Vec<CycleBudget>,
    pub cycles_per_insn: Vec<i64>,
    /// Cycles reported to the scheduler, per processor.
    pub reported: Vec<u64>,
    /// Cycles actually executed, per processor.
    pub executed: Vec<u64>,
    pub slices: Vec<Slice>,
    /// `(event, now)` for every host timer fired.
    pub fired: Vec<(u32, f64)>,
    pub on_insn: Option<InsnHook>,
    pub on_fire: Option<FireHook>,
}

impl Machine {
    pub fn new(sched: &Sched) -> Self {
        let n = sched.processor_count();
        Self {
            budgets: (0..n).map(|p| sched.budget(p)).collect(),
            cycles_per_insn: vec![1; n],
            reported: vec![0; n],
            executed: vec![0; n],
            slices: Vec::new(),
            fired: Vec::new(),
            on_insn: None,
            on_fire: None,
        }
    }

    pub fn fired_events(&self) -> Vec<u32> {
        self.fired.iter().map(|&(event, _)| event).collect()
    }

    pub fn fire_count(&self, event: u32) -> usize {
        self.fired.iter().filter(|&&(e, _)| e == event).count()
    }
}

impl Host<u32> for Machine {
    fn execute(&mut self, sched: &mut Sched, slice: Slice) -> u64 {
        let p = slice.processor;
        let budget = self.budgets[p].clone();
        let cpi = self.cycles_per_insn[p];
        let mut done = 0u64;
        while budget.get() > 0 {
            budget.consume(cpi);
            done += cpi as u64;
            if let Some(hook) = self.on_insn.as_mut() {
                hook(sched, p, done);
            }
        }
        let ran = (slice.cycles as i64 - budget.get()) as u64;
        self.slices.push(slice);
        self.reported[p] += ran;
        self.executed[p] += done;
        ran
    }

    fn timer_fired(&mut self, sched: &mut Sched, timer: TimerHandle, event: &u32) -> TimerAction {
        self.fired.push((*event, sched.now()));
        match self.on_fire.as_mut() {
            Some(hook) => hook(sched, timer, *event),
            None => TimerAction::Default,
        }
    }
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}
