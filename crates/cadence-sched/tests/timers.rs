mod common;

use std::cell::Cell;
use std::rc::Rc;

use cadence_sched::{
    ProcessorSpec, RunExit, SchedError, Scheduler, SchedulerConfig, SuspendReason, TimerAction,
    TimerTag, TriggerId, TIME_NEVER,
};
use common::{assert_close, running_scheduler, Machine};
use pretty_assertions::assert_eq;

#[test]
fn events_fire_in_expire_then_insertion_order() {
    let mut sched = running_scheduler(&[1_000_000.0]);
    let mut machine = Machine::new(&sched);

    sched.set_timer(0.003, 0).unwrap();
    sched.set_timer(0.001, 1).unwrap();
    sched.set_timer(0.002, 2).unwrap();
    sched.set_timer(0.001, 3).unwrap();
    sched.set_timer(0.003, 4).unwrap();

    let exit = sched.run_until(&mut machine, 0.01).unwrap();
    assert_eq!(exit, RunExit::Deadline);
    assert_eq!(machine.fired_events(), vec![1, 3, 2, 0, 4]);
    assert_eq!(sched.live_timers(), 0);
}

#[test]
fn every_processor_reaches_the_instant_before_its_events_fire() {
    let mut sched = running_scheduler(&[1_000_000.0, 250_000.0]);
    let mut machine = Machine::new(&sched);
    machine.on_fire = Some(Box::new(|sched, _, _| {
        assert_close(sched.processor_time(0), 0.002);
        assert_close(sched.processor_time(1), 0.002);
        TimerAction::Default
    }));

    sched.set_timer(0.002, 1).unwrap();
    sched.run_until(&mut machine, 0.003).unwrap();
    assert_eq!(machine.fire_count(1), 1);
}

#[test]
fn temporary_timer_fires_once_and_its_handle_goes_stale() {
    let mut sched = running_scheduler(&[1_000_000.0]);
    let mut machine = Machine::new(&sched);

    let timer = sched.set_timer(0.001, 9).unwrap();
    sched.run_until(&mut machine, 0.005).unwrap();

    assert_eq!(machine.fire_count(9), 1);
    assert_close(machine.fired[0].1, 0.001);
    assert_eq!(sched.fire_time(timer), None);
    assert_eq!(sched.time_left(timer), None);
    assert_eq!(sched.remove_timer(timer), Err(SchedError::DoubleRemoval(timer)));

    let reused = sched.alloc_timer(1).unwrap();
    assert_ne!(reused, timer);
    assert_eq!(sched.fire_time(timer), None);
    assert_eq!(sched.fire_time(reused), Some(TIME_NEVER));
}

#[test]
fn temporary_timer_rearmed_by_its_callback_keeps_firing() {
    let mut sched = running_scheduler(&[1_000_000.0]);
    let mut machine = Machine::new(&sched);
    let mut remaining = 2;
    machine.on_fire = Some(Box::new(move |sched, timer, _| {
        if remaining > 0 {
            remaining -= 1;
            sched.reset_timer(timer, 0.001);
        }
        TimerAction::Default
    }));

    sched.set_timer(0.001, 5).unwrap();
    sched.run_until(&mut machine, 0.01).unwrap();

    let times: Vec<_> = machine.fired.iter().map(|&(_, t)| t).collect();
    assert_eq!(times.len(), 3);
    for (t, expected) in times.iter().zip([0.001, 0.002, 0.003]) {
        assert_close(*t, expected);
    }
    assert_eq!(sched.live_timers(), 0);
}

#[test]
fn adjust_from_callback_replaces_the_event() {
    let mut sched = running_scheduler(&[1_000_000.0]);
    let mut machine = Machine::new(&sched);
    machine.on_fire = Some(Box::new(|sched, timer, event| {
        if event == 1 {
            sched.adjust_timer(timer, 0.002, 2, 0.0);
        }
        TimerAction::Default
    }));

    sched.set_timer(0.001, 1).unwrap();
    sched.run_until(&mut machine, 0.01).unwrap();
    assert_eq!(machine.fired_events(), vec![1, 2]);
    assert_close(machine.fired[1].1, 0.003);
}

#[test]
fn callback_can_remove_its_own_periodic_timer() {
    let mut sched = running_scheduler(&[1_000_000.0]);
    let mut machine = Machine::new(&sched);
    machine.on_fire = Some(Box::new(|sched, timer, _| {
        sched.remove_timer(timer).unwrap();
        TimerAction::Default
    }));

    let pulse = sched.pulse_timer(0.001, 3).unwrap();
    sched.run_until(&mut machine, 0.01).unwrap();
    assert_eq!(machine.fire_count(3), 1);
    assert_eq!(sched.fire_time(pulse), None);
}

#[test]
fn explicit_remove_and_rearm_actions() {
    let mut sched = running_scheduler(&[1_000_000.0]);
    let mut machine = Machine::new(&sched);
    let mut pulses = 0;
    let mut rearmed = false;
    machine.on_fire = Some(Box::new(move |_, _, event| match event {
        1 => {
            pulses += 1;
            if pulses == 2 {
                TimerAction::Remove
            } else {
                TimerAction::Default
            }
        }
        2 if !rearmed => {
            rearmed = true;
            TimerAction::Rearm(0.0025)
        }
        _ => TimerAction::Default,
    }));

    let pulse = sched.pulse_timer(0.001, 1).unwrap();
    let oneshot = sched.alloc_timer(2).unwrap();
    sched.adjust_timer(oneshot, 0.001, 2, 0.0);
    sched.run_until(&mut machine, 0.01).unwrap();

    assert_eq!(machine.fire_count(1), 2);
    assert_eq!(sched.fire_time(pulse), None);

    let oneshot_times: Vec<_> = machine
        .fired
        .iter()
        .filter(|&&(e, _)| e == 2)
        .map(|&(_, t)| t)
        .collect();
    assert_eq!(oneshot_times.len(), 2);
    assert_close(oneshot_times[0], 0.001);
    assert_close(oneshot_times[1], 0.0035);

    // Permanent one-shots stay allocated but disarmed.
    assert!(!sched.is_timer_enabled(oneshot));
    assert_eq!(sched.fire_time(oneshot), Some(TIME_NEVER));
    assert_eq!(sched.time_left(oneshot), Some(TIME_NEVER));
}

#[test]
fn one_shot_is_disarmed_while_its_callback_runs() {
    let mut sched = running_scheduler(&[1_000_000.0]);
    let mut machine = Machine::new(&sched);
    let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let log = std::rc::Rc::clone(&seen);
    machine.on_fire = Some(Box::new(move |sched, timer, event| {
        log.borrow_mut().push((event, sched.is_timer_enabled(timer)));
        TimerAction::Default
    }));

    sched.set_timer(0.001, 1).unwrap();
    let pulse = sched.pulse_timer(0.002, 2).unwrap();
    sched.run_until(&mut machine, 0.003).unwrap();

    assert_eq!(*seen.borrow(), vec![(1, false), (2, true)]);
    assert!(sched.is_timer_enabled(pulse));
    assert_close(sched.fire_time(pulse).unwrap(), 0.004);
}

#[test]
fn disabled_timers_do_not_fire_until_enabled() {
    let mut sched = running_scheduler(&[1_000_000.0]);
    let mut machine = Machine::new(&sched);

    let timer = sched.alloc_timer(4).unwrap();
    assert!(!sched.is_timer_enabled(timer));
    sched.adjust_timer(timer, 0.002, 4, 0.0);

    assert!(sched.enable_timer(timer, false));
    assert_eq!(sched.time_left(timer), Some(TIME_NEVER));
    assert_eq!(sched.fire_time(timer), Some(TIME_NEVER));

    sched.run_until(&mut machine, 0.001).unwrap();
    assert!(machine.fired.is_empty());

    assert!(!sched.enable_timer(timer, true));
    assert_close(sched.time_left(timer).unwrap(), 0.001);
    sched.run_until(&mut machine, 0.005).unwrap();
    assert_eq!(machine.fired_events(), vec![4]);
    assert_close(machine.fired[0].1, 0.002);
}

#[test]
fn time_queries_track_virtual_time() {
    let mut sched = running_scheduler(&[1_000_000.0]);
    let mut machine = Machine::new(&sched);

    let pulse = sched.pulse_timer(0.004, 1).unwrap();
    sched.run_until(&mut machine, 0.001).unwrap();

    assert_close(sched.now(), 0.001);
    assert_close(sched.time_elapsed(pulse).unwrap(), 0.001);
    assert_close(sched.time_left(pulse).unwrap(), 0.003);
    assert_close(sched.start_time(pulse).unwrap(), 0.0);
    assert_close(sched.fire_time(pulse).unwrap(), 0.004);

    sched.run_until(&mut machine, 0.005).unwrap();
    assert_close(sched.start_time(pulse).unwrap(), 0.004);
    assert_close(sched.fire_time(pulse).unwrap(), 0.008);
}

#[test]
fn free_tagged_releases_only_matching_timers() {
    let mut sched = running_scheduler(&[1_000_000.0]);

    assert_eq!(sched.set_timer_tag(TimerTag(7)), TimerTag(0));
    sched.pulse_timer(0.001, 1).unwrap();
    sched.set_timer(0.002, 2).unwrap();
    sched.alloc_timer(3).unwrap();
    assert_eq!(sched.set_timer_tag(TimerTag(0)), TimerTag(7));
    let kept = sched.pulse_timer(0.001, 4).unwrap();

    assert_eq!(sched.free_tagged(TimerTag(7)), 3);
    assert_eq!(sched.live_timers(), 1);
    assert!(sched.is_timer_enabled(kept));
    assert_eq!(sched.free_tagged(TimerTag(7)), 0);
}

#[test]
fn free_tagged_spares_the_schedulers_own_timers() {
    let mut sched = running_scheduler(&[1_000_000.0, 1_000_000.0]);
    let mut machine = Machine::new(&sched);
    let freed = Rc::new(Cell::new(None));
    let seen = Rc::clone(&freed);
    machine.on_fire = Some(Box::new(move |sched, _, _| {
        seen.set(Some(sched.free_tagged(TimerTag::default())));
        TimerAction::Default
    }));
    sched.set_timer(0.001, 1).unwrap();
    sched.await_trigger(1, TriggerId(4));
    sched.fire_trigger_after(0.003, TriggerId(4)).unwrap();

    assert_eq!(sched.run_until(&mut machine, 0.005).unwrap(), RunExit::Deadline);
    // Only the firing host timer carried the default tag.
    assert_eq!(freed.get(), Some(1));
    assert_close(sched.now(), 0.005);
    assert!(!sched.is_suspended(1, SuspendReason::TRIGGER));
    assert_eq!(machine.reported[1], 2000);
    assert_eq!(sched.free_tagged(TimerTag::SCHEDULER), 0);
    assert_eq!(sched.live_timers(), 0);
}

#[test]
fn permanent_one_shot_restarts_its_elapsed_time_when_it_fires() {
    let mut sched = running_scheduler(&[1_000_000.0]);
    let mut machine = Machine::new(&sched);
    let timer = sched.alloc_timer(3).unwrap();
    sched.adjust_timer(timer, 0.001, 3, 0.0);

    sched.run_until(&mut machine, 0.003).unwrap();
    assert_eq!(machine.fired_events(), vec![3]);
    assert!(!sched.is_timer_enabled(timer));
    assert_close(sched.start_time(timer).unwrap(), 0.001);
    assert_close(sched.time_elapsed(timer).unwrap(), 0.002);
    assert_eq!(sched.fire_time(timer), Some(TIME_NEVER));
}

#[test]
fn exhausted_pool_is_reported_not_reused() {
    let config = SchedulerConfig {
        timer_capacity: 2,
        ..Default::default()
    };
    let mut sched: Scheduler<u32> =
        Scheduler::new(config, &[ProcessorSpec::new(1_000_000.0)]).unwrap();
    let mut machine = Machine::new(&sched);

    let a = sched.alloc_timer(0).unwrap();
    let b = sched.set_timer(0.5, 1).unwrap();
    assert_ne!(a, b);
    assert_eq!(
        sched.alloc_timer(2),
        Err(SchedError::PoolExhausted { capacity: 2 })
    );
    // The dispatch loop needs a slot for its deadline marker.
    assert_eq!(
        sched.run_until(&mut machine, 1.0),
        Err(SchedError::PoolExhausted { capacity: 2 })
    );

    sched.remove_timer(a).unwrap();
    assert!(sched.alloc_timer(2).is_ok());
}

#[test]
fn stale_handles_are_ignored_by_mutators() {
    let mut sched = running_scheduler(&[1_000_000.0]);
    let timer = sched.alloc_timer(1).unwrap();
    sched.remove_timer(timer).unwrap();

    sched.adjust_timer(timer, 0.001, 1, 0.0);
    sched.reset_timer(timer, 0.001);
    assert!(!sched.enable_timer(timer, true));
    assert_eq!(sched.live_timers(), 0);
    assert_eq!(sched.time_elapsed(timer), None);
    assert_eq!(sched.start_time(timer), None);
}
