use super::scheduler::{Scheduler, SchedulingPolicy};
use crate::memory::virt::testutil::MockFrames;
use crate::memory::virt::AddressSpace;
use crate::task::manager::ProcessManager;
use crate::task::thread::ThreadState;
use crate::task::{Pid, Tid};

use std::vec::Vec;

fn spawn(pm: &mut ProcessManager, frames: &mut MockFrames, name: &str) -> (Pid, Tid) {
    let kernel = AddressSpace::new(frames).unwrap();
    let space = AddressSpace::new_user(frames, &kernel).unwrap();
    let pid = pm
        .create_process_with_space(name, 0, space, 0x1000)
        .unwrap();
    let tid = pm.process(pid).unwrap().main_thread();
    (pid, tid)
}

/// Scheduler with an idle task, ticking from t=0.
fn harness() -> (ProcessManager, MockFrames, Scheduler, (Pid, Tid)) {
    let mut pm = ProcessManager::new();
    let mut frames = MockFrames::new();
    let idle = spawn(&mut pm, &mut frames, "idle");
    let mut sched = Scheduler::new(SchedulingPolicy::RoundRobin, 1);
    sched.set_idle(idle, 0);
    (pm, frames, sched, idle)
}

#[test]
fn test_round_robin_dispatch_order() {
    let (mut pm, mut frames, mut sched, _idle) = harness();

    let a = spawn(&mut pm, &mut frames, "a");
    let b = spawn(&mut pm, &mut frames, "b");
    sched.add_thread(&mut pm, a.0, a.1);
    sched.add_thread(&mut pm, b.0, b.1);

    let mut dispatched = Vec::new();
    for tick in 1..=3u64 {
        if let Some(next) = sched.handle_timer_tick(&mut pm, tick * 10) {
            dispatched.push(next);
        }
    }

    assert_eq!(dispatched, [a, b, a]);
}

#[test]
fn test_no_preemption_inside_slice() {
    let (mut pm, mut frames, mut sched, _idle) = harness();
    let mut sched_long = Scheduler::new(SchedulingPolicy::RoundRobin, 1_000_000);
    sched_long.set_idle(sched.current().unwrap(), 0);

    let a = spawn(&mut pm, &mut frames, "a");
    sched_long.add_thread(&mut pm, a.0, a.1);

    // First tick switches off idle (idle gets no slice protection in
    // practice because elapsed time is measured from t=0).
    assert_eq!(sched_long.handle_timer_tick(&mut pm, 2_000_000), Some(a));
    // Within the slice nothing changes.
    assert_eq!(sched_long.handle_timer_tick(&mut pm, 2_000_010), None);
    let _ = sched;
}

#[test]
fn test_idle_selected_when_nothing_ready() {
    let (mut pm, _frames, mut sched, idle) = harness();
    assert_eq!(sched.select_next(&mut pm, 100), Some(idle));
}

#[test]
fn test_sleep_current_switches_to_idle() {
    let (mut pm, mut frames, mut sched, idle) = harness();

    let a = spawn(&mut pm, &mut frames, "sleeper");
    sched.add_thread(&mut pm, a.0, a.1);

    sched.yield_current(&mut pm, 10);
    assert_eq!(sched.current(), Some(a));
    sched.sleep_current(&mut pm, 1000, 4);

    assert_eq!(sched.current(), Some(idle));
    let thread = pm.process(a.0).unwrap().thread(a.1).unwrap();
    assert_eq!(thread.state, ThreadState::Sleeping);
    assert!(thread.wake_time > 1000);
}

#[test]
fn test_sleeping_thread_wakes_on_due_time() {
    let (mut pm, mut frames, mut sched, idle) = harness();

    let a = spawn(&mut pm, &mut frames, "sleeper");
    sched.add_thread(&mut pm, a.0, a.1);

    {
        let thread = pm.process_mut(a.0).unwrap().thread_mut(a.1).unwrap();
        thread.state = ThreadState::Sleeping;
        thread.wake_time = 5000;
    }

    // Before the wake time the sleeper is skipped.
    assert_eq!(sched.select_next(&mut pm, 2000), Some(idle));
    // At the wake time it becomes Ready and is selected.
    assert_eq!(sched.select_next(&mut pm, 5000), Some(a));
    assert_eq!(
        pm.process(a.0).unwrap().thread(a.1).unwrap().state,
        ThreadState::Ready
    );
}

#[test]
fn test_explicit_wake_reenqueues() {
    let (mut pm, mut frames, mut sched, _idle) = harness();
    let a = spawn(&mut pm, &mut frames, "sleeper");
    sched.add_thread(&mut pm, a.0, a.1);

    sched.yield_current(&mut pm, 10);
    sched.sleep_current(&mut pm, 20, 1_000_000);

    sched.wake(&mut pm, a);
    assert_eq!(
        pm.process(a.0).unwrap().thread(a.1).unwrap().state,
        ThreadState::Ready
    );
    assert_eq!(sched.select_next(&mut pm, 30), Some(a));
}

#[test]
fn test_dead_threads_reaped_on_selection() {
    let (mut pm, mut frames, mut sched, idle) = harness();

    let a = spawn(&mut pm, &mut frames, "doomed");
    let b = spawn(&mut pm, &mut frames, "survivor");
    sched.add_thread(&mut pm, a.0, a.1);
    sched.add_thread(&mut pm, b.0, b.1);

    sched.yield_current(&mut pm, 10);
    assert_eq!(sched.current(), Some(a));

    // Kill a while it is current: selection reaps it and idle takes over
    // as current before b gets dispatched.
    pm.process_mut(a.0).unwrap().thread_mut(a.1).unwrap().state = ThreadState::Dead;
    let next = sched.select_next(&mut pm, 20);
    assert_eq!(next, Some(b));
    assert_eq!(pm.process(a.0).unwrap().thread_count(), 0);

    // The dead thread never comes back.
    sched.switch_to(&mut pm, b, 20);
    for t in 3..10u64 {
        let next = sched.select_next(&mut pm, t * 10);
        assert!(next == Some(b) || next == Some(idle));
    }
}

#[test]
fn test_current_never_dead_after_reap() {
    let (mut pm, mut frames, mut sched, idle) = harness();
    let a = spawn(&mut pm, &mut frames, "dies");
    sched.add_thread(&mut pm, a.0, a.1);
    sched.yield_current(&mut pm, 10);
    assert_eq!(sched.current(), Some(a));

    pm.process_mut(a.0).unwrap().thread_mut(a.1).unwrap().state = ThreadState::Dead;
    sched.select_next(&mut pm, 20);
    assert_eq!(sched.current(), Some(idle));
}

#[test]
fn test_thread_in_exactly_one_queue() {
    let (mut pm, mut frames, mut sched, _idle) = harness();
    let a = spawn(&mut pm, &mut frames, "once");

    sched.add_thread(&mut pm, a.0, a.1);
    sched.add_thread(&mut pm, a.0, a.1);
    assert_eq!(sched.queued_count(), 1);
    assert!(sched.is_queued(a));

    sched.remove_thread(a);
    assert_eq!(sched.queued_count(), 0);
    assert!(!sched.is_queued(a));
}

#[test]
fn test_policy_time_slices() {
    let (mut pm, mut frames, _sched, _idle) = harness();
    let a = spawn(&mut pm, &mut frames, "a");

    let mut sched = Scheduler::new(SchedulingPolicy::RoundRobin, 1000);
    sched.set_idle((0, 0), 0);
    assert_eq!(sched.time_slice_for(&pm, a), 1000);

    sched.set_policy(SchedulingPolicy::RealTime);
    assert_eq!(sched.time_slice_for(&pm, a), 2000);

    // Priority: default thread priority is band 1 of 4.
    sched.set_policy(SchedulingPolicy::Priority);
    assert_eq!(sched.time_slice_for(&pm, a), 1000 * 3 / 4);

    // Fair: slice scales with the process's share of CPU time.
    sched.set_policy(SchedulingPolicy::Fair);
    pm.process_mut(a.0).unwrap().statistics.cpu_time_used = 500;
    assert_eq!(sched.time_slice_for(&pm, a), 1000 * 500 / 1);
    let _ = frames;
}

#[test]
fn test_statistics_accumulate() {
    let (mut pm, mut frames, mut sched, _idle) = harness();
    let a = spawn(&mut pm, &mut frames, "a");
    let b = spawn(&mut pm, &mut frames, "b");
    sched.add_thread(&mut pm, a.0, a.1);
    sched.add_thread(&mut pm, b.0, b.1);

    sched.handle_timer_tick(&mut pm, 10); // idle -> a
    sched.handle_timer_tick(&mut pm, 30); // a -> b

    let stats = sched.statistics();
    assert_eq!(stats.context_switches, 2);
    assert_eq!(stats.last_switch_time, 30);
    assert_eq!(stats.idle_time, 10);
    assert_eq!(stats.total_cpu_time, 20);
    assert_eq!(pm.process(a.0).unwrap().statistics.cpu_time_used, 20);
    assert_eq!(stats.timer_ticks, 2);
}
