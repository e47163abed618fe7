//! Preemptive multi-level scheduler.

pub mod runqueue;
pub mod scheduler;

#[cfg(test)]
mod tests;

pub use runqueue::RunQueue;
pub use scheduler::{SchedStats, Scheduler, SchedulingPolicy, PRIORITY_BANDS};

use lazy_static::lazy_static;
use spin::Mutex;

use crate::task::manager::with_manager;

/// Default slice: 10 ms worth of cycles under the boot calibration.
pub fn default_time_slice() -> u64 {
    crate::time::ms_to_cycles(10)
}

lazy_static! {
    static ref SCHEDULER: Mutex<Scheduler> =
        Mutex::new(Scheduler::new(SchedulingPolicy::RoundRobin, default_time_slice()));
}

/// Create the idle task and arm the scheduler. Runs after the process
/// manager is live.
pub fn init() {
    let idle = with_manager(|pm| {
        let pid = pm
            .create_process("idle", 0, idle_loop as usize as u64)
            .expect("idle process");
        let tid = pm.process(pid).expect("idle process").main_thread();
        (pid, tid)
    });

    SCHEDULER.lock().set_idle(idle, crate::time::cycles());
    log_info!("SCHED", "scheduler initialized, {} priority bands", PRIORITY_BANDS);
}

fn idle_loop() -> ! {
    loop {
        crate::arch::x86_64::cpu::halt();
    }
}

/// Timer-interrupt entry: preempt when the current slice is spent.
pub fn on_timer_tick() {
    let now = crate::time::cycles();
    with_manager(|pm| {
        SCHEDULER.lock().handle_timer_tick(pm, now);
    });
}

pub fn add_thread(pid: crate::task::Pid, tid: crate::task::Tid) {
    with_manager(|pm| {
        SCHEDULER.lock().add_thread(pm, pid, tid);
    });
}

pub fn yield_now() {
    let now = crate::time::cycles();
    with_manager(|pm| {
        SCHEDULER.lock().yield_current(pm, now);
    });
}

pub fn sleep_ms(ms: u64) {
    let now = crate::time::cycles();
    with_manager(|pm| {
        SCHEDULER.lock().sleep_current(pm, now, ms);
    });
}

pub fn statistics() -> SchedStats {
    SCHEDULER.lock().statistics()
}

/// Hand the CPU to the scheduler for good.
pub fn enter() -> ! {
    crate::arch::x86_64::cpu::enable_interrupts();
    loop {
        yield_now();
        crate::arch::x86_64::cpu::halt();
    }
}
