//! Band scanning, time slicing, and the context-switch bookkeeping.

use super::runqueue::{RunQueue, ThreadHandle};
use crate::task::manager::ProcessManager;
use crate::task::thread::ThreadState;
use crate::task::process::ProcessState;

pub const PRIORITY_BANDS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingPolicy {
    RoundRobin,
    Priority,
    RealTime,
    Fair,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SchedStats {
    pub context_switches: u64,
    pub total_cpu_time: u64,
    pub idle_time: u64,
    pub last_switch_time: u64,
    pub timer_ticks: u64,
}

pub struct Scheduler {
    queues: [RunQueue; PRIORITY_BANDS],
    current: Option<ThreadHandle>,
    idle: Option<ThreadHandle>,
    policy: SchedulingPolicy,
    time_slice_default: u64,
    last_switch: u64,
    stats: SchedStats,
}

impl Scheduler {
    pub const fn new(policy: SchedulingPolicy, time_slice_default: u64) -> Self {
        Scheduler {
            queues: [
                RunQueue::new(),
                RunQueue::new(),
                RunQueue::new(),
                RunQueue::new(),
            ],
            current: None,
            idle: None,
            policy,
            time_slice_default,
            last_switch: 0,
            stats: SchedStats {
                context_switches: 0,
                total_cpu_time: 0,
                idle_time: 0,
                last_switch_time: 0,
                timer_ticks: 0,
            },
        }
    }

    /// Install the idle thread; it runs whenever no band has a Ready
    /// thread and never sits in a queue.
    pub fn set_idle(&mut self, idle: ThreadHandle, now: u64) {
        self.idle = Some(idle);
        self.current = Some(idle);
        self.last_switch = now;
        self.stats.last_switch_time = now;
    }

    pub fn set_policy(&mut self, policy: SchedulingPolicy) {
        self.policy = policy;
    }

    pub fn statistics(&self) -> SchedStats {
        self.stats
    }

    pub fn current(&self) -> Option<ThreadHandle> {
        self.current
    }

    /// Total queued handles across all bands.
    pub fn queued_count(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    pub fn is_queued(&self, handle: ThreadHandle) -> bool {
        self.queues.iter().any(|q| q.contains(handle))
    }

    fn band_for(&self, pm: &ProcessManager, handle: ThreadHandle) -> usize {
        let priority = pm
            .process(handle.0)
            .and_then(|p| p.thread(handle.1))
            .map(|t| t.priority as usize)
            .unwrap_or(1);

        let band = match self.policy {
            SchedulingPolicy::RoundRobin => 1,
            SchedulingPolicy::Priority => priority,
            SchedulingPolicy::RealTime => 0,
            SchedulingPolicy::Fair => 2,
        };
        band.min(PRIORITY_BANDS - 1)
    }

    pub fn add_thread(&mut self, pm: &mut ProcessManager, pid: crate::task::Pid, tid: crate::task::Tid) {
        let handle = (pid, tid);
        if self.queues.iter().any(|q| q.contains(handle)) {
            return;
        }

        let band = self.band_for(pm, handle);
        if let Some(thread) = pm.process_mut(pid).and_then(|p| p.thread_mut(tid)) {
            thread.state = ThreadState::Ready;
        }
        self.queues[band].push(handle);
        log_debug!("SCHED", "thread {}:{} enqueued in band {}", pid, tid, band);
    }

    pub fn remove_thread(&mut self, handle: ThreadHandle) {
        for queue in &mut self.queues {
            queue.remove(handle);
        }
        if self.current == Some(handle) {
            self.current = self.idle;
        }
    }

    /// Scan bands ascending from each cursor: wake due sleepers, skip
    /// everything not Ready, land on idle when the scan comes up dry.
    /// Dead threads found on the way are reaped first.
    pub fn select_next(&mut self, pm: &mut ProcessManager, now: u64) -> Option<ThreadHandle> {
        self.reap_dead(pm);

        for queue in &mut self.queues {
            for _ in 0..queue.len() {
                let handle = match queue.advance() {
                    Some(handle) => handle,
                    None => break,
                };
                let Some(thread) = pm.process_mut(handle.0).and_then(|p| p.thread_mut(handle.1))
                else {
                    continue;
                };

                match thread.state {
                    ThreadState::Ready => return Some(handle),
                    ThreadState::Sleeping if thread.should_wake(now) => {
                        thread.state = ThreadState::Ready;
                        return Some(handle);
                    }
                    _ => {}
                }
            }
        }

        self.idle
    }

    /// Drop Dead threads from every queue and destroy them; a Dead
    /// current thread is replaced by idle.
    fn reap_dead(&mut self, pm: &mut ProcessManager) {
        for queue in &mut self.queues {
            queue.retain(|(pid, tid)| {
                let dead = pm
                    .process(pid)
                    .and_then(|p| p.thread(tid))
                    .map(|t| t.state == ThreadState::Dead)
                    .unwrap_or(true);
                if dead {
                    if let Some(process) = pm.process_mut(pid) {
                        let _ = process.destroy_thread(tid);
                    }
                }
                !dead
            });
        }

        if let Some(current) = self.current {
            let gone = pm
                .process(current.0)
                .and_then(|p| p.thread(current.1))
                .map(|t| t.state == ThreadState::Dead)
                .unwrap_or(true);
            if gone {
                self.current = self.idle;
            }
        }
    }

    /// Slice length for a thread under the active policy.
    pub fn time_slice_for(&self, pm: &ProcessManager, handle: ThreadHandle) -> u64 {
        let base = self.time_slice_default;
        match self.policy {
            SchedulingPolicy::RoundRobin => base,
            SchedulingPolicy::Priority => {
                let band = self.band_for(pm, handle) as u64;
                base * (PRIORITY_BANDS as u64 - band) / PRIORITY_BANDS as u64
            }
            SchedulingPolicy::RealTime => base * 2,
            SchedulingPolicy::Fair => {
                let cpu_time = pm
                    .process(handle.0)
                    .map(|p| p.statistics.cpu_time_used)
                    .unwrap_or(0);
                base * cpu_time / (self.stats.total_cpu_time + 1)
            }
        }
    }

    /// Timer tick: preempt once the current thread has outrun its slice.
    /// Returns the new current thread when a switch happened.
    pub fn handle_timer_tick(&mut self, pm: &mut ProcessManager, now: u64) -> Option<ThreadHandle> {
        self.stats.timer_ticks += 1;

        let current = self.current?;
        let slice = self.time_slice_for(pm, current);
        if now.saturating_sub(self.last_switch) <= slice {
            return None;
        }

        let next = self.select_next(pm, now)?;
        if Some(next) == self.current {
            return None;
        }
        self.switch_to(pm, next, now);
        Some(next)
    }

    pub fn yield_current(&mut self, pm: &mut ProcessManager, now: u64) -> Option<ThreadHandle> {
        let next = self.select_next(pm, now)?;
        if Some(next) == self.current {
            return None;
        }
        self.switch_to(pm, next, now);
        Some(next)
    }

    /// Put the current thread to sleep for `ms` and re-select.
    pub fn sleep_current(&mut self, pm: &mut ProcessManager, now: u64, ms: u64) {
        let Some(current) = self.current else { return };
        if Some(current) == self.idle {
            return;
        }

        if let Some(thread) = pm.process_mut(current.0).and_then(|p| p.thread_mut(current.1)) {
            thread.wake_time = now + crate::time::ms_to_cycles(ms);
            thread.state = ThreadState::Sleeping;
        }

        if let Some(next) = self.select_next(pm, now) {
            self.switch_to(pm, next, now);
        }
    }

    pub fn wake(&mut self, pm: &mut ProcessManager, handle: ThreadHandle) {
        let Some(thread) = pm.process_mut(handle.0).and_then(|p| p.thread_mut(handle.1)) else {
            return;
        };
        if thread.state != ThreadState::Sleeping {
            return;
        }
        thread.state = ThreadState::Ready;
        if !self.queues.iter().any(|q| q.contains(handle)) {
            let band = self.band_for(pm, handle);
            self.queues[band].push(handle);
        }
    }

    /// The switch itself: charge CPU time to the outgoing process, flip
    /// states, then save/load registers around a CR3 change with
    /// interrupts held off.
    pub fn switch_to(&mut self, pm: &mut ProcessManager, next: ThreadHandle, now: u64) {
        let old = self.current;
        if old == Some(next) {
            return;
        }
        self.current = Some(next);

        let elapsed = now.saturating_sub(self.last_switch);
        if let Some(old) = old {
            if Some(old) == self.idle {
                self.stats.idle_time += elapsed;
            } else {
                self.stats.total_cpu_time += elapsed;
                if let Some(process) = pm.process_mut(old.0) {
                    process.update_statistics(elapsed, 0);
                    if let Some(thread) = process.thread_mut(old.1) {
                        if thread.state == ThreadState::Running {
                            thread.state = ThreadState::Ready;
                        }
                    }
                }
            }
        }

        let mut old_regs: *mut crate::arch::x86_64::context::RegisterState = core::ptr::null_mut();
        if let Some(old) = old {
            if let Some(thread) = pm.process_mut(old.0).and_then(|p| p.thread_mut(old.1)) {
                old_regs = &mut thread.registers;
            }
        }

        let mut new_regs: *const crate::arch::x86_64::context::RegisterState = core::ptr::null();
        let mut new_pml4 = 0u64;
        if let Some(process) = pm.process_mut(next.0) {
            process.state = ProcessState::Running;
            new_pml4 = process.address_space.pml4;
            if let Some(thread) = process.thread_mut(next.1) {
                thread.state = ThreadState::Running;
                new_regs = &thread.registers;
            }
        }

        self.last_switch = now;
        self.stats.last_switch_time = now;
        self.stats.context_switches += 1;

        if new_regs.is_null() {
            return;
        }

        crate::arch::x86_64::cpu::without_interrupts(|| {
            // SAFETY: the register snapshots live in the process table,
            // which outlives this switch; CR3 gets a valid PML4 whose
            // upper half maps the kernel; interrupts are off.
            unsafe {
                if !old_regs.is_null() {
                    crate::arch::x86_64::context::save_context(old_regs);
                }
                crate::arch::x86_64::cpu::write_cr3(new_pml4);
                crate::arch::x86_64::context::restore_context(new_regs);
            }
        });
    }
}
