//! Process objects: an address space, a thread set, and bookkeeping.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use super::error::{TaskError, TaskResult};
use super::thread::{Thread, ThreadState};
use super::{Pid, Tid};
use crate::memory::layout::KSTACK_SIZE;
use crate::memory::virt::AddressSpace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Created,
    Ready,
    Running,
    Blocked,
    Sleeping,
    Zombie,
    Dead,
}

#[derive(Debug, Clone, Copy)]
pub struct ProcessLimits {
    pub memory_limit: u64,
    pub threads_limit: usize,
    pub open_files: usize,
}

impl Default for ProcessLimits {
    fn default() -> Self {
        ProcessLimits {
            memory_limit: 256 * 1024 * 1024,
            threads_limit: 64,
            open_files: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessStatistics {
    pub cpu_time_used: u64,
    pub memory_used: u64,
    pub context_switches: u64,
    pub page_faults: u64,
    pub io_operations: u64,
}

pub struct Process {
    pub pid: Pid,
    pub parent_pid: Pid,
    pub name: String,
    pub state: ProcessState,
    pub exit_code: u64,
    pub address_space: AddressSpace,
    pub limits: ProcessLimits,
    pub statistics: ProcessStatistics,
    pub open_files: BTreeMap<u32, u64>,
    pub environment: BTreeMap<String, String>,
    pub arguments: Vec<String>,
    pub creation_time: u64,
    pub termination_time: u64,
    threads: Vec<Thread>,
    main_thread: Tid,
}

impl Process {
    /// A process is only viable with its main thread; when that cannot be
    /// built the whole construction fails and the space is returned to
    /// the caller for teardown.
    pub fn new(
        pid: Pid,
        parent_pid: Pid,
        name: String,
        address_space: AddressSpace,
        entry_point: u64,
    ) -> TaskResult<Self> {
        let mut process = Process {
            pid,
            parent_pid,
            name,
            state: ProcessState::Created,
            exit_code: 0,
            address_space,
            limits: ProcessLimits::default(),
            statistics: ProcessStatistics::default(),
            open_files: BTreeMap::new(),
            environment: BTreeMap::new(),
            arguments: Vec::new(),
            creation_time: crate::time::cycles(),
            termination_time: 0,
            threads: Vec::new(),
            main_thread: 0,
        };

        let main = process.create_thread(entry_point, KSTACK_SIZE)?;
        process.main_thread = main;
        process.state = ProcessState::Ready;
        Ok(process)
    }

    pub fn create_thread(&mut self, entry_point: u64, stack_size: usize) -> TaskResult<Tid> {
        if self.threads.len() >= self.limits.threads_limit {
            log_err!("PROC", "thread limit reached for process {}", self.pid);
            return Err(TaskError::ThreadLimitReached);
        }

        let mut thread = Thread::new(self.pid, entry_point, stack_size)?;
        thread.state = ThreadState::Ready;
        let tid = thread.id;
        self.threads.push(thread);
        Ok(tid)
    }

    pub fn destroy_thread(&mut self, tid: Tid) -> TaskResult<()> {
        let index = self
            .threads
            .iter()
            .position(|t| t.id == tid)
            .ok_or(TaskError::NoSuchThread)?;
        self.threads.remove(index);
        Ok(())
    }

    pub fn thread(&self, tid: Tid) -> Option<&Thread> {
        self.threads.iter().find(|t| t.id == tid)
    }

    pub fn thread_mut(&mut self, tid: Tid) -> Option<&mut Thread> {
        self.threads.iter_mut().find(|t| t.id == tid)
    }

    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    pub fn main_thread(&self) -> Tid {
        self.main_thread
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn is_zombie(&self) -> bool {
        self.state == ProcessState::Zombie
    }

    pub fn is_dead(&self) -> bool {
        self.state == ProcessState::Dead
    }

    /// Exit: record the code, mark every thread dead, become a zombie
    /// until the reaper collects us.
    pub fn exit(&mut self, code: u64) {
        self.exit_code = code;
        self.termination_time = crate::time::cycles();
        for thread in &mut self.threads {
            thread.state = ThreadState::Dead;
        }
        self.state = ProcessState::Zombie;
    }

    pub fn update_statistics(&mut self, cpu_time_delta: u64, memory_used: u64) {
        self.statistics.cpu_time_used += cpu_time_delta;
        self.statistics.context_switches += 1;
        if memory_used > 0 {
            self.statistics.memory_used = memory_used;
        }
    }
}
