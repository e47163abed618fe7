//! Process table and pid allocation.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use spin::Mutex;

use super::error::{TaskError, TaskResult};
use super::process::{Process, ProcessState};
use super::Pid;
use crate::memory::virt::mapper::FrameProvider;
use crate::memory::virt::{space, AddressSpace, KernelFrames};

pub struct ProcessManager {
    processes: BTreeMap<Pid, Process>,
    next_pid: Pid,
}

impl ProcessManager {
    pub const fn new() -> Self {
        ProcessManager {
            processes: BTreeMap::new(),
            next_pid: 1,
        }
    }

    /// Pids start at 1; the allocator walks past taken ids, so a pid is
    /// never shared between a live or zombie process and a new one.
    fn allocate_pid(&mut self) -> Pid {
        let mut pid = self.next_pid;
        while self.processes.contains_key(&pid) {
            pid = pid.wrapping_add(1).max(1);
        }
        self.next_pid = pid.wrapping_add(1).max(1);
        pid
    }

    /// Create a process around a prepared address space. The kernel path
    /// builds the space via the VMM; tests hand in their own.
    pub fn create_process_with_space(
        &mut self,
        name: &str,
        parent_pid: Pid,
        address_space: AddressSpace,
        entry_point: u64,
    ) -> TaskResult<Pid> {
        let pid = self.allocate_pid();
        let process = Process::new(pid, parent_pid, String::from(name), address_space, entry_point)?;
        log_info!("PROC", "created process {} '{}' (parent {})", pid, name, parent_pid);
        self.processes.insert(pid, process);
        Ok(pid)
    }

    pub fn create_process(&mut self, name: &str, parent_pid: Pid, entry_point: u64) -> TaskResult<Pid> {
        let space = crate::memory::virt::create_address_space()
            .map_err(|_| TaskError::AddressSpaceCreationFailed)?;
        self.create_process_with_space(name, parent_pid, space, entry_point)
    }

    pub fn process(&self, pid: Pid) -> Option<&Process> {
        self.processes.get(&pid)
    }

    pub fn process_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.processes.get_mut(&pid)
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    pub fn exit_process(&mut self, pid: Pid, code: u64) -> TaskResult<()> {
        let process = self.processes.get_mut(&pid).ok_or(TaskError::NoSuchProcess)?;
        process.exit(code);
        log_info!("PROC", "process {} exited with code {}", pid, code);
        Ok(())
    }

    /// Collect zombies: tear down their address spaces through the given
    /// frame provider and drop them.
    pub fn reap_zombies_with<F: FrameProvider>(&mut self, frames: &mut F) -> usize {
        let dead: Vec<Pid> = self
            .processes
            .iter()
            .filter(|(_, p)| p.is_zombie())
            .map(|(&pid, _)| pid)
            .collect();

        for pid in &dead {
            if let Some(mut process) = self.processes.remove(pid) {
                process.state = ProcessState::Dead;
                space::destroy(&mut process.address_space, frames);
                log_debug!("PROC", "reaped process {}", pid);
            }
        }
        dead.len()
    }

    pub fn reap_zombies(&mut self) -> usize {
        self.reap_zombies_with(&mut KernelFrames)
    }
}

static MANAGER: Mutex<ProcessManager> = Mutex::new(ProcessManager::new());

pub fn init() {
    log_info!("PROC", "process manager initialized");
}

/// Run `f` under the manager lock.
pub fn with_manager<T>(f: impl FnOnce(&mut ProcessManager) -> T) -> T {
    f(&mut MANAGER.lock())
}

pub fn create_process(name: &str, parent_pid: Pid, entry_point: u64) -> TaskResult<Pid> {
    MANAGER.lock().create_process(name, parent_pid, entry_point)
}

pub fn exit_process(pid: Pid, code: u64) -> TaskResult<()> {
    MANAGER.lock().exit_process(pid, code)
}

pub fn reap_zombies() -> usize {
    MANAGER.lock().reap_zombies()
}
