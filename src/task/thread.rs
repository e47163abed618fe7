//! Kernel threads: a stack, a TLS block, and a saved register snapshot.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use core::sync::atomic::{AtomicU64, Ordering};

use super::error::{TaskError, TaskResult};
use super::{Pid, Tid};
use crate::arch::x86_64::context::RegisterState;
use crate::memory::layout::{PAGE_SIZE, TLS_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Created,
    Ready,
    Running,
    Blocked,
    Sleeping,
    Dead,
}

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

/// Page-aligned owned allocation for stacks and TLS.
struct OwnedBlock {
    ptr: *mut u8,
    layout: Layout,
}

impl OwnedBlock {
    fn new(size: usize) -> Option<Self> {
        let layout = Layout::from_size_align(size, PAGE_SIZE).ok()?;
        // SAFETY: layout has non-zero size and valid alignment.
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return None;
        }
        Some(OwnedBlock { ptr, layout })
    }

    fn base(&self) -> u64 {
        self.ptr as u64
    }
}

impl Drop for OwnedBlock {
    fn drop(&mut self) {
        // SAFETY: ptr/layout come from the successful allocation above.
        unsafe { dealloc(self.ptr, self.layout) }
    }
}

// SAFETY: the blocks are exclusively owned by their Thread and only
// touched under the scheduler/process locks.
unsafe impl Send for OwnedBlock {}

pub struct Thread {
    pub id: Tid,
    pub pid: Pid,
    pub state: ThreadState,
    pub entry_point: u64,
    pub priority: u8,
    pub wake_time: u64,
    pub registers: RegisterState,
    stack: OwnedBlock,
    stack_size: usize,
    _tls: OwnedBlock,
}

impl Thread {
    /// Allocate the stack and TLS and build the initial register state:
    /// RIP at the entry point, RSP just under the stack top with red-zone
    /// slack, interrupts enabled, kernel selectors.
    pub fn new(pid: Pid, entry_point: u64, stack_size: usize) -> TaskResult<Self> {
        let stack_size = (stack_size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
        let stack = OwnedBlock::new(stack_size).ok_or(TaskError::StackAllocationFailed)?;
        let tls = OwnedBlock::new(TLS_SIZE).ok_or(TaskError::StackAllocationFailed)?;

        let stack_top = stack.base() + stack_size as u64;
        let registers = RegisterState::for_entry(entry_point, stack_top);

        Ok(Thread {
            id: NEXT_TID.fetch_add(1, Ordering::Relaxed),
            pid,
            state: ThreadState::Created,
            entry_point,
            priority: 1,
            wake_time: 0,
            registers,
            stack,
            stack_size,
            _tls: tls,
        })
    }

    #[inline]
    pub fn stack_top(&self) -> u64 {
        self.stack.base() + self.stack_size as u64
    }

    #[inline]
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    #[inline]
    pub fn is_sleeping(&self) -> bool {
        self.state == ThreadState::Sleeping
    }

    #[inline]
    pub fn should_wake(&self, now: u64) -> bool {
        self.is_sleeping() && now >= self.wake_time
    }
}
