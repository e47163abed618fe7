//! Saved register context.
//!
//! The layout is shared with the interrupt entry stubs: the first
//! seventeen slots match the push order of the common ISR prologue, the
//! last five mirror the hardware interrupt frame. Offsets are load-bearing
//! for the assembly below.

/// Snapshot of the general-purpose state plus the interrupt frame.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct RegisterState {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rax: u64,
    pub interrupt_vector: u64,
    pub error_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// Kernel code selector installed by the GDT bring-up.
pub const KERNEL_CS: u64 = 0x08;
/// Kernel data selector.
pub const KERNEL_SS: u64 = 0x10;
/// IF set plus the always-one reserved bit.
pub const INITIAL_RFLAGS: u64 = 0x202;

impl RegisterState {
    /// Initial state for a fresh kernel thread: entry point in RIP, stack
    /// top less the red-zone slack in RSP, interrupts enabled.
    pub fn for_entry(entry: u64, stack_top: u64) -> Self {
        RegisterState {
            rip: entry,
            rsp: stack_top - 128,
            cs: KERNEL_CS,
            ss: KERNEL_SS,
            rflags: INITIAL_RFLAGS,
            ..Default::default()
        }
    }
}

/// Save the callee-visible register state of the current thread.
///
/// # Safety
///
/// Must run with interrupts disabled; `state` must be a valid exclusive
/// pointer for the duration of the call.
#[cfg(target_os = "none")]
pub unsafe fn save_context(state: *mut RegisterState) {
    // SAFETY: offsets match the repr(C) layout of RegisterState; the
    // caller guarantees exclusivity and disabled interrupts.
    unsafe {
        core::arch::asm!(
            "mov [{s} + 0x00], r15",
            "mov [{s} + 0x08], r14",
            "mov [{s} + 0x10], r13",
            "mov [{s} + 0x18], r12",
            "mov [{s} + 0x20], r11",
            "mov [{s} + 0x28], r10",
            "mov [{s} + 0x30], r9",
            "mov [{s} + 0x38], r8",
            "mov [{s} + 0x40], rdi",
            "mov [{s} + 0x48], rsi",
            "mov [{s} + 0x50], rbp",
            "mov [{s} + 0x58], rbx",
            "mov [{s} + 0x60], rdx",
            "mov [{s} + 0x68], rcx",
            "mov [{s} + 0x70], rax",
            "pushfq",
            "pop qword ptr [{s} + 0x98]",
            "mov [{s} + 0xA0], rsp",
            s = in(reg) state,
            options(nostack),
        );
    }
}

#[cfg(not(target_os = "none"))]
pub unsafe fn save_context(_state: *mut RegisterState) {}

/// Restore a previously saved state and resume on its stack.
///
/// # Safety
///
/// Must run with interrupts disabled; CR3 must already point at the
/// target thread's address space; `state` must hold a state captured by
/// `save_context` or built by `RegisterState::for_entry`.
#[cfg(target_os = "none")]
pub unsafe fn restore_context(state: *const RegisterState) {
    // SAFETY: same layout contract as save_context; the caller guarantees
    // the stack in the snapshot is valid and mapped.
    unsafe {
        core::arch::asm!(
            "mov r15, [{s} + 0x00]",
            "mov r14, [{s} + 0x08]",
            "mov r13, [{s} + 0x10]",
            "mov r12, [{s} + 0x18]",
            "mov r11, [{s} + 0x20]",
            "mov r10, [{s} + 0x28]",
            "mov r9,  [{s} + 0x30]",
            "mov r8,  [{s} + 0x38]",
            "mov rdi, [{s} + 0x40]",
            "mov rsi, [{s} + 0x48]",
            "mov rbp, [{s} + 0x50]",
            "mov rbx, [{s} + 0x58]",
            "mov rdx, [{s} + 0x60]",
            "mov rcx, [{s} + 0x68]",
            "push qword ptr [{s} + 0x98]",
            "popfq",
            "mov rsp, [{s} + 0xA0]",
            "mov rax, [{s} + 0x88]",
            "push rax",
            "mov rax, [{s} + 0x70]",
            "ret",
            s = in(reg) state,
            options(noreturn),
        );
    }
}

#[cfg(not(target_os = "none"))]
pub unsafe fn restore_context(_state: *const RegisterState) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_offsets() {
        assert_eq!(core::mem::size_of::<RegisterState>(), 22 * 8);
        assert_eq!(core::mem::offset_of!(RegisterState, r15), 0x00);
        assert_eq!(core::mem::offset_of!(RegisterState, rax), 0x70);
        assert_eq!(core::mem::offset_of!(RegisterState, rip), 0x88);
        assert_eq!(core::mem::offset_of!(RegisterState, rflags), 0x98);
        assert_eq!(core::mem::offset_of!(RegisterState, rsp), 0xA0);
        assert_eq!(core::mem::offset_of!(RegisterState, ss), 0xA8);
    }

    #[test]
    fn test_entry_state() {
        let state = RegisterState::for_entry(0xFFFF_FFFF_8010_0000, 0xFFFF_FF00_0001_0000);
        assert_eq!(state.rip, 0xFFFF_FFFF_8010_0000);
        assert_eq!(state.rsp, 0xFFFF_FF00_0001_0000 - 128);
        assert_eq!(state.cs, KERNEL_CS);
        assert_eq!(state.ss, KERNEL_SS);
        assert_eq!(state.rflags & 0x200, 0x200);
        assert_eq!(state.rax, 0);
    }
}
