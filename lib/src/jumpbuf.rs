//! Non-local jump primitive backing the fault-interception scope.
//!
//! `guard_setjmp` records the callee-saved register set, the stack pointer,
//! and the resume address; `guard_longjmp` transfers control back to that
//! point, making `guard_setjmp` appear to return a second time with the
//! given value. Everything between the two calls on the abandoned stack
//! region is discarded without unwinding.

use core::arch::naked_asm;

#[repr(C, align(16))]
pub struct JumpBuf {
    pub rbx: u64,
    pub rbp: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rsp: u64,
    pub rip: u64,
}

impl JumpBuf {
    pub const fn zeroed() -> Self {
        Self {
            rbx: 0,
            rbp: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rsp: 0,
            rip: 0,
        }
    }
}

/// Record the current execution context into `buf`.
///
/// Returns 0 on the direct call, or the (nonzero) value passed to
/// `guard_longjmp` when control comes back through the buffer.
///
/// # Safety
/// `buf` must point to writable memory. The recorded context is only valid
/// for a jump while the recording frame is still live on this stack.
#[unsafe(naked)]
pub unsafe extern "C" fn guard_setjmp(buf: *mut JumpBuf) -> i32 {
    naked_asm!(
        "mov [rdi], rbx",
        "mov [rdi + 8], rbp",
        "mov [rdi + 16], r12",
        "mov [rdi + 24], r13",
        "mov [rdi + 32], r14",
        "mov [rdi + 40], r15",
        "lea rax, [rsp + 8]",
        "mov [rdi + 48], rax",
        "mov rax, [rsp]",
        "mov [rdi + 56], rax",
        "xor eax, eax",
        "ret",
    )
}

/// Transfer control to the context recorded in `buf`.
///
/// `val` becomes the return value of the corresponding `guard_setjmp`; a 0
/// is coerced to 1 so the resumed code can always tell the two returns
/// apart.
///
/// # Safety
/// The frame that recorded `buf` must still be live on the current stack.
#[unsafe(naked)]
pub unsafe extern "C" fn guard_longjmp(buf: *const JumpBuf, val: i32) -> ! {
    naked_asm!(
        "mov eax, esi",
        "test eax, eax",
        "jnz 2f",
        "mov eax, 1",
        "2:",
        "mov rbx, [rdi]",
        "mov rbp, [rdi + 8]",
        "mov r12, [rdi + 16]",
        "mov r13, [rdi + 24]",
        "mov r14, [rdi + 32]",
        "mov r15, [rdi + 40]",
        "mov rsp, [rdi + 48]",
        "jmp [rdi + 56]",
    )
}
