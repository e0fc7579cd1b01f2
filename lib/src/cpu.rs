//! Interrupt flag management for the intercepted exit path.
//!
//! A longjmp out of an interrupt-gate handler resumes the guarded caller
//! with IF still cleared. The guard records RFLAGS at scope entry and the
//! exit path re-enables interrupts only when IF was set at entry and is
//! currently clear, so the restore is a no-op outside exception context.

use core::arch::asm;

const RFLAGS_IF: u64 = 1 << 9;

/// Read RFLAGS without modifying interrupt state.
#[inline(always)]
pub fn read_rflags() -> u64 {
    let flags: u64;
    unsafe {
        asm!("pushfq; pop {}", out(reg) flags, options(nomem, preserves_flags));
    }
    flags
}

/// Returns true if interrupts are currently enabled (IF bit set).
#[inline(always)]
pub fn are_interrupts_enabled() -> bool {
    (read_rflags() & RFLAGS_IF) != 0
}

/// Enable interrupts (STI).
#[inline(always)]
pub fn enable_interrupts() {
    unsafe {
        asm!("sti", options(nomem, nostack));
    }
}

/// Restore the interrupt flag from RFLAGS saved at scope entry.
/// STI is executed only when IF was set in `saved_flags` and interrupts are
/// currently disabled, i.e. after a longjmp out of an interrupt gate.
#[inline(always)]
pub fn restore_interrupt_flag(saved_flags: u64) {
    if (saved_flags & RFLAGS_IF) != 0 && !are_interrupts_enabled() {
        enable_interrupts();
    }
}
