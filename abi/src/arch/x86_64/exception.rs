//! Exception metadata for x86_64.
//!
//! Vector constants, human-readable names, and per-vector classification
//! used by the guard core and by embedding kernels' dispatch and fatal
//! paths. Nothing here touches hardware; it is all table data.

use bitflags::bitflags;

// =============================================================================
// CPU Exception Vectors (0-31)
// =============================================================================

/// Divide Error (#DE) - vector 0.
pub const EXCEPTION_DIVIDE_ERROR: u8 = 0;

/// Debug (#DB) - vector 1.
pub const EXCEPTION_DEBUG: u8 = 1;

/// Non-Maskable Interrupt (NMI) - vector 2.
pub const EXCEPTION_NMI: u8 = 2;

/// Breakpoint (#BP) - vector 3.
pub const EXCEPTION_BREAKPOINT: u8 = 3;

/// Overflow (#OF) - vector 4.
pub const EXCEPTION_OVERFLOW: u8 = 4;

/// Bound Range Exceeded (#BR) - vector 5.
pub const EXCEPTION_BOUND_RANGE: u8 = 5;

/// Invalid Opcode (#UD) - vector 6.
pub const EXCEPTION_INVALID_OPCODE: u8 = 6;

/// Device Not Available (#NM) - vector 7.
pub const EXCEPTION_DEVICE_NOT_AVAIL: u8 = 7;

/// Double Fault (#DF) - vector 8.
pub const EXCEPTION_DOUBLE_FAULT: u8 = 8;

/// Coprocessor Segment Overrun - vector 9 (reserved).
pub const EXCEPTION_COPROCESSOR_OVERRUN: u8 = 9;

/// Invalid TSS (#TS) - vector 10.
pub const EXCEPTION_INVALID_TSS: u8 = 10;

/// Segment Not Present (#NP) - vector 11.
pub const EXCEPTION_SEGMENT_NOT_PRES: u8 = 11;

/// Stack-Segment Fault (#SS) - vector 12.
pub const EXCEPTION_STACK_FAULT: u8 = 12;

/// General Protection (#GP) - vector 13.
pub const EXCEPTION_GENERAL_PROTECTION: u8 = 13;

/// Page Fault (#PF) - vector 14.
pub const EXCEPTION_PAGE_FAULT: u8 = 14;

/// x87 FPU Floating-Point Error (#MF) - vector 16.
pub const EXCEPTION_FPU_ERROR: u8 = 16;

/// Alignment Check (#AC) - vector 17.
pub const EXCEPTION_ALIGNMENT_CHECK: u8 = 17;

/// Machine Check (#MC) - vector 18.
pub const EXCEPTION_MACHINE_CHECK: u8 = 18;

/// SIMD Floating-Point Exception (#XM/#XF) - vector 19.
pub const EXCEPTION_SIMD_FP_EXCEPTION: u8 = 19;

/// Virtualization Exception (#VE) - vector 20.
pub const EXCEPTION_VIRTUALIZATION: u8 = 20;

/// Control Protection Exception (#CP) - vector 21.
pub const EXCEPTION_CONTROL_PROTECTION: u8 = 21;

// Vectors 22-31 are reserved

/// Base vector for hardware IRQs. Vectors at or above this are asynchronous
/// interrupt sources, never synchronous faults.
pub const IRQ_BASE_VECTOR: u8 = 32;

// =============================================================================
// Classification
// =============================================================================

bitflags! {
    /// Per-vector attributes of the exceptions the CPU can raise.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ExceptionClass: u8 {
        /// Faulting instruction is reported before it completes.
        const FAULT = 1 << 0;
        /// Reported after the instruction completes.
        const TRAP = 1 << 1;
        /// Non-continuable; machine state around the instruction is lost.
        const ABORT = 1 << 2;
        /// The CPU pushes an error code for this vector.
        const ERROR_CODE = 1 << 3;
    }
}

/// Classification of an exception vector per the SDM tables.
/// Vectors without a defined class (reserved, NMI, IRQs) return `empty()`.
pub fn exception_class(vector: u8) -> ExceptionClass {
    match vector {
        EXCEPTION_DIVIDE_ERROR
        | EXCEPTION_BOUND_RANGE
        | EXCEPTION_INVALID_OPCODE
        | EXCEPTION_DEVICE_NOT_AVAIL
        | EXCEPTION_COPROCESSOR_OVERRUN
        | EXCEPTION_FPU_ERROR
        | EXCEPTION_SIMD_FP_EXCEPTION
        | EXCEPTION_VIRTUALIZATION => ExceptionClass::FAULT,
        EXCEPTION_DEBUG => ExceptionClass::FAULT.union(ExceptionClass::TRAP),
        EXCEPTION_BREAKPOINT | EXCEPTION_OVERFLOW => ExceptionClass::TRAP,
        EXCEPTION_DOUBLE_FAULT => ExceptionClass::ABORT.union(ExceptionClass::ERROR_CODE),
        EXCEPTION_INVALID_TSS
        | EXCEPTION_SEGMENT_NOT_PRES
        | EXCEPTION_STACK_FAULT
        | EXCEPTION_GENERAL_PROTECTION
        | EXCEPTION_PAGE_FAULT
        | EXCEPTION_ALIGNMENT_CHECK
        | EXCEPTION_CONTROL_PROTECTION => ExceptionClass::FAULT.union(ExceptionClass::ERROR_CODE),
        EXCEPTION_MACHINE_CHECK => ExceptionClass::ABORT,
        _ => ExceptionClass::empty(),
    }
}

/// Critical exceptions stay with the kernel's fatal path and are never
/// handed to a recovery or interception scope.
pub fn exception_is_critical(vector: u8) -> bool {
    matches!(
        vector,
        EXCEPTION_DOUBLE_FAULT | EXCEPTION_MACHINE_CHECK | EXCEPTION_NMI
    )
}

pub fn get_exception_name(vector: u8) -> &'static str {
    match vector {
        0 => "Divide Error",
        1 => "Debug",
        2 => "Non-Maskable Interrupt",
        3 => "Breakpoint",
        4 => "Overflow",
        5 => "Bound Range Exceeded",
        6 => "Invalid Opcode",
        7 => "Device Not Available",
        8 => "Double Fault",
        9 => "Coprocessor Segment Overrun",
        10 => "Invalid TSS",
        11 => "Segment Not Present",
        12 => "Stack Segment Fault",
        13 => "General Protection Fault",
        14 => "Page Fault",
        15 => "Reserved",
        16 => "x87 FPU Error",
        17 => "Alignment Check",
        18 => "Machine Check",
        19 => "SIMD Floating-Point Exception",
        20 => "Virtualization Exception",
        21 => "Control Protection Exception",
        22..=31 => "Reserved",
        _ => "Unknown",
    }
}
