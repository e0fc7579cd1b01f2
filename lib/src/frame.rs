//! Exception frame layout shared with the embedding kernel's dispatcher.
//!
//! The layout matches a common exception-entry stub: general-purpose
//! registers pushed in order, then the vector and error code, then the
//! hardware iretq frame. The guard only ever reads `vector`; the rest is
//! carried for diagnostics.

use trapgate_abi::arch::x86_64::exception::{ExceptionClass, exception_class, get_exception_name};

use crate::klog_info;

#[repr(C)]
pub struct InterruptFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub vector: u64,
    pub error_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl InterruptFrame {
    /// True if the frame was pushed while executing ring-3 code.
    #[inline]
    pub fn from_user(&self) -> bool {
        (self.cs & 0x3) == 0x3
    }
}

/// Dump the interesting parts of an exception frame through klog.
/// Intended for embedders' fatal paths; safe to call with a null pointer.
pub fn dump_interrupt_frame(frame: *const InterruptFrame) {
    let Some(frame) = (unsafe { frame.as_ref() }) else {
        klog_info!("FRAME: <null>");
        return;
    };
    let vector = (frame.vector & 0xFF) as u8;
    klog_info!(
        "FRAME: vec={} ({}) rip=0x{:x} cs=0x{:x} rflags=0x{:x}",
        vector,
        get_exception_name(vector),
        frame.rip,
        frame.cs,
        frame.rflags
    );
    if exception_class(vector).contains(ExceptionClass::ERROR_CODE) {
        klog_info!("FRAME: err=0x{:x}", frame.error_code);
    }
    klog_info!("FRAME: rsp=0x{:x} ss=0x{:x} rbp=0x{:x}", frame.rsp, frame.ss, frame.rbp);
    klog_info!(
        "FRAME: rax=0x{:x} rbx=0x{:x} rcx=0x{:x} rdx=0x{:x} rsi=0x{:x} rdi=0x{:x}",
        frame.rax,
        frame.rbx,
        frame.rcx,
        frame.rdx,
        frame.rsi,
        frame.rdi
    );
}
