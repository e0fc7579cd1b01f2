//! trapgate: guarded invocation for x86_64 kernel code.
//!
//! The core primitive runs a caller-supplied callback inside a
//! fault-interception scope: if the callback triggers a synchronous CPU
//! exception, control transfers back to the call site and the caller
//! receives the fault identifier as a plain status code instead of the
//! kernel taking its fatal path.
//!
//! Integration contract for the embedding kernel:
//!
//! 1. Call [`guard::fault_intercept`] from the common exception handler,
//!    before any terminate/panic handling. If it returns `false` the
//!    dispatcher proceeds as usual; if a guard scope was active for the
//!    faulting vector the call does not return.
//! 2. Register a serial (or other) klog backend with
//!    [`klog::klog_register_backend`] once the console is up; until then
//!    log lines are discarded.
//! 3. Once SMP is up, register the CPU index provider with
//!    [`guard::register_cpu_index_provider`] so scopes land in the right
//!    per-CPU slot.

#![no_std]
#![allow(unsafe_op_in_unsafe_fn)]

#[cfg(test)]
extern crate std;

pub mod cpu;
pub mod frame;
pub mod guard;
pub mod jumpbuf;
pub mod klog;

pub use frame::{InterruptFrame, dump_interrupt_frame};
pub use guard::{
    GuardedCallback, MAX_CPUS, fault_intercept, invoke_guarded, register_cpu_index_provider,
    try_guarded,
};
pub use jumpbuf::JumpBuf;
pub use klog::{KlogLevel, klog_get_level, klog_is_enabled, klog_register_backend, klog_set_level};
