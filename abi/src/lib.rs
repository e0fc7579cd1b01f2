//! Shared vocabulary for the trapgate fault-containment subsystem.
//!
//! This crate carries the plain types and architecture metadata that both
//! the guard implementation and embedding kernels need: exception vector
//! constants, exception classification, and the `FaultCode` status type
//! returned by a guarded invocation.

#![no_std]

pub mod arch;
pub mod fault;

pub use fault::{FAULT_CODE_TAG, FaultCode};
