//! Status code for a guarded invocation.
//!
//! A guarded call reports exactly one of two outcomes: clean completion
//! (raw status `0`) or an intercepted synchronous fault, identified by the
//! exception vector that interrupted it. The raw x86_64 identifier for
//! Divide Error is vector 0, which would collide with the clean status, so
//! fault codes carry a tag bit above the vector byte: every intercepted
//! fault is nonzero and [`FaultCode::vector`] recovers the raw platform
//! identifier unmodified.

use core::fmt;

use crate::arch::x86_64::exception::get_exception_name;

/// Tag bit set in every encoded fault code.
pub const FAULT_CODE_TAG: u64 = 1 << 32;

/// The fault identifier carried by a nonzero guarded-invocation status.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaultCode(u64);

impl FaultCode {
    /// Encode the exception vector that interrupted a guarded call.
    pub const fn from_vector(vector: u8) -> Self {
        Self(FAULT_CODE_TAG | vector as u64)
    }

    /// Reconstruct a fault code from a raw nonzero status value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw status value as returned across the call boundary.
    pub const fn into_raw(self) -> u64 {
        self.0
    }

    /// The platform fault identifier (exception vector) unmodified.
    pub const fn vector(self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (vector {})",
            get_exception_name(self.vector()),
            self.vector()
        )
    }
}
