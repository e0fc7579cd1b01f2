//! Guarded invocation: run a callback inside a fault-interception scope.
//!
//! A scope is a stack-allocated record pushed onto the current CPU's
//! intrusive scope stack for the duration of one callback invocation. When
//! the embedding kernel's exception dispatcher hands a synchronous fault to
//! [`fault_intercept`], the innermost scope is popped, the fault identifier
//! is recorded, and control jumps back into [`invoke_guarded`], which
//! returns the identifier as a plain status instead of letting the
//! dispatcher take its fatal path. The callback's partially-executed frame
//! is abandoned without unwinding.
//!
//! Scopes nest: an inner guarded call intercepts its own faults and the
//! outer call is unaffected. Each CPU's stack is independent; the caller
//! must stay on one CPU for the duration of the call (kernel callers hold
//! preemption off or run pre-SMP).

use core::ffi::c_void;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use spin::Once;
use trapgate_abi::FaultCode;
use trapgate_abi::arch::x86_64::exception::{
    IRQ_BASE_VECTOR, exception_is_critical, get_exception_name,
};

use crate::cpu;
use crate::frame::InterruptFrame;
use crate::jumpbuf::{JumpBuf, guard_longjmp, guard_setjmp};
use crate::klog_debug;

/// Maximum number of CPUs with independent scope stacks.
pub const MAX_CPUS: usize = 256;

/// Signature of a callback run under a fault-interception scope.
pub type GuardedCallback = unsafe extern "C" fn(*mut c_void);

#[repr(C, align(64))]
struct CacheAligned<T>(T);

/// One active interception scope, stack-allocated by `invoke_guarded`.
#[repr(C)]
struct GuardScope {
    jmp: JumpBuf,
    fault: u64,
    saved_rflags: u64,
    parent: *mut GuardScope,
}

static ACTIVE_SCOPES: [CacheAligned<AtomicPtr<GuardScope>>; MAX_CPUS] = {
    const INIT: CacheAligned<AtomicPtr<GuardScope>> =
        CacheAligned(AtomicPtr::new(ptr::null_mut()));
    [INIT; MAX_CPUS]
};

/// Provider for the current CPU index, registered by the embedding kernel
/// once SMP is up. Until then every scope lands in slot 0, which is correct
/// for single-CPU bring-up.
pub type CpuIndexFn = fn() -> usize;

static CPU_INDEX_PROVIDER: Once<CpuIndexFn> = Once::new();

pub fn register_cpu_index_provider(provider: CpuIndexFn) {
    CPU_INDEX_PROVIDER.call_once(|| provider);
}

#[inline]
fn current_scope_slot() -> &'static AtomicPtr<GuardScope> {
    let index = match CPU_INDEX_PROVIDER.get() {
        Some(provider) => provider() % MAX_CPUS,
        None => 0,
    };
    &ACTIVE_SCOPES[index].0
}

/// Run `callback(context)` inside a fault-interception scope.
///
/// Returns `0` if the callback ran to completion, or the encoded fault
/// identifier (see [`FaultCode`]) of the synchronous exception that
/// interrupted it. The context pointer is forwarded bit-identical and never
/// dereferenced here; null is allowed.
///
/// # Safety
/// `callback` must be a valid function for the whole call. The caller must
/// stay on the current CPU until the call returns.
#[inline(never)]
pub unsafe fn invoke_guarded(callback: GuardedCallback, context: *mut c_void) -> u64 {
    let slot = current_scope_slot();

    let mut scope = GuardScope {
        jmp: JumpBuf::zeroed(),
        fault: 0,
        saved_rflags: cpu::read_rflags(),
        parent: slot.load(Ordering::Relaxed),
    };

    if unsafe { guard_setjmp(&mut scope.jmp) } == 0 {
        // The scope becomes visible to the dispatcher only after the jump
        // buffer is recorded.
        slot.store(&mut scope, Ordering::Release);
        unsafe { callback(context) };
        slot.store(scope.parent, Ordering::Release);
        0
    } else {
        // Second return: fault_intercept already unlinked the scope and
        // recorded the fault before jumping here. An interrupt gate leaves
        // IF cleared; restore the state the caller had.
        cpu::restore_interrupt_flag(scope.saved_rflags);
        unsafe { ptr::read_volatile(&scope.fault) }
    }
}

/// Closure front-end over [`invoke_guarded`].
///
/// The closure is passed through the boundary as the opaque context and
/// called by a monomorphized trampoline. Captured state mutated before a
/// fault keeps whatever values were already committed to memory.
pub fn try_guarded<F>(mut closure: F) -> Result<(), FaultCode>
where
    F: FnMut(),
{
    unsafe extern "C" fn trampoline<F>(context: *mut c_void)
    where
        F: FnMut(),
    {
        let closure = unsafe { &mut *(context as *mut F) };
        closure();
    }

    let context = (&raw mut closure).cast::<c_void>();
    match unsafe { invoke_guarded(trampoline::<F>, context) } {
        0 => Ok(()),
        raw => Err(FaultCode::from_raw(raw)),
    }
}

/// Exception-dispatch hook: offer a synchronous fault to the innermost
/// scope on the current CPU.
///
/// Returns `false` when the fault is not interceptable here (null frame,
/// IRQ vector, critical vector, or no active scope) and the dispatcher
/// proceeds with its normal handling. Otherwise the scope is popped, the
/// fault is recorded, and the call **does not return**: control resumes
/// inside the scope's `invoke_guarded`.
pub fn fault_intercept(frame: *mut InterruptFrame) -> bool {
    let Some(frame) = (unsafe { frame.as_ref() }) else {
        return false;
    };
    if frame.vector >= IRQ_BASE_VECTOR as u64 {
        return false;
    }
    let vector = (frame.vector & 0xFF) as u8;
    if exception_is_critical(vector) {
        return false;
    }

    let slot = current_scope_slot();
    let scope_ptr = slot.load(Ordering::Acquire);
    if scope_ptr.is_null() {
        return false;
    }

    klog_debug!(
        "GUARD: intercepted vector {} ({}) rip=0x{:x} err=0x{:x}",
        vector,
        get_exception_name(vector),
        frame.rip,
        frame.error_code
    );

    // SAFETY: the slot only ever holds a pointer to a live GuardScope
    // pushed by invoke_guarded on this CPU.
    let scope = unsafe { &mut *scope_ptr };
    slot.store(scope.parent, Ordering::Release);
    scope.fault = FaultCode::from_vector(vector).into_raw();
    unsafe { guard_longjmp(&scope.jmp, 1) }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::AtomicUsize;
    use std::cell::Cell;
    use std::thread;
    use std::vec::Vec;

    use trapgate_abi::arch::x86_64::exception::{
        EXCEPTION_DIVIDE_ERROR, EXCEPTION_DOUBLE_FAULT, EXCEPTION_GENERAL_PROTECTION,
        EXCEPTION_MACHINE_CHECK, EXCEPTION_NMI, EXCEPTION_PAGE_FAULT,
    };
    use trapgate_abi::fault::FAULT_CODE_TAG;

    use super::*;
    use crate::frame::test_frames::make_frame;
    use crate::klog::test_capture;
    use crate::klog::{KlogLevel, klog_set_level};

    // Each test thread gets its own scope slot, standing in for the per-CPU
    // index an SMP kernel would provide.
    static NEXT_SLOT: AtomicUsize = AtomicUsize::new(1);

    std::thread_local! {
        static TEST_SLOT: Cell<usize> = const { Cell::new(usize::MAX) };
    }

    fn test_cpu_index() -> usize {
        TEST_SLOT.with(|slot| {
            if slot.get() == usize::MAX {
                slot.set(NEXT_SLOT.fetch_add(1, Ordering::Relaxed) % MAX_CPUS);
            }
            slot.get()
        })
    }

    fn init_cpu_provider() {
        register_cpu_index_provider(test_cpu_index);
    }

    /// Stand-in for the dispatcher: a synthetic exception frame offered to
    /// the guard at the exact point a real synchronous fault would be.
    fn simulate_fault(vector: u8) -> bool {
        let mut frame = make_frame(vector);
        fault_intercept(&mut frame)
    }

    struct CleanCtx {
        observed: *mut c_void,
        counter: u64,
    }

    unsafe extern "C" fn clean_callback(context: *mut c_void) {
        let ctx = unsafe { &mut *(context.cast::<CleanCtx>()) };
        ctx.observed = context;
        ctx.counter += 1;
    }

    unsafe extern "C" fn faulting_callback(context: *mut c_void) {
        let vector = unsafe { *(context.cast::<u8>()) };
        simulate_fault(vector);
        // Reached only if the vector was not interceptable; the caller then
        // sees a clean return and its assertions catch the mismatch.
    }

    static NULL_CTX_SEEN: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn record_null_callback(context: *mut c_void) {
        NULL_CTX_SEEN.store(if context.is_null() { 1 } else { 2 }, Ordering::SeqCst);
    }

    #[test]
    fn clean_call_returns_zero_and_preserves_context_identity() {
        init_cpu_provider();
        let mut ctx = CleanCtx {
            observed: ptr::null_mut(),
            counter: 7,
        };
        let expected = (&raw mut ctx).cast::<c_void>();
        let status = unsafe { invoke_guarded(clean_callback, expected) };
        assert_eq!(status, 0);
        assert_eq!(ctx.observed, expected);
        assert_eq!(ctx.counter, 8);
    }

    #[test]
    fn null_context_passes_through_unmodified() {
        init_cpu_provider();
        let status = unsafe { invoke_guarded(record_null_callback, ptr::null_mut()) };
        assert_eq!(status, 0);
        assert_eq!(NULL_CTX_SEEN.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn page_fault_returns_access_violation_code() {
        init_cpu_provider();
        let mut vector = EXCEPTION_PAGE_FAULT;
        let status = unsafe { invoke_guarded(faulting_callback, (&raw mut vector).cast()) };
        assert_eq!(status, FaultCode::from_vector(EXCEPTION_PAGE_FAULT).into_raw());
        assert_eq!(FaultCode::from_raw(status).vector(), EXCEPTION_PAGE_FAULT);
    }

    #[test]
    fn faulting_call_leaves_no_residue() {
        init_cpu_provider();
        let mut vector = EXCEPTION_GENERAL_PROTECTION;
        let status = unsafe { invoke_guarded(faulting_callback, (&raw mut vector).cast()) };
        assert_ne!(status, 0);

        // The scope stack must be empty again: no stray interception target,
        // and a well-behaved follow-up call runs clean.
        assert!(!simulate_fault(EXCEPTION_PAGE_FAULT));
        let mut ctx = CleanCtx {
            observed: ptr::null_mut(),
            counter: 0,
        };
        let status = unsafe { invoke_guarded(clean_callback, (&raw mut ctx).cast()) };
        assert_eq!(status, 0);
        assert_eq!(ctx.counter, 1);
    }

    #[test]
    fn try_guarded_runs_closure_to_completion() {
        init_cpu_provider();
        let mut value = 41u64;
        let result = try_guarded(|| value += 1);
        assert_eq!(result, Ok(()));
        assert_eq!(value, 42);
    }

    #[test]
    fn try_guarded_reports_fault_code() {
        init_cpu_provider();
        let result = try_guarded(|| {
            simulate_fault(EXCEPTION_GENERAL_PROTECTION);
        });
        assert_eq!(
            result,
            Err(FaultCode::from_vector(EXCEPTION_GENERAL_PROTECTION))
        );
    }

    #[test]
    fn divide_error_is_reported_nonzero() {
        init_cpu_provider();
        let result = try_guarded(|| {
            simulate_fault(EXCEPTION_DIVIDE_ERROR);
        });
        let code = result.unwrap_err();
        assert_eq!(code.vector(), EXCEPTION_DIVIDE_ERROR);
        assert_eq!(code.into_raw(), FAULT_CODE_TAG);
    }

    #[test]
    fn committed_side_effects_survive_interception() {
        init_cpu_provider();
        let mut progress = 0u64;
        let result = try_guarded(|| {
            progress = 1;
            simulate_fault(EXCEPTION_PAGE_FAULT);
            progress = 2;
        });
        assert!(result.is_err());
        assert_eq!(progress, 1);
    }

    #[test]
    fn nested_inner_fault_does_not_reach_outer_scope() {
        init_cpu_provider();
        let mut inner_result = None;
        let outer = try_guarded(|| {
            inner_result = Some(try_guarded(|| {
                simulate_fault(EXCEPTION_PAGE_FAULT);
            }));
        });
        assert_eq!(outer, Ok(()));
        assert_eq!(
            inner_result,
            Some(Err(FaultCode::from_vector(EXCEPTION_PAGE_FAULT)))
        );
    }

    #[test]
    fn irq_vectors_are_not_intercepted() {
        init_cpu_provider();
        let mut intercepted = true;
        let result = try_guarded(|| {
            intercepted = simulate_fault(IRQ_BASE_VECTOR);
        });
        assert_eq!(result, Ok(()));
        assert!(!intercepted);
    }

    #[test]
    fn critical_vectors_stay_with_the_fatal_path() {
        init_cpu_provider();
        for vector in [EXCEPTION_DOUBLE_FAULT, EXCEPTION_MACHINE_CHECK, EXCEPTION_NMI] {
            let mut intercepted = true;
            let result = try_guarded(|| {
                intercepted = simulate_fault(vector);
            });
            assert_eq!(result, Ok(()));
            assert!(!intercepted);
        }
    }

    #[test]
    fn intercept_without_scope_returns_false() {
        init_cpu_provider();
        assert!(!simulate_fault(EXCEPTION_PAGE_FAULT));
    }

    #[test]
    fn intercept_tolerates_null_frame() {
        init_cpu_provider();
        assert!(!fault_intercept(ptr::null_mut()));
    }

    #[test]
    fn interception_logs_at_debug_level() {
        init_cpu_provider();
        test_capture::install();
        klog_set_level(KlogLevel::Debug);
        let result = try_guarded(|| {
            simulate_fault(EXCEPTION_PAGE_FAULT);
        });
        klog_set_level(KlogLevel::Info);
        assert!(result.is_err());
        assert!(test_capture::contains("GUARD: intercepted vector 14"));
    }

    #[test]
    fn cpu_slots_are_independent_across_threads() {
        init_cpu_provider();
        let mut handles = Vec::new();
        for _ in 0..4 {
            handles.push(thread::spawn(|| {
                init_cpu_provider();
                for _ in 0..100 {
                    let fault = try_guarded(|| {
                        simulate_fault(EXCEPTION_PAGE_FAULT);
                    });
                    assert_eq!(fault, Err(FaultCode::from_vector(EXCEPTION_PAGE_FAULT)));
                    let clean = try_guarded(|| {});
                    assert_eq!(clean, Ok(()));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
