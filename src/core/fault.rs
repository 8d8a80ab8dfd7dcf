//! Purpose: Intercept access-violation signals around one guarded call.
//! Exports: `FaultReport`, `call_with_access_violation_guard`.
//! Role: Converts SIGSEGV/SIGBUS raised inside the guarded region into a normal return.
//! Invariants: At most one guard is armed at a time, on one thread.
//! Invariants: Faults outside an armed guard keep their default fatal disposition.
//! Invariants: Guarded signal dispositions are restored when the guard ends.

use std::ffi::c_int;
use std::fmt;

/// The intercepted fault, identified by its signal number.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FaultReport {
    pub signal: c_int,
}

impl FaultReport {
    pub fn signal_name(&self) -> &'static str {
        #[cfg(unix)]
        {
            if self.signal == libc::SIGSEGV {
                return "SIGSEGV";
            }
            if self.signal == libc::SIGBUS {
                return "SIGBUS";
            }
        }
        "fault"
    }
}

impl fmt::Display for FaultReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (signal {})", self.signal_name(), self.signal)
    }
}

#[cfg(unix)]
pub use imp::call_with_access_violation_guard;

/// Platforms without POSIX signals get no boundary: the call runs unguarded
/// and a hard fault terminates the process abnormally.
#[cfg(not(unix))]
pub fn call_with_access_violation_guard<T: Copy>(
    call: impl FnOnce() -> T,
) -> Result<T, FaultReport> {
    Ok(call())
}

#[cfg(unix)]
mod imp {
    use super::FaultReport;
    use std::cell::UnsafeCell;
    use std::ffi::c_int;
    use std::mem::{self, MaybeUninit};
    use std::ptr;
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

    /// The access-violation class: the two signals the kernel raises for a
    /// bad memory access. Everything else stays at its default disposition.
    const GUARDED_SIGNALS: [c_int; 2] = [libc::SIGSEGV, libc::SIGBUS];

    /// Oversized for every libc we target (glibc aarch64 needs 312 bytes,
    /// ppc64 more); sigsetjmp only writes the real sigjmp_buf prefix.
    const JMP_BUF_BYTES: usize = 1024;

    #[repr(C, align(16))]
    struct JmpBuf([u8; JMP_BUF_BYTES]);

    unsafe extern "C" {
        // glibc exposes sigsetjmp only through this alias; musl and the BSD
        // libcs export the plain name.
        #[cfg_attr(target_env = "gnu", link_name = "__sigsetjmp")]
        fn sigsetjmp(env: *mut JmpBuf, save_mask: c_int) -> c_int;
        fn siglongjmp(env: *mut JmpBuf, value: c_int) -> !;
    }

    struct GuardSlot {
        env: UnsafeCell<JmpBuf>,
        thread: UnsafeCell<MaybeUninit<libc::pthread_t>>,
        fault_signal: AtomicI32,
    }

    // The cells are only written by the guarded thread while disarmed, and
    // only read by the signal handler while armed.
    unsafe impl Sync for GuardSlot {}

    static GUARD: GuardSlot = GuardSlot {
        env: UnsafeCell::new(JmpBuf([0; JMP_BUF_BYTES])),
        thread: UnsafeCell::new(MaybeUninit::uninit()),
        fault_signal: AtomicI32::new(0),
    };

    static ARMED: AtomicBool = AtomicBool::new(false);

    /// Runs `call` with SIGSEGV/SIGBUS intercepted. A fault on the guarded
    /// thread unwinds to this frame via `siglongjmp` and is returned as a
    /// `FaultReport`; the previous dispositions are restored either way.
    ///
    /// `T: Copy` keeps the abandoned frame free of destructors when a fault
    /// cuts the call short.
    pub fn call_with_access_violation_guard<T: Copy>(
        call: impl FnOnce() -> T,
    ) -> Result<T, FaultReport> {
        debug_assert!(!ARMED.load(Ordering::Acquire), "one guard at a time");

        unsafe {
            (*GUARD.thread.get()).write(libc::pthread_self());
        }
        GUARD.fault_signal.store(0, Ordering::Release);
        let previous = install_handlers();

        // Arm only after sigsetjmp has filled the jump buffer; the handler
        // must never jump through a stale one.
        let jumped = unsafe { sigsetjmp(GUARD.env.get(), 1) };
        if jumped == 0 {
            ARMED.store(true, Ordering::Release);
            let value = call();
            ARMED.store(false, Ordering::Release);
            restore_handlers(&previous);
            Ok(value)
        } else {
            ARMED.store(false, Ordering::Release);
            restore_handlers(&previous);
            Err(FaultReport {
                signal: GUARD.fault_signal.load(Ordering::Acquire),
            })
        }
    }

    unsafe extern "C" fn on_access_violation(signal: c_int) {
        if ARMED.load(Ordering::Acquire) {
            let guarded = unsafe { (*GUARD.thread.get()).assume_init() };
            if unsafe { libc::pthread_equal(libc::pthread_self(), guarded) } != 0 {
                GUARD.fault_signal.store(signal, Ordering::Release);
                // savemask=1 above makes this restore the pre-guard mask.
                unsafe { siglongjmp(GUARD.env.get(), 1) };
            }
        }
        // Not ours: put the default disposition back and take the fault
        // again so the process still dies abnormally.
        unsafe {
            let mut action: libc::sigaction = mem::zeroed();
            action.sa_sigaction = libc::SIG_DFL;
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(signal, &action, ptr::null_mut());
            libc::raise(signal);
        }
    }

    fn install_handlers() -> [libc::sigaction; 2] {
        let mut action: libc::sigaction = unsafe { mem::zeroed() };
        action.sa_sigaction = on_access_violation as libc::sighandler_t;
        unsafe {
            libc::sigemptyset(&mut action.sa_mask);
        }

        let mut previous: [libc::sigaction; 2] = unsafe { mem::zeroed() };
        for (signal, slot) in GUARDED_SIGNALS.into_iter().zip(previous.iter_mut()) {
            unsafe {
                libc::sigaction(signal, &action, slot);
            }
        }
        previous
    }

    fn restore_handlers(previous: &[libc::sigaction; 2]) {
        for (signal, slot) in GUARDED_SIGNALS.into_iter().zip(previous.iter()) {
            unsafe {
                libc::sigaction(signal, slot, ptr::null_mut());
            }
        }
    }

}
