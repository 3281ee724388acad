//! Async-signal-safe crash side channel.
//!
//! A fatal signal (SIGSEGV/SIGABRT/SIGFPE/SIGBUS) raised inside a worker
//! thread must not take the whole server down: the handler decides, with
//! nothing but atomic loads, whether the faulting thread is a pool worker.
//! Non-workers get the default disposition back and the signal re-raised.
//! Workers record `(tid, signo)` into a single-slot channel and terminate
//! just the faulting thread; a dedicated recovery thread consumes the record
//! and applies the quarantine policy with normal locks and logging.
//!
//! The worker tid registry is a fixed array of atomics sized by
//! `MAX_WORKERS`, registered/unregistered by the pool around each worker's
//! lifetime. Everything the handler touches lives here.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};

use wc_common::MAX_WORKERS;

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_SLOT: AtomicU64 = AtomicU64::new(0);
static WORKER_TIDS: [AtomicU64; MAX_WORKERS] = [EMPTY_SLOT; MAX_WORKERS];

static CRASH_TID: AtomicU64 = AtomicU64::new(0);
static CRASH_SIGNO: AtomicI32 = AtomicI32::new(0);
static CRASH_PENDING: AtomicBool = AtomicBool::new(false);

/// A fatal signal captured in a worker thread, awaiting recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrashRecord {
    pub tid: u64,
    pub signo: i32,
}

/// OS-level id of the calling thread. This is what the signal handler sees,
/// so it is also the pool's worker key.
#[cfg(unix)]
pub fn current_tid() -> u64 {
    unsafe { libc::pthread_self() as u64 }
}

#[cfg(not(unix))]
pub fn current_tid() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static TID: u64 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    TID.with(|t| *t)
}

/// Publish the calling thread as a pool worker. Returns false when every
/// slot is taken (the pool caps its thread count well below this).
pub fn register_worker(tid: u64) -> bool {
    for slot in WORKER_TIDS.iter() {
        if slot
            .compare_exchange(0, tid, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            return true;
        }
    }
    false
}

pub fn unregister_worker(tid: u64) {
    for slot in WORKER_TIDS.iter() {
        if slot
            .compare_exchange(tid, 0, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            return;
        }
    }
}

/// Async-signal-safe membership probe: atomic loads only.
pub fn is_worker_tid(tid: u64) -> bool {
    WORKER_TIDS.iter().any(|slot| slot.load(Ordering::Acquire) == tid)
}

/// Deposit a crash record. Single slot: a second crash while one is pending
/// is refused and the caller escalates. Async-signal-safe.
pub fn record_crash(tid: u64, signo: i32) -> bool {
    if CRASH_PENDING.load(Ordering::Acquire) {
        return false;
    }
    CRASH_TID.store(tid, Ordering::Relaxed);
    CRASH_SIGNO.store(signo, Ordering::Relaxed);
    CRASH_PENDING.store(true, Ordering::Release);
    true
}

/// Consume the pending crash record, if any. Called by the recovery thread.
pub fn take_crash() -> Option<CrashRecord> {
    if !CRASH_PENDING.load(Ordering::Acquire) {
        return None;
    }
    let record = CrashRecord {
        tid: CRASH_TID.load(Ordering::Relaxed),
        signo: CRASH_SIGNO.load(Ordering::Relaxed),
    };
    CRASH_PENDING.store(false, Ordering::Release);
    Some(record)
}

/// Restore the default disposition for `signo` and re-raise it, terminating
/// the process with the original signal's exit status.
#[cfg(unix)]
pub fn restore_default_and_raise(signo: i32) {
    unsafe {
        libc::signal(signo, libc::SIG_DFL);
        libc::raise(signo);
    }
}

#[cfg(not(unix))]
pub fn restore_default_and_raise(_signo: i32) {
    std::process::abort();
}

/// Raise SIGABRT on the calling thread to preserve a core. With the crash
/// handler installed and the caller not a worker, the handler restores the
/// default disposition and the process dies with the abort status.
#[cfg(unix)]
pub fn escalate_hang() {
    unsafe {
        libc::raise(libc::SIGABRT);
    }
}

#[cfg(not(unix))]
pub fn escalate_hang() {
    std::process::abort();
}

#[cfg(unix)]
pub const FATAL_SIGNALS: &[i32] = &[libc::SIGSEGV, libc::SIGABRT, libc::SIGFPE, libc::SIGBUS];

#[cfg(unix)]
extern "C" fn fatal_signal_handler(signo: libc::c_int) {
    let tid = current_tid();
    // Outside the pool, or a crash already in flight: give the signal back.
    if !is_worker_tid(tid) || !record_crash(tid, signo as i32) {
        restore_default_and_raise(signo as i32);
        return;
    }
    // Terminate only the faulting worker; recovery owns the bookkeeping.
    unsafe { libc::pthread_exit(std::ptr::null_mut()) }
}

/// Install the fatal-signal handler for SIGSEGV/SIGABRT/SIGFPE/SIGBUS.
#[cfg(unix)]
pub fn install_crash_handler() {
    let handler: extern "C" fn(libc::c_int) = fatal_signal_handler;
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler as usize;
        action.sa_flags = 0;
        libc::sigemptyset(&mut action.sa_mask);
        for &signo in FATAL_SIGNALS {
            libc::sigaction(signo, &action, std::ptr::null_mut());
        }
    }
}

#[cfg(not(unix))]
pub fn install_crash_handler() {}
