// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread suspender
//!
//! The dispatcher's entire claim to single-core semantics rests on
//! this module: exactly one host thread may be outside
//! [`Suspender::block_until_woken`] (or its signal-handler equivalent,
//! below) at a time.
//!
//! RTXOff's own `thread_suspender.cpp` picks between two OS-native
//! backends at compile time: Win32 `SuspendThread`/`ResumeThread`, or a
//! POSIX real-time signal handler that parks on a condition variable.
//! This is a port of the second, portable one. A dedicated signal
//! (`SUSPEND_SIGNAL`) is delivered via `pthread_kill` to force a target
//! thread into its wait loop even if it's mid-instruction in firmware
//! code the dispatcher doesn't control — the same loop
//! `block_until_woken` uses when a thread parks itself voluntarily at a
//! safe point, so both paths converge on one state machine
//! (`Running -> Suspended -> Running`, with a one-shot `Killed` terminal
//! state).
//!
//! A thread only ever needs the real signal when the dispatcher is
//! stopping some *other* thread (priority preemption, round-robin
//! quantum expiry) — the one case where the target might not be
//! anywhere near this module's own lock. When a thread parks itself
//! (the slow path of a blocking call, `osThreadYield`), [`Suspender::suspend`]
//! is called by that same thread on itself, under the kernel lock,
//! which is enough to flip the state machine with no signal needed —
//! the thread is about to call [`Suspender::block_until_woken`] next
//! anyway. [`Suspender::suspend`] and [`Suspender::kill`] both detect
//! this case (comparing the caller's `pthread_self()` against the
//! stored native handle) and skip the signal, which also sidesteps the
//! one real hazard here: a signal delivered to a thread while it holds
//! this module's own `state` mutex would deadlock trying to re-enter
//! it. That can only happen via self-signal, so suppressing it there is
//! sufficient — an externally delivered signal always finds the target
//! either off running unrelated code or blocked inside a condition
//! variable wait, which releases the mutex while parked.

use std::cell::Cell;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, Once};

/// Matches `thread_suspender.cpp`'s `#define SUSPEND_SIGNAL SIGUSR1`.
/// Reserved for this purpose for the life of the process once the first
/// [`Suspender`] is constructed — firmware code under test must not
/// install its own handler for it.
const SUSPEND_SIGNAL: c_int = libc::SIGUSR1;

static INSTALL_HANDLER: Once = Once::new();

thread_local! {
    /// The [`Park`] belonging to whichever RTOS thread is currently
    /// executing on this host thread. A signal handler receives nothing
    /// but a signal number, so it needs this to know whose state to
    /// wait on; set by the owning thread itself in [`Suspender::mark_ready`],
    /// mirroring `thread_suspender.cpp`'s `myData` thread-local.
    static CURRENT_PARK: Cell<*const Park> = const { Cell::new(std::ptr::null()) };
}

/// Installed once per process. Runs on whichever thread
/// `SUSPEND_SIGNAL` is delivered to; looks up that thread's own `Park`
/// via [`CURRENT_PARK`] and blocks in the same wait loop
/// `block_until_woken` uses, so a resume from the dispatcher resumes
/// execution exactly where the signal interrupted it. If instead the
/// thread was killed while suspended this way, the handler never
/// returns — it ends the thread outright with `pthread_exit`, since
/// there is no safe point to unwind back to in arbitrary interrupted
/// firmware code.
extern "C" fn suspend_signal_handler(_signum: c_int) {
    let park = CURRENT_PARK.with(|c| c.get());
    if park.is_null() {
        return;
    }
    // Safety: `park` points at the `Park` owned by this same thread's
    // `Suspender`, which outlives the thread for as long as it can
    // still receive signals (the `Thread` control block it's embedded
    // in is never freed out from under a live host thread).
    let park = unsafe { &*park };
    if !park.wait_for_resume() {
        unsafe {
            libc::pthread_exit(std::ptr::null_mut());
        }
    }
}

fn install_handler() {
    INSTALL_HANDLER.call_once(|| unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = suspend_signal_handler as usize;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = 0;
        libc::sigaction(SUSPEND_SIGNAL, &action, std::ptr::null_mut());
    });
}

/// Per-thread suspend/resume state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SuspendState {
    Running,
    Suspended,
    Killed,
}

/// Shared state behind a [`Suspender`], factored out so the signal
/// handler (which only ever sees a raw pointer via thread-local
/// storage, never the owning `Thread`) can reach it too.
struct Park {
    state: Mutex<SuspendState>,
    cv: Condvar,
    /// Set once the owning thread has installed its wait point; the
    /// controller must not signal before this, or the first suspend
    /// request could race the thread's own startup.
    ready: Mutex<bool>,
    ready_cv: Condvar,
    /// The owning thread's `pthread_t`, stored as a plain integer (not
    /// `libc::pthread_t` itself) so `Park` stays `Send + Sync` without
    /// depending on that type's own properties. Zero before
    /// [`Suspender::mark_ready`] runs.
    native: AtomicU64,
}

impl Park {
    fn new() -> Self {
        Self {
            // Starts Suspended: a freshly spawned host thread must not
            // run firmware code until the dispatcher has actually chosen
            // it and called `resume()`. Without this a new thread's
            // first `block_until_woken` would race ahead immediately,
            // letting two RTOS threads execute at once.
            state: Mutex::new(SuspendState::Suspended),
            cv: Condvar::new(),
            ready: Mutex::new(false),
            ready_cv: Condvar::new(),
            native: AtomicU64::new(0),
        }
    }

    /// The wait loop shared by [`Suspender::block_until_woken`] (called
    /// directly by the owning thread) and [`suspend_signal_handler`]
    /// (invoked asynchronously on it). Returns `false` only once
    /// `Killed`; the caller decides what that means for it.
    fn wait_for_resume(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        loop {
            match *state {
                SuspendState::Killed => return false,
                SuspendState::Running => return true,
                SuspendState::Suspended => {
                    state = self.cv.wait(state).unwrap();
                }
            }
        }
    }
}

/// Per-thread suspend/resume handle. One of these is embedded in every
/// [`crate::kernel::thread::Thread`].
pub struct Suspender {
    park: Park,
}

impl Suspender {
    pub fn new() -> Self {
        install_handler();
        Self { park: Park::new() }
    }

    /// Called once by the owning thread before it starts doing RTOS
    /// work: records its native handle so [`suspend`](Self::suspend)/
    /// [`kill`](Self::kill) can target it with a real signal, binds the
    /// thread-local the signal handler reads, and unblocks a controller
    /// that may already be waiting to suspend it (the start-handshake
    /// from `thread_suspender.cpp`).
    pub fn mark_ready(&self) {
        self.park.native.store(unsafe { libc::pthread_self() as u64 }, Ordering::Release);
        CURRENT_PARK.with(|c| c.set(&self.park as *const Park));
        let mut ready = self.park.ready.lock().unwrap();
        *ready = true;
        self.park.ready_cv.notify_all();
    }

    fn wait_until_ready(&self) {
        let mut ready = self.park.ready.lock().unwrap();
        while !*ready {
            ready = self.park.ready_cv.wait(ready).unwrap();
        }
    }

    /// True if the calling host thread is the one this `Suspender`
    /// belongs to — i.e. this is a thread suspending/killing itself,
    /// rather than the dispatcher acting on some other thread.
    fn is_own_thread(&self) -> bool {
        let native = self.park.native.load(Ordering::Acquire);
        native != 0 && unsafe { libc::pthread_self() as u64 } == native
    }

    /// Deliver `SUSPEND_SIGNAL` to the owning thread, unless this is a
    /// self-call (see the module docs for why that's both unnecessary
    /// and unsafe) or the thread hasn't bound its native handle yet.
    fn signal(&self) {
        if self.is_own_thread() {
            return;
        }
        let native = self.park.native.load(Ordering::Acquire);
        if native != 0 {
            unsafe {
                libc::pthread_kill(native as libc::pthread_t, SUSPEND_SIGNAL);
            }
        }
    }

    /// Stop the owning thread. Called either by the thread itself at a
    /// voluntary safe point (no signal needed — it calls
    /// [`block_until_woken`](Self::block_until_woken) right after) or by
    /// the dispatcher to stop a different thread that may still be
    /// executing native firmware code, in which case the real
    /// `SUSPEND_SIGNAL` forces it into the same wait loop from wherever
    /// it happens to be. Idempotent: a no-op if already `Suspended` or
    /// `Killed`.
    pub fn suspend(&self) {
        self.wait_until_ready();
        let mut state = self.park.state.lock().unwrap();
        if *state != SuspendState::Running {
            return;
        }
        *state = SuspendState::Suspended;
        drop(state);
        self.signal();
    }

    /// Wake a parked thread.
    pub fn resume(&self) {
        let mut state = self.park.state.lock().unwrap();
        if *state == SuspendState::Suspended {
            *state = SuspendState::Running;
            self.park.cv.notify_all();
        }
    }

    /// Permanently park the thread; used during kernel shutdown and
    /// `osThreadTerminate` so a host thread backing a killed RTOS thread
    /// never runs firmware code again. If the thread is still genuinely
    /// `Running` (and this isn't a self-kill), forces it down with the
    /// same signal `suspend` uses — its handler notices `Killed` and
    /// ends the thread via `pthread_exit` instead of waiting to be
    /// resumed.
    pub fn kill(&self) {
        let mut state = self.park.state.lock().unwrap();
        let was_running = *state == SuspendState::Running;
        *state = SuspendState::Killed;
        self.park.cv.notify_all();
        drop(state);
        if was_running {
            self.signal();
        }
    }

    /// Called by the owning thread at every safe point (a blocking
    /// call's slow path once it's arranged to no longer be `run.curr`,
    /// `osThreadYield`, or the top of its own entry function); parks
    /// until `resume()` is called, or returns `false` immediately if
    /// the thread has been killed.
    pub fn block_until_woken(&self) -> bool {
        self.park.wait_for_resume()
    }

    pub fn is_suspended(&self) -> bool {
        *self.park.state.lock().unwrap() == SuspendState::Suspended
    }
}

impl Default for Suspender {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn external_suspend_reparks_a_cooperatively_blocked_thread() {
        let s = Arc::new(Suspender::new());
        let s2 = s.clone();
        let phase = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let phase2 = phase.clone();
        let handle = thread::spawn(move || {
            s2.mark_ready();
            assert!(s2.block_until_woken());
            phase2.store(1, std::sync::atomic::Ordering::SeqCst);
            assert!(s2.block_until_woken());
            phase2.store(2, std::sync::atomic::Ordering::SeqCst);
        });
        s.resume();
        while phase.load(std::sync::atomic::Ordering::SeqCst) < 1 {
            thread::sleep(Duration::from_millis(1));
        }
        s.suspend();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(phase.load(std::sync::atomic::Ordering::SeqCst), 1);
        s.resume();
        handle.join().unwrap();
        assert_eq!(phase.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn kill_unblocks_with_false() {
        let s = Suspender::new();
        s.mark_ready();
        s.kill();
        assert!(!s.block_until_woken());
    }

    #[test]
    fn fresh_suspender_starts_parked() {
        let s = Arc::new(Suspender::new());
        let s2 = s.clone();
        let woke = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let woke2 = woke.clone();
        let handle = thread::spawn(move || {
            s2.mark_ready();
            s2.block_until_woken();
            woke2.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(20));
        assert!(!woke.load(std::sync::atomic::Ordering::SeqCst));
        s.resume();
        handle.join().unwrap();
        assert!(woke.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn resumed_thread_does_not_reblock_until_suspended_again() {
        let s = Suspender::new();
        s.mark_ready();
        s.resume();
        assert!(s.block_until_woken());
        assert!(s.block_until_woken());
    }

    #[test]
    fn external_suspend_actually_stops_a_spinning_thread() {
        // The scenario the cooperative-only design couldn't handle:
        // a thread that never calls any blocking primitive on its own.
        let s = Arc::new(Suspender::new());
        s.mark_ready();
        let s2 = s.clone();
        let counter = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let counter2 = counter.clone();
        s.resume();
        let handle = thread::spawn(move || {
            s2.mark_ready();
            loop {
                counter2.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                if counter2.load(std::sync::atomic::Ordering::Relaxed) > 50_000_000 {
                    break;
                }
            }
        });
        thread::sleep(Duration::from_millis(10));
        s.suspend();
        let at_suspend = counter.load(std::sync::atomic::Ordering::Relaxed);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(at_suspend, counter.load(std::sync::atomic::Ordering::Relaxed));
        s.resume();
        handle.join().unwrap();
    }
}
