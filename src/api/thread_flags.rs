// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! `osThreadFlags*` entry points
//!
//! Each thread carries its own 31-bit flags bitset (see
//! [`crate::kernel::thread::Thread`]), distinct from an
//! [`crate::api::event_flags`] group: `Set` may target any thread
//! (legal from ISR context, unlike a blocking wait), but `Wait`/`Clear`/
//! `Get` only ever operate on the calling thread — CMSIS-RTOS v2 has no
//! "wait on someone else's thread flags" call.

pub use crate::api::event_flags::{NO_CLEAR, WAIT_ALL};
use crate::error::{Error, Result};
use crate::kernel::sched::wake;
use crate::kernel::thread::{BlockReason, ThreadId, WaitValue};
use crate::kernel::{self};

/// `osThreadFlagsSet` — returns the flags value immediately prior to
/// the set. Legal from ISR context: the caller never blocks here, it
/// only (possibly) wakes a parked waiter.
pub fn set(tid: ThreadId, flags: u32) -> Result<u32> {
    let k = kernel::instance();
    let _guard = k.lock();
    let thread = k.threads.get(tid).ok_or(Error::Parameter)?;
    let (prev, woken) = thread.set_flags(flags);
    if let Some(snapshot) = woken {
        wake::wake_with(k, tid, WaitValue::Flags(snapshot));
    }
    Ok(prev)
}

/// `osThreadFlagsClear` — operates on the calling thread only.
pub fn clear(flags: u32) -> Result<u32> {
    let k = kernel::instance();
    let tid = crate::api::thread_api::current()?;
    let thread = k.threads.get(tid).ok_or(Error::Parameter)?;
    Ok(thread.clear_flags(flags))
}

/// `osThreadFlagsGet` — operates on the calling thread only.
pub fn get() -> Result<u32> {
    let k = kernel::instance();
    let tid = crate::api::thread_api::current()?;
    let thread = k.threads.get(tid).ok_or(Error::Parameter)?;
    Ok(thread.get_flags())
}

/// `osThreadFlagsWait` — not legal from ISR context (unlike `set`),
/// since a wait may block.
pub fn wait(flags: u32, options: u32, timeout: u32) -> Result<u32> {
    if kernel::nvic::isr_unsafe_context() {
        return Err(Error::Isr);
    }
    let k = kernel::instance();
    let tid = crate::api::thread_api::current()?;
    let thread = k.threads.get(tid).ok_or(Error::Parameter)?;
    let wait_all = options & WAIT_ALL != 0;
    let no_clear = options & NO_CLEAR != 0;
    if let Some(snapshot) = thread.check_flags(flags, wait_all, no_clear) {
        return Ok(snapshot);
    }
    if timeout == 0 {
        return Err(Error::Resource);
    }
    {
        let _guard = k.lock();
        if let Some(snapshot) = thread.check_flags(flags, wait_all, no_clear) {
            return Ok(snapshot);
        }
        thread.register_flags_wait(flags, wait_all, no_clear);
        wake::park(k, &thread, BlockReason::ThreadFlags, wake::timeout_from_ticks(timeout));
    }
    match wake::block(&thread)? {
        WaitValue::Flags(snapshot) => Ok(snapshot),
        _ => Err(Error::Error),
    }
}
