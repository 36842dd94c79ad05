// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! `osEventFlags*` entry points
//!
//! A standalone 31-bit flag group any thread may create, set, clear and
//! wait on — as opposed to `osThreadFlags*` in [`crate::api::thread_flags`],
//! which operates on a thread's own private bitset. Both share the same
//! wait-condition evaluation (`osFlagsWaitAll`/`osFlagsNoClear`), kept in
//! [`crate::kernel::sync::event::EventFlags`] for this module and
//! duplicated narrowly in [`crate::kernel::thread::Thread`] because a
//! thread's flags can have at most one waiter (itself) while an
//! `osEventFlagsId_t` can have many.

use crate::error::{Error, Result};
use crate::kernel::sched::wake;
use crate::kernel::sync::event::EventFlags;
use crate::kernel::thread::{BlockReason, WaitValue};
use crate::kernel::{self, Named};

pub type EventFlagsId = u32;

/// `osFlagsWaitAll` — every requested bit must be set (conjunction);
/// default is disjunction (any one bit).
pub const WAIT_ALL: u32 = 1 << 0;
/// `osFlagsNoClear` — matched bits are left set instead of consumed.
pub const NO_CLEAR: u32 = 1 << 1;
/// `osFlagsError` — set on the high bit of a return value that is
/// actually an encoded error rather than a flags snapshot, matching
/// CMSIS-RTOS v2's single-`uint32_t`-return calling convention. The
/// typed Rust API below returns `Result<u32>` instead, so callers never
/// need to inspect this bit themselves; it's kept only because
/// `osFlagsErrorMask` appears in firmware ported verbatim from the
/// C API elsewhere in the workspace.
pub const ERROR_MASK: u32 = 1 << 31;

/// `osEventFlagsNew`
pub fn new(name: Option<&str>) -> EventFlagsId {
    let k = kernel::instance();
    let (id, _) = k.event_flags.insert(Named::new(name.map(String::from), EventFlags::new(0)));
    id
}

/// `osEventFlagsGetName`
pub fn name(id: EventFlagsId) -> Result<Option<String>> {
    Ok(kernel::instance().event_flags.get(id).ok_or(Error::Parameter)?.name())
}

/// `osEventFlagsSet` — returns the flags value immediately prior to
/// the set.
pub fn set(id: EventFlagsId, flags: u32) -> Result<u32> {
    let k = kernel::instance();
    let _guard = k.lock();
    let ef = k.event_flags.get(id).ok_or(Error::Parameter)?;
    let (prev, woken) = ef.set(flags);
    for (tid, snapshot) in woken {
        wake::wake_with(k, tid, WaitValue::Flags(snapshot));
    }
    Ok(prev)
}

/// `osEventFlagsClear` — returns the flags value immediately prior to
/// the clear.
pub fn clear(id: EventFlagsId, flags: u32) -> Result<u32> {
    let k = kernel::instance();
    let _guard = k.lock();
    Ok(k.event_flags.get(id).ok_or(Error::Parameter)?.clear(flags))
}

/// `osEventFlagsGet`
pub fn get(id: EventFlagsId) -> Result<u32> {
    Ok(kernel::instance().event_flags.get(id).ok_or(Error::Parameter)?.get())
}

/// `osEventFlagsWait` — `options` is `WAIT_ALL`/`NO_CLEAR`, or-combined.
/// Matches the satisfied snapshot synchronously if already set;
/// otherwise parks until another thread's `set` (or the group's
/// deletion) resolves the wait, or `timeout` ticks elapse.
pub fn wait(id: EventFlagsId, flags: u32, options: u32, timeout: u32) -> Result<u32> {
    let k = kernel::instance();
    let wait_all = options & WAIT_ALL != 0;
    let no_clear = options & NO_CLEAR != 0;
    let ef = k.event_flags.get(id).ok_or(Error::Parameter)?;
    if let Some(snapshot) = ef.check(flags, wait_all, no_clear) {
        return Ok(snapshot);
    }
    if timeout == 0 {
        return Err(Error::Resource);
    }
    if kernel::nvic::isr_unsafe_context() {
        return Err(Error::Isr);
    }
    let caller = crate::api::thread_api::current()?;
    let caller_thread = k.threads.get(caller).ok_or(Error::Parameter)?;
    {
        let _guard = k.lock();
        if let Some(snapshot) = ef.check(flags, wait_all, no_clear) {
            return Ok(snapshot);
        }
        ef.enqueue_waiter(caller, caller_thread.effective_priority(), flags, wait_all, no_clear);
        wake::park(k, &caller_thread, BlockReason::EventFlags(id), wake::timeout_from_ticks(timeout));
    }
    match wake::block(&caller_thread)? {
        WaitValue::Flags(snapshot) => Ok(snapshot),
        _ => Err(Error::Error),
    }
}

/// `osEventFlagsDelete`
pub fn delete(id: EventFlagsId) -> Result<()> {
    let k = kernel::instance();
    let _guard = k.lock();
    let ef = k.event_flags.get(id).ok_or(Error::Parameter)?;
    for waiter in ef.drain_waiters() {
        wake::wake_with_error(k, waiter, Error::Resource);
    }
    k.event_flags.remove(id)
}
