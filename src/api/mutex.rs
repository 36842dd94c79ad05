// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! `osMutex*` entry points

use crate::api::thread_api;
use crate::error::{Error, Result};
use crate::kernel::sched::wake;
use crate::kernel::sync::mutex::Mutex;
use crate::kernel::thread::{BlockReason, ThreadId};
use crate::kernel::{self, Named};

pub use crate::kernel::sync::mutex::MutexAttr;

pub type MutexId = u32;

/// `osMutexNew`
pub fn new(attr: MutexAttr, name: Option<&str>) -> MutexId {
    let k = kernel::instance();
    let (id, _) = k.mutexes.insert(Named::new(name.map(String::from), Mutex::new(attr)));
    id
}

/// `osMutexGetName`
pub fn name(id: MutexId) -> Result<Option<String>> {
    Ok(kernel::instance().mutexes.get(id).ok_or(Error::Parameter)?.name())
}

/// `osMutexGetOwner`
pub fn owner(id: MutexId) -> Result<Option<ThreadId>> {
    Ok(kernel::instance().mutexes.get(id).ok_or(Error::Parameter)?.owner())
}

/// `osMutexAcquire` — the fast path acquires uncontended or stacks a
/// recursive lock without ever touching the calling thread's state;
/// the slow path boosts the current owner to at least the caller's
/// priority (priority inheritance) before parking.
pub fn acquire(id: MutexId, timeout: u32) -> Result<()> {
    let k = kernel::instance();
    // Unlike semaphore/mempool, a mutex has no ISR-legal form at all —
    // check before even the uncontended fast path, not just the slow one.
    if kernel::nvic::isr_unsafe_context() {
        return Err(Error::Isr);
    }
    let caller = thread_api::current()?;
    let caller_thread = k.threads.get(caller).ok_or(Error::Parameter)?;
    {
        let _guard = k.lock();
        let m = k.mutexes.get(id).ok_or(Error::Parameter)?;
        match m.try_acquire(caller) {
            Ok(()) => {
                caller_thread.push_owned_mutex(id);
                return Ok(());
            }
            Err(_) => {
                if timeout == 0 {
                    return Err(Error::Resource);
                }
                let owner = m.enqueue_waiter(caller, caller_thread.effective_priority());
                if let Some(owner_tid) = owner {
                    k.recompute_effective_priority(owner_tid);
                }
                wake::park(k, &caller_thread, BlockReason::Mutex(id), wake::timeout_from_ticks(timeout));
            }
        }
    }
    // `release` already pushed `id` onto the new owner's `owned_mutexes`
    // as part of the handoff — pushing again here would double-register
    // it and make `finish_thread` run `recover_from_owner_death` twice.
    wake::block(&caller_thread)?;
    Ok(())
}

/// `osMutexRelease` — hands ownership straight to the highest-priority
/// waiter (if any) rather than letting the lock go idle and be raced
/// for, and recomputes whichever thread is left holding an inheritance
/// obligation (the new owner, or the releasing thread once nothing is
/// boosting it anymore).
pub fn release(id: MutexId) -> Result<()> {
    let k = kernel::instance();
    let caller = thread_api::current()?;
    let _guard = k.lock();
    let m = k.mutexes.get(id).ok_or(Error::Parameter)?;
    let (next, fully_unlocked) = m.release(caller)?;
    if let Some(caller_thread) = k.threads.get(caller) {
        if fully_unlocked {
            caller_thread.remove_owned_mutex(id);
        }
    }
    match next {
        Some(next_tid) => {
            if let Some(next_thread) = k.threads.get(next_tid) {
                next_thread.push_owned_mutex(id);
            }
            k.recompute_effective_priority(next_tid);
            wake::wake_with(k, next_tid, crate::kernel::thread::WaitValue::Unit);
        }
        None if fully_unlocked => {
            k.recompute_effective_priority(caller);
        }
        None => {}
    }
    Ok(())
}

/// `osMutexDelete`
pub fn delete(id: MutexId) -> Result<()> {
    let k = kernel::instance();
    let _guard = k.lock();
    let m = k.mutexes.get(id).ok_or(Error::Parameter)?;
    for waiter in m.drain_waiters() {
        wake::wake_with_error(k, waiter, Error::Parameter);
    }
    k.mutexes.remove(id)
}
