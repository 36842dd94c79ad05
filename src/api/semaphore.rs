// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! `osSemaphore*` entry points

use crate::api::thread_api;
use crate::error::{Error, Result};
use crate::kernel::sched::wake;
use crate::kernel::sync::semaphore::Semaphore;
use crate::kernel::thread::{BlockReason, WaitValue};
use crate::kernel::{self, Named};

pub type SemaphoreId = u32;

/// `osSemaphoreNew`
pub fn new(initial_tokens: u32, max_tokens: u32, name: Option<&str>) -> Result<SemaphoreId> {
    let k = kernel::instance();
    let sem = Semaphore::new(initial_tokens, max_tokens)?;
    let (id, _) = k.semaphores.insert(Named::new(name.map(String::from), sem));
    Ok(id)
}

/// `osSemaphoreGetName`
pub fn name(id: SemaphoreId) -> Result<Option<String>> {
    Ok(kernel::instance().semaphores.get(id).ok_or(Error::Parameter)?.name())
}

/// `osSemaphoreGetCount`
pub fn count(id: SemaphoreId) -> Result<u32> {
    Ok(kernel::instance().semaphores.get(id).ok_or(Error::Parameter)?.count())
}

/// `osSemaphoreAcquire` — fast path drains a token synchronously; the
/// slow path parks the caller on the semaphore's wait list the same
/// way every other blocking primitive does (see
/// [`crate::kernel::sched::wake`]).
pub fn acquire(id: SemaphoreId, timeout: u32) -> Result<()> {
    let k = kernel::instance();
    let sem = k.semaphores.get(id).ok_or(Error::Parameter)?;
    if sem.try_acquire() {
        return Ok(());
    }
    if timeout == 0 {
        return Err(Error::Resource);
    }
    if kernel::nvic::isr_unsafe_context() {
        return Err(Error::Isr);
    }
    let caller = thread_api::current()?;
    let caller_thread = k.threads.get(caller).ok_or(Error::Parameter)?;
    {
        let _guard = k.lock();
        // Re-check under the lock: a release could have landed between
        // the unlocked fast path above and taking it here.
        if sem.try_acquire() {
            return Ok(());
        }
        sem.enqueue_waiter(caller, caller_thread.effective_priority());
        wake::park(k, &caller_thread, BlockReason::Semaphore(id), wake::timeout_from_ticks(timeout));
    }
    wake::block(&caller_thread)?;
    Ok(())
}

/// `osSemaphoreRelease` — releasable from ISR context as well as thread
/// context (the kernel lock is already held by every caller path into
/// this function either way). [`wake::wake_with`] takes care of
/// deferring the wake itself when called while `nvic::in_isr()` is
/// true, so a release from inside an interrupt handler never resumes a
/// waiter until the dispatcher's ISR-draining loop has fully returned.
pub fn release(id: SemaphoreId) -> Result<()> {
    let k = kernel::instance();
    let _guard = k.lock();
    let sem = k.semaphores.get(id).ok_or(Error::Parameter)?;
    match sem.release()? {
        Some(waiter) => {
            wake::wake_with(k, waiter, WaitValue::Unit);
            Ok(())
        }
        None => Ok(()),
    }
}

/// `osSemaphoreDelete`
pub fn delete(id: SemaphoreId) -> Result<()> {
    let k = kernel::instance();
    let _guard = k.lock();
    let sem = k.semaphores.get(id).ok_or(Error::Parameter)?;
    for waiter in sem.drain_waiters() {
        wake::wake_with_error(k, waiter, Error::Resource);
    }
    k.semaphores.remove(id)
}
