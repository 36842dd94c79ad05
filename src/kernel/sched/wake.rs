// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Wait/wake protocol
//!
//! Every blocking primitive (mutex, semaphore, event flags, thread
//! flags, memory pool, message queue) follows the same shape: a fast
//! path that succeeds immediately without touching thread state, and a
//! slow path that parks the calling thread. The slow path is always
//! the same three steps, which is what this module factors out:
//!
//! 1. [`park`] — under the kernel lock, mark the thread `Blocked` with
//!    the reason it's waiting on and, if it gave a finite timeout, drop
//!    it on the delay list.
//! 2. [`block`] — with the kernel lock released, actually suspend the
//!    calling host thread until something resumes it, then resolve
//!    whatever was left in its wait-exit slot into the `Result` the
//!    `osXxx` call returns.
//! 3. [`wake_with`] / [`wake_with_error`] — called by the object a
//!    thread is waiting on (or by the dispatcher's tick loop, for a
//!    timeout) once the wait is resolved one way or the other.
//!
//! Splitting `park` and `block` around the kernel-lock release matters:
//! a thread must never suspend itself while still holding the lock, or
//! no other thread (including the dispatcher) could ever make progress.
//!
//! A wake triggered from inside an ISR callback (`nvic::in_isr()` true)
//! is never delivered inline: [`wake_with`]/[`wake_with_error`] instead
//! queue it on the kernel's `post_isr_queue` and it is delivered once
//! the dispatcher's ISR-draining loop has fully returned, so a woken
//! thread always resumes in thread context rather than nested inside
//! a handler.

use crate::error::{Error, Result};
use crate::kernel::nvic;
use crate::kernel::thread::{BlockReason, Thread, ThreadId, ThreadState, WaitValue};
use crate::kernel::Kernel;

/// CMSIS-RTOS v2's `osWaitForever`.
pub const WAIT_FOREVER: u32 = u32::MAX;

/// Convert an `osXxx` call's `timeout` parameter into the `Option<ticks>`
/// shape the wait protocol uses: `None` for an unbounded wait (the
/// thread is never placed on the delay list at all, matching the delay
/// list's own documented "no infinite entry" design), `Some(0)` for a
/// non-blocking poll that the caller should resolve from its fast path
/// without ever calling [`park`].
pub fn timeout_from_ticks(ticks: u32) -> Option<u64> {
    if ticks == WAIT_FOREVER {
        None
    } else {
        Some(ticks as u64)
    }
}

/// Mark `thread` `Blocked` for `reason` and, if `timeout_ticks` is
/// finite and nonzero, register it on the delay list. Must be called
/// with the kernel lock held — every `osXxx` entry point acquires the
/// lock before touching kernel state, and this is where the slow path
/// hands off from "still holding the lock" to "about to suspend".
///
/// Also suspends the thread's own [`crate::kernel::thread::suspender::Suspender`]
/// right here, before the lock is released: the caller is always the
/// thread itself giving up `run.curr` voluntarily, so there is nothing
/// to interrupt (no signal is sent — see `suspender.rs`), but the FSM
/// must already read `Suspended` the instant this thread calls `block`,
/// or a dispatcher pass landing in between could find it still
/// `Running` and never reach it with a real `resume()`.
pub fn park(kernel: &Kernel, thread: &Thread, reason: BlockReason, timeout_ticks: Option<u64>) {
    thread.clear_wait_outcome();
    thread.set_block_reason(Some(reason));
    thread.set_state(ThreadState::Blocked);
    if let Some(ticks) = timeout_ticks {
        if ticks > 0 {
            kernel.delay_list.lock().unwrap().insert(thread.id(), ticks);
        }
    }
    thread.suspender().suspend();
}

/// Suspend the calling host thread and resolve the value left in its
/// wait-exit slot. Must be called with the kernel lock NOT held: this
/// is the one point in the whole protocol where the calling thread
/// actually stops running. Returns `Err(Error::Resource)` if the
/// thread was killed while parked instead of woken normally.
pub fn block(thread: &Thread) -> Result<WaitValue> {
    if !thread.suspender().block_until_woken() {
        return Err(Error::Resource);
    }
    // A `None` outcome here would mean the thread was resumed without
    // anything — object or timeout — ever filling its wait-exit slot,
    // which is a kernel defect; reporting it as a timeout is the least
    // surprising thing to hand firmware code rather than panicking.
    thread.take_wait_outcome().unwrap_or(Err(Error::Timeout))
}

/// A wake that arrived while `nvic::in_isr()` was true, held until the
/// dispatcher's ISR-draining loop finishes. Plain data rather than a
/// closure: a closure capturing `&Kernel` can't be stored on `Kernel`
/// itself without a `'static` bound the singleton's own borrowed `&self`
/// methods don't carry.
pub(crate) enum DeferredWake {
    Value(ThreadId, WaitValue),
    Error(ThreadId, Error),
}

/// Deliver `value` to a parked thread and put it back on the ready
/// list. Called by whatever object the thread was waiting on once its
/// condition is satisfied. If called from inside an ISR callback, the
/// wake is deferred instead — see the module doc comment.
pub fn wake_with(kernel: &Kernel, tid: ThreadId, value: WaitValue) {
    if nvic::in_isr() {
        kernel.defer_post_isr(DeferredWake::Value(tid, value));
        return;
    }
    deliver(kernel, tid, value);
}

/// Deliver an error to a parked thread (its wait timed out, or the
/// object it was waiting on was deleted out from under it). Deferred
/// the same way as [`wake_with`] when called from ISR context.
pub fn wake_with_error(kernel: &Kernel, tid: ThreadId, err: Error) {
    if nvic::in_isr() {
        kernel.defer_post_isr(DeferredWake::Error(tid, err));
        return;
    }
    deliver_error(kernel, tid, err);
}

fn deliver(kernel: &Kernel, tid: ThreadId, value: WaitValue) {
    if let Some(t) = kernel.threads.get(tid) {
        kernel.delay_list.lock().unwrap().remove(tid);
        t.set_block_reason(None);
        t.set_wait_outcome(Ok(value));
        kernel.make_ready(tid);
    }
}

fn deliver_error(kernel: &Kernel, tid: ThreadId, err: Error) {
    if let Some(t) = kernel.threads.get(tid) {
        kernel.delay_list.lock().unwrap().remove(tid);
        t.set_block_reason(None);
        t.set_wait_outcome(Err(err));
        kernel.make_ready(tid);
    }
}

/// Deliver every wake queued by [`wake_with`]/[`wake_with_error`] while
/// running as an ISR, in the order they were deferred. Called once per
/// dispatcher pass, after the ISR-draining loop has fully returned.
pub(crate) fn drain_deferred(kernel: &Kernel, deferred: Vec<DeferredWake>) {
    for item in deferred {
        match item {
            DeferredWake::Value(tid, value) => deliver(kernel, tid, value),
            DeferredWake::Error(tid, err) => deliver_error(kernel, tid, err),
        }
    }
}
