// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! `osMessageQueue*` entry points
//!
//! Messages are plain byte buffers (`Vec<u8>`); firmware code that
//! wants a typed message serializes into/out of that buffer itself,
//! the same contract `osMessageQueuePut`/`Get`'s `void *msg_ptr` have
//! on the real API. See [`crate::kernel::sync::msgqueue`] for the
//! priority-ordering and direct-handoff rules this wraps.

use crate::error::{Error, Result};
use crate::kernel::sched::wake;
use crate::kernel::sync::msgqueue::MessageQueue;
use crate::kernel::thread::{BlockReason, WaitValue};
use crate::kernel::{self, Named};

pub type MessageQueueId = u32;

/// `osMessageQueueNew`
pub fn new(capacity: usize, name: Option<&str>) -> Result<MessageQueueId> {
    let k = kernel::instance();
    let q = MessageQueue::new(capacity)?;
    let (id, _) = k.msg_queues.insert(Named::new(name.map(String::from), q));
    Ok(id)
}

/// `osMessageQueueGetName`
pub fn name(id: MessageQueueId) -> Result<Option<String>> {
    Ok(kernel::instance().msg_queues.get(id).ok_or(Error::Parameter)?.name())
}

/// `osMessageQueueGetCapacity`
pub fn capacity(id: MessageQueueId) -> Result<usize> {
    Ok(kernel::instance().msg_queues.get(id).ok_or(Error::Parameter)?.capacity())
}

/// `osMessageQueueGetCount`
pub fn count(id: MessageQueueId) -> Result<usize> {
    Ok(kernel::instance().msg_queues.get(id).ok_or(Error::Parameter)?.len())
}

/// `osMessageQueueGetSpace`
pub fn space(id: MessageQueueId) -> Result<usize> {
    let q = kernel::instance().msg_queues.get(id).ok_or(Error::Parameter)?;
    Ok(q.capacity() - q.len())
}

/// `osMessageQueuePut` — a reader already blocked on an empty queue is
/// handed `msg` directly, bypassing the backing buffer entirely.
pub fn put(id: MessageQueueId, msg: Vec<u8>, priority: u8, timeout: u32) -> Result<()> {
    let k = kernel::instance();
    let q = k.msg_queues.get(id).ok_or(Error::Parameter)?;
    // No unlocked fast path here, unlike most other primitives: a
    // waiting reader must always be checked *before* a plain buffer
    // insert (the reader could only ever be parked on an empty queue),
    // or a timeout-0 put could silently buffer a message behind a
    // reader that is never told it arrived and simply times out. The
    // reader handoff and room check run before the ISR check and
    // before binding a caller thread, since `put` with timeout 0 is
    // ISR-legal and an ISR caller isn't a registered RTOS thread.
    let caller_thread;
    {
        let _guard = k.lock();
        if let Some(reader) = q.pop_waiting_reader() {
            wake::wake_with(k, reader, WaitValue::Message(msg));
            return Ok(());
        }
        if q.try_put(msg.clone(), priority).is_ok() {
            return Ok(());
        }
        if kernel::nvic::isr_unsafe_context() && timeout != 0 {
            return Err(Error::Isr);
        }
        if timeout == 0 {
            return Err(Error::Resource);
        }
        let caller = crate::api::thread_api::current()?;
        caller_thread = k.threads.get(caller).ok_or(Error::Parameter)?;
        q.enqueue_writer(caller, caller_thread.effective_priority(), msg);
        wake::park(k, &caller_thread, BlockReason::MessagePut(id), wake::timeout_from_ticks(timeout));
    }
    wake::block(&caller_thread).map(|_| ())
}

/// `osMessageQueueGet` — draining a message that frees a slot hands
/// that slot straight to the highest-priority blocked writer, if any,
/// rather than leaving it for that writer's own thread to notice later.
///
/// Like `put`, the non-blocking fast path runs before binding a caller
/// `ThreadId`: an ISR calling `get` with `timeout == 0` isn't a
/// registered RTOS thread at all, so resolving `current()` before the
/// buffer check would reject a perfectly legal non-blocking poll with
/// `Error::Resource` instead of letting it succeed or report the queue
/// empty.
pub fn get(id: MessageQueueId, timeout: u32) -> Result<Vec<u8>> {
    let k = kernel::instance();
    let q = k.msg_queues.get(id).ok_or(Error::Parameter)?;
    let caller_thread;
    {
        let _guard = k.lock();
        if let Some(msg) = q.try_get() {
            if let Some((writer, priority, payload)) = q.pop_waiting_writer_payload() {
                let _ = q.try_put(payload, priority);
                wake::wake_with(k, writer, WaitValue::Unit);
            }
            return Ok(msg);
        }
        if kernel::nvic::isr_unsafe_context() && timeout != 0 {
            return Err(Error::Isr);
        }
        if timeout == 0 {
            return Err(Error::Resource);
        }
        let caller = crate::api::thread_api::current()?;
        caller_thread = k.threads.get(caller).ok_or(Error::Parameter)?;
        q.enqueue_reader(caller, caller_thread.effective_priority());
        wake::park(k, &caller_thread, BlockReason::MessageGet(id), wake::timeout_from_ticks(timeout));
    }
    match wake::block(&caller_thread)? {
        WaitValue::Message(msg) => Ok(msg),
        _ => Err(Error::Error),
    }
}

/// `osMessageQueueReset` — drops every buffered message; parked
/// readers/writers are left parked (unlike `delete`, the queue itself
/// still exists).
pub fn reset(id: MessageQueueId) -> Result<()> {
    let k = kernel::instance();
    let _guard = k.lock();
    let q = k.msg_queues.get(id).ok_or(Error::Parameter)?;
    while q.try_get().is_some() {}
    Ok(())
}

/// `osMessageQueueDelete`
pub fn delete(id: MessageQueueId) -> Result<()> {
    let k = kernel::instance();
    let _guard = k.lock();
    let q = k.msg_queues.get(id).ok_or(Error::Parameter)?;
    for waiter in q.drain_waiters() {
        wake::wake_with_error(k, waiter, Error::Resource);
    }
    k.msg_queues.remove(id)
}
