// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Message queue
//!
//! Backs `osMessageQueueId_t`. Messages are ordered first by the
//! priority given to `osMessageQueuePut` (higher first), then FIFO
//! among equal priorities — not by the sending thread's own priority.
//! A reader arriving while the queue is empty, or a writer arriving
//! while it is full, parks on the matching wait list rather than
//! spinning; a put to an empty queue with a waiting reader bypasses
//! the backing buffer entirely and hands the message straight to the
//! woken reader, and symmetrically for a get from a full queue with a
//! waiting writer.

use std::collections::{HashMap, VecDeque};

use crate::error::{Error, Result};
use crate::kernel::sync::wait_queue::WaitQueue;
use crate::kernel::thread::ThreadId;

struct QueuedMessage<T> {
    priority: u8,
    seq: u64,
    payload: T,
}

struct MessageQueueState<T> {
    capacity: usize,
    messages: VecDeque<QueuedMessage<T>>,
    next_seq: u64,
    readers: WaitQueue,
    writers: WaitQueue,
    /// A blocked writer's payload, stashed here so that once the queue
    /// has room again — either a reader drains a message, or this
    /// writer is handed straight to a newly-arrived reader — the value
    /// is still available to deliver without the writer's own host
    /// thread needing to run first.
    pending_writes: HashMap<ThreadId, (u8, T)>,
}

pub struct MessageQueue<T> {
    state: std::sync::Mutex<MessageQueueState<T>>,
}

impl<T> MessageQueue<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Parameter);
        }
        Ok(Self {
            state: std::sync::Mutex::new(MessageQueueState {
                capacity,
                messages: VecDeque::new(),
                next_seq: 0,
                readers: WaitQueue::new(),
                writers: WaitQueue::new(),
                pending_writes: HashMap::new(),
            }),
        })
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().messages.len()
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().unwrap().capacity
    }

    pub fn is_full(&self) -> bool {
        let s = self.state.lock().unwrap();
        s.messages.len() >= s.capacity
    }

    /// Enqueue `payload` without blocking if there is room. Returns
    /// `Err(Error::Resource)` if full, in which case the caller should
    /// park on the writer wait list via [`Self::enqueue_writer`].
    pub fn try_put(&self, payload: T, priority: u8) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        if s.messages.len() >= s.capacity {
            return Err(Error::Resource);
        }
        let seq = s.next_seq;
        s.next_seq += 1;
        let pos = s
            .messages
            .iter()
            .position(|m| m.priority < priority)
            .unwrap_or(s.messages.len());
        s.messages.insert(pos, QueuedMessage { priority, seq, payload });
        Ok(())
    }

    /// Dequeue the highest-priority, oldest message without blocking.
    pub fn try_get(&self) -> Option<T> {
        let mut s = self.state.lock().unwrap();
        s.messages.pop_front().map(|m| m.payload)
    }

    pub fn enqueue_reader(&self, tid: ThreadId, priority: u8) {
        self.state.lock().unwrap().readers.insert(tid, priority);
    }

    /// Park a writer, stashing its payload so it can be delivered
    /// later without the writer's own thread running again — either
    /// [`Self::try_get`]'s caller draining room for it, or a reader
    /// arriving and being hand-matched to it directly.
    pub fn enqueue_writer(&self, tid: ThreadId, priority: u8, payload: T) {
        let mut s = self.state.lock().unwrap();
        s.writers.insert(tid, priority);
        s.pending_writes.insert(tid, (priority, payload));
    }

    pub fn remove_reader(&self, tid: ThreadId) {
        self.state.lock().unwrap().readers.remove(tid);
    }

    pub fn remove_writer(&self, tid: ThreadId) {
        let mut s = self.state.lock().unwrap();
        s.writers.remove(tid);
        s.pending_writes.remove(&tid);
    }

    /// Wake the highest-priority parked writer and hand back its
    /// stashed payload (and the priority it was originally put with)
    /// for direct insertion, bypassing the backing buffer — called
    /// once [`Self::try_get`] has freed a slot.
    pub fn pop_waiting_writer_payload(&self) -> Option<(ThreadId, u8, T)> {
        let mut s = self.state.lock().unwrap();
        let tid = s.writers.pop_highest()?;
        let (priority, payload) = s.pending_writes.remove(&tid)?;
        Some((tid, priority, payload))
    }

    /// Every still-parked reader and writer, for delivering a deletion
    /// error to each of them.
    pub fn drain_waiters(&self) -> Vec<ThreadId> {
        let mut s = self.state.lock().unwrap();
        let mut all = s.readers.drain_all();
        all.extend(s.writers.drain_all());
        all
    }

    /// Wake the highest-priority parked reader, if any, so the
    /// dispatcher can hand it a message directly (bypass the buffer).
    pub fn pop_waiting_reader(&self) -> Option<ThreadId> {
        self.state.lock().unwrap().readers.pop_highest()
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_message_dequeues_first() {
        let q: MessageQueue<u32> = MessageQueue::new(4).unwrap();
        q.try_put(1, 5).unwrap();
        q.try_put(2, 20).unwrap();
        assert_eq!(q.try_get(), Some(2));
        assert_eq!(q.try_get(), Some(1));
    }

    #[test]
    fn equal_priority_is_fifo() {
        let q: MessageQueue<u32> = MessageQueue::new(4).unwrap();
        q.try_put(1, 5).unwrap();
        q.try_put(2, 5).unwrap();
        assert_eq!(q.try_get(), Some(1));
        assert_eq!(q.try_get(), Some(2));
    }

    #[test]
    fn put_beyond_capacity_is_resource_error() {
        let q: MessageQueue<u32> = MessageQueue::new(1).unwrap();
        q.try_put(1, 0).unwrap();
        assert_eq!(q.try_put(2, 0), Err(Error::Resource));
    }

    #[test]
    fn waiting_reader_can_be_popped_for_direct_handoff() {
        let q: MessageQueue<u32> = MessageQueue::new(1).unwrap();
        q.enqueue_reader(ThreadId(1), 10);
        assert_eq!(q.pop_waiting_reader(), Some(ThreadId(1)));
        assert_eq!(q.pop_waiting_reader(), None);
    }

    #[test]
    fn waiting_writer_payload_is_handed_back_on_pop() {
        let q: MessageQueue<u32> = MessageQueue::new(1).unwrap();
        q.enqueue_writer(ThreadId(2), 15, 42);
        assert_eq!(q.pop_waiting_writer_payload(), Some((ThreadId(2), 15, 42)));
        assert_eq!(q.pop_waiting_writer_payload(), None);
    }

    #[test]
    fn zero_capacity_rejected() {
        let res: Result<MessageQueue<u8>> = MessageQueue::new(0);
        assert_eq!(res.err(), Some(Error::Parameter));
    }
}
