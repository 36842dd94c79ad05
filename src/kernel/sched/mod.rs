// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Dispatcher
//!
//! The single scheduling loop that owns the kernel lock and enforces
//! single-core semantics: at most one RTOS thread is ever allowed to
//! execute at a time, all others parked in their [`suspender`].
//!
//! The loop, once per pass:
//!
//! 1. Take the kernel lock.
//! 2. Drain and process queued ISR-deferred work ([`crate::kernel::nvic`]).
//! 3. Advance the delay engine and timer service by however many ticks
//!    elapsed (usually one).
//! 4. Move every thread whose delay/timer/wait condition is now
//!    satisfied onto the ready list.
//! 5. Select the highest-priority ready thread as the next candidate.
//! 6. If the candidate differs from the thread currently running,
//!    suspend the current thread and resume the candidate
//!    ([`dispatch`]).
//! 7. Release the kernel lock.
//! 8. Block on the kernel condition variable until the next tick is
//!    due or another thread requests a reschedule.
//!
//! [`suspender`]: crate::kernel::thread::suspender

pub mod delay;
pub mod timer;
pub mod wake;

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::kernel::thread::{ThreadId, ThreadPriority};

/// Priority-ordered ready list. Priorities are kept exact (CMSIS-RTOS
/// v2 defines 56 of them) in a sparse `BTreeMap` keyed by priority,
/// FIFO within a bucket, rather than a fixed small bucket count.
#[derive(Default)]
pub struct RunQueue {
    buckets: BTreeMap<ThreadPriority, VecDeque<ThreadId>>,
    len: usize,
}

impl RunQueue {
    pub fn new() -> Self {
        Self {
            buckets: BTreeMap::new(),
            len: 0,
        }
    }

    pub fn enqueue(&mut self, tid: ThreadId, priority: ThreadPriority) {
        self.buckets.entry(priority).or_default().push_back(tid);
        self.len += 1;
    }

    /// Insert at the *front* of `priority`'s bucket rather than the
    /// back — used only when a thread is preempted mid-slice rather
    /// than voluntarily giving up the CPU (spec.md §4.2's "mark
    /// run.curr Ready-blocked at the front of its priority bucket"), so
    /// it gets first crack at the CPU again among its priority peers
    /// instead of waiting behind threads that were already queued.
    pub fn enqueue_front(&mut self, tid: ThreadId, priority: ThreadPriority) {
        self.buckets.entry(priority).or_default().push_front(tid);
        self.len += 1;
    }

    /// Highest-priority, oldest-enqueued thread.
    pub fn select(&mut self) -> Option<ThreadId> {
        let &priority = self.buckets.keys().next_back()?;
        let bucket = self.buckets.get_mut(&priority).unwrap();
        let tid = bucket.pop_front();
        if bucket.is_empty() {
            self.buckets.remove(&priority);
        }
        if tid.is_some() {
            self.len -= 1;
        }
        tid
    }

    pub fn remove(&mut self, tid: ThreadId) -> bool {
        for (_, bucket) in self.buckets.iter_mut() {
            if let Some(pos) = bucket.iter().position(|&t| t == tid) {
                bucket.remove(pos);
                self.len -= 1;
                return true;
            }
        }
        false
    }

    /// Move `tid` to `new_priority`'s bucket if it is currently
    /// enqueued, preserving its place at the back of the new bucket.
    /// No-op if `tid` isn't actually waiting in the run queue (it may
    /// be the running thread, or blocked elsewhere).
    pub fn reprioritize(&mut self, tid: ThreadId, new_priority: ThreadPriority) -> bool {
        if self.remove(tid) {
            self.enqueue(tid, new_priority);
            true
        } else {
            false
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DispatcherStats {
    pub schedules: u64,
    pub yields: u64,
    pub preemptions: u64,
    pub idle_cycles: u64,
}

/// Mutable dispatcher state, protected by the kernel lock.
struct DispatcherState {
    run_queue: RunQueue,
    current: Option<ThreadId>,
    idle_thread: Option<ThreadId>,
    quantum_remaining: i64,
    stats: DispatcherStats,
}

/// The single scheduling authority. A `Kernel` owns exactly one of
/// these. All mutation happens with the kernel lock held by the
/// caller; `Dispatcher` itself only adds the fine-grained lock needed
/// to let the timer-service thread and the main loop both touch the
/// run queue without each needing the full kernel lock for bookkeeping
/// reads.
pub struct Dispatcher {
    state: Mutex<DispatcherState>,
    /// The kernel condition variable the main loop blocks on in step 8.
    wakeup: Condvar,
    reschedule_requested: Mutex<bool>,
}

impl Dispatcher {
    pub fn new(quantum_ticks: u32) -> Self {
        Self {
            state: Mutex::new(DispatcherState {
                run_queue: RunQueue::new(),
                current: None,
                idle_thread: None,
                quantum_remaining: quantum_ticks as i64,
                stats: DispatcherStats::default(),
            }),
            wakeup: Condvar::new(),
            reschedule_requested: Mutex::new(false),
        }
    }

    pub fn set_idle_thread(&self, tid: ThreadId) {
        self.state.lock().unwrap().idle_thread = Some(tid);
    }

    pub fn ready(&self, tid: ThreadId, priority: ThreadPriority) {
        let mut state = self.state.lock().unwrap();
        state.run_queue.enqueue(tid, priority);
        drop(state);
        self.request_reschedule();
    }

    pub fn current(&self) -> Option<ThreadId> {
        self.state.lock().unwrap().current
    }

    /// Re-sort an already-ready thread into a new priority bucket — used
    /// when priority inheritance raises or lowers a thread's effective
    /// priority while it's still sitting in the run queue. Harmless
    /// no-op if `tid` isn't actually waiting there.
    pub fn reprioritize(&self, tid: ThreadId, new_priority: ThreadPriority) {
        self.state.lock().unwrap().run_queue.reprioritize(tid, new_priority);
    }

    /// Pull `tid` out of the ready list without selecting it, e.g. for
    /// `osThreadSuspend`/`osThreadTerminate` on a thread that is
    /// currently `Ready` rather than `Running`. No-op if it isn't
    /// actually waiting there.
    pub fn remove_from_ready(&self, tid: ThreadId) -> bool {
        self.state.lock().unwrap().run_queue.remove(tid)
    }

    /// Whether another thread is already sitting ready at exactly
    /// `priority` — the condition spec.md §4.2's round-robin rule
    /// requires before rotating the current incumbent out.
    pub fn has_ready_at_priority(&self, priority: ThreadPriority) -> bool {
        let state = self.state.lock().unwrap();
        state
            .run_queue
            .buckets
            .get(&priority)
            .is_some_and(|b| !b.is_empty())
    }

    /// Forget that `tid` is the running thread without touching the
    /// run queue, so the next `select_candidate`/`dispatch` pair picks
    /// a fresh candidate instead of treating the caller as unchanged.
    /// Used by the quantum-expiry round-robin rotation, which enqueues
    /// the outgoing thread itself via [`Self::ready`] beforehand.
    pub fn clear_current(&self) {
        self.state.lock().unwrap().current = None;
    }

    /// Request that the dispatcher re-evaluate candidates as soon as
    /// it next wakes; called whenever a thread becomes ready, a mutex
    /// is released, a timer fires, and so on.
    pub fn request_reschedule(&self) {
        *self.reschedule_requested.lock().unwrap() = true;
        self.wakeup.notify_all();
    }

    /// Step 8 of the loop: block until the next tick is due or a
    /// reschedule was requested, whichever comes first.
    pub fn wait_for_next_pass(&self, tick_period: Duration) {
        let guard = self.reschedule_requested.lock().unwrap();
        if *guard {
            return;
        }
        let _ = self.wakeup.wait_timeout(guard, tick_period).unwrap();
    }

    pub fn take_reschedule_flag(&self) -> bool {
        std::mem::replace(&mut *self.reschedule_requested.lock().unwrap(), false)
    }

    /// Steps 5–6 when nothing is currently `Running` (the kernel just
    /// started, or the previous occupant blocked/terminated itself):
    /// pick the highest-priority ready thread, falling back to idle.
    pub fn select_candidate(&self) -> Option<ThreadId> {
        let mut state = self.state.lock().unwrap();
        let candidate = state.run_queue.select().or(state.idle_thread);
        if candidate.is_none() {
            state.stats.idle_cycles += 1;
        } else {
            state.stats.schedules += 1;
        }
        candidate
    }

    /// Steps 5–6 when `current_priority` is genuinely `Running`:
    /// spec.md §4.2's preemption rule only ever removes the ready
    /// list's head if it is *strictly greater* priority than whoever
    /// already holds the CPU. A same-or-lower-priority arrival is left
    /// on the ready list untouched — this is what keeps a busy but
    /// otherwise idle ready list from bouncing execution over to the
    /// idle thread every pass just because the ready list is empty.
    pub fn select_if_higher(&self, current_priority: ThreadPriority) -> Option<ThreadId> {
        let mut state = self.state.lock().unwrap();
        let &head_priority = state.run_queue.buckets.keys().next_back()?;
        if head_priority <= current_priority {
            return None;
        }
        let candidate = state.run_queue.select();
        if candidate.is_some() {
            state.stats.schedules += 1;
        }
        candidate
    }

    /// Records that `tid` is now the running thread, re-enqueuing the
    /// previous holder (if it is still ready, i.e. wasn't the one that
    /// just blocked or exited) at the back of its priority bucket —
    /// the round-robin behavior for threads sharing a priority level.
    /// Use [`Self::preempt`] instead when `tid` is displacing a thread
    /// that was genuinely `Running` and didn't choose to stop.
    pub fn dispatch(&self, tid: Option<ThreadId>, requeue_previous_with_priority: Option<ThreadPriority>) {
        let mut state = self.state.lock().unwrap();
        if let (Some(prev), Some(priority)) = (state.current, requeue_previous_with_priority) {
            state.run_queue.enqueue(prev, priority);
        }
        state.current = tid;
        state.quantum_remaining = state.quantum_remaining.max(0);
    }

    /// Preempt the current occupant mid-slice: `tid` becomes `current`
    /// and whoever held the CPU is sent to the *front* of its priority
    /// bucket (spec.md §4.2), not the back, since it didn't voluntarily
    /// give up its turn.
    pub fn preempt(&self, tid: ThreadId, previous_priority: ThreadPriority) {
        let mut state = self.state.lock().unwrap();
        if let Some(prev) = state.current {
            state.run_queue.enqueue_front(prev, previous_priority);
        }
        state.current = Some(tid);
        state.quantum_remaining = state.quantum_remaining.max(0);
        state.stats.preemptions += 1;
    }

    /// Round-robin quantum accounting. Signed and saturating at zero —
    /// the source's unsigned accounting could wrap past zero and miss
    /// a preemption point; this cannot.
    pub fn tick_quantum(&self, default_quantum: u32) -> bool {
        let mut state = self.state.lock().unwrap();
        state.quantum_remaining -= 1;
        if state.quantum_remaining <= 0 {
            state.quantum_remaining = default_quantum as i64;
            state.stats.preemptions += 1;
            true
        } else {
            false
        }
    }

    pub fn record_yield(&self) {
        self.state.lock().unwrap().stats.yields += 1;
    }

    pub fn stats(&self) -> DispatcherStats {
        self.state.lock().unwrap().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_queue_orders_by_priority() {
        let mut rq = RunQueue::new();
        rq.enqueue(ThreadId(1), 10);
        rq.enqueue(ThreadId(2), 50);
        rq.enqueue(ThreadId(3), 30);
        assert_eq!(rq.select(), Some(ThreadId(2)));
        assert_eq!(rq.select(), Some(ThreadId(3)));
        assert_eq!(rq.select(), Some(ThreadId(1)));
        assert!(rq.is_empty());
    }

    #[test]
    fn run_queue_is_fifo_within_priority() {
        let mut rq = RunQueue::new();
        rq.enqueue(ThreadId(1), 20);
        rq.enqueue(ThreadId(2), 20);
        assert_eq!(rq.select(), Some(ThreadId(1)));
        assert_eq!(rq.select(), Some(ThreadId(2)));
    }

    #[test]
    fn quantum_saturates_at_zero_never_goes_negative_twice() {
        let d = Dispatcher::new(2);
        assert!(!d.tick_quantum(2));
        assert!(d.tick_quantum(2));
        // Reloaded to the default; two more ticks before next preempt.
        assert!(!d.tick_quantum(2));
        assert!(d.tick_quantum(2));
    }

    #[test]
    fn falls_back_to_idle_when_ready_list_empty() {
        let d = Dispatcher::new(5);
        d.set_idle_thread(ThreadId(7));
        assert_eq!(d.select_candidate(), Some(ThreadId(7)));
        assert_eq!(d.stats().idle_cycles, 1);
    }

    #[test]
    fn ready_thread_preferred_over_idle() {
        let d = Dispatcher::new(5);
        d.set_idle_thread(ThreadId(7));
        d.ready(ThreadId(3), 40);
        assert_eq!(d.select_candidate(), Some(ThreadId(3)));
    }
}
