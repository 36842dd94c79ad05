// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Event flags
//!
//! Backs `osEventFlagsId_t`: a standalone 31-bit flag group any number
//! of threads can wait on, distinct from a thread's own built-in
//! thread-flags bitset (see [`crate::kernel::thread::Thread::check_flags`]
//! for that one — the two share the same wait-condition logic but not
//! storage).
//!
//! `osFlagsWaitAll` / `osFlagsNoClear` are the two option bits the
//! public API exposes; both are handled below. The original
//! implementation had a bug where a successful wait's return value
//! could be clobbered by `osErrorTimeout` if the deadline happened to
//! expire in the same instant the flags were satisfied; avoided here by
//! never consulting a deadline at all inside this type — [`Self::set`]
//! evaluates every parked waiter's condition against the snapshot
//! *before* clearing bits for it and hands back exactly the threads
//! that are now satisfied, so there is no window where a timeout and a
//! satisfied wait can race over the same waiter.

use crate::kernel::thread::{ThreadId, ThreadPriority};

const FLAGS_MASK: u32 = 0x7FFF_FFFF;

struct FlagsWaiter {
    tid: ThreadId,
    priority: ThreadPriority,
    flags: u32,
    wait_all: bool,
    no_clear: bool,
}

struct EventFlagsState {
    flags: u32,
    waiters: Vec<FlagsWaiter>,
}

pub struct EventFlags {
    state: std::sync::Mutex<EventFlagsState>,
}

impl EventFlags {
    pub fn new(initial: u32) -> Self {
        Self {
            state: std::sync::Mutex::new(EventFlagsState {
                flags: initial & FLAGS_MASK,
                waiters: Vec::new(),
            }),
        }
    }

    /// Set bits; returns the flags value immediately prior to the set
    /// and every waiter the set just satisfied (highest priority
    /// first), each with the flags snapshot to deliver to it. The
    /// caller (the `osEventFlagsSet` wrapper) is responsible for
    /// actually waking each one through the wait/wake protocol.
    pub fn set(&self, flags: u32) -> (u32, Vec<(ThreadId, u32)>) {
        let mut state = self.state.lock().unwrap();
        let prev = state.flags;
        state.flags |= flags & FLAGS_MASK;

        let mut woken = Vec::new();
        let mut remaining = Vec::with_capacity(state.waiters.len());
        // Highest priority first, matching the pop-order every other
        // wait queue in the kernel uses.
        state.waiters.sort_by(|a, b| b.priority.cmp(&a.priority));
        for w in std::mem::take(&mut state.waiters) {
            let satisfied = if w.wait_all {
                state.flags & w.flags == w.flags
            } else {
                state.flags & w.flags != 0
            };
            if satisfied {
                let snapshot = state.flags;
                if !w.no_clear {
                    let consumed = if w.wait_all { w.flags } else { state.flags & w.flags };
                    state.flags &= !consumed;
                }
                woken.push((w.tid, snapshot));
            } else {
                remaining.push(w);
            }
        }
        state.waiters = remaining;
        (prev, woken)
    }

    /// Clear bits; returns the flags value immediately prior to the
    /// clear.
    pub fn clear(&self, flags: u32) -> u32 {
        let mut state = self.state.lock().unwrap();
        let prev = state.flags;
        state.flags &= !(flags & FLAGS_MASK);
        prev
    }

    pub fn get(&self) -> u32 {
        self.state.lock().unwrap().flags
    }

    /// Non-blocking fast path for `osEventFlagsWait`: test `flags`
    /// against the current bitset and, on success, consume the
    /// matching bits unless `no_clear`.
    pub fn check(&self, flags: u32, wait_all: bool, no_clear: bool) -> Option<u32> {
        let mut state = self.state.lock().unwrap();
        let satisfied = if wait_all {
            state.flags & flags == flags
        } else {
            state.flags & flags != 0
        };
        if !satisfied {
            return None;
        }
        let snapshot = state.flags;
        if !no_clear {
            let consumed = if wait_all { flags } else { state.flags & flags };
            state.flags &= !consumed;
        }
        Some(snapshot)
    }

    /// Register a not-yet-satisfied wait so a later [`Self::set`] can
    /// deliver it.
    pub fn enqueue_waiter(&self, tid: ThreadId, priority: ThreadPriority, flags: u32, wait_all: bool, no_clear: bool) {
        self.state.lock().unwrap().waiters.push(FlagsWaiter {
            tid,
            priority,
            flags,
            wait_all,
            no_clear,
        });
    }

    /// Drop a registered wait without it having been satisfied (the
    /// delay list expired first, or the group is being deleted).
    pub fn remove_waiter(&self, tid: ThreadId) {
        self.state.lock().unwrap().waiters.retain(|w| w.tid != tid);
    }

    /// Every still-parked waiter, for delivering a deletion error to
    /// each of them.
    pub fn drain_waiters(&self) -> Vec<ThreadId> {
        self.state.lock().unwrap().waiters.drain(..).map(|w| w.tid).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_any_returns_as_soon_as_one_bit_set() {
        let ef = EventFlags::new(0);
        ef.set(0b010);
        let got = ef.check(0b011, false, false).unwrap();
        assert_eq!(got & 0b010, 0b010);
    }

    #[test]
    fn check_all_requires_every_bit() {
        let ef = EventFlags::new(0);
        ef.set(0b001);
        assert!(ef.check(0b011, true, true).is_none());
        ef.set(0b010);
        assert!(ef.check(0b011, true, false).is_some());
    }

    #[test]
    fn no_clear_leaves_bits_set() {
        let ef = EventFlags::new(0b111);
        let got = ef.check(0b011, true, true).unwrap();
        assert_eq!(got, 0b111);
        assert_eq!(ef.get(), 0b111);
    }

    #[test]
    fn clear_defaults_to_consuming_only_matched_bits() {
        let ef = EventFlags::new(0b111);
        ef.check(0b011, true, false).unwrap();
        assert_eq!(ef.get(), 0b100);
    }

    #[test]
    fn set_wakes_matching_waiter_with_snapshot_before_clear() {
        let ef = EventFlags::new(0);
        ef.enqueue_waiter(ThreadId(1), 20, 0b011, true, false);
        ef.set(0b001);
        let (_, woken) = ef.set(0b010);
        assert_eq!(woken, vec![(ThreadId(1), 0b011)]);
        assert_eq!(ef.get(), 0);
    }

    #[test]
    fn set_wakes_highest_priority_waiter_first() {
        let ef = EventFlags::new(0);
        ef.enqueue_waiter(ThreadId(1), 10, 0b001, false, true);
        ef.enqueue_waiter(ThreadId(2), 50, 0b001, false, true);
        let (_, woken) = ef.set(0b001);
        assert_eq!(woken[0].0, ThreadId(2));
        assert_eq!(woken[1].0, ThreadId(1));
    }

    #[test]
    fn unrelated_waiter_stays_parked() {
        let ef = EventFlags::new(0);
        ef.enqueue_waiter(ThreadId(1), 10, 0b100, false, true);
        let (_, woken) = ef.set(0b001);
        assert!(woken.is_empty());
        ef.remove_waiter(ThreadId(1));
        assert!(ef.drain_waiters().is_empty());
    }
}
