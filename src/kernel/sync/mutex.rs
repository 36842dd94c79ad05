// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Mutex with priority inheritance
//!
//! Every `osMutexId_t` is backed by one of these. Unlike a plain
//! mutual-exclusion lock, acquiring this mutex while it's held can
//! raise the owner's effective priority to the waiter's — priority
//! inheritance — and releasing it recomputes the owner's effective
//! priority from whatever it still holds. Support for the `Recursive`
//! and `RobustAttr` attributes from `osMutexAttr_t` lives here too.

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::kernel::thread::{ThreadId, ThreadPriority};
use crate::kernel::sync::wait_queue::WaitQueue;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MutexAttr: u32 {
        /// The owning thread may lock again without deadlocking itself;
        /// each extra lock must be matched by an extra unlock.
        const RECURSIVE = 1 << 0;
        /// Owning thread's priority is raised to the highest waiter's
        /// for as long as someone is waiting. Without this bit set, a
        /// waiter blocking on this mutex never boosts the owner's
        /// effective priority, matching `osRtxMutexOwnerRestore`'s own
        /// `(mutex->attr & osMutexPrioInherit) != 0U` gate.
        const PRIO_INHERIT = 1 << 1;
        /// If the owner terminates while holding the mutex, the next
        /// waiter takes ownership with an `Error` status instead of the
        /// mutex being left permanently locked.
        const ROBUST = 1 << 2;
    }
}

/// Maximum recursive lock depth (CMSIS-RTOS v2 allows up to 255).
const MAX_LOCK_COUNT: u8 = 255;

struct MutexState {
    owner: Option<ThreadId>,
    lock_count: u8,
    waiters: WaitQueue,
}

pub struct Mutex {
    attr: MutexAttr,
    state: std::sync::Mutex<MutexState>,
}

impl Mutex {
    pub fn new(attr: MutexAttr) -> Self {
        Self {
            attr,
            state: std::sync::Mutex::new(MutexState {
                owner: None,
                lock_count: 0,
                waiters: WaitQueue::new(),
            }),
        }
    }

    pub fn owner(&self) -> Option<ThreadId> {
        self.state.lock().unwrap().owner
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().unwrap().owner.is_some()
    }

    /// Attempt to acquire without blocking. On failure because another
    /// thread holds it, returns the current owner so the caller (the
    /// dispatcher, under the kernel lock) can apply priority
    /// inheritance and park the calling thread.
    pub fn try_acquire(&self, caller: ThreadId) -> std::result::Result<(), Option<ThreadId>> {
        let mut state = self.state.lock().unwrap();
        match state.owner {
            None => {
                state.owner = Some(caller);
                state.lock_count = 1;
                Ok(())
            }
            Some(owner) if owner == caller => {
                if !self.attr.contains(MutexAttr::RECURSIVE) {
                    return Err(Some(owner));
                }
                if state.lock_count == MAX_LOCK_COUNT {
                    return Err(Some(owner));
                }
                state.lock_count += 1;
                Ok(())
            }
            Some(owner) => Err(Some(owner)),
        }
    }

    /// Add `caller` to the wait list at `priority`; returns the current
    /// owner so the dispatcher can boost its effective priority to at
    /// least `priority`.
    pub fn enqueue_waiter(&self, caller: ThreadId, priority: ThreadPriority) -> Option<ThreadId> {
        let mut state = self.state.lock().unwrap();
        state.waiters.insert(caller, priority);
        state.owner
    }

    pub fn remove_waiter(&self, tid: ThreadId) {
        self.state.lock().unwrap().waiters.remove(tid);
    }

    /// Every still-parked waiter, for delivering a deletion error to
    /// each of them when the mutex is destroyed out from under them.
    pub fn drain_waiters(&self) -> Vec<ThreadId> {
        self.state.lock().unwrap().waiters.drain_all()
    }

    /// The priority of this mutex's own highest-priority waiter, with
    /// no reference to ownership — or `None` if this mutex doesn't
    /// have `PRIO_INHERIT` set, regardless of who's waiting. Used to
    /// recompute a thread's effective priority across *every* mutex it
    /// owns (invariant 6: effective priority is the max over *all*
    /// owned `PRIO_INHERIT` mutexes' top waiters, not just the one
    /// that just changed).
    pub fn highest_waiter_priority(&self) -> Option<ThreadPriority> {
        if !self.attr.contains(MutexAttr::PRIO_INHERIT) {
            return None;
        }
        self.state.lock().unwrap().waiters.highest_priority()
    }

    /// Release the mutex. On success, returns the next owner to wake
    /// (if any waiter was parked) so the caller can resume it and
    /// recompute that thread's own inherited priority, plus whether
    /// the mutex is now fully unlocked (recursion count reached zero)
    /// — ceiling recompute only happens at that point.
    pub fn release(&self, caller: ThreadId) -> Result<(Option<ThreadId>, bool)> {
        let mut state = self.state.lock().unwrap();
        match state.owner {
            Some(owner) if owner == caller => {
                state.lock_count -= 1;
                if state.lock_count > 0 {
                    return Ok((None, false));
                }
                let next = state.waiters.pop_highest();
                state.owner = next;
                if next.is_some() {
                    state.lock_count = 1;
                }
                Ok((next, true))
            }
            Some(_) => Err(Error::Parameter),
            None => Err(Error::Parameter),
        }
    }

    /// Called when the owning thread dies while holding a `ROBUST`
    /// mutex: hands ownership to the next waiter (if any) and reports
    /// recovery so the new owner's subsequent calls observe `Error`
    /// until it explicitly acknowledges, matching CMSIS-RTOS v2's
    /// robust-mutex recovery contract.
    pub fn recover_from_owner_death(&self) -> Option<ThreadId> {
        if !self.attr.contains(MutexAttr::ROBUST) {
            return None;
        }
        let mut state = self.state.lock().unwrap();
        let next = state.waiters.pop_highest();
        state.owner = next;
        state.lock_count = if next.is_some() { 1 } else { 0 };
        next
    }

    pub fn lock_count(&self) -> u8 {
        self.state.lock().unwrap().lock_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncontended_acquire_and_release() {
        let m = Mutex::new(MutexAttr::empty());
        assert!(m.try_acquire(ThreadId(1)).is_ok());
        assert_eq!(m.owner(), Some(ThreadId(1)));
        let (next, fully_unlocked) = m.release(ThreadId(1)).unwrap();
        assert_eq!(next, None);
        assert!(fully_unlocked);
        assert!(!m.is_locked());
    }

    #[test]
    fn non_recursive_self_lock_fails() {
        let m = Mutex::new(MutexAttr::empty());
        m.try_acquire(ThreadId(1)).unwrap();
        assert_eq!(m.try_acquire(ThreadId(1)), Err(Some(ThreadId(1))));
    }

    #[test]
    fn recursive_self_lock_stacks() {
        let m = Mutex::new(MutexAttr::RECURSIVE);
        m.try_acquire(ThreadId(1)).unwrap();
        m.try_acquire(ThreadId(1)).unwrap();
        assert_eq!(m.lock_count(), 2);
        let (next, fully_unlocked) = m.release(ThreadId(1)).unwrap();
        assert_eq!(next, None);
        assert!(!fully_unlocked);
        assert!(m.is_locked());
        let (_, fully_unlocked) = m.release(ThreadId(1)).unwrap();
        assert!(fully_unlocked);
    }

    #[test]
    fn release_by_non_owner_is_error() {
        let m = Mutex::new(MutexAttr::empty());
        m.try_acquire(ThreadId(1)).unwrap();
        assert_eq!(m.release(ThreadId(2)), Err(Error::Parameter));
    }

    #[test]
    fn waiter_boosts_highest_waiter_priority() {
        let m = Mutex::new(MutexAttr::PRIO_INHERIT);
        m.try_acquire(ThreadId(1)).unwrap();
        m.enqueue_waiter(ThreadId(2), 40);
        assert_eq!(m.highest_waiter_priority(), Some(40));
    }

    #[test]
    fn non_prio_inherit_mutex_never_boosts_owner() {
        let m = Mutex::new(MutexAttr::empty());
        m.try_acquire(ThreadId(1)).unwrap();
        m.enqueue_waiter(ThreadId(2), 40);
        assert_eq!(m.highest_waiter_priority(), None);
    }

    #[test]
    fn release_hands_to_highest_priority_waiter() {
        let m = Mutex::new(MutexAttr::empty());
        m.try_acquire(ThreadId(1)).unwrap();
        m.enqueue_waiter(ThreadId(2), 10);
        m.enqueue_waiter(ThreadId(3), 50);
        let (next, _) = m.release(ThreadId(1)).unwrap();
        assert_eq!(next, Some(ThreadId(3)));
        assert_eq!(m.owner(), Some(ThreadId(3)));
    }

    #[test]
    fn robust_recovery_hands_off_on_owner_death() {
        let m = Mutex::new(MutexAttr::ROBUST);
        m.try_acquire(ThreadId(1)).unwrap();
        m.enqueue_waiter(ThreadId(2), 20);
        let next = m.recover_from_owner_death();
        assert_eq!(next, Some(ThreadId(2)));
        assert_eq!(m.owner(), Some(ThreadId(2)));
    }

    #[test]
    fn non_robust_mutex_ignores_owner_death() {
        let m = Mutex::new(MutexAttr::empty());
        m.try_acquire(ThreadId(1)).unwrap();
        assert_eq!(m.recover_from_owner_death(), None);
        assert_eq!(m.owner(), Some(ThreadId(1)));
    }
}
