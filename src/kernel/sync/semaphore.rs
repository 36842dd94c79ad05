// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Counting semaphore
//!
//! Backs `osSemaphoreId_t`. Tokens are acquired by `osSemaphoreAcquire`
//! and released by `osSemaphoreRelease`; unlike the mutex, there is no
//! notion of ownership, so no priority inheritance applies here.

use crate::error::{Error, Result};
use crate::kernel::sync::wait_queue::WaitQueue;
use crate::kernel::thread::{ThreadId, ThreadPriority};

struct SemaphoreState {
    tokens: u32,
    max_tokens: u32,
    waiters: WaitQueue,
}

pub struct Semaphore {
    state: std::sync::Mutex<SemaphoreState>,
}

impl Semaphore {
    pub fn new(initial_tokens: u32, max_tokens: u32) -> Result<Self> {
        if max_tokens == 0 || initial_tokens > max_tokens {
            return Err(Error::Parameter);
        }
        Ok(Self {
            state: std::sync::Mutex::new(SemaphoreState {
                tokens: initial_tokens,
                max_tokens,
                waiters: WaitQueue::new(),
            }),
        })
    }

    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }

    pub fn enqueue_waiter(&self, tid: ThreadId, priority: ThreadPriority) {
        self.state.lock().unwrap().waiters.insert(tid, priority);
    }

    pub fn remove_waiter(&self, tid: ThreadId) {
        self.state.lock().unwrap().waiters.remove(tid);
    }

    /// Every still-parked waiter, for delivering a deletion error to
    /// each of them.
    pub fn drain_waiters(&self) -> Vec<ThreadId> {
        self.state.lock().unwrap().waiters.drain_all()
    }

    /// Release one token, waking the highest-priority waiter if any
    /// were parked (they consume the token immediately rather than it
    /// going back into the pool).
    pub fn release(&self) -> Result<Option<ThreadId>> {
        let mut state = self.state.lock().unwrap();
        if let Some(waiter) = state.waiters.pop_highest() {
            return Ok(Some(waiter));
        }
        if state.tokens >= state.max_tokens {
            return Err(Error::Resource);
        }
        state.tokens += 1;
        Ok(None)
    }

    pub fn count(&self) -> u32 {
        self.state.lock().unwrap().tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_drains_tokens() {
        let sem = Semaphore::new(2, 2).unwrap();
        assert!(sem.try_acquire());
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
    }

    #[test]
    fn release_beyond_max_is_resource_error() {
        let sem = Semaphore::new(1, 1).unwrap();
        assert_eq!(sem.release(), Err(Error::Resource));
    }

    #[test]
    fn release_wakes_waiter_instead_of_incrementing_count() {
        let sem = Semaphore::new(0, 1).unwrap();
        sem.enqueue_waiter(ThreadId(1), 10);
        let woken = sem.release().unwrap();
        assert_eq!(woken, Some(ThreadId(1)));
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn invalid_bounds_rejected() {
        assert_eq!(Semaphore::new(2, 1).err(), Some(Error::Parameter));
        assert_eq!(Semaphore::new(0, 0).err(), Some(Error::Parameter));
    }
}
