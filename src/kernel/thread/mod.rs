// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread control blocks
//!
//! One native host thread backs every RTOS thread. The dispatcher
//! decides which single RTOS thread is allowed to run at any instant
//! and uses the [`suspender`] to park every other host thread, so from
//! firmware's point of view only one thread is ever actually executing
//! — exactly as on a single-core Cortex-M target.
//!
//! Threads are stored in a dense slot arena (see DESIGN NOTES on
//! intrusive-lists-by-index) rather than linked by pointer; every
//! intrusive list in the kernel (ready queue, delay list, mutex waiter
//! chain, object wait lists) links threads by [`ThreadId`].

pub mod suspender;

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use bitflags::bitflags;

use crate::error::{Error, Result};
use suspender::Suspender;

/// The value a blocked thread's wait-exit slot is filled with when the
/// blocking call that parked it is satisfied. Carries whatever payload
/// that particular wait kind returns to its caller — most primitives
/// resume with nothing but a status; event/thread flags resume with the
/// bit snapshot; a memory pool with the allocated block index; a
/// message queue with the message bytes handed to it directly by a
/// writer, bypassing the pool-backed queue; the timer thread with the
/// due callback record handed to it by the timer service.
#[derive(Clone)]
pub enum WaitValue {
    Unit,
    Flags(u32),
    Block(usize),
    Message(Vec<u8>),
    Timer(std::sync::Arc<dyn Fn() + Send + Sync>),
}

impl std::fmt::Debug for WaitValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitValue::Unit => write!(f, "Unit"),
            WaitValue::Flags(v) => write!(f, "Flags({v})"),
            WaitValue::Block(v) => write!(f, "Block({v})"),
            WaitValue::Message(v) => write!(f, "Message({v:?})"),
            WaitValue::Timer(_) => write!(f, "Timer(..)"),
        }
    }
}

/// What a thread is waiting for on its own thread-flags bitset
/// (`osThreadFlagsWait`). Only one such wait can be outstanding at a
/// time since a thread can only wait on its own flags.
#[derive(Debug, Clone, Copy)]
struct FlagsWaitCriteria {
    flags: u32,
    wait_all: bool,
    no_clear: bool,
}

thread_local! {
    /// The [`ThreadId`] backing whichever host thread is currently
    /// executing. Set once, right before a spawned host thread starts
    /// running firmware code (or explicitly for the thread that calls
    /// [`crate::kernel::init`] and drives `osKernelStart`), and never
    /// changed afterward — CMSIS-RTOS v2 has no notion of a host thread
    /// migrating between RTOS thread identities. `osThreadGetId` and
    /// every blocking `osXxx` entry point that doesn't take an explicit
    /// id parameter reads this to find "the calling thread".
    static CURRENT_THREAD: std::cell::Cell<Option<ThreadId>> = const { std::cell::Cell::new(None) };
}

/// Bind this host thread to `tid` for the rest of its life.
pub fn bind_current_thread(tid: ThreadId) {
    CURRENT_THREAD.with(|c| c.set(Some(tid)));
}

/// The [`ThreadId`] of the calling host thread, if it has been bound
/// with [`bind_current_thread`]. `None` for a host thread that was
/// never registered with the kernel (e.g. a stray `std::thread::spawn`
/// firmware code spun up on its own, outside `osThreadNew`).
pub fn current_thread_id() -> Option<ThreadId> {
    CURRENT_THREAD.with(|c| c.get())
}

/// Index into the thread slot arena. `0` is reserved as "no thread".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u32);

impl ThreadId {
    pub const INVALID: ThreadId = ThreadId(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// CMSIS-RTOS v2 priority levels (`osPriority_t`), 1 (idle) through 56
/// (ISR). Held as a plain `u8` internally; the public API maps the enum.
pub type ThreadPriority = u8;

pub const PRIORITY_IDLE: ThreadPriority = 1;
pub const PRIORITY_DEFAULT: ThreadPriority = 24;
pub const PRIORITY_REALTIME: ThreadPriority = 56;

/// Thread lifecycle states (spec section 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Created but not yet started.
    New,
    /// On the ready list, waiting for the dispatcher to pick it.
    Ready,
    /// The one thread the dispatcher currently lets run.
    Running,
    /// Parked on some wait reason; see [`BlockReason`].
    Blocked,
    /// Exit requested/completed but not yet reaped by the dispatcher.
    Dying,
    /// Fully torn down; its `ThreadId` may be reused.
    Dead,
}

impl ThreadState {
    pub fn is_schedulable(self) -> bool {
        matches!(self, ThreadState::Ready)
    }

    pub fn is_alive(self) -> bool {
        !matches!(self, ThreadState::Dead)
    }
}

/// Why a thread is currently blocked. Carries the id of the object it is
/// waiting on so the dispatcher can route a wake correctly and so
/// diagnostics can explain a stuck thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    Delay,
    Join(ThreadId),
    ThreadFlags,
    EventFlags(u32),
    Mutex(u32),
    Semaphore(u32),
    MemoryPool(u32),
    MessageGet(u32),
    MessagePut(u32),
    /// Parked by `osThreadSuspend` rather than any wait on an object or
    /// timeout. Tracked as a `BlockReason` anyway purely so the
    /// kernel's dispatcher has a uniform place to handle every way a
    /// thread can be `Blocked`.
    Suspend,
    /// The dedicated timer-service thread, blocked on the kernel's
    /// singleton due-callback queue. Unlike `MessageGet`/`MessagePut`
    /// there is only ever one such queue, so no id is carried.
    TimerQueue,
}

bitflags! {
    /// A thread's own 31-bit thread-flags bitset (bit 31 reserved as an
    /// error indicator by the public API, matching CMSIS-RTOS v2).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThreadFlagsMask: u32 {
        const ALL = 0x7FFF_FFFF;
    }
}

/// A single RTOS thread.
///
/// Every mutable field lives behind its own small lock so that the
/// dispatcher (holding the kernel lock) and the owning host thread
/// (usually not holding it) can both make narrow, uncontended updates,
/// the same per-field granularity a thread control block needs when
/// its fields are touched from both scheduler and thread context.
pub struct Thread {
    id: ThreadId,
    name: Mutex<String>,
    base_priority: AtomicU8,
    effective_priority: AtomicU8,
    state: Mutex<ThreadState>,
    block_reason: Mutex<Option<BlockReason>>,
    thread_flags: AtomicU32,
    flags_wait: Mutex<Option<FlagsWaitCriteria>>,
    /// Wait-exit slot: the value (if any) the last blocking call this
    /// thread parked on was woken with. `None` after [`Self::take_wait_outcome`]
    /// means the wait expired via the delay list rather than being
    /// delivered a value by the object it was waiting on.
    wait_outcome: Mutex<Option<Result<WaitValue>>>,
    exit_code: AtomicU64,
    /// Mutexes currently held by this thread, most-recently-acquired
    /// last; priority inheritance walks this to recompute the
    /// effective priority.
    owned_mutexes: Mutex<Vec<u32>>,
    join_waiters: Mutex<Vec<ThreadId>>,
    /// Set from `osThreadAttr_t`'s `osThreadJoinable` bit. A joinable
    /// thread's control block lingers (state `Dead`, still registered)
    /// until `osThreadJoin` reaps it; a detached thread is removed from
    /// the registry the instant it exits.
    joinable: std::sync::atomic::AtomicBool,
    suspender: Suspender,
}

impl Thread {
    pub fn new(id: ThreadId, name: impl Into<String>, priority: ThreadPriority) -> Self {
        Self {
            id,
            name: Mutex::new(name.into()),
            base_priority: AtomicU8::new(priority),
            effective_priority: AtomicU8::new(priority),
            state: Mutex::new(ThreadState::New),
            block_reason: Mutex::new(None),
            thread_flags: AtomicU32::new(0),
            flags_wait: Mutex::new(None),
            wait_outcome: Mutex::new(None),
            exit_code: AtomicU64::new(0),
            owned_mutexes: Mutex::new(Vec::new()),
            join_waiters: Mutex::new(Vec::new()),
            joinable: std::sync::atomic::AtomicBool::new(false),
            suspender: Suspender::new(),
        }
    }

    pub fn is_joinable(&self) -> bool {
        self.joinable.load(Ordering::Acquire)
    }

    pub fn set_joinable(&self, joinable: bool) {
        self.joinable.store(joinable, Ordering::Release);
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> String {
        self.name.lock().unwrap().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.lock().unwrap() = name.into();
    }

    pub fn base_priority(&self) -> ThreadPriority {
        self.base_priority.load(Ordering::Acquire)
    }

    pub fn set_base_priority(&self, priority: ThreadPriority) {
        self.base_priority.store(priority, Ordering::Release);
    }

    /// Priority used by the scheduler: `max(base, inherited)`.
    pub fn effective_priority(&self) -> ThreadPriority {
        self.effective_priority.load(Ordering::Acquire)
    }

    pub fn set_effective_priority(&self, priority: ThreadPriority) {
        self.effective_priority.store(priority, Ordering::Release);
    }

    pub fn state(&self) -> ThreadState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, state: ThreadState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn block_reason(&self) -> Option<BlockReason> {
        *self.block_reason.lock().unwrap()
    }

    pub fn set_block_reason(&self, reason: Option<BlockReason>) {
        *self.block_reason.lock().unwrap() = reason;
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire) as i32
    }

    pub fn set_exit_code(&self, code: i32) {
        self.exit_code.store(code as u32 as u64, Ordering::Release);
    }

    pub fn suspender(&self) -> &Suspender {
        &self.suspender
    }

    /// Mutexes currently owned, oldest-acquired first.
    pub fn owned_mutexes(&self) -> Vec<u32> {
        self.owned_mutexes.lock().unwrap().clone()
    }

    pub fn push_owned_mutex(&self, mutex_id: u32) {
        self.owned_mutexes.lock().unwrap().push(mutex_id);
    }

    pub fn remove_owned_mutex(&self, mutex_id: u32) {
        self.owned_mutexes.lock().unwrap().retain(|&m| m != mutex_id);
    }

    pub fn join_waiters(&self) -> Vec<ThreadId> {
        self.join_waiters.lock().unwrap().clone()
    }

    pub fn add_join_waiter(&self, tid: ThreadId) {
        self.join_waiters.lock().unwrap().push(tid);
    }

    pub fn remove_join_waiter(&self, tid: ThreadId) {
        self.join_waiters.lock().unwrap().retain(|&w| w != tid);
    }

    pub fn take_join_waiters(&self) -> Vec<ThreadId> {
        std::mem::take(&mut *self.join_waiters.lock().unwrap())
    }

    // -- Thread flags (osThreadFlagsSet/Wait/Clear) --------------------
    //
    // A thread's own 31-bit flags bitset works exactly like a standalone
    // [`crate::kernel::sync::event::EventFlags`] group except that it
    // can have at most one waiter: the thread itself. Setting/clearing
    // only ever mutate local state and report whether a registered wait
    // is now satisfied; parking the calling thread and delivering that
    // result through its wait-exit slot is the wait/wake protocol's job
    // (`crate::kernel::sched::wake`), not this type's.

    /// Test `flags` against the current bitset without registering a
    /// wait; used for the non-blocking fast path of `osThreadFlagsWait`.
    /// Unless `no_clear`, consumes the matching bits on success.
    pub fn check_flags(&self, flags: u32, wait_all: bool, no_clear: bool) -> Option<u32> {
        let _guard = self.flags_wait.lock().unwrap();
        let current = self.thread_flags.load(Ordering::Acquire);
        let satisfied = if wait_all {
            current & flags == flags
        } else {
            current & flags != 0
        };
        if !satisfied {
            return None;
        }
        if !no_clear {
            let consumed = if wait_all { flags } else { current & flags };
            self.thread_flags.fetch_and(!consumed, Ordering::AcqRel);
        }
        Some(current)
    }

    /// Register the calling thread's still-unsatisfied wait so a later
    /// `set_flags` can deliver it.
    pub fn register_flags_wait(&self, flags: u32, wait_all: bool, no_clear: bool) {
        *self.flags_wait.lock().unwrap() = Some(FlagsWaitCriteria {
            flags,
            wait_all,
            no_clear,
        });
    }

    /// Drop a registered wait without it having been satisfied (the
    /// delay list expired first).
    pub fn clear_flags_wait(&self) {
        *self.flags_wait.lock().unwrap() = None;
    }

    pub fn get_flags(&self) -> u32 {
        self.thread_flags.load(Ordering::Acquire)
    }

    pub fn clear_flags(&self, flags: u32) -> u32 {
        self.thread_flags.fetch_and(!flags, Ordering::AcqRel)
    }

    /// Set bits in this thread's flags. Returns the flags value prior
    /// to the set and, if a registered wait is now satisfied, the
    /// snapshot to deliver to it (the caller is responsible for
    /// actually waking the thread via the wait/wake protocol).
    pub fn set_flags(&self, flags: u32) -> (u32, Option<u32>) {
        let mut wait = self.flags_wait.lock().unwrap();
        let prev = self.thread_flags.fetch_or(flags, Ordering::AcqRel);
        let woken = match wait.as_ref() {
            Some(c) => {
                let current = self.thread_flags.load(Ordering::Acquire);
                let satisfied = if c.wait_all {
                    current & c.flags == c.flags
                } else {
                    current & c.flags != 0
                };
                if satisfied {
                    let snapshot = current;
                    if !c.no_clear {
                        let consumed = if c.wait_all { c.flags } else { current & c.flags };
                        self.thread_flags.fetch_and(!consumed, Ordering::AcqRel);
                    }
                    *wait = None;
                    Some(snapshot)
                } else {
                    None
                }
            }
            None => None,
        };
        (prev, woken)
    }

    // -- Wait-exit slot -------------------------------------------------

    pub fn set_wait_outcome(&self, outcome: Result<WaitValue>) {
        *self.wait_outcome.lock().unwrap() = Some(outcome);
    }

    pub fn take_wait_outcome(&self) -> Option<Result<WaitValue>> {
        self.wait_outcome.lock().unwrap().take()
    }

    pub fn clear_wait_outcome(&self) {
        *self.wait_outcome.lock().unwrap() = None;
    }
}

/// Dense, index-addressed storage for every thread the kernel knows
/// about. Slots are reused once a `Dead` thread's id is no longer
/// referenced by any wait list (the dispatcher reaps on its own pass).
pub struct ThreadRegistry {
    slots: Mutex<Vec<Option<Arc<Thread>>>>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self {
            // Slot 0 is permanently reserved for ThreadId::INVALID.
            slots: Mutex::new(vec![None]),
        }
    }

    pub fn insert(&self, name: impl Into<String>, priority: ThreadPriority) -> Arc<Thread> {
        let mut slots = self.slots.lock().unwrap();
        let idx = slots
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, s)| s.is_none())
            .map(|(i, _)| i)
            .unwrap_or_else(|| {
                slots.push(None);
                slots.len() - 1
            });
        let thread = Arc::new(Thread::new(ThreadId(idx as u32), name, priority));
        slots[idx] = Some(thread.clone());
        thread
    }

    pub fn get(&self, id: ThreadId) -> Option<Arc<Thread>> {
        self.slots.lock().unwrap().get(id.0 as usize).cloned().flatten()
    }

    pub fn remove(&self, id: ThreadId) {
        if let Some(slot) = self.slots.lock().unwrap().get_mut(id.0 as usize) {
            *slot = None;
        }
    }

    pub fn all(&self) -> Vec<Arc<Thread>> {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| s.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.slots.lock().unwrap().iter().filter(|s| s.is_some()).count()
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_state_schedulable() {
        assert!(ThreadState::Ready.is_schedulable());
        assert!(!ThreadState::Blocked.is_schedulable());
        assert!(!ThreadState::Dead.is_alive());
    }

    #[test]
    fn registry_reuses_freed_slots() {
        let reg = ThreadRegistry::new();
        let a = reg.insert("a", PRIORITY_DEFAULT);
        let a_id = a.id();
        reg.remove(a_id);
        let b = reg.insert("b", PRIORITY_DEFAULT);
        assert_eq!(b.id(), a_id);
    }

    #[test]
    fn thread_flags_wait_all() {
        let t = Thread::new(ThreadId(1), "t", PRIORITY_DEFAULT);
        t.set_flags(0b001);
        assert!(t.check_flags(0b011, true, true).is_none());
        t.register_flags_wait(0b011, true, false);
        let (_prev, woken) = t.set_flags(0b010);
        let got = woken.expect("wait should be satisfied once both bits are set");
        assert_eq!(got & 0b011, 0b011);
        assert_eq!(t.get_flags() & 0b011, 0);
    }

    #[test]
    fn thread_flags_check_any_without_registering() {
        let t = Thread::new(ThreadId(2), "t2", PRIORITY_DEFAULT);
        t.set_flags(0b100);
        let got = t.check_flags(0b110, false, false).unwrap();
        assert_eq!(got & 0b100, 0b100);
        assert_eq!(t.get_flags(), 0);
    }

    #[test]
    fn priority_default_between_idle_and_realtime() {
        assert!(PRIORITY_IDLE < PRIORITY_DEFAULT);
        assert!(PRIORITY_DEFAULT < PRIORITY_REALTIME);
    }
}
