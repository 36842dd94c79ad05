// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! `osThread*` entry points
//!
//! `new` spawns one native host thread per RTOS thread. The host
//! thread runs the firmware entry function directly, but only after
//! parking itself on its [`crate::kernel::thread::suspender::Suspender`]
//! until the dispatcher schedules it — so creating a thread never lets
//! it race ahead of whatever the dispatcher is currently running.
//!
//! Every other entry point in this module follows the CMSIS-RTOS v2
//! signatures exactly: none of them take an explicit "which thread"
//! parameter beyond the target of the call, because CMSIS-RTOS v2
//! itself doesn't — the calling thread identifies itself implicitly,
//! which here means reading [`kernel::thread::current_thread_id`], a
//! thread-local bound once by [`new`]'s spawned closure before it ever
//! calls into firmware code.
//!
//! Mid-instruction preemption — stopping a thread that hasn't reached a
//! safe point of its own, because a higher-priority thread (or the
//! round-robin quantum) just bumped it off the CPU — is handled by
//! [`crate::kernel::thread::suspender::Suspender`] delivering a real
//! POSIX signal to the thread's native handle; see that module for how.
//! A thread that *is* at a safe point (a blocking call, `osThreadYield`)
//! suspends itself directly instead, which needs no signal at all.

use std::thread::Builder;

use crate::error::{Error, Result};
use crate::kernel::sched::wake;
use crate::kernel::{
    self,
    thread::{BlockReason, ThreadId, ThreadPriority, ThreadState, WaitValue, PRIORITY_IDLE, PRIORITY_REALTIME},
};

pub struct ThreadAttr {
    pub name: String,
    pub priority: ThreadPriority,
    pub stack_size: usize,
    /// `osThreadJoinable` — if false (the CMSIS-RTOS v2 default), the
    /// thread's control block is freed the instant it exits; if true,
    /// it lingers `Dead` until [`join`] reaps it.
    pub joinable: bool,
}

impl Default for ThreadAttr {
    fn default() -> Self {
        Self {
            name: String::new(),
            priority: kernel::thread::PRIORITY_DEFAULT,
            stack_size: 0,
            joinable: false,
        }
    }
}

/// Thread lifecycle state as CMSIS-RTOS v2's `osThreadState_t` reports
/// it — coarser than the kernel's internal [`ThreadState`], which
/// additionally distinguishes `Dying` from `Dead` for the dispatcher's
/// own bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicThreadState {
    Inactive,
    Ready,
    Running,
    Blocked,
    Terminated,
}

/// `osThreadNew`
pub fn new<F>(entry: F, attr: ThreadAttr) -> Result<ThreadId>
where
    F: FnOnce() + Send + 'static,
{
    let k = kernel::instance();
    if attr.priority < PRIORITY_IDLE || attr.priority > PRIORITY_REALTIME {
        return Err(Error::Parameter);
    }
    let name = if attr.name.is_empty() {
        "Thread".to_string()
    } else {
        attr.name
    };
    let thread = k.spawn_thread(name.clone(), attr.priority);
    thread.set_joinable(attr.joinable);
    let tid = thread.id();
    let stack_size = if attr.stack_size == 0 {
        k.config.default_thread_stack_size
    } else {
        attr.stack_size
    };

    let builder = Builder::new().name(name).stack_size(stack_size);
    let spawn_result = builder.spawn(move || {
        let k = kernel::instance();
        let thread = k.threads.get(tid).expect("thread vanished before start");
        thread.suspender().mark_ready();
        // Wait for the dispatcher to actually pick this thread before
        // running any firmware code; `new`'s caller only enqueues it on
        // the ready list, it doesn't hand it the CPU directly.
        if !thread.suspender().block_until_woken() {
            return;
        }
        kernel::thread::bind_current_thread(tid);
        entry();
        // Returning from the entry function instead of calling
        // `ThreadExit` is undefined behavior on the real target (no
        // stack-unwind hook); here it can't actually corrupt anything,
        // so tear the thread down the same way `exit` would rather
        // than leaking a parked host thread, but flag the misuse.
        if k.threads.get(tid).map(|t| t.state()) != Some(ThreadState::Dead) {
            log::warn!(
                "thread {tid} returned from its entry function instead of calling ThreadExit"
            );
            finish_thread(k, tid);
        }
    });

    match spawn_result {
        Ok(_handle) => {
            k.make_ready(tid);
            Ok(tid)
        }
        Err(_) => {
            k.threads.remove(tid);
            Err(Error::NoMemory)
        }
    }
}

/// `osThreadGetId` — the calling thread's own id, read from the
/// thread-local bound by [`new`]'s spawned closure before entering
/// firmware code. `Error::Resource` if called from a host thread that
/// was never registered with the kernel (e.g. the thread driving
/// `osKernelStart` itself, which is the dispatcher, not an RTOS thread).
pub fn current() -> Result<ThreadId> {
    kernel::thread::current_thread_id().ok_or(Error::Resource)
}

/// `osThreadGetName`
pub fn name(tid: ThreadId) -> Result<String> {
    kernel::instance()
        .threads
        .get(tid)
        .map(|t| t.name())
        .ok_or(Error::Parameter)
}

/// `osThreadGetState`
pub fn state(tid: ThreadId) -> Result<PublicThreadState> {
    let t = kernel::instance().threads.get(tid).ok_or(Error::Parameter)?;
    Ok(match t.state() {
        ThreadState::New => PublicThreadState::Inactive,
        ThreadState::Ready => PublicThreadState::Ready,
        ThreadState::Running => PublicThreadState::Running,
        ThreadState::Blocked => PublicThreadState::Blocked,
        ThreadState::Dying | ThreadState::Dead => PublicThreadState::Terminated,
    })
}

/// `osThreadGetCount`
pub fn count() -> usize {
    kernel::instance().threads.count()
}

/// `osThreadEnumerate`
pub fn enumerate() -> Vec<ThreadId> {
    kernel::instance().threads.all().iter().map(|t| t.id()).collect()
}

/// `osThreadSetPriority` — recomputes the thread's effective priority
/// from its new base plus whatever priority inheritance it is still
/// obligated to, rather than simply taking `max(new_base, old_effective)`,
/// which could leave a stale boost in place after the mutex that caused
/// it has since been released.
pub fn set_priority(tid: ThreadId, priority: ThreadPriority) -> Result<()> {
    if priority < PRIORITY_IDLE || priority > PRIORITY_REALTIME {
        return Err(Error::Parameter);
    }
    let k = kernel::instance();
    let _guard = k.lock();
    let t = k.threads.get(tid).ok_or(Error::Parameter)?;
    t.set_base_priority(priority);
    k.recompute_effective_priority(tid);
    Ok(())
}

/// `osThreadGetPriority`
pub fn get_priority(tid: ThreadId) -> Result<ThreadPriority> {
    let k = kernel::instance();
    let t = k.threads.get(tid).ok_or(Error::Parameter)?;
    Ok(t.base_priority())
}

/// `osThreadYield` — voluntarily give up the CPU for this tick,
/// re-enqueuing at the back of the calling thread's own priority
/// bucket (so equal-priority peers get a turn) and physically parking
/// the calling host thread until the dispatcher resumes it.
pub fn yield_now() -> Result<()> {
    let k = kernel::instance();
    let tid = current()?;
    let thread = k.threads.get(tid).ok_or(Error::Parameter)?;
    {
        let _guard = k.lock();
        thread.set_state(ThreadState::Ready);
        k.dispatcher.ready(tid, thread.effective_priority());
        k.dispatcher.record_yield();
        thread.suspender().suspend();
    }
    if !thread.suspender().block_until_woken() {
        return Err(Error::Resource);
    }
    Ok(())
}

/// `osThreadSuspend` — may target the calling thread or any other.
/// Targeting self actually parks the caller (it is, after all, the one
/// host thread currently allowed to run); targeting another thread
/// just moves its control block out of the ready list, since that
/// thread's own host thread isn't executing this call and has nothing
/// to park itself against.
pub fn suspend(tid: ThreadId) -> Result<()> {
    let k = kernel::instance();
    let is_self = kernel::thread::current_thread_id() == Some(tid);
    {
        let _guard = k.lock();
        let thread = k.threads.get(tid).ok_or(Error::Parameter)?;
        match thread.state() {
            ThreadState::Ready => {
                k.dispatcher.remove_from_ready(tid);
                wake::park(k, &thread, BlockReason::Suspend, None);
            }
            ThreadState::Running => {
                wake::park(k, &thread, BlockReason::Suspend, None);
                k.dispatcher.request_reschedule();
            }
            _ => return Err(Error::Resource),
        }
    }
    if is_self {
        let thread = k.threads.get(tid).ok_or(Error::Parameter)?;
        wake::block(&thread)?;
    }
    Ok(())
}

/// `osThreadResume`
pub fn resume(tid: ThreadId) -> Result<()> {
    let k = kernel::instance();
    let _guard = k.lock();
    let thread = k.threads.get(tid).ok_or(Error::Parameter)?;
    if thread.block_reason() != Some(BlockReason::Suspend) {
        return Err(Error::Resource);
    }
    wake::wake_with(k, tid, WaitValue::Unit);
    Ok(())
}

/// `osThreadDetach`
pub fn detach(tid: ThreadId) -> Result<()> {
    let k = kernel::instance();
    let _guard = k.lock();
    let thread = k.threads.get(tid).ok_or(Error::Parameter)?;
    thread.set_joinable(false);
    if thread.state() == ThreadState::Dead {
        k.threads.remove(tid);
    }
    Ok(())
}

/// `osThreadJoin` — blocks the calling thread until `tid` exits.
/// `Error::Parameter` if `tid` was created non-joinable (CMSIS-RTOS v2
/// does not allow joining a detached thread).
pub fn join(tid: ThreadId) -> Result<()> {
    let k = kernel::instance();
    let caller_tid = current()?;
    let caller = k.threads.get(caller_tid).ok_or(Error::Parameter)?;
    {
        let _guard = k.lock();
        let target = k.threads.get(tid).ok_or(Error::Parameter)?;
        if !target.is_joinable() {
            return Err(Error::Parameter);
        }
        if target.state() == ThreadState::Dead {
            k.threads.remove(tid);
            return Ok(());
        }
        target.add_join_waiter(caller_tid);
        wake::park(k, &caller, BlockReason::Join(tid), None);
    }
    wake::block(&caller)?;
    k.threads.remove(tid);
    Ok(())
}

/// `osThreadExit` — the self-termination path; must be called from
/// within a thread's own entry function instead of returning from it.
/// Never returns.
pub fn exit() -> ! {
    if let Ok(tid) = current() {
        finish_thread(kernel::instance(), tid);
    }
    loop {
        std::thread::park();
    }
}

/// `osThreadTerminate` — forcibly tears down another thread (or the
/// calling one). Pulls it out of whatever list it was in first
/// (ready list, delay list, the object wait list named by its
/// `BlockReason`) so nothing is left pointing at a dead thread's slot,
/// then runs the same exit machinery `osThreadExit` does.
pub fn terminate(tid: ThreadId) -> Result<()> {
    let k = kernel::instance();
    let was_current;
    {
        let _guard = k.lock();
        let thread = k.threads.get(tid).ok_or(Error::Parameter)?;
        if thread.state() == ThreadState::Dead {
            return Ok(());
        }
        k.dispatcher.remove_from_ready(tid);
        if let Some(reason) = thread.block_reason() {
            k.remove_from_wait_object(tid, reason);
        }
        k.delay_list.lock().unwrap().remove(tid);
        was_current = k.dispatcher.current() == Some(tid);
    }
    finish_thread(k, tid);
    if was_current {
        k.dispatcher.request_reschedule();
    }
    Ok(())
}

/// `osDelay`
pub fn delay(ticks: u64) -> Result<()> {
    let k = kernel::instance();
    let tid = current()?;
    let thread = k.threads.get(tid).ok_or(Error::Parameter)?;
    if ticks == 0 {
        return Ok(());
    }
    {
        let _guard = k.lock();
        wake::park(k, &thread, BlockReason::Delay, Some(ticks));
    }
    wake::block(&thread).map(|_| ())
}

/// Shared teardown for `osThreadExit` and `osThreadTerminate`: releases
/// every robust mutex the thread still owns (the head waiter becomes
/// the new owner, woken with an error status), wakes every joiner,
/// runs the configured terminate hook, and frees the control block
/// outright unless it's joinable.
pub(crate) fn finish_thread(k: &kernel::Kernel, tid: ThreadId) {
    let _guard = k.lock();
    let Some(thread) = k.threads.get(tid) else {
        return;
    };
    if thread.state() == ThreadState::Dead {
        return;
    }
    for mutex_id in thread.owned_mutexes() {
        if let Some(m) = k.mutexes.get(mutex_id) {
            if let Some(new_owner) = m.recover_from_owner_death() {
                if let Some(owner_thread) = k.threads.get(new_owner) {
                    owner_thread.push_owned_mutex(mutex_id);
                }
                wake::wake_with_error(k, new_owner, Error::Error);
            }
        }
    }
    thread.set_state(ThreadState::Dead);
    thread.suspender().kill();
    for waiter in thread.take_join_waiters() {
        wake::wake_with(k, waiter, WaitValue::Unit);
    }
    if let Some(hook) = &k.config.terminate_hook {
        hook(tid);
    }
    if !thread.is_joinable() {
        k.threads.remove(tid);
    }
}
