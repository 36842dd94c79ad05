// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel singleton
//!
//! There is exactly one [`Kernel`] per process — CMSIS-RTOS v2 has no
//! notion of multiple independent kernel instances, and every public
//! API entry point ultimately reaches this struct via
//! [`crate::kernel::instance`]. It owns the kernel lock (a reentrant
//! lock: a thread already holding it, e.g. inside a primitive's
//! implementation, may call back into another primitive without
//! deadlocking itself), a separate reentrant lock for interrupt
//! sub-state, the dispatcher, the thread registry, the simulated NVIC,
//! the software timer service (paired with a due-callback queue a
//! dedicated timer thread drains), a FIFO of ISR-deferred wakes, and
//! one slab per kind of blocking object (mutex, semaphore, event
//! flags, message queue, memory pool).

pub mod clock;
pub mod nvic;
pub mod sched;
pub mod sync;
pub mod thread;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use parking_lot::ReentrantMutex;

use crate::config::KernelConfig;
use crate::error::{Error, Result};
use clock::Clock;
use nvic::Nvic;
use sched::timer::TimerService;
use sched::wake;
use sched::Dispatcher;
use thread::{BlockReason, ThreadId, ThreadPriority, ThreadRegistry, ThreadState, WaitValue};

/// Dense slot storage shared by every kind of kernel object (mutex,
/// semaphore, event-flags group, message queue, memory pool). Mirrors
/// [`thread::ThreadRegistry`]'s by-index-not-pointer layout.
pub struct ObjectSlab<T> {
    slots: Mutex<Vec<Option<Arc<T>>>>,
}

impl<T> ObjectSlab<T> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(vec![None]),
        }
    }

    pub fn insert(&self, value: T) -> (u32, Arc<T>) {
        let mut slots = self.slots.lock().unwrap();
        let value = Arc::new(value);
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
        slots[idx] = Some(value.clone());
        (idx as u32, value)
    }

    pub fn get(&self, id: u32) -> Option<Arc<T>> {
        self.slots.lock().unwrap().get(id as usize).cloned().flatten()
    }

    pub fn remove(&self, id: u32) -> Result<()> {
        let mut slots = self.slots.lock().unwrap();
        match slots.get_mut(id as usize) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Ok(())
            }
            _ => Err(Error::Parameter),
        }
    }
}

impl<T> Default for ObjectSlab<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Every waitable kernel object (mutex, semaphore, event-flags group,
/// message queue, memory pool, timer) carries a common header: an id
/// tag (the `ObjectSlab` index already supplies that) and an optional
/// display name, settable at creation time and readable by
/// `osXxxGetName`. Wrapping each primitive's own type in
/// this rather than threading a `name` field through every one of them
/// keeps the name concern in one place, the way [`thread::Thread`]
/// keeps its own name inline since a thread's identity and its name
/// are inseparable but a mutex's name is purely decorative metadata.
pub struct Named<T> {
    name: Mutex<Option<String>>,
    pub inner: T,
}

impl<T> Named<T> {
    pub fn new(name: Option<String>, inner: T) -> Self {
        Self {
            name: Mutex::new(name),
            inner,
        }
    }

    pub fn name(&self) -> Option<String> {
        self.name.lock().unwrap().clone()
    }
}

impl<T> std::ops::Deref for Named<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

/// The kernel singleton.
pub struct Kernel {
    pub config: KernelConfig,
    pub clock: Clock,
    lock: ReentrantMutex<()>,
    irq_lock: ReentrantMutex<()>,
    pub threads: ThreadRegistry,
    pub dispatcher: Dispatcher,
    pub nvic: Nvic,
    pub timers: Mutex<TimerService>,
    /// The due-callback queue the dedicated timer thread blocks on.
    /// [`Self::run_one_pass`]'s tick loop posts onto this; it never
    /// invokes a timer callback itself. Sized by
    /// `KernelConfig::timer_queue_depth` — distinct from `timers`'
    /// live-timer-object count, which has no cap.
    pub timer_queue: sync::msgqueue::MessageQueue<sched::timer::TimerCallback>,
    /// State changes triggered from inside an ISR callback that would
    /// wake a parked thread are queued here instead of being delivered
    /// inline, and drained once [`Self::run_one_pass`]'s ISR-draining
    /// loop has fully returned — see [`wake::wake_with`]/[`wake::wake_with_error`].
    post_isr_queue: Mutex<VecDeque<wake::DeferredWake>>,
    pub delay_list: Mutex<sched::delay::DelayList>,
    pub mutexes: ObjectSlab<Named<sync::mutex::Mutex>>,
    pub semaphores: ObjectSlab<Named<sync::semaphore::Semaphore>>,
    pub event_flags: ObjectSlab<Named<sync::event::EventFlags>>,
    pub msg_queues: ObjectSlab<Named<sync::msgqueue::MessageQueue<Vec<u8>>>>,
    pub mem_pools: ObjectSlab<Named<sync::mempool::MemoryPool>>,
    /// Absolute tick counter (data model §3's "absolute tick counter").
    /// Advanced only by [`Self::run_one_pass`], by exactly as many ticks
    /// as have actually elapsed on `clock` since the last pass — not
    /// once per pass — so a busy dispatcher loop woken early by
    /// reschedule requests can't race the delay list ahead of real time.
    tick_count: std::sync::atomic::AtomicU64,
    shutdown: std::sync::atomic::AtomicBool,
    /// Set once [`Self::run_dispatcher_forever`] starts — `osKernelGetState`'s
    /// `osKernelRunning` vs. `osKernelReady` distinction. A kernel is
    /// always `Ready` the instant [`init`] succeeds (construction can't
    /// fail), so there is no separate `osKernelInactive` state to track
    /// here beyond "the global instance hasn't been set yet", which
    /// [`instance`]'s own panic already covers.
    running: std::sync::atomic::AtomicBool,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        let clock = Clock::new(config.clock_source(), config.tick_period);
        let timer_queue_depth = config.timer_queue_depth;
        Self {
            dispatcher: Dispatcher::new(config.round_robin_quantum_ticks),
            clock,
            config,
            lock: ReentrantMutex::new(()),
            irq_lock: ReentrantMutex::new(()),
            threads: ThreadRegistry::new(),
            nvic: Nvic::new(240), // Cortex-M external IRQ lines, matching NVIC_SetPriority's 8-bit field width convention
            timers: Mutex::new(TimerService::new()),
            timer_queue: sync::msgqueue::MessageQueue::new(timer_queue_depth)
                .expect("timer_queue_depth must be nonzero"),
            post_isr_queue: Mutex::new(VecDeque::new()),
            delay_list: Mutex::new(sched::delay::DelayList::new()),
            mutexes: ObjectSlab::new(),
            semaphores: ObjectSlab::new(),
            event_flags: ObjectSlab::new(),
            msg_queues: ObjectSlab::new(),
            mem_pools: ObjectSlab::new(),
            tick_count: std::sync::atomic::AtomicU64::new(0),
            shutdown: std::sync::atomic::AtomicBool::new(false),
            running: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// `osKernelGetState`'s `osKernelRunning`/`osKernelReady` distinction.
    pub fn is_running(&self) -> bool {
        self.running.load(std::sync::atomic::Ordering::Acquire)
    }

    /// `osKernelGetTickCount`: the number of ticks this kernel has
    /// actually processed through the delay engine and timer service,
    /// as opposed to [`clock::Clock::ticks`]'s raw free-running reading
    /// of elapsed wall time.
    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Acquire the kernel lock. Reentrant: a thread already holding it
    /// may call this again without deadlocking.
    pub fn lock(&self) -> parking_lot::ReentrantMutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Acquire the (separate) interrupt sub-state lock.
    pub fn irq_lock(&self) -> parking_lot::ReentrantMutexGuard<'_, ()> {
        self.irq_lock.lock()
    }

    /// Create a new, not-yet-started thread and register it.
    pub fn spawn_thread(&self, name: impl Into<String>, priority: ThreadPriority) -> Arc<thread::Thread> {
        let _guard = self.lock();
        self.threads.insert(name, priority)
    }

    /// Make a New or Blocked thread Ready and hand it to the
    /// dispatcher.
    pub fn make_ready(&self, tid: ThreadId) {
        let _guard = self.lock();
        if let Some(t) = self.threads.get(tid) {
            t.set_state(ThreadState::Ready);
            self.dispatcher.ready(tid, t.effective_priority());
        }
    }

    /// Remove a timed-out thread from whatever object's wait list its
    /// `reason` says it was parked on, so a expired wait doesn't leave a
    /// stale entry behind for the object to wake later. For a mutex
    /// wait this also recomputes the current owner's effective priority
    /// now that one of its waiters is gone — priority inheritance must
    /// never outlive the waiter that justified it.
    pub(crate) fn remove_from_wait_object(&self, tid: ThreadId, reason: BlockReason) {
        match reason {
            BlockReason::Delay | BlockReason::Suspend => {}
            BlockReason::ThreadFlags => {
                // A registered thread-flags wait that expired via the
                // delay list must be dropped too, or a later `osThreadFlagsSet`
                // could "satisfy" a wait nobody is still parked on and
                // force this thread back onto the ready list out of
                // nowhere.
                if let Some(t) = self.threads.get(tid) {
                    t.clear_flags_wait();
                }
            }
            BlockReason::Join(waited_on) => {
                if let Some(t) = self.threads.get(waited_on) {
                    t.remove_join_waiter(tid);
                }
            }
            BlockReason::EventFlags(id) => {
                if let Some(ef) = self.event_flags.get(id) {
                    ef.remove_waiter(tid);
                }
            }
            BlockReason::Mutex(id) => {
                if let Some(m) = self.mutexes.get(id) {
                    m.remove_waiter(tid);
                    if let Some(owner) = m.owner() {
                        self.recompute_effective_priority(owner);
                    }
                }
            }
            BlockReason::Semaphore(id) => {
                if let Some(s) = self.semaphores.get(id) {
                    s.remove_waiter(tid);
                }
            }
            BlockReason::MemoryPool(id) => {
                if let Some(p) = self.mem_pools.get(id) {
                    p.remove_waiter(tid);
                }
            }
            BlockReason::MessageGet(id) => {
                if let Some(q) = self.msg_queues.get(id) {
                    q.remove_reader(tid);
                }
            }
            BlockReason::MessagePut(id) => {
                if let Some(q) = self.msg_queues.get(id) {
                    q.remove_writer(tid);
                }
            }
            BlockReason::TimerQueue => {
                self.timer_queue.remove_reader(tid);
            }
        }
    }

    /// Queue a wake to be delivered once the current ISR-draining loop
    /// has finished, rather than inline while `nvic::in_isr()` is still
    /// true. Called only by [`wake::wake_with`]/[`wake::wake_with_error`].
    pub(crate) fn defer_post_isr(&self, item: wake::DeferredWake) {
        self.post_isr_queue.lock().unwrap().push_back(item);
    }

    /// Drain every wake queued by [`Self::defer_post_isr`] since the
    /// last call, in the order they were deferred.
    pub(crate) fn take_post_isr_queue(&self) -> Vec<wake::DeferredWake> {
        self.post_isr_queue.lock().unwrap().drain(..).collect()
    }

    /// Recompute `tid`'s effective priority as `max(base, highest
    /// waiter across every mutex it currently owns)` (invariant 6) and
    /// push the result into the dispatcher's ready-list bucketing.
    /// This must scan *all* owned mutexes, not just whichever one just
    /// changed: a thread holding two mutexes keeps the higher of the
    /// two boosts until the waiter that justifies it is gone, even if
    /// the other mutex is released or loses its own top waiter first.
    pub(crate) fn recompute_effective_priority(&self, tid: ThreadId) {
        if let Some(t) = self.threads.get(tid) {
            let mut priority = t.base_priority();
            for mutex_id in t.owned_mutexes() {
                if let Some(m) = self.mutexes.get(mutex_id) {
                    if let Some(w) = m.highest_waiter_priority() {
                        priority = priority.max(w);
                    }
                }
            }
            t.set_effective_priority(priority);
            self.dispatcher.reprioritize(tid, priority);
        }
    }

    /// One full dispatcher pass (steps 2–6 of the module-level doc).
    /// Called by the dispatcher's own loop thread and, in tests, by
    /// hand to single-step the kernel deterministically.
    pub fn run_one_pass(&self) {
        let _guard = self.lock();

        // Step 4 of spec.md §4.2: a masked emulated processor can't
        // take scheduling interrupts, so a critical section
        // (`__disable_irq`/`core_util_critical_section_enter`) freezes
        // the whole pass, not just IRQ delivery — ISR draining, the
        // tick advance, and the select/dispatch step all wait for the
        // next pass once interrupts are unmasked again.
        if !self.nvic.interrupts_enabled() {
            return;
        }

        // Step 2: process queued ISR work. A handler may trigger a wake
        // (semaphore release, event-flags set, ...); those are deferred
        // onto `post_isr_queue` rather than delivered inline while
        // `nvic::in_isr()` still reads true, and drained only once every
        // queued interrupt for this pass has finished running — so a
        // woken thread always resumes in genuine thread context, never
        // nested inside another handler's ISR context.
        {
            let _irq_guard = self.irq_lock();
            for (irq, handler) in self.nvic.process_interrupts() {
                nvic::run_as_isr(|| handler());
                self.nvic.finish_irq(irq);
            }
        }
        wake::drain_deferred(self, self.take_post_isr_queue());

        // Step 3-4: consult the clock and advance the delay engine and
        // timers by exactly as many ticks as have elapsed since the
        // last pass — never by a flat one-tick-per-pass amount, since a
        // reschedule request (a thread yielding, a mutex releasing) can
        // wake the dispatcher from `wait_for_next_pass` well before a
        // full tick period passes, and a slow pass can let several
        // whole ticks elapse between iterations.
        let now = self.clock.ticks();
        let prev = self.tick_count();
        let elapsed = now.saturating_sub(prev);
        if elapsed > 0 {
            self.tick_count.store(now, std::sync::atomic::Ordering::Release);
        }
        for _ in 0..elapsed {
            // A thread that reaches the front of the delay list with no
            // `BlockReason` at all was parked by a plain `osDelay`,
            // which succeeds; any other reason means it was waiting on
            // some object whose condition never arrived in time, so it
            // times out and must be pulled off that object's own wait
            // list too.
            let woken = self.delay_list.lock().unwrap().tick();
            for tid in woken {
                if let Some(t) = self.threads.get(tid) {
                    if t.state() != ThreadState::Blocked {
                        continue;
                    }
                    match t.block_reason() {
                        None | Some(BlockReason::Delay) => {
                            wake::wake_with(self, tid, WaitValue::Unit);
                        }
                        Some(reason) => {
                            self.remove_from_wait_object(tid, reason);
                            wake::wake_with_error(self, tid, Error::Timeout);
                        }
                    }
                }
            }
            // Timers due this tick are posted to the timer thread's
            // queue, never invoked here: callbacks must run in thread
            // context so they can be preempted, not inline under the
            // kernel lock the dispatcher pass itself holds.
            for callback in self.timers.lock().unwrap().tick() {
                if let Some(reader) = self.timer_queue.pop_waiting_reader() {
                    wake::wake_with(self, reader, WaitValue::Timer(callback));
                } else if self.timer_queue.try_put(callback, 0).is_err() {
                    if let Some(hook) = &self.config.error_hook {
                        hook(Error::Resource);
                    }
                }
            }

            // Round-robin: the running thread's quantum only counts
            // down on real ticks, matching spec.md §4.2's rule that a
            // quantum is consumed "on each tick", not on each
            // dispatcher pass.
            if self.dispatcher.tick_quantum(self.config.round_robin_quantum_ticks) {
                if let Some(cur_id) = self.dispatcher.current() {
                    if let Some(cur) = self.threads.get(cur_id) {
                        let prio = cur.effective_priority();
                        if self.dispatcher.has_ready_at_priority(prio) {
                            cur.set_state(ThreadState::Ready);
                            cur.suspender().suspend();
                            self.dispatcher.clear_current();
                            self.dispatcher.ready(cur_id, prio);
                        }
                    }
                }
            }
        }

        // Step 5-6: select and dispatch. A thread that is still
        // genuinely `Running` keeps the CPU unless the ready list's
        // head is *strictly* higher priority (spec.md §4.2's
        // preemption rule) — the ready list is never blindly re-polled
        // in place of whoever already holds the CPU, or every pass
        // would bounce execution over to idle the instant the ready
        // list happened to be empty.
        let previous = self.dispatcher.current();
        let previous_running = previous
            .and_then(|id| self.threads.get(id))
            .filter(|t| t.state() == ThreadState::Running);

        match previous_running {
            Some(prev) => {
                let prio = prev.effective_priority();
                if let Some(candidate) = self.dispatcher.select_if_higher(prio) {
                    prev.set_state(ThreadState::Ready);
                    prev.suspender().suspend();
                    if let Some(next) = self.threads.get(candidate) {
                        next.set_state(ThreadState::Running);
                        next.suspender().resume();
                    }
                    self.dispatcher.preempt(candidate, prio);
                }
            }
            None => {
                // Nothing is legitimately running: kernel startup, or
                // the previous occupant already left `Running` on its
                // own (blocked, exited, or was requeued by the
                // round-robin rotation above) — pick fresh from the
                // ready list, falling back to idle.
                let candidate = self.dispatcher.select_candidate();
                if candidate.is_none() {
                    // No ready thread and no idle thread: `start()`
                    // always installs an idle thread before the
                    // dispatcher loop runs, so this means the kernel
                    // invariant that the CPU always has somewhere to
                    // go has been violated (the idle thread itself
                    // was torn down, or the dispatcher is running
                    // before the kernel finished starting).
                    log::error!("no runnable thread and no idle thread; halting");
                    std::process::abort();
                }
                if candidate != previous {
                    if let Some(prev_id) = previous {
                        if let Some(prev) = self.threads.get(prev_id) {
                            if prev.state() == ThreadState::Running {
                                prev.suspender().suspend();
                            }
                        }
                    }
                    if let Some(next_id) = candidate {
                        if let Some(next) = self.threads.get(next_id) {
                            next.set_state(ThreadState::Running);
                            next.suspender().resume();
                        }
                    }
                    self.dispatcher.dispatch(candidate, None);
                }
            }
        }
        self.dispatcher.take_reschedule_flag();
    }

    /// Runs the dispatcher loop until [`Self::request_shutdown`] is
    /// called. Intended to be the body of the one dedicated dispatcher
    /// host thread; every other RTOS thread's host thread spends
    /// almost all of its life inside
    /// [`thread::suspender::Suspender::block_until_woken`].
    pub fn run_dispatcher_forever(&self) {
        self.running.store(true, std::sync::atomic::Ordering::Release);
        while !self.shutdown.load(std::sync::atomic::Ordering::Acquire) {
            self.run_one_pass();
            self.dispatcher.wait_for_next_pass(self.config.tick_period);
        }
        self.running.store(false, std::sync::atomic::Ordering::Release);
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, std::sync::atomic::Ordering::Release);
        self.dispatcher.request_reschedule();
    }

    pub fn tick_period(&self) -> Duration {
        self.config.tick_period
    }
}

static KERNEL: OnceLock<Kernel> = OnceLock::new();

/// Initialize the global kernel instance. Must be called exactly once,
/// before any public API entry point.
pub fn init(config: KernelConfig) {
    KERNEL
        .set(Kernel::new(config))
        .unwrap_or_else(|_| panic!("kernel already initialized"));
}

/// The global kernel instance.
///
/// # Panics
///
/// Panics if [`init`] has not been called yet — every public API
/// entry point requires a running kernel, same as calling a
/// CMSIS-RTOS function before `osKernelInitialize`.
pub fn instance() -> &'static Kernel {
    KERNEL.get().expect("kernel not initialized; call kernel::init() first")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_slab_reuses_freed_slots() {
        let slab: ObjectSlab<u32> = ObjectSlab::new();
        let (id, _) = slab.insert(10);
        slab.remove(id).unwrap();
        let (id2, _) = slab.insert(20);
        assert_eq!(id, id2);
    }

    #[test]
    fn object_slab_remove_unknown_is_error() {
        let slab: ObjectSlab<u32> = ObjectSlab::new();
        assert_eq!(slab.remove(42), Err(Error::Parameter));
    }

    #[test]
    fn kernel_single_pass_schedules_ready_thread() {
        let kernel = Kernel::new(KernelConfig::default());
        let t = kernel.spawn_thread("worker", thread::PRIORITY_DEFAULT);
        kernel.make_ready(t.id());
        kernel.run_one_pass();
        assert_eq!(kernel.dispatcher.current(), Some(t.id()));
    }
}
