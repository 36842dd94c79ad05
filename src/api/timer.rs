// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! `osTimer*` entry points
//!
//! Callbacks run in thread context, on a dedicated timer-service
//! thread: [`crate::kernel::Kernel::run_one_pass`] only identifies
//! which timers are due via [`crate::kernel::sched::timer::TimerService::tick`]
//! and posts them to `Kernel::timer_queue`; the timer thread (spawned by
//! `api::kernel_api::start`) dequeues and invokes each callback outside
//! the kernel lock, so it runs preemptibly rather than nested inside the
//! dispatcher pass. A callback that needs to wake a waiter or touch
//! another primitive may do so exactly as any other thread-context
//! caller could; it must not block indefinitely, or it would stall every
//! other timer behind it in the queue.

use std::sync::Arc;

use crate::error::Result;
use crate::kernel::{self};
use crate::kernel::sched::timer::{TimerCallback, TimerKind};

pub type TimerId = u32;

/// `osTimerNew` — `kind` selects one-shot vs. periodic; the timer is
/// created stopped, same as the real API (`osTimerStart` arms it).
pub fn new(kind: TimerKind, callback: impl Fn() + Send + Sync + 'static) -> Result<TimerId> {
    let k = kernel::instance();
    let cb: TimerCallback = Arc::new(callback);
    let mut timers = k.timers.lock().unwrap();
    timers.create(kind, cb)
}

/// `osTimerStart` — (re)arms the timer with the given period, in ticks.
/// Starting an already-running timer simply resets its countdown.
pub fn start(id: TimerId, period_ticks: u64) -> Result<()> {
    kernel::instance().timers.lock().unwrap().start(id, period_ticks)
}

/// `osTimerStop`
pub fn stop(id: TimerId) -> Result<()> {
    kernel::instance().timers.lock().unwrap().stop(id)
}

/// `osTimerIsRunning`
pub fn is_running(id: TimerId) -> Result<bool> {
    kernel::instance().timers.lock().unwrap().is_running(id)
}

/// `osTimerDelete`
pub fn delete(id: TimerId) -> Result<()> {
    kernel::instance().timers.lock().unwrap().delete(id)
}

/// Re-exported so callers can spell `osTimerNew`'s `osTimerOnce` /
/// `osTimerPeriodic` kind argument without reaching into
/// `crate::kernel::sched::timer` themselves.
pub use crate::kernel::sched::timer::TimerKind as Kind;
