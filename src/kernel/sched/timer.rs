// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Software timer service
//!
//! `osTimerNew`/`osTimerStart`/`osTimerStop` are backed by this type.
//! [`TimerService::tick`] is called once per dispatcher pass, the same
//! place `ThreadDispatcher.cpp`'s `timer.tick` hook fires; unlike that
//! inline call, the callback records it returns are posted onto the
//! kernel's dedicated timer callback queue rather than invoked directly
//! — see `kernel::mod::Kernel::run_one_pass` and the timer thread body
//! in `api::kernel_api`. `capacity` bounds the number of *live* timer
//! objects (`osTimerNew` past that many fails with `NoMemory`); it is
//! unrelated to `KernelConfig::timer_queue_depth`, which bounds the
//! depth of the due-callback queue instead.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};

pub type TimerId = u32;
pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    OneShot,
    Periodic,
}

struct Timer {
    kind: TimerKind,
    period_ticks: u64,
    callback: TimerCallback,
    running: bool,
    /// Ticks remaining until the next fire, maintained the same way as
    /// a delay-list entry but kept flat here since the expected timer
    /// count is small relative to thread delays.
    remaining: u64,
}

/// Owns every live software timer. A single instance lives on the
/// kernel singleton; the dispatcher calls [`TimerService::tick`] once
/// per tick and runs whatever callbacks come back due.
pub struct TimerService {
    timers: HashMap<TimerId, Timer>,
    next_id: TimerId,
    capacity: usize,
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerService {
    /// Unbounded; used where no `KernelConfig` is in scope (tests).
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            timers: HashMap::new(),
            next_id: 1,
            capacity,
        }
    }

    pub fn create(&mut self, kind: TimerKind, callback: TimerCallback) -> Result<TimerId> {
        if self.timers.len() >= self.capacity {
            return Err(Error::NoMemory);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.timers.insert(
            id,
            Timer {
                kind,
                period_ticks: 0,
                callback,
                running: false,
                remaining: 0,
            },
        );
        Ok(id)
    }

    pub fn start(&mut self, id: TimerId, period_ticks: u64) -> Result<()> {
        let timer = self.timers.get_mut(&id).ok_or(Error::Parameter)?;
        if period_ticks == 0 {
            return Err(Error::Parameter);
        }
        timer.period_ticks = period_ticks;
        timer.remaining = period_ticks;
        timer.running = true;
        Ok(())
    }

    pub fn stop(&mut self, id: TimerId) -> Result<()> {
        let timer = self.timers.get_mut(&id).ok_or(Error::Parameter)?;
        timer.running = false;
        Ok(())
    }

    pub fn delete(&mut self, id: TimerId) -> Result<()> {
        self.timers.remove(&id).map(|_| ()).ok_or(Error::Parameter)
    }

    pub fn is_running(&self, id: TimerId) -> Result<bool> {
        self.timers.get(&id).map(|t| t.running).ok_or(Error::Parameter)
    }

    /// Advance every running timer by one tick; returns the callbacks
    /// of timers that fired, in creation order, for the caller to
    /// invoke with the kernel lock held.
    pub fn tick(&mut self) -> Vec<TimerCallback> {
        let mut fired = Vec::new();
        let mut to_stop = Vec::new();
        let mut ids: Vec<TimerId> = self.timers.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let timer = self.timers.get_mut(&id).unwrap();
            if !timer.running {
                continue;
            }
            timer.remaining = timer.remaining.saturating_sub(1);
            if timer.remaining == 0 {
                fired.push(timer.callback.clone());
                match timer.kind {
                    TimerKind::Periodic => timer.remaining = timer.period_ticks,
                    TimerKind::OneShot => to_stop.push(id),
                }
            }
        }
        for id in to_stop {
            if let Some(t) = self.timers.get_mut(&id) {
                t.running = false;
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn one_shot_fires_once() {
        let mut svc = TimerService::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c2 = count.clone();
        let id = svc.create(TimerKind::OneShot, Arc::new(move || {
            c2.fetch_add(1, Ordering::SeqCst);
        })).unwrap();
        svc.start(id, 2).unwrap();
        assert!(svc.tick().is_empty());
        let fired = svc.tick();
        assert_eq!(fired.len(), 1);
        fired[0]();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(svc.tick().is_empty());
        assert!(!svc.is_running(id).unwrap());
    }

    #[test]
    fn periodic_reloads() {
        let mut svc = TimerService::new();
        let id = svc.create(TimerKind::Periodic, Arc::new(|| {})).unwrap();
        svc.start(id, 2).unwrap();
        assert!(svc.tick().is_empty());
        assert_eq!(svc.tick().len(), 1);
        assert!(svc.tick().is_empty());
        assert_eq!(svc.tick().len(), 1);
        assert!(svc.is_running(id).unwrap());
    }

    #[test]
    fn stop_prevents_further_fires() {
        let mut svc = TimerService::new();
        let id = svc.create(TimerKind::Periodic, Arc::new(|| {})).unwrap();
        svc.start(id, 1).unwrap();
        svc.stop(id).unwrap();
        assert!(svc.tick().is_empty());
    }

    #[test]
    fn unknown_id_is_parameter_error() {
        let mut svc = TimerService::new();
        assert_eq!(svc.start(999, 1), Err(Error::Parameter));
    }

    #[test]
    fn create_beyond_capacity_is_no_memory_error() {
        let mut svc = TimerService::with_capacity(1);
        svc.create(TimerKind::OneShot, Arc::new(|| {})).unwrap();
        assert_eq!(
            svc.create(TimerKind::OneShot, Arc::new(|| {})).err(),
            Some(Error::NoMemory)
        );
    }
}
