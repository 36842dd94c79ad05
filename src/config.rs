// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel configuration
//!
//! Constants and pluggable hooks a firmware image would normally set in
//! `mbed_rtx_conf.h` / `RTX_Config.h`. Defaults below are taken from
//! RTXOff's `mbed_rtx_conf.h` where that file pins a concrete value.

use std::sync::Arc;
use std::time::Duration;

use crate::kernel::clock::ClockSource;

/// Default tick period (RTXOff's `OS_TICK_FREQ` is 1kHz).
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(1);

/// Default stack size handed to host threads created for RTOS threads.
/// Has no effect on scheduling; kept only so the public API's
/// `osThreadAttr_t::stack_size` field round-trips.
pub const DEFAULT_THREAD_STACK_SIZE: usize = 4096;

/// Stack size for the kernel's own idle thread.
pub const IDLE_THREAD_STACK_SIZE: usize = 1024;

/// Stack size for the timer-service thread.
pub const TIMER_THREAD_STACK_SIZE: usize = 2048;

/// Default round-robin quantum, expressed in ticks.
pub const DEFAULT_ROUND_ROBIN_QUANTUM_TICKS: u32 = 5;

/// Depth of the timer-service command queue.
pub const TIMER_QUEUE_DEPTH: usize = 16;

/// Selects which wall-clock source backs [`crate::kernel::clock::Clock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSourceKind {
    /// `Instant::now()` — real wall-clock elapsed time (default).
    Monotonic,
    /// Process CPU time, for deterministic single-stepped test runs.
    ProcessCpuTime,
}

/// Hook invoked whenever the dispatcher selects the idle thread.
pub type IdleHook = Arc<dyn Fn() + Send + Sync>;

/// Hook invoked whenever the dispatcher reaps a terminated thread.
pub type TerminateHook = Arc<dyn Fn(crate::kernel::thread::ThreadId) + Send + Sync>;

/// Hook invoked for interrupt-delivered failures that must not abort the
/// process (e.g. a timer-service queue overflow).
pub type ErrorHook = Arc<dyn Fn(crate::error::Error) + Send + Sync>;

/// Kernel-wide configuration, analogous to RTXOff's `osRtxConfig_t`.
#[derive(Clone)]
pub struct KernelConfig {
    pub tick_period: Duration,
    pub default_thread_stack_size: usize,
    pub idle_thread_stack_size: usize,
    pub timer_thread_stack_size: usize,
    pub round_robin_quantum_ticks: u32,
    pub timer_queue_depth: usize,
    pub clock_source: ClockSourceKind,
    pub idle_hook: Option<IdleHook>,
    pub terminate_hook: Option<TerminateHook>,
    pub error_hook: Option<ErrorHook>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            tick_period: DEFAULT_TICK_PERIOD,
            default_thread_stack_size: DEFAULT_THREAD_STACK_SIZE,
            idle_thread_stack_size: IDLE_THREAD_STACK_SIZE,
            timer_thread_stack_size: TIMER_THREAD_STACK_SIZE,
            round_robin_quantum_ticks: DEFAULT_ROUND_ROBIN_QUANTUM_TICKS,
            timer_queue_depth: TIMER_QUEUE_DEPTH,
            clock_source: ClockSourceKind::Monotonic,
            idle_hook: None,
            terminate_hook: None,
            error_hook: None,
        }
    }
}

impl KernelConfig {
    pub fn clock_source(&self) -> Box<dyn ClockSource> {
        match self.clock_source {
            ClockSourceKind::Monotonic => Box::new(crate::kernel::clock::MonotonicClock::new()),
            ClockSourceKind::ProcessCpuTime => {
                Box::new(crate::kernel::clock::ProcessCpuClock::new())
            }
        }
    }
}
