// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! `osKernel*` entry points

use crate::api::thread_api::{self, ThreadAttr};
use crate::config::KernelConfig;
use crate::error::{Error, Result};
use crate::kernel;
use crate::kernel::sched::wake;
use crate::kernel::thread::{BlockReason, WaitValue, PRIORITY_IDLE, PRIORITY_REALTIME};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelState {
    Inactive,
    Ready,
    Running,
    Locked,
    Suspended,
    Error,
}

/// `osKernelInitialize`
pub fn initialize(config: KernelConfig) {
    kernel::init(config);
}

/// `osKernelGetTickCount`
pub fn tick_count() -> u64 {
    kernel::instance().tick_count()
}

/// `osKernelGetTickFreq`
pub fn tick_freq_hz() -> u32 {
    let period = kernel::instance().tick_period();
    (1_000_000_000u128 / period.as_nanos().max(1)) as u32
}

/// `osKernelGetSysTimerCount` — a free-running counter at the
/// underlying clock source's own resolution, distinct from the
/// [`tick_count`] the delay engine and timer service actually consume.
pub fn sys_timer_count() -> u64 {
    kernel::instance().clock.elapsed().as_nanos() as u64
}

/// `osKernelGetSysTimerFreq` — the frequency, in Hz, the value
/// `sys_timer_count` advances at. Nanosecond resolution throughout,
/// since `Duration`'s own native unit is nanoseconds.
pub fn sys_timer_freq_hz() -> u64 {
    1_000_000_000
}

/// `osKernelGetState`
pub fn state() -> KernelState {
    if kernel::instance().is_running() {
        KernelState::Running
    } else {
        KernelState::Ready
    }
}

/// Version and identification string reported by `osKernelGetInfo`.
/// CMSIS-RTOS v2 packs a `uint32_t` API/kernel version pair plus an
/// identification string buffer; this port returns both as plain Rust
/// values instead of filling a caller-supplied C buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelInfo {
    pub api_version: u32,
    pub kernel_version: u32,
    pub id: String,
}

/// `osKernelGetInfo`
pub fn info() -> KernelInfo {
    KernelInfo {
        api_version: 20_001_000,
        kernel_version: cargo_pkg_version_packed(),
        id: "rustux".to_string(),
    }
}

fn cargo_pkg_version_packed() -> u32 {
    const MAJOR: u32 = parse_env_u32(env!("CARGO_PKG_VERSION_MAJOR"));
    const MINOR: u32 = parse_env_u32(env!("CARGO_PKG_VERSION_MINOR"));
    const PATCH: u32 = parse_env_u32(env!("CARGO_PKG_VERSION_PATCH"));
    (MAJOR << 24) | (MINOR << 16) | PATCH
}

const fn parse_env_u32(s: &str) -> u32 {
    let bytes = s.as_bytes();
    let mut value = 0u32;
    let mut i = 0;
    while i < bytes.len() {
        value = value * 10 + (bytes[i] - b'0') as u32;
        i += 1;
    }
    value
}

/// Spawns the dedicated dispatcher host thread and blocks the calling
/// thread (ordinarily `main`) until [`request_shutdown`] is called.
/// Analogous to `osKernelStart` never returning on real hardware.
///
/// Also spawns the kernel's own idle thread at `osPriorityIdle`, the
/// thread the dispatcher falls back to whenever no firmware thread is
/// ready — real-time kernels never leave the processor with nothing
/// runnable, and this emulator is no exception (`select_candidate`
/// treats "no ready thread and no idle thread" as fatal) — and the
/// dedicated timer thread that drains due software-timer callbacks.
pub fn start() -> Result<()> {
    let k = kernel::instance();
    spawn_idle_thread(k)?;
    spawn_timer_thread(k)?;
    k.run_dispatcher_forever();
    Ok(())
}

fn spawn_idle_thread(k: &'static kernel::Kernel) -> Result<()> {
    let stack_size = k.config.idle_thread_stack_size;
    let hook = k.config.idle_hook.clone();
    let tid = thread_api::new(
        move || loop {
            if let Some(hook) = &hook {
                hook();
            }
            let _ = thread_api::delay(1);
        },
        ThreadAttr {
            name: "Idle".to_string(),
            priority: PRIORITY_IDLE,
            stack_size,
            joinable: false,
        },
    )?;
    k.dispatcher.set_idle_thread(tid);
    Ok(())
}

/// Spawns the dedicated timer-service thread: a high-priority RTOS
/// thread that blocks on the kernel's due-callback queue and invokes
/// each callback as it arrives, in genuine thread context rather than
/// under the kernel lock the dispatcher pass holds while identifying
/// which timers fired.
fn spawn_timer_thread(k: &'static kernel::Kernel) -> Result<()> {
    let stack_size = k.config.timer_thread_stack_size;
    thread_api::new(
        move || loop {
            if let Ok(callback) = timer_queue_get(k) {
                callback();
            }
        },
        ThreadAttr {
            name: "Timer".to_string(),
            priority: PRIORITY_REALTIME,
            stack_size,
            joinable: false,
        },
    )?;
    Ok(())
}

/// Blocking dequeue from the kernel's timer-callback queue, following
/// the same park/block protocol every other blocking primitive uses.
/// Internal to the timer thread's own loop — firmware code never calls
/// this directly, so unlike `osMessageQueueGet` there is no timeout or
/// ISR-legal fast path to support.
fn timer_queue_get(k: &'static kernel::Kernel) -> Result<crate::kernel::sched::timer::TimerCallback> {
    let caller_thread;
    {
        let _guard = k.lock();
        if let Some(callback) = k.timer_queue.try_get() {
            return Ok(callback);
        }
        let caller = thread_api::current()?;
        caller_thread = k.threads.get(caller).ok_or(Error::Parameter)?;
        k.timer_queue.enqueue_reader(caller, caller_thread.effective_priority());
        wake::park(k, &caller_thread, BlockReason::TimerQueue, None);
    }
    match wake::block(&caller_thread)? {
        WaitValue::Timer(callback) => Ok(callback),
        _ => Err(Error::Error),
    }
}

pub fn request_shutdown() {
    kernel::instance().request_shutdown();
}
