// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Rustux demo binary
//!
//! Boots the kernel, spawns a small handful of firmware-style threads
//! that exercise priority preemption and a priority-inheriting mutex,
//! then lets the dispatcher run until they all exit. This is the
//! "program entry/bootstrap" external collaborator named in the
//! kernel's own module docs — nothing here is part of the emulated
//! RTOS itself.

use std::time::Duration;

use clap::Parser;

use rustux::api::{delay, kernel_api, mutex, thread_api};
use rustux::config::KernelConfig;
use rustux::kernel::thread::{PRIORITY_DEFAULT, PRIORITY_REALTIME};

/// CLI flags overriding the kernel's default configuration, the
/// hosted stand-in for `mbed_rtx_conf.h` compile-time constants.
#[derive(Debug, Parser)]
#[command(name = "rustux")]
#[command(about = "CMSIS-RTOS v2 emulation kernel demo")]
#[command(version)]
struct Cli {
    /// Tick period in milliseconds.
    #[arg(long, default_value_t = 1)]
    tick_ms: u64,

    /// Round-robin quantum, in ticks, for threads sharing a priority.
    #[arg(long, default_value_t = 5)]
    quantum: u32,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let config = KernelConfig {
        tick_period: Duration::from_millis(cli.tick_ms.max(1)),
        round_robin_quantum_ticks: cli.quantum,
        ..KernelConfig::default()
    };
    kernel_api::initialize(config);

    spawn_preemption_demo();
    spawn_priority_inheritance_demo();

    // Never returns; the dispatcher loop drives every spawned thread
    // until `osKernelStart`'s caller is asked to shut down (which this
    // demo never does — it runs until killed, like firmware would).
    kernel_api::start().expect("kernel failed to start");
}

/// Thread A (default priority) runs a visible loop; main spawns Thread
/// B at realtime priority partway through and expects it to preempt A
/// immediately, matching spec scenario 1 ("priority preemption").
fn spawn_preemption_demo() {
    thread_api::new(
        move || {
            for i in 0..5 {
                log::info!("thread A: tick {i}");
                let _ = delay::delay(50);
            }
            thread_api::exit();
        },
        thread_api::ThreadAttr {
            name: "demo-a".into(),
            priority: PRIORITY_DEFAULT,
            ..Default::default()
        },
    )
    .expect("spawn thread A");

    thread_api::new(
        move || {
            log::info!("thread B (realtime): preempting A");
            let _ = delay::delay(10);
            log::info!("thread B: done, yielding back to A");
            thread_api::exit();
        },
        thread_api::ThreadAttr {
            name: "demo-b".into(),
            priority: PRIORITY_REALTIME,
            ..Default::default()
        },
    )
    .expect("spawn thread B");
}

/// Low-priority thread L holds a mutex; high-priority thread H blocks
/// on it. Demonstrates priority inheritance (spec scenario 3): L's
/// effective priority should rise for as long as H is waiting.
fn spawn_priority_inheritance_demo() {
    let m = mutex::new(mutex::MutexAttr::PRIO_INHERIT, Some("shared-resource"));

    thread_api::new(
        move || {
            if mutex::acquire(m, 0).is_ok() {
                log::info!("low-priority thread: holding mutex");
                let _ = delay::delay(100);
                let _ = mutex::release(m);
                log::info!("low-priority thread: released mutex");
            }
            thread_api::exit();
        },
        thread_api::ThreadAttr {
            name: "low-prio-holder".into(),
            priority: PRIORITY_DEFAULT - 1,
            ..Default::default()
        },
    )
    .expect("spawn low-priority holder");

    thread_api::new(
        move || {
            let _ = delay::delay(5);
            log::info!("high-priority thread: waiting on mutex");
            if mutex::acquire(m, 1000).is_ok() {
                log::info!("high-priority thread: acquired mutex");
                let _ = mutex::release(m);
            }
            thread_api::exit();
        },
        thread_api::ThreadAttr {
            name: "high-prio-waiter".into(),
            priority: PRIORITY_REALTIME - 1,
            ..Default::default()
        },
    )
    .expect("spawn high-priority waiter");
}
