// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel synchronization primitives
//!
//! Every CMSIS-RTOS v2 blocking object is built on the generic
//! [`wait_queue::WaitQueue`] shape plus object-specific bookkeeping:
//!
//! - [`mutex`]: mutual exclusion with priority inheritance
//! - [`semaphore`]: counting semaphore
//! - [`event`]: standalone event-flags groups
//! - [`msgqueue`]: priority-ordered message queue
//! - [`mempool`]: fixed-block memory pool

pub mod event;
pub mod mempool;
pub mod msgqueue;
pub mod mutex;
pub mod semaphore;
pub mod wait_queue;
