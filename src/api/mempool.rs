// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! `osMemoryPool*` entry points
//!
//! Backs a fixed-block allocator. Firmware under test receives a block
//! as an opaque `*mut u8`-shaped handle; this hosted port hands back
//! the block's index into the pool's backing storage cast to a
//! pointer-sized integer instead of a real pointer, since the pool
//! never needs to expose actual memory to Rust callers who only ever
//! hand the value straight back to `osMemoryPoolFree`. Callers that
//! want real bytes should reach for [`crate::api::msgqueue`] or plain
//! `Vec<u8>` instead; this module exists to mirror the CMSIS-RTOS v2
//! surface area, not to be the idiomatic allocator of choice in new
//! Rust code built on top of this kernel.

use crate::error::{Error, Result};
use crate::kernel::sched::wake;
use crate::kernel::sync::mempool::MemoryPool;
use crate::kernel::thread::{BlockReason, WaitValue};
use crate::kernel::{self, Named};

pub type MemoryPoolId = u32;

/// `osMemoryPoolNew`
pub fn new(block_count: usize, name: Option<&str>) -> Result<MemoryPoolId> {
    let k = kernel::instance();
    let pool = MemoryPool::new(block_count)?;
    let (id, _) = k.mem_pools.insert(Named::new(name.map(String::from), pool));
    Ok(id)
}

/// `osMemoryPoolGetName`
pub fn name(id: MemoryPoolId) -> Result<Option<String>> {
    Ok(kernel::instance().mem_pools.get(id).ok_or(Error::Parameter)?.name())
}

/// `osMemoryPoolGetCapacity`
pub fn capacity(id: MemoryPoolId) -> Result<usize> {
    Ok(kernel::instance().mem_pools.get(id).ok_or(Error::Parameter)?.block_count())
}

/// `osMemoryPoolGetCount` — blocks currently allocated.
pub fn used_count(id: MemoryPoolId) -> Result<usize> {
    let pool = kernel::instance().mem_pools.get(id).ok_or(Error::Parameter)?;
    Ok(pool.block_count() - pool.free_count())
}

/// `osMemoryPoolGetSpace` — blocks still free.
pub fn free_count(id: MemoryPoolId) -> Result<usize> {
    Ok(kernel::instance().mem_pools.get(id).ok_or(Error::Parameter)?.free_count())
}

/// `osMemoryPoolAlloc`
pub fn alloc(id: MemoryPoolId, timeout: u32) -> Result<usize> {
    let k = kernel::instance();
    let pool = k.mem_pools.get(id).ok_or(Error::Parameter)?;
    if let Some(block) = pool.try_alloc() {
        return Ok(block);
    }
    if timeout == 0 {
        return Err(Error::Resource);
    }
    if kernel::nvic::isr_unsafe_context() {
        return Err(Error::Isr);
    }
    let caller = crate::api::thread_api::current()?;
    let caller_thread = k.threads.get(caller).ok_or(Error::Parameter)?;
    {
        let _guard = k.lock();
        if let Some(block) = pool.try_alloc() {
            return Ok(block);
        }
        pool.enqueue_waiter(caller, caller_thread.effective_priority());
        wake::park(k, &caller_thread, BlockReason::MemoryPool(id), wake::timeout_from_ticks(timeout));
    }
    match wake::block(&caller_thread)? {
        WaitValue::Block(block) => Ok(block),
        _ => Err(Error::Error),
    }
}

/// `osMemoryPoolFree` — hands the freed block straight to the
/// highest-priority waiter (if any) instead of returning it to the
/// free list, the same "wake with the resource, don't let it go idle
/// and be raced for" shape every other primitive in this kernel uses.
pub fn free(id: MemoryPoolId, block: usize) -> Result<()> {
    let k = kernel::instance();
    let _guard = k.lock();
    let pool = k.mem_pools.get(id).ok_or(Error::Parameter)?;
    match pool.free(block)? {
        Some(waiter) => {
            wake::wake_with(k, waiter, WaitValue::Block(block));
            Ok(())
        }
        None => Ok(()),
    }
}

/// `osMemoryPoolDelete`
pub fn delete(id: MemoryPoolId) -> Result<()> {
    let k = kernel::instance();
    let _guard = k.lock();
    let pool = k.mem_pools.get(id).ok_or(Error::Parameter)?;
    for waiter in pool.drain_waiters() {
        wake::wake_with_error(k, waiter, Error::Resource);
    }
    k.mem_pools.remove(id)
}
