// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Simulated `NVIC_*` entry points
//!
//! These are a CMSIS-Core surface, not CMSIS-RTOS v2 itself — firmware
//! under test calls them to register and drive interrupts that the
//! RTOS primitives above are then woken from. Vectors are stored as
//! closures (see [`crate::kernel::nvic`]) rather than raw function
//! pointers, since a 32-bit `uint32_t` vector table slot has nowhere
//! to put a full pointer on a 64-bit host.

use std::sync::Arc;

use crate::error::Result;
use crate::kernel::{self, nvic::IrqNumber};

pub use crate::kernel::nvic::{in_isr, IsrCallback};

/// `NVIC_SetVector` — installs the handler that fires when `irq` is
/// dispatched. Call before `enable`; an interrupt with no handler
/// installed is still tracked (enable/pending/active all still work)
/// but dispatches to nothing.
pub fn set_vector(irq: IrqNumber, handler: impl Fn() + Send + Sync + 'static) -> Result<()> {
    kernel::instance().nvic.register_handler(irq, Arc::new(handler))
}

/// `NVIC_GetVector`
pub fn get_vector(irq: IrqNumber) -> Result<Option<IsrCallback>> {
    kernel::instance().nvic.vector(irq)
}

/// `NVIC_EnableIRQ`
pub fn enable_irq(irq: IrqNumber) -> Result<()> {
    kernel::instance().nvic.enable(irq)
}

/// `NVIC_DisableIRQ`
pub fn disable_irq(irq: IrqNumber) -> Result<()> {
    kernel::instance().nvic.disable(irq)
}

/// `NVIC_GetEnableIRQ`
pub fn get_enable_irq(irq: IrqNumber) -> Result<bool> {
    kernel::instance().nvic.is_enabled(irq)
}

/// `NVIC_SetPendingIRQ` — the point at which firmware code (or a test
/// harness standing in for hardware) actually "raises" an interrupt.
///
/// Matches RTXOff's `deliverNewInterrupts`: queuing the IRQ does not by
/// itself return control to the caller. Unless this is itself called
/// from inside a running handler (which the already-active dispatch
/// loop will pick the new IRQ up from on its own), the calling thread
/// requests a schedule and yields in a loop — a real OS-level yield,
/// not an RTOS wait, since the caller need not be an RTOS thread at
/// all — until the IRQ is delivered, its line is disabled, or
/// interrupts are globally masked.
pub fn set_pending_irq(irq: IrqNumber) -> Result<()> {
    let k = kernel::instance();
    k.nvic.set_pending(irq)?;
    if kernel::nvic::in_isr() {
        return Ok(());
    }
    while k.nvic.is_pending(irq)? && k.nvic.is_enabled(irq)? && k.nvic.interrupts_enabled() {
        k.dispatcher.request_reschedule();
        std::thread::yield_now();
    }
    Ok(())
}

/// `__disable_irq` — globally masks interrupts: the dispatcher skips
/// scheduling entirely (spec.md §4.2 step 4) and non-ISR-safe API
/// calls reject themselves until [`enable_interrupts`] is called,
/// matching RTXOff's `core_util_critical_section_enter` clearing
/// `interrupt.enabled`. Returns whether interrupts were enabled
/// beforehand, as the real intrinsic's PRIMASK readback does.
pub fn disable_interrupts() -> bool {
    let nvic = &kernel::instance().nvic;
    let was_enabled = nvic.interrupts_enabled();
    nvic.set_interrupts_enabled(false);
    was_enabled
}

/// `__enable_irq` — the matching unmask, per
/// `core_util_critical_section_exit`.
pub fn enable_interrupts() {
    kernel::instance().nvic.set_interrupts_enabled(true);
}

/// True if interrupts are not currently globally masked.
pub fn interrupts_enabled() -> bool {
    kernel::instance().nvic.interrupts_enabled()
}

/// `NVIC_ClearPendingIRQ`
pub fn clear_pending_irq(irq: IrqNumber) -> Result<()> {
    kernel::instance().nvic.clear_pending(irq)
}

/// `NVIC_GetPendingIRQ`
pub fn get_pending_irq(irq: IrqNumber) -> Result<bool> {
    kernel::instance().nvic.is_pending(irq)
}

/// `NVIC_GetActive`
pub fn get_active(irq: IrqNumber) -> Result<bool> {
    kernel::instance().nvic.is_active(irq)
}

/// `NVIC_SetPriority`
pub fn set_priority(irq: IrqNumber, priority: u8) -> Result<()> {
    kernel::instance().nvic.set_priority(irq, priority)
}

/// `NVIC_GetPriority`
pub fn get_priority(irq: IrqNumber) -> Result<u8> {
    kernel::instance().nvic.priority(irq)
}

/// `NVIC_SetPriorityGrouping`
pub fn set_priority_grouping(grouping: u32) {
    kernel::instance().nvic.set_priority_grouping(grouping)
}

/// `NVIC_GetPriorityGrouping`
pub fn get_priority_grouping() -> u32 {
    kernel::instance().nvic.priority_grouping()
}

/// `NVIC_EncodePriority`
pub fn encode_priority(group: u32, preempt_priority: u32, sub_priority: u32) -> u8 {
    kernel::nvic::Nvic::encode_priority(group, preempt_priority, sub_priority)
}

/// `NVIC_DecodePriority`
pub fn decode_priority(priority: u8, group: u32) -> (u32, u32) {
    kernel::nvic::Nvic::decode_priority(priority, group)
}
