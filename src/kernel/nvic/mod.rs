// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Simulated interrupt controller
//!
//! Firmware under test calls `NVIC_EnableIRQ`/`NVIC_DisableIRQ`/
//! `NVIC_SetPendingIRQ`/`NVIC_SetPriority` as if talking to a real
//! Cortex-M NVIC. There is no hardware here: "triggering" an interrupt
//! queues an ISR callback that the dispatcher runs with the kernel
//! lock held, at the next safe point — `processInterrupts` in RTXOff's
//! terms. Interrupt sub-state gets its own lock, separate from the
//! main kernel lock, so an ISR callback that calls back into a
//! kernel primitive (itself taking the kernel lock) can't deadlock
//! against a client thread that's mid-way through enabling/disabling
//! an IRQ.

use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

pub type IrqNumber = u16;
pub type IsrCallback = Arc<dyn Fn() + Send + Sync>;

thread_local! {
    /// Set for the duration of an ISR callback invoked from
    /// [`Nvic::process_interrupts`]'s results, so a blocking API call
    /// made from inside a handler can reject itself with `Error::Isr`
    /// instead of trying to park a host thread that was never an RTOS
    /// thread to begin with — the dispatcher's own loop thread runs
    /// every handler, and suspending it would deadlock the kernel.
    static IN_ISR: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// True if the calling code is running as part of an ISR callback.
pub fn in_isr() -> bool {
    IN_ISR.with(|f| f.get())
}

/// True if a thread-blocking (non-ISR-safe) API call must reject
/// itself right now: either it's running as part of an ISR callback,
/// or interrupts are globally masked. Mirrors spec.md §5: "calling a
/// non-ISR-safe API while interrupts are masked is likewise rejected",
/// the same `ErrorISR` outcome RTXOff gives an ISR-context call.
pub fn isr_unsafe_context() -> bool {
    in_isr() || !crate::kernel::instance().nvic.interrupts_enabled()
}

/// Run `f` with [`in_isr`] reporting `true` for its duration. Used by
/// the dispatcher to bracket each queued handler invocation.
pub(crate) fn run_as_isr<F: FnOnce()>(f: F) {
    IN_ISR.with(|flag| flag.set(true));
    f();
    IN_ISR.with(|flag| flag.set(false));
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct PendingIrq {
    priority: u8,
    seq: u64,
    irq: IrqNumber,
}

impl Ord for PendingIrq {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; we want highest hardware priority
        // (lowest numeric value, Cortex-M convention) served first and
        // FIFO among equal priorities, so invert both fields.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for PendingIrq {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct Line {
    enabled: bool,
    pending: bool,
    active: bool,
    priority: u8,
    handler: Option<IsrCallback>,
}

impl Default for Line {
    fn default() -> Self {
        Self {
            enabled: false,
            pending: false,
            active: false,
            priority: 0,
            handler: None,
        }
    }
}

struct NvicState {
    lines: Vec<Line>,
    pending: BinaryHeap<PendingIrq>,
    next_seq: u64,
    /// `NVIC_SetPriorityGrouping`'s `AIRCR[10:8]` PRIGROUP field; pure
    /// bookkeeping consulted only by `encode_priority`/`decode_priority`.
    priority_grouping: u32,
    /// Global interrupt mask (`PRIMASK`, in Cortex-M terms). Starts
    /// `true`, same as a real core out of reset. RTXOff models this as
    /// `ThreadDispatcher::instance().interrupt.enabled`, toggled by
    /// `core_util_critical_section_enter/exit`; while clear, the
    /// dispatcher skips scheduling entirely and non-ISR-safe API calls
    /// reject themselves.
    interrupts_enabled: bool,
}

/// Simulated NVIC. One instance lives on the kernel singleton.
pub struct Nvic {
    state: Mutex<NvicState>,
}

impl Nvic {
    pub fn new(line_count: usize) -> Self {
        Self {
            state: Mutex::new(NvicState {
                lines: (0..line_count).map(|_| Line::default()).collect(),
                pending: BinaryHeap::new(),
                next_seq: 0,
                priority_grouping: 0,
                interrupts_enabled: true,
            }),
        }
    }

    /// `__disable_irq`/PRIMASK readback — true unless a critical
    /// section is currently masking interrupts.
    pub fn interrupts_enabled(&self) -> bool {
        self.state.lock().unwrap().interrupts_enabled
    }

    /// `__disable_irq`/`__enable_irq` — globally masks or unmasks
    /// interrupts, matching RTXOff's
    /// `core_util_critical_section_enter/exit` toggling
    /// `interrupt.enabled`. Distinct from [`Self::enable`]/[`Self::disable`],
    /// which gate one IRQ line.
    pub fn set_interrupts_enabled(&self, enabled: bool) {
        self.state.lock().unwrap().interrupts_enabled = enabled;
    }

    fn line_index(state: &NvicState, irq: IrqNumber) -> Result<usize> {
        let idx = irq as usize;
        if idx >= state.lines.len() {
            Err(Error::Parameter)
        } else {
            Ok(idx)
        }
    }

    pub fn register_handler(&self, irq: IrqNumber, handler: IsrCallback) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let idx = Self::line_index(&state, irq)?;
        state.lines[idx].handler = Some(handler);
        Ok(())
    }

    pub fn enable(&self, irq: IrqNumber) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let idx = Self::line_index(&state, irq)?;
        state.lines[idx].enabled = true;
        Ok(())
    }

    pub fn disable(&self, irq: IrqNumber) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let idx = Self::line_index(&state, irq)?;
        state.lines[idx].enabled = false;
        Ok(())
    }

    pub fn is_enabled(&self, irq: IrqNumber) -> Result<bool> {
        let state = self.state.lock().unwrap();
        let idx = Self::line_index(&state, irq)?;
        Ok(state.lines[idx].enabled)
    }

    pub fn set_priority(&self, irq: IrqNumber, priority: u8) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let idx = Self::line_index(&state, irq)?;
        state.lines[idx].priority = priority;
        Ok(())
    }

    pub fn priority(&self, irq: IrqNumber) -> Result<u8> {
        let state = self.state.lock().unwrap();
        let idx = Self::line_index(&state, irq)?;
        Ok(state.lines[idx].priority)
    }

    /// Simulates an external event raising `irq`: if the line is
    /// enabled, it's queued for `process_interrupts` to run at the
    /// next dispatcher pass; disabled lines record no pending state
    /// (matching real NVIC semantics — a disabled, pended interrupt
    /// fires once re-enabled only if `SetPendingIRQ` itself is what's
    /// called, which this method models).
    pub fn set_pending(&self, irq: IrqNumber) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let idx = Self::line_index(&state, irq)?;
        if !state.lines[idx].enabled || state.lines[idx].pending {
            return Ok(());
        }
        state.lines[idx].pending = true;
        let priority = state.lines[idx].priority;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.push(PendingIrq { priority, seq, irq });
        Ok(())
    }

    /// `NVIC_ClearPendingIRQ` — cancels a queued-but-not-yet-dispatched
    /// interrupt. The binary heap has no direct removal, so this rebuilds
    /// it without the cleared line; cheap relative to the interrupt rate
    /// any firmware image under test actually exercises.
    pub fn clear_pending(&self, irq: IrqNumber) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let idx = Self::line_index(&state, irq)?;
        state.lines[idx].pending = false;
        state.pending = state.pending.drain().filter(|p| p.irq != irq).collect();
        Ok(())
    }

    pub fn is_pending(&self, irq: IrqNumber) -> Result<bool> {
        let state = self.state.lock().unwrap();
        let idx = Self::line_index(&state, irq)?;
        Ok(state.lines[idx].pending)
    }

    /// `NVIC_GetActive` — true while this IRQ's handler is executing.
    pub fn is_active(&self, irq: IrqNumber) -> Result<bool> {
        let state = self.state.lock().unwrap();
        let idx = Self::line_index(&state, irq)?;
        Ok(state.lines[idx].active)
    }

    pub fn vector(&self, irq: IrqNumber) -> Result<Option<IsrCallback>> {
        let state = self.state.lock().unwrap();
        let idx = Self::line_index(&state, irq)?;
        Ok(state.lines[idx].handler.clone())
    }

    pub fn set_priority_grouping(&self, grouping: u32) {
        self.state.lock().unwrap().priority_grouping = grouping & 0x7;
    }

    pub fn priority_grouping(&self) -> u32 {
        self.state.lock().unwrap().priority_grouping
    }

    /// `NVIC_EncodePriority` — packs a preempt/sub priority pair into a
    /// single value per `group`, matching the Cortex-M CMSIS reference
    /// implementation's bit split (`group` selects how many of the 8
    /// priority bits are "preemption" bits vs. "subpriority" bits).
    pub fn encode_priority(group: u32, preempt_priority: u32, sub_priority: u32) -> u8 {
        let group = group.min(7);
        let preempt_bits = (7u32.saturating_sub(group)).min(8);
        let sub_bits = 8 - preempt_bits;
        let preempt_mask = (1u32 << preempt_bits) - 1;
        let sub_mask = (1u32 << sub_bits) - 1;
        (((preempt_priority & preempt_mask) << sub_bits) | (sub_priority & sub_mask)) as u8
    }

    /// `NVIC_DecodePriority` — inverse of [`Self::encode_priority`].
    pub fn decode_priority(priority: u8, group: u32) -> (u32, u32) {
        let group = group.min(7);
        let preempt_bits = (7u32.saturating_sub(group)).min(8);
        let sub_bits = 8 - preempt_bits;
        let sub_mask = (1u32 << sub_bits) - 1;
        let preempt = (priority as u32) >> sub_bits;
        let sub = (priority as u32) & sub_mask;
        (preempt, sub)
    }

    pub fn has_pending(&self) -> bool {
        !self.state.lock().unwrap().pending.is_empty()
    }

    /// Drains every pending interrupt, highest priority first, marking
    /// each line `active` as it's handed to the caller, and returns the
    /// `(irq, handler)` pairs to invoke — the dispatcher calls these
    /// with the kernel lock held, exactly as `processQueuedISRData`
    /// does. Callers must call [`Self::finish_irq`] once each handler
    /// returns.
    pub fn process_interrupts(&self) -> Vec<(IrqNumber, IsrCallback)> {
        let mut state = self.state.lock().unwrap();
        let mut handlers = Vec::new();
        while let Some(pending) = state.pending.pop() {
            let idx = pending.irq as usize;
            state.lines[idx].pending = false;
            state.lines[idx].active = true;
            if let Some(handler) = state.lines[idx].handler.clone() {
                handlers.push((pending.irq, handler));
            }
        }
        handlers
    }

    /// Clears the `active` bit once a handler dequeued by
    /// [`Self::process_interrupts`] has returned.
    pub fn finish_irq(&self, irq: IrqNumber) {
        if let Ok(idx) = {
            let state = self.state.lock().unwrap();
            Self::line_index(&state, irq)
        } {
            self.state.lock().unwrap().lines[idx].active = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn disabled_line_never_queues() {
        let nvic = Nvic::new(4);
        nvic.set_pending(0).unwrap();
        assert!(!nvic.has_pending());
    }

    #[test]
    fn enabled_line_queues_and_fires_in_priority_order() {
        let nvic = Nvic::new(4);
        let order = Arc::new(Mutex::new(Vec::new()));
        for irq in 0..2u16 {
            let order = order.clone();
            nvic.enable(irq).unwrap();
            nvic.register_handler(
                irq,
                Arc::new(move || order.lock().unwrap().push(irq)),
            )
            .unwrap();
        }
        nvic.set_priority(0, 5).unwrap();
        nvic.set_priority(1, 1).unwrap();
        nvic.set_pending(0).unwrap();
        nvic.set_pending(1).unwrap();
        for (irq, handler) in nvic.process_interrupts() {
            handler();
            nvic.finish_irq(irq);
        }
        assert_eq!(*order.lock().unwrap(), vec![1, 0]);
    }

    #[test]
    fn active_flag_tracks_handler_execution() {
        let nvic = Nvic::new(2);
        nvic.enable(0).unwrap();
        nvic.register_handler(0, Arc::new(|| {})).unwrap();
        nvic.set_pending(0).unwrap();
        let fired = nvic.process_interrupts();
        assert!(nvic.is_active(0).unwrap());
        for (irq, handler) in fired {
            handler();
            nvic.finish_irq(irq);
        }
        assert!(!nvic.is_active(0).unwrap());
    }

    #[test]
    fn fresh_nvic_starts_with_interrupts_enabled() {
        let nvic = Nvic::new(1);
        assert!(nvic.interrupts_enabled());
    }

    #[test]
    fn masking_interrupts_is_observable_and_reversible() {
        let nvic = Nvic::new(1);
        nvic.set_interrupts_enabled(false);
        assert!(!nvic.interrupts_enabled());
        nvic.set_interrupts_enabled(true);
        assert!(nvic.interrupts_enabled());
    }

    #[test]
    fn clear_pending_cancels_a_queued_irq() {
        let nvic = Nvic::new(2);
        nvic.enable(0).unwrap();
        nvic.set_pending(0).unwrap();
        assert!(nvic.is_pending(0).unwrap());
        nvic.clear_pending(0).unwrap();
        assert!(!nvic.is_pending(0).unwrap());
        assert!(!nvic.has_pending());
    }

    #[test]
    fn encode_decode_priority_round_trips() {
        let encoded = Nvic::encode_priority(3, 2, 1);
        let (preempt, sub) = Nvic::decode_priority(encoded, 3);
        assert_eq!((preempt, sub), (2, 1));
    }

    #[test]
    fn out_of_range_irq_is_parameter_error() {
        let nvic = Nvic::new(1);
        assert_eq!(nvic.enable(5), Err(Error::Parameter));
    }

    #[test]
    fn equal_priority_is_fifo() {
        let nvic = Nvic::new(2);
        let count = Arc::new(AtomicUsize::new(0));
        for irq in 0..2u16 {
            nvic.enable(irq).unwrap();
        }
        nvic.set_pending(0).unwrap();
        nvic.set_pending(1).unwrap();
        let _ = count;
        assert_eq!(nvic.process_interrupts().len(), 0); // no handlers registered
    }
}
