// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel error taxonomy
//!
//! The emulator reports failures through a small, closed set of error
//! codes matching the CMSIS-RTOS v2 `osStatus_t` surface. Every kernel
//! primitive returns `Result<T>` built on [`Error`]; there is no
//! catch-all "unknown error" variant because the API this kernel
//! emulates doesn't have one either.

use thiserror::Error;

/// Result type used throughout the kernel and public API.
pub type Result<T = ()> = core::result::Result<T, Error>;

/// Kernel error taxonomy.
///
/// Maps 1:1 onto CMSIS-RTOS v2's `osStatus_t` values (`osError*`), with
/// `Error` reserved for kernel-state violations that indicate a bug in
/// the emulator itself rather than a misuse of the API by firmware code.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The operation could not complete before its timeout elapsed.
    #[error("operation timed out")]
    Timeout,

    /// The requested resource is unavailable (mutex already locked with a
    /// zero timeout, semaphore has no tokens, queue is empty/full, ...).
    #[error("resource unavailable")]
    Resource,

    /// A parameter is invalid: null handle, out-of-range priority, zero
    /// sized allocation, bad flag combination, and so on.
    #[error("invalid parameter")]
    Parameter,

    /// The operation is not permitted from interrupt context (e.g. an
    /// unbounded wait requested from inside `NVIC_Trigger`).
    #[error("not permitted from interrupt context")]
    Isr,

    /// A memory pool or heap allocation failed.
    #[error("out of memory")]
    NoMemory,

    /// A kernel invariant was violated (corrupt object header, magic
    /// mismatch, scheduler found no ready thread, ...). Seeing this
    /// indicates a defect in the emulator, not in firmware under test.
    #[error("kernel state error")]
    Error,
}

impl Error {
    /// True if this error represents an expected, recoverable outcome
    /// (timeout/resource contention) rather than a logic defect.
    pub fn is_expected(self) -> bool {
        matches!(self, Error::Timeout | Error::Resource)
    }
}
