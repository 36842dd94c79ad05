// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! `osDelay` / `osDelayUntil`

use crate::error::{Error, Result};
use crate::kernel;

pub use crate::api::thread_api::delay;

/// `osDelayUntil` — delays until the kernel tick counter reaches
/// `tick`, computing the remaining ticks from the current count so a
/// caller can build a fixed-period loop without drift.
pub fn delay_until(tick: u64) -> Result<()> {
    let now = kernel::instance().clock.ticks();
    if tick <= now {
        return Err(Error::Parameter);
    }
    delay(tick - now)
}
