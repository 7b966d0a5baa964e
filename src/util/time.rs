//! Linux-specific timestamp helpers, grounded on `clock_gettime(2)`.

use libc::{clock_gettime, timespec, CLOCK_REALTIME};
use std::mem;

/// Invokes `clock_gettime` to get a `timespec` struct
fn get_time() -> timespec {
    let mut tp: timespec = unsafe { mem::zeroed() };
    unsafe {
        clock_gettime(CLOCK_REALTIME, &mut tp);
    }
    tp
}

/// Gets the nanosecond unix timestamp, used to stamp each sample batch
#[must_use]
pub fn nano_ts() -> u128 {
    let tp = get_time();
    (tp.tv_nsec as u128) + (tp.tv_sec as u128) * 1_000_000_000
}

/// Gets the second unix timestamp
#[must_use]
pub fn second_ts() -> u64 { get_time().tv_sec as u64 }
