//! Hardware cycle counter (TSC on x86_64, CNTVCT on aarch64).

use std::time::{Duration, Instant};

/// Whether this target has a readable cycle counter.
pub(crate) const AVAILABLE: bool = cfg!(any(target_arch = "x86_64", target_arch = "aarch64"));

/// Read the cycle counter. Returns 0 on targets without one.
#[inline(always)]
pub(crate) fn read() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: rdtsc has no preconditions on x86_64.
        unsafe { core::arch::x86_64::_rdtsc() }
    }
    #[cfg(target_arch = "aarch64")]
    {
        let val: u64;
        // SAFETY: cntvct_el0 is readable from user space on aarch64.
        unsafe { core::arch::asm!("mrs {}, cntvct_el0", out(reg) val) };
        val
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        0
    }
}

/// Measure seconds per tick against the monotonic clock.
///
/// Spins for about 2ms. Returns `None` when no counter exists or it did not
/// advance.
pub(crate) fn seconds_per_tick() -> Option<f64> {
    if !AVAILABLE {
        return None;
    }
    let wall_start = Instant::now();
    let tsc_start = read();
    while wall_start.elapsed() < Duration::from_millis(2) {}
    let tsc_end = read();
    let wall = wall_start.elapsed().as_secs_f64();
    let ticks = tsc_end.wrapping_sub(tsc_start);
    if ticks == 0 {
        return None;
    }
    Some(wall / ticks as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibrated_ratio_is_sane() {
        if let Some(spt) = seconds_per_tick() {
            // Between 1 MHz and 10 GHz.
            assert!(spt > 1.0e-10 && spt < 1.0e-6, "seconds per tick {spt}");
        }
    }
}
