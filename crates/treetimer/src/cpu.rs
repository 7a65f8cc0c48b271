//! Process user/system CPU time via `times()`.

/// User and system CPU time, in clock ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuSample {
    pub utime: i64,
    pub stime: i64,
}

/// Whether CPU time can be sampled on this platform.
#[must_use]
pub const fn available() -> bool {
    cfg!(unix)
}

/// Clock ticks per second, as reported by `sysconf(_SC_CLK_TCK)`.
#[cfg(unix)]
#[must_use]
pub fn ticks_per_sec() -> Option<i64> {
    // SAFETY: sysconf has no memory-safety preconditions.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    (ticks > 0).then(|| i64::from(ticks))
}

#[cfg(not(unix))]
#[must_use]
pub fn ticks_per_sec() -> Option<i64> {
    None
}

/// Sample the process CPU time.
#[cfg(unix)]
#[must_use]
pub fn sample() -> Option<CpuSample> {
    // SAFETY: `tms` is plain old data and `times` only writes into it.
    let mut buf: libc::tms = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::times(&mut buf) };
    if ret == (-1_i64) as libc::clock_t {
        return None;
    }
    Some(CpuSample {
        utime: buf.tms_utime as i64,
        stime: buf.tms_stime as i64,
    })
}

#[cfg(not(unix))]
#[must_use]
pub fn sample() -> Option<CpuSample> {
    None
}
