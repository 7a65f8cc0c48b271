//! Configuration fixed before initialization.

use serde::{Deserialize, Serialize};

use crate::clock::ClockSource;
use crate::error::{Result, TimerError};

/// Default number of hash buckets per thread.
pub const DEFAULT_TABLE_SIZE: usize = 1023;

/// Default call-stack depth limit, root frame included.
pub const MAX_STACK: usize = 128;

/// Longest timer name kept, in bytes. Longer names are truncated.
pub const MAX_CHARS: usize = 63;

/// Default number of thread slots.
pub const DEFAULT_MAX_THREADS: usize = 64;

/// Library configuration.
///
/// Build one directly, deserialize it, or adjust a default one with
/// [`Options::apply`]. Becomes immutable once the library is initialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Gather wall-clock statistics.
    pub wall: bool,
    /// Gather user/system CPU time.
    pub cpu: bool,
    /// Number of hash buckets per thread.
    pub table_size: usize,
    /// Maximum call-stack depth, including the root frame.
    pub max_stack_depth: usize,
    /// Maximum number of threads that may attach.
    pub max_threads: usize,
    /// Terminate the process on the first error.
    pub abort_on_error: bool,
    /// Log lifecycle details at info level.
    pub verbose: bool,
    /// Underlying clock.
    pub clock: ClockSource,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            wall: true,
            cpu: false,
            table_size: DEFAULT_TABLE_SIZE,
            max_stack_depth: MAX_STACK,
            max_threads: DEFAULT_MAX_THREADS,
            abort_on_error: false,
            verbose: false,
            clock: ClockSource::default(),
        }
    }
}

/// A single configuration change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    Wall(bool),
    Cpu(bool),
    TableSize(i64),
    MaxStackDepth(i64),
    MaxThreads(i64),
    AbortOnError(bool),
    Verbose(bool),
}

impl Options {
    /// Apply one setting, validating its value.
    pub fn apply(&mut self, setting: Setting) -> Result<()> {
        match setting {
            Setting::Wall(val) => self.wall = val,
            Setting::Cpu(val) => {
                if val && !crate::cpu::available() {
                    return Err(TimerError::CpuStatsUnavailable);
                }
                self.cpu = val;
            }
            Setting::TableSize(val) => {
                self.table_size = usize::try_from(val)
                    .ok()
                    .filter(|&n| n > 0)
                    .ok_or(TimerError::TableSize(val))?;
            }
            Setting::MaxStackDepth(val) => {
                self.max_stack_depth = positive(val, "max_stack_depth")?;
            }
            Setting::MaxThreads(val) => {
                self.max_threads = positive(val, "max_threads")?;
            }
            Setting::AbortOnError(val) => self.abort_on_error = val,
            Setting::Verbose(val) => self.verbose = val,
        }
        Ok(())
    }

    /// Check a whole options value, e.g. one produced by deserialization.
    pub fn validate(&self) -> Result<()> {
        if self.table_size == 0 {
            return Err(TimerError::TableSize(0));
        }
        if self.max_stack_depth == 0 {
            return Err(TimerError::InvalidOption(
                "max_stack_depth must be positive".into(),
            ));
        }
        if self.max_threads == 0 {
            return Err(TimerError::InvalidOption(
                "max_threads must be positive".into(),
            ));
        }
        if self.cpu && !crate::cpu::available() {
            return Err(TimerError::CpuStatsUnavailable);
        }
        Ok(())
    }
}

fn positive(val: i64, what: &str) -> Result<usize> {
    usize::try_from(val)
        .ok()
        .filter(|&n| n > 0)
        .ok_or_else(|| TimerError::InvalidOption(format!("{what} must be positive. {val} is invalid")))
}
