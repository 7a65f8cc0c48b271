//! Error types for the timing library.

use thiserror::Error;

/// Broad classification of a [`TimerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The library was driven in the wrong order or with bad arguments.
    Usage,
    /// A bounded resource (stack depth, thread slots, table size) was exhausted
    /// or misconfigured.
    Resource,
    /// The start/stop stream or the clock did not behave as expected.
    Consistency,
}

/// Library-wide error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimerError {
    /// Operation requires `Library::initialize` first.
    #[error("{op}: initialize has not been called")]
    NotInitialized { op: &'static str },

    /// `Library::initialize` called twice.
    #[error("initialize has already been called")]
    AlreadyInitialized,

    /// Configuration change attempted after initialization.
    #[error("{op}: must be called before initialize")]
    ConfigLocked { op: &'static str },

    /// Configuration value out of range.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// Query for a region that does not exist on the thread.
    #[error("{op}: timer {name} does not exist")]
    UnknownTimer { op: &'static str, name: String },

    /// Requested thread index is not below the configured maximum.
    #[error("requested thread {thread} is too big (max threads {max})")]
    ThreadOutOfRange { thread: usize, max: usize },

    /// The thread's state is held by a live handle.
    #[error("thread {0} is still attached; drop its handle before querying or resetting")]
    ThreadBusy(usize),

    /// Start of the name reserved for the root timer.
    #[error("start: {name} is reserved for the root timer")]
    ReservedName { name: String },

    /// Wall-clock statistics were disabled before initialization.
    #[error("{op}: wallstats not enabled")]
    WallStatsDisabled { op: &'static str },

    /// CPU statistics requested on a platform without `times()`.
    #[error("cpu statistics are not available on this platform")]
    CpuStatsUnavailable,

    /// Merge attempted between two different regions.
    #[error("cannot merge region {left} with region {right}")]
    MergeMismatch { left: String, right: String },

    /// Hash table size must be positive.
    #[error("tablesize must be positive. {0} is invalid")]
    TableSize(i64),

    /// Start rejected because the call stack is full.
    #[error("stack overflow starting {name}: depth limit {limit} reached")]
    StackOverflow { name: String, limit: usize },

    /// More threads attached than the configured maximum.
    #[error("thread limit {max} exceeded")]
    TooManyThreads { max: usize },

    /// Stop of a name that was never started on this thread.
    #[error("stop: timer for {name} had not been started")]
    NotStarted { name: String },

    /// Stop of a timer that has no open activation.
    #[error("stop: timer {name} was already off")]
    AlreadyOff { name: String },

    /// Stop would pop the root frame.
    #[error("stop: {name} would underflow the call stack")]
    StackUnderflow { name: String },

    /// Clock went backwards between start and stop.
    #[error("stop: negative delta {delta:e} for timer {name}")]
    NegativeDelta { name: String, delta: f64 },

    /// Failure inside the hardware-counter collaborator.
    #[error("hardware counters: {0}")]
    Counters(String),

    /// Clock source could not be initialized.
    #[error("clock source {0} not available or doesn't work")]
    Clock(&'static str),
}

impl TimerError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotInitialized { .. }
            | Self::AlreadyInitialized
            | Self::ConfigLocked { .. }
            | Self::InvalidOption(_)
            | Self::UnknownTimer { .. }
            | Self::ThreadOutOfRange { .. }
            | Self::ThreadBusy(_)
            | Self::ReservedName { .. }
            | Self::WallStatsDisabled { .. }
            | Self::CpuStatsUnavailable
            | Self::MergeMismatch { .. }
            | Self::Clock(_) => ErrorKind::Usage,
            Self::TableSize(_)
            | Self::StackOverflow { .. }
            | Self::TooManyThreads { .. }
            | Self::Counters(_) => ErrorKind::Resource,
            Self::NotStarted { .. }
            | Self::AlreadyOff { .. }
            | Self::StackUnderflow { .. }
            | Self::NegativeDelta { .. } => ErrorKind::Consistency,
        }
    }
}

/// Result type alias using [`TimerError`].
pub type Result<T> = std::result::Result<T, TimerError>;
