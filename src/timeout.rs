//! An optional duration used throughout the scheduler's public API.

use std::time::Duration;

/// A bounded or unbounded wait duration, expressed in nanoseconds.
///
/// `Timeout::Never` represents an unbounded wait (no deadline). A
/// [`Duration::ZERO`] timeout is *Immediate*: callers that pass it should poll
/// once rather than block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// No deadline; the operation blocks until it completes.
    Never,
    /// A finite wait, possibly zero (*Immediate*).
    Finite(Duration),
}

impl Timeout {
    /// A zero-length timeout. Operations given this value poll once and
    /// return immediately rather than blocking.
    pub const IMMEDIATE: Timeout = Timeout::Finite(Duration::ZERO);

    /// Builds a finite timeout from a nanosecond count.
    pub fn from_nanos(nanos: u64) -> Self {
        Timeout::Finite(Duration::from_nanos(nanos))
    }

    /// Builds a finite timeout from a millisecond count.
    pub fn from_millis(millis: u64) -> Self {
        Timeout::Finite(Duration::from_millis(millis))
    }

    /// Builds a finite timeout from a second count.
    pub fn from_secs(secs: u64) -> Self {
        Timeout::Finite(Duration::from_secs(secs))
    }

    /// True if this timeout never elapses.
    pub fn is_never(&self) -> bool {
        matches!(self, Timeout::Never)
    }

    /// True if this timeout is zero-length.
    pub fn is_immediate(&self) -> bool {
        matches!(self, Timeout::Finite(d) if d.is_zero())
    }

    /// The number of nanoseconds in this timeout, or `u64::MAX` if `Never`.
    pub fn in_nanoseconds(&self) -> u64 {
        match self {
            Timeout::Never => u64::MAX,
            Timeout::Finite(d) => u64::try_from(d.as_nanos()).unwrap_or(u64::MAX),
        }
    }

    /// The underlying duration, or `None` for `Never`.
    pub(crate) fn duration(&self) -> Option<Duration> {
        match self {
            Timeout::Never => None,
            Timeout::Finite(d) => Some(*d),
        }
    }
}

impl Default for Timeout {
    /// The default timeout is `Never`, matching the source's `PARCTimeout_Never` sentinel.
    fn default() -> Self {
        Timeout::Never
    }
}
