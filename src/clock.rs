//! Monotonic time source used for scheduling decisions.

use std::sync::OnceLock;
use std::time::Instant;

/// A source of monotonic nanosecond timestamps.
///
/// Abstracted behind a trait so tests can drive the dispatcher with a
/// controllable clock instead of real wall-clock time.
pub trait Clock: Send + Sync {
    /// The current instant, in nanoseconds since an arbitrary monotonic
    /// epoch fixed at the first call. Only differences between two calls
    /// are meaningful.
    fn now_ns(&self) -> u64;
}

/// The real, process-wide monotonic clock, backed by [`std::time::Instant`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ns(&self) -> u64 {
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        let origin = *ORIGIN.get_or_init(Instant::now);
        u64::try_from(origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock;
        let a = clock.now_ns();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let b = clock.now_ns();
        assert!(b > a);
    }
}
