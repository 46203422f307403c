//! The delay-queue's ordering key: a task plus when (and how often) to run it.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::future_task::Runnable;

/// Whether a scheduled task repeats, and how its next occurrence is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodMode {
    /// Runs once.
    None,
    /// Re-fires every `period` after the *previous occurrence's scheduled*
    /// time, regardless of how long that occurrence took to run.
    FixedRate(Duration),
    /// Re-fires `delay` after the *previous occurrence's completion*.
    FixedDelay(Duration),
}

impl PeriodMode {
    /// True for anything other than `None`.
    pub fn is_periodic(&self) -> bool {
        !matches!(self, PeriodMode::None)
    }
}

struct State {
    execution_time_ns: u64,
    sequence: u64,
    runnable: Arc<dyn Runnable>,
    period: PeriodMode,
}

/// A handle to a task sitting in (or that has just left) the delay queue.
///
/// Returned by [`crate::Scheduler::submit`], [`crate::Scheduler::schedule`],
/// and the two periodic scheduling methods. Cloning is cheap (an `Arc`
/// clone); every clone observes the same underlying task.
#[derive(Clone)]
pub struct ScheduledTask(pub(crate) Arc<State>);

impl ScheduledTask {
    pub(crate) fn new(runnable: Arc<dyn Runnable>, execution_time_ns: u64, sequence: u64, period: PeriodMode) -> Self {
        ScheduledTask(Arc::new(State {
            execution_time_ns,
            sequence,
            runnable,
            period,
        }))
    }

    /// The absolute instant, in nanoseconds on the scheduler's clock, at
    /// which this occurrence becomes eligible to run.
    pub fn execution_time_ns(&self) -> u64 {
        self.0.execution_time_ns
    }

    /// True if this task repeats.
    pub fn is_periodic(&self) -> bool {
        self.0.period.is_periodic()
    }

    /// The repetition mode.
    pub fn period_mode(&self) -> PeriodMode {
        self.0.period
    }

    /// Cancels the underlying task. See [`crate::FutureTask::cancel`].
    pub fn cancel(&self, may_interrupt_if_running: bool) -> bool {
        self.0.runnable.cancel(may_interrupt_if_running)
    }

    /// True if the underlying task has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.0.runnable.is_cancelled()
    }

    /// True if the underlying task's current occurrence has finished.
    pub fn is_done(&self) -> bool {
        self.0.runnable.is_done()
    }

    pub(crate) fn runnable(&self) -> &Arc<dyn Runnable> {
        &self.0.runnable
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.0.sequence
    }

    /// Builds the next occurrence of a periodic task: same underlying
    /// runnable, new deadline and insertion sequence.
    pub(crate) fn next_occurrence(&self, execution_time_ns: u64, sequence: u64) -> Self {
        ScheduledTask::new(self.0.runnable.clone(), execution_time_ns, sequence, self.0.period)
    }
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.0.execution_time_ns == other.0.execution_time_ns && self.0.sequence == other.0.sequence
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    /// Orders by `(execution_time_ns, sequence)` ascending, then reversed so
    /// a `std::collections::BinaryHeap` (a max-heap) yields the earliest
    /// deadline first, with ties broken FIFO by insertion sequence.
    fn cmp(&self, other: &Self) -> Ordering {
        (self.0.execution_time_ns, self.0.sequence)
            .cmp(&(other.0.execution_time_ns, other.0.sequence))
            .reverse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future_task::FutureTask;
    use std::collections::BinaryHeap;

    fn dummy() -> Arc<dyn Runnable> {
        Arc::new(FutureTask::new(|| ()))
    }

    #[test]
    fn earlier_deadline_sorts_first_out_of_a_binary_heap() {
        let mut heap = BinaryHeap::new();
        heap.push(ScheduledTask::new(dummy(), 300, 0, PeriodMode::None));
        heap.push(ScheduledTask::new(dummy(), 100, 1, PeriodMode::None));
        heap.push(ScheduledTask::new(dummy(), 200, 2, PeriodMode::None));

        assert_eq!(heap.pop().unwrap().execution_time_ns(), 100);
        assert_eq!(heap.pop().unwrap().execution_time_ns(), 200);
        assert_eq!(heap.pop().unwrap().execution_time_ns(), 300);
    }

    #[test]
    fn equal_deadlines_break_ties_fifo_by_sequence() {
        let mut heap = BinaryHeap::new();
        heap.push(ScheduledTask::new(dummy(), 100, 5, PeriodMode::None));
        heap.push(ScheduledTask::new(dummy(), 100, 1, PeriodMode::None));
        heap.push(ScheduledTask::new(dummy(), 100, 3, PeriodMode::None));

        assert_eq!(heap.pop().unwrap().sequence(), 1);
        assert_eq!(heap.pop().unwrap().sequence(), 3);
        assert_eq!(heap.pop().unwrap().sequence(), 5);
    }
}
