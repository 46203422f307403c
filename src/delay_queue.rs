//! The time-ordered monitor at the heart of the dispatcher loop.

use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::future_task::Runnable;
use crate::scheduled_task::ScheduledTask;

/// The queue was empty where the caller's logic guarantees it should not be.
///
/// This never reaches a caller outside the crate: the one place it can occur
/// (the dispatcher popping under its own non-empty check) treats it as an
/// internal invariant violation and panics instead of propagating it.
pub(crate) struct QueueEmpty;

struct Heap {
    entries: BinaryHeap<ScheduledTask>,
    next_sequence: u64,
}

/// A mutex-and-condvar-guarded min-heap of [`ScheduledTask`]s, ordered by
/// execution time with FIFO tie-breaking.
pub(crate) struct DelayQueue {
    inner: Mutex<Heap>,
    cvar: Condvar,
}

impl DelayQueue {
    pub fn new() -> Self {
        DelayQueue {
            inner: Mutex::new(Heap {
                entries: BinaryHeap::new(),
                next_sequence: 0,
            }),
            cvar: Condvar::new(),
        }
    }

    /// Acquires the monitor, returning a guard through which every queue
    /// operation is performed while the lock is held.
    pub fn lock(&self) -> DelayQueueGuard<'_> {
        DelayQueueGuard {
            guard: self.inner.lock(),
            cvar: &self.cvar,
        }
    }
}

/// An acquired [`DelayQueue`] lock. All mutation and condition-variable
/// waiting happens through this guard so the lock is never held implicitly.
pub(crate) struct DelayQueueGuard<'a> {
    guard: MutexGuard<'a, Heap>,
    cvar: &'a Condvar,
}

impl<'a> DelayQueueGuard<'a> {
    /// Allocates the next FIFO tie-break sequence number. Call once per
    /// insertion, while holding the lock, immediately before `add`.
    pub fn next_sequence(&mut self) -> u64 {
        let seq = self.guard.next_sequence;
        self.guard.next_sequence += 1;
        seq
    }

    pub fn add(&mut self, task: ScheduledTask) {
        self.guard.entries.push(task);
    }

    pub fn size(&self) -> usize {
        self.guard.entries.len()
    }

    pub fn peek_first(&self) -> Option<&ScheduledTask> {
        self.guard.entries.peek()
    }

    pub fn pop_first(&mut self) -> Result<ScheduledTask, QueueEmpty> {
        self.guard.entries.pop().ok_or(QueueEmpty)
    }

    /// Blocks until notified, releasing the lock while waiting.
    pub fn wait(&mut self) {
        self.cvar.wait(&mut self.guard);
    }

    /// Blocks until notified or `dur` elapses, whichever comes first.
    pub fn wait_for(&mut self, dur: Duration) {
        self.cvar.wait_for(&mut self.guard, dur);
    }

    pub fn notify(&self) {
        self.cvar.notify_one();
    }

    pub fn notify_all(&self) {
        self.cvar.notify_all();
    }

    /// Removes every queued occurrence backed by `runnable`. Returns `true`
    /// if anything was removed. Used by `remove_on_cancel`.
    pub fn remove_by_runnable(&mut self, runnable: &Arc<dyn Runnable>) -> bool {
        let drained: Vec<ScheduledTask> = self.guard.entries.drain().collect();
        let before = drained.len();
        let kept: BinaryHeap<ScheduledTask> = drained
            .into_iter()
            .filter(|task| !Arc::ptr_eq(task.runnable(), runnable))
            .collect();
        let removed = kept.len() != before;
        self.guard.entries = kept;
        removed
    }

    /// A read-only copy of every queued task's `(execution_time_ns, is_periodic)`.
    pub fn snapshot(&self) -> Vec<(u64, bool)> {
        self.guard
            .entries
            .iter()
            .map(|task| (task.execution_time_ns(), task.is_periodic()))
            .collect()
    }

    /// Drains every entry out of the queue, leaving it empty.
    pub fn take_all(&mut self) -> Vec<ScheduledTask> {
        self.guard.entries.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future_task::FutureTask;
    use crate::scheduled_task::PeriodMode;

    fn task(time: u64, seq: u64) -> ScheduledTask {
        ScheduledTask::new(Arc::new(FutureTask::new(|| ())), time, seq, PeriodMode::None)
    }

    #[test]
    fn pop_first_returns_earliest_deadline() {
        let queue = DelayQueue::new();
        {
            let mut guard = queue.lock();
            guard.add(task(200, 0));
            guard.add(task(100, 1));
        }
        let mut guard = queue.lock();
        assert_eq!(guard.pop_first().unwrap().execution_time_ns(), 100);
        assert_eq!(guard.pop_first().unwrap().execution_time_ns(), 200);
        assert!(guard.pop_first().is_err());
    }

    #[test]
    fn next_sequence_is_monotonic() {
        let queue = DelayQueue::new();
        let mut guard = queue.lock();
        let seqs: Vec<u64> = (0..5).map(|_| guard.next_sequence()).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn remove_by_runnable_drops_matching_entries() {
        let queue = DelayQueue::new();
        let runnable: Arc<dyn Runnable> = Arc::new(FutureTask::new(|| ()));
        {
            let mut guard = queue.lock();
            guard.add(ScheduledTask::new(runnable.clone(), 100, 0, PeriodMode::None));
            guard.add(task(200, 1));
        }
        let mut guard = queue.lock();
        assert!(guard.remove_by_runnable(&runnable));
        assert_eq!(guard.size(), 1);
        assert_eq!(guard.peek_first().unwrap().execution_time_ns(), 200);
    }

    #[test]
    fn wait_wakes_on_notify() {
        let queue = Arc::new(DelayQueue::new());
        let queue2 = queue.clone();
        let handle = std::thread::spawn(move || {
            let mut guard = queue2.lock();
            while guard.size() == 0 {
                guard.wait();
            }
            guard.pop_first().unwrap().execution_time_ns()
        });

        std::thread::sleep(Duration::from_millis(20));
        {
            let mut guard = queue.lock();
            guard.add(task(42, 0));
            guard.notify_all();
        }

        assert_eq!(handle.join().unwrap(), 42);
    }

    #[test]
    fn take_all_empties_the_queue() {
        let queue = DelayQueue::new();
        {
            let mut guard = queue.lock();
            guard.add(task(100, 0));
            guard.add(task(200, 1));
        }
        let mut guard = queue.lock();
        assert_eq!(guard.take_all().len(), 2);
        assert_eq!(guard.size(), 0);
    }
}
