//! A fixed-size pool of worker threads draining a FIFO run queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};

use crate::clock::Clock;
use crate::delay_queue::DelayQueue;
use crate::error::SchedulerError;
use crate::policies::Policies;
use crate::scheduled_task::{PeriodMode, ScheduledTask};
use crate::thread_handle::ThreadHandle;

/// Upper bound on how long an idle worker sleeps before re-checking its
/// run queue and cancel flag. A correctness backstop, not the primary
/// wakeup mechanism (`execute` and `shutdown`/`shutdown_now` both notify
/// directly).
const WORKER_IDLE_POLL: Duration = Duration::from_millis(200);

struct Inner {
    queue: VecDeque<ScheduledTask>,
    accepting: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    cvar: Condvar,
}

/// A cheaply-cloneable reference to a [`WorkerPool`]'s run queue, used to
/// hand the dispatcher a way to enqueue ready work without giving it
/// ownership of (or join rights over) the pool's threads.
#[derive(Clone)]
pub(crate) struct WorkerPoolHandle {
    shared: Arc<Shared>,
}

impl WorkerPoolHandle {
    /// Pushes `task` onto the run queue. Fails with `ShutDown` once the pool
    /// has stopped accepting new work.
    pub fn execute(&self, task: ScheduledTask) -> Result<(), SchedulerError> {
        let mut inner = self.shared.inner.lock();
        if !inner.accepting {
            return Err(SchedulerError::ShutDown);
        }
        inner.queue.push_back(task);
        self.shared.cvar.notify_one();
        Ok(())
    }
}

/// Owns the pool's worker threads and the monitor they drain.
pub(crate) struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<ThreadHandle>,
}

impl WorkerPool {
    pub fn new(pool_size: usize, delay_queue: Arc<DelayQueue>, clock: Arc<dyn Clock>, policies: Arc<Policies>) -> Self {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                accepting: true,
            }),
            cvar: Condvar::new(),
        });

        let workers = (0..pool_size)
            .map(|index| {
                let shared = shared.clone();
                let delay_queue = delay_queue.clone();
                let clock = clock.clone();
                let policies = policies.clone();
                ThreadHandle::spawn(format!("scheduled-thread-pool-worker-{index}"), move |cancel| {
                    worker_loop(&shared, &delay_queue, clock.as_ref(), policies.as_ref(), &cancel);
                })
            })
            .collect();

        WorkerPool { shared, workers }
    }

    /// A handle the dispatcher can enqueue work through.
    pub fn handle(&self) -> WorkerPoolHandle {
        WorkerPoolHandle {
            shared: self.shared.clone(),
        }
    }

    /// Stops accepting new work. Workers finish whatever is already queued,
    /// then exit on their own once the queue is empty.
    pub fn shutdown(&self) {
        self.shared.inner.lock().accepting = false;
        self.shared.cvar.notify_all();
    }

    /// Cancels every worker immediately and joins their threads, returning
    /// whatever was still sitting in the run queue, never started.
    pub fn shutdown_now(&mut self) -> Vec<ScheduledTask> {
        for worker in &self.workers {
            worker.cancel();
        }
        let drained = {
            let mut inner = self.shared.inner.lock();
            inner.accepting = false;
            inner.queue.drain(..).collect::<Vec<_>>()
        };
        self.shared.cvar.notify_all();
        for worker in &mut self.workers {
            worker.join();
        }
        drained
    }
}

fn worker_loop(shared: &Shared, delay_queue: &Arc<DelayQueue>, clock: &dyn Clock, policies: &Policies, cancel: &AtomicBool) {
    loop {
        let task = {
            let mut inner = shared.inner.lock();
            loop {
                if cancel.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(task) = inner.queue.pop_front() {
                    break task;
                }
                if !inner.accepting {
                    return;
                }
                shared.cvar.wait_for(&mut inner, WORKER_IDLE_POLL);
            }
        };
        run_one(task, delay_queue, clock, policies);
    }
}

fn run_one(task: ScheduledTask, delay_queue: &Arc<DelayQueue>, clock: &dyn Clock, policies: &Policies) {
    let runnable = task.runnable().clone();
    trace!("worker running task execution_time_ns={}", task.execution_time_ns());
    runnable.run();

    if !task.is_periodic() || task.is_cancelled() {
        return;
    }

    // A periodic task already eligible at `shutdown()` time runs its one
    // retained occurrence regardless of policy; whether it gets another one
    // is decided here, not at shutdown time, so this check has to be
    // policy-aware rather than just "was this task already in the queue".
    if !policies.should_reinsert_periodic() {
        debug!("not rescheduling periodic task: scheduler has shut down and continue_existing_periodic_tasks_after_shutdown is false");
        return;
    }

    if !runnable.reset() {
        warn!("periodic task could not be reset for its next occurrence; dropping it");
        return;
    }

    let next_time_ns = match task.period_mode() {
        PeriodMode::FixedRate(period) => task
            .execution_time_ns()
            .saturating_add(period.as_nanos().min(u128::from(u64::MAX)) as u64),
        PeriodMode::FixedDelay(delay) => clock
            .now_ns()
            .saturating_add(delay.as_nanos().min(u128::from(u64::MAX)) as u64),
        PeriodMode::None => unreachable!("is_periodic() was checked above"),
    };

    let mut guard = delay_queue.lock();
    let sequence = guard.next_sequence();
    let next = task.next_occurrence(next_time_ns, sequence);
    guard.add(next);
    guard.notify();
    debug!("rescheduled periodic task for execution_time_ns={next_time_ns}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::future_task::FutureTask;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    #[test]
    fn execute_runs_submitted_task() {
        let delay_queue = Arc::new(DelayQueue::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let pool = WorkerPool::new(2, delay_queue, clock, Arc::new(Policies::new()));

        let (tx, rx) = mpsc::channel();
        let task = FutureTask::new(move || tx.send(()).unwrap());
        let scheduled = ScheduledTask::new(Arc::new(task), 0, 0, PeriodMode::None);
        pool.handle().execute(scheduled).unwrap();

        rx.recv_timeout(Duration::from_secs(1)).expect("task did not run");
    }

    #[test]
    fn shutdown_now_drains_unstarted_work() {
        let delay_queue = Arc::new(DelayQueue::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let mut pool = WorkerPool::new(1, delay_queue, clock, Arc::new(Policies::new()));

        let started = Arc::new(AtomicUsize::new(0));
        let blocker_started = started.clone();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let blocker = FutureTask::new(move || {
            blocker_started.fetch_add(1, Ordering::SeqCst);
            let _ = release_rx.recv();
        });
        pool.handle()
            .execute(ScheduledTask::new(Arc::new(blocker), 0, 0, PeriodMode::None))
            .unwrap();

        while started.load(Ordering::SeqCst) == 0 {
            std::thread::yield_now();
        }

        let never_run = FutureTask::new(|| ());
        pool.handle()
            .execute(ScheduledTask::new(Arc::new(never_run), 0, 1, PeriodMode::None))
            .unwrap();

        drop(release_tx);
        let drained = pool.shutdown_now();
        assert_eq!(drained.len(), 1);
    }

    #[test]
    fn execute_after_shutdown_fails() {
        let delay_queue = Arc::new(DelayQueue::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let pool = WorkerPool::new(1, delay_queue, clock, Arc::new(Policies::new()));
        pool.handle()
            .execute(ScheduledTask::new(Arc::new(FutureTask::new(|| ())), 0, 0, PeriodMode::None))
            .unwrap();
        pool.shutdown();
        std::thread::sleep(Duration::from_millis(50));
        let result = pool
            .handle()
            .execute(ScheduledTask::new(Arc::new(FutureTask::new(|| ())), 0, 1, PeriodMode::None));
        assert!(matches!(result, Err(SchedulerError::ShutDown)));
    }

    #[test]
    fn fixed_rate_task_is_not_reinserted_once_shutdown_is_initiated() {
        let delay_queue = Arc::new(DelayQueue::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let policies = Arc::new(Policies::new());
        policies.initiate_shutdown();

        let runs = Arc::new(AtomicUsize::new(0));
        let runs2 = runs.clone();
        let task = ScheduledTask::new(
            Arc::new(FutureTask::new(move || {
                runs2.fetch_add(1, Ordering::SeqCst);
            })),
            0,
            0,
            PeriodMode::FixedRate(Duration::from_millis(5)),
        );

        run_one(task, &delay_queue, clock.as_ref(), &policies);

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(delay_queue.lock().size(), 0, "a shut-down fixed-rate task must not reinsert itself");
    }

    #[test]
    fn fixed_rate_task_reinserts_when_continue_after_shutdown_is_set() {
        let delay_queue = Arc::new(DelayQueue::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let policies = Arc::new(Policies::new());
        policies.initiate_shutdown();
        policies.set_continue_existing_periodic_tasks_after_shutdown(true);

        let task = ScheduledTask::new(
            Arc::new(FutureTask::new(|| ())),
            0,
            0,
            PeriodMode::FixedRate(Duration::from_millis(5)),
        );

        run_one(task, &delay_queue, clock.as_ref(), &policies);

        assert_eq!(delay_queue.lock().size(), 1);
    }
}
