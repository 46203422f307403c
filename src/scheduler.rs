//! The public entry point: a dispatcher thread plus a worker pool sharing a
//! time-ordered delay queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::delay_queue::DelayQueue;
use crate::error::SchedulerError;
use crate::future_task::{FutureTask, Runnable};
use crate::policies::Policies;
use crate::scheduled_task::{PeriodMode, ScheduledTask};
use crate::thread_handle::ThreadHandle;
use crate::timeout::Timeout;
use crate::worker_pool::{WorkerPool, WorkerPoolHandle};

/// Upper bound on how long the dispatcher sleeps while the queue is empty.
/// Bounds how quickly it notices shutdown even in the pathological case
/// where a notify is somehow missed; `schedule`-family calls and shutdown
/// both notify directly and are the primary wakeup path.
const DISPATCH_IDLE_POLL: Duration = Duration::from_millis(200);

/// A read-only view of one task still sitting in the delay queue, returned
/// by [`Scheduler::queue_snapshot`].
#[derive(Debug, Clone, Copy)]
pub struct QueuedTaskInfo {
    /// The task's scheduled execution time, in nanoseconds on the
    /// scheduler's clock.
    pub execution_time_ns: u64,
    /// Whether the task repeats.
    pub is_periodic: bool,
}

/// A delayed/periodic task scheduler backed by a bounded worker pool.
///
/// Submitted work sits in a time-ordered delay queue until its deadline
/// arrives, at which point a single dispatcher thread hands it to one of a
/// fixed number of worker threads. Dropping a `Scheduler` tears it down as
/// if [`Scheduler::shutdown_now`] had been called, so no background thread
/// outlives the value.
pub struct Scheduler {
    delay_queue: Arc<DelayQueue>,
    worker_pool: WorkerPool,
    dispatcher: Option<ThreadHandle>,
    policies: Arc<Policies>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    /// Builds a scheduler with `pool_size` worker threads and the real
    /// system clock. Fails with `InvalidArgument` if `pool_size` is zero.
    pub fn new(pool_size: usize) -> Result<Self, SchedulerError> {
        Self::with_clock(pool_size, Arc::new(SystemClock))
    }

    pub(crate) fn with_clock(pool_size: usize, clock: Arc<dyn Clock>) -> Result<Self, SchedulerError> {
        if pool_size == 0 {
            return Err(SchedulerError::InvalidArgument("pool_size must be at least 1".into()));
        }

        let delay_queue = Arc::new(DelayQueue::new());
        let policies = Arc::new(Policies::new());
        let worker_pool = WorkerPool::new(pool_size, delay_queue.clone(), clock.clone(), policies.clone());
        let worker_handle = worker_pool.handle();

        let dispatcher = {
            let delay_queue = delay_queue.clone();
            let clock = clock.clone();
            ThreadHandle::spawn("scheduled-thread-pool-dispatcher", move |cancel| {
                dispatcher_loop(&delay_queue, &worker_handle, clock.as_ref(), &cancel);
            })
        };

        Ok(Scheduler {
            delay_queue,
            worker_pool,
            dispatcher: Some(dispatcher),
            policies,
            clock,
        })
    }

    /// Submits `task` for immediate execution. Equivalent to `schedule` with
    /// a zero delay.
    pub fn execute<T>(&self, task: FutureTask<T>) -> Result<ScheduledTask, SchedulerError>
    where
        T: Send + Clone + 'static,
    {
        self.enqueue(task, Duration::ZERO, PeriodMode::None)
    }

    /// Identical to [`Scheduler::execute`]; kept as a separate name to
    /// mirror the submit/execute pair in the source this crate is modeled
    /// on.
    pub fn submit<T>(&self, task: FutureTask<T>) -> Result<ScheduledTask, SchedulerError>
    where
        T: Send + Clone + 'static,
    {
        self.execute(task)
    }

    /// Schedules `task` to run once, after `delay`. `delay` must be finite.
    pub fn schedule<T>(&self, task: FutureTask<T>, delay: Timeout) -> Result<ScheduledTask, SchedulerError>
    where
        T: Send + Clone + 'static,
    {
        let delay = delay
            .duration()
            .ok_or_else(|| SchedulerError::InvalidArgument("delay must be finite".into()))?;
        self.enqueue(task, delay, PeriodMode::None)
    }

    /// Schedules `task` to first run after `initial_delay`, then again every
    /// `period` measured from each occurrence's own scheduled start. Both
    /// arguments must be finite.
    pub fn schedule_at_fixed_rate<T>(
        &self,
        task: FutureTask<T>,
        initial_delay: Timeout,
        period: Timeout,
    ) -> Result<ScheduledTask, SchedulerError>
    where
        T: Send + Clone + 'static,
    {
        let initial_delay = initial_delay
            .duration()
            .ok_or_else(|| SchedulerError::InvalidArgument("initial_delay must be finite".into()))?;
        let period = period
            .duration()
            .ok_or_else(|| SchedulerError::InvalidArgument("period must be finite".into()))?;
        if period.is_zero() {
            return Err(SchedulerError::InvalidArgument("period must be positive".into()));
        }
        self.enqueue(task, initial_delay, PeriodMode::FixedRate(period))
    }

    /// Schedules `task` to first run after `initial_delay`, then again
    /// `delay` after each occurrence *completes*. Both arguments must be
    /// finite.
    pub fn schedule_with_fixed_delay<T>(
        &self,
        task: FutureTask<T>,
        initial_delay: Timeout,
        delay: Timeout,
    ) -> Result<ScheduledTask, SchedulerError>
    where
        T: Send + Clone + 'static,
    {
        let initial_delay = initial_delay
            .duration()
            .ok_or_else(|| SchedulerError::InvalidArgument("initial_delay must be finite".into()))?;
        let delay = delay
            .duration()
            .ok_or_else(|| SchedulerError::InvalidArgument("delay must be finite".into()))?;
        if delay.is_zero() {
            return Err(SchedulerError::InvalidArgument("delay must be positive".into()));
        }
        self.enqueue(task, initial_delay, PeriodMode::FixedDelay(delay))
    }

    fn enqueue<T>(&self, task: FutureTask<T>, delay: Duration, period: PeriodMode) -> Result<ScheduledTask, SchedulerError>
    where
        T: Send + Clone + 'static,
    {
        if self.policies.shutdown_initiated() {
            return Err(SchedulerError::ShutDown);
        }

        task.mark_scheduled();
        let execution_time_ns = self.clock.now_ns().saturating_add(duration_to_nanos(delay));
        let runnable: Arc<dyn Runnable> = Arc::new(task);

        let mut guard = self.delay_queue.lock();
        let sequence = guard.next_sequence();
        let scheduled = ScheduledTask::new(runnable, execution_time_ns, sequence, period);
        guard.add(scheduled.clone());
        guard.notify();
        Ok(scheduled)
    }

    /// Cancels `task`, honoring the `remove_on_cancel` policy by eagerly
    /// scrubbing it from the delay queue when that policy is set.
    pub fn cancel(&self, task: &ScheduledTask, may_interrupt_if_running: bool) -> bool {
        let changed = task.cancel(may_interrupt_if_running);
        if changed && self.policies.remove_on_cancel() {
            let mut guard = self.delay_queue.lock();
            guard.remove_by_runnable(task.runnable());
        }
        changed
    }

    /// A snapshot of every task still sitting in the delay queue, in no
    /// particular order.
    pub fn queue_snapshot(&self) -> Vec<QueuedTaskInfo> {
        self.delay_queue
            .lock()
            .snapshot()
            .into_iter()
            .map(|(execution_time_ns, is_periodic)| QueuedTaskInfo {
                execution_time_ns,
                is_periodic,
            })
            .collect()
    }

    /// Whether periodic tasks already in the queue keep firing after
    /// `shutdown()`. Defaults to `false`.
    pub fn continue_existing_periodic_tasks_after_shutdown(&self) -> bool {
        self.policies.continue_existing_periodic_tasks_after_shutdown()
    }

    /// Sets the policy read by [`Scheduler::continue_existing_periodic_tasks_after_shutdown`].
    pub fn set_continue_existing_periodic_tasks_after_shutdown(&self, value: bool) {
        self.policies.set_continue_existing_periodic_tasks_after_shutdown(value);
    }

    /// Whether one-shot delayed tasks already in the queue still run after
    /// `shutdown()`. Defaults to `false`.
    pub fn execute_existing_delayed_tasks_after_shutdown(&self) -> bool {
        self.policies.execute_existing_delayed_tasks_after_shutdown()
    }

    /// Sets the policy read by [`Scheduler::execute_existing_delayed_tasks_after_shutdown`].
    pub fn set_execute_existing_delayed_tasks_after_shutdown(&self, value: bool) {
        self.policies.set_execute_existing_delayed_tasks_after_shutdown(value);
    }

    /// Whether cancelling a queued task eagerly removes it from the delay
    /// queue rather than waiting for the dispatcher to encounter and skip
    /// it. Defaults to `true`.
    pub fn remove_on_cancel(&self) -> bool {
        self.policies.remove_on_cancel()
    }

    /// Sets the policy read by [`Scheduler::remove_on_cancel`].
    pub fn set_remove_on_cancel(&self, value: bool) {
        self.policies.set_remove_on_cancel(value);
    }

    /// Stops accepting new work. Tasks already in the queue whose deadline
    /// has already elapsed still run; among the rest, periodic tasks are
    /// kept only if `continue_existing_periodic_tasks_after_shutdown` is
    /// set, and one-shot delayed tasks only if
    /// `execute_existing_delayed_tasks_after_shutdown` is set. Returns to
    /// the caller immediately; the dispatcher and workers keep draining
    /// whatever was retained in the background.
    pub fn shutdown(&self) {
        if !self.policies.initiate_shutdown() {
            return;
        }

        let keep_periodic = self.policies.continue_existing_periodic_tasks_after_shutdown();
        let keep_delayed = self.policies.execute_existing_delayed_tasks_after_shutdown();
        let now = self.clock.now_ns();

        let mut guard = self.delay_queue.lock();
        let retained: Vec<ScheduledTask> = guard
            .take_all()
            .into_iter()
            .filter(|task| {
                task.execution_time_ns() <= now || if task.is_periodic() { keep_periodic } else { keep_delayed }
            })
            .collect();
        let dropped_count = retained.len();
        for task in retained {
            guard.add(task);
        }
        guard.notify_all();
        debug!("scheduler shutdown initiated; {dropped_count} task(s) retained in queue per policy");
    }

    /// Cancels the dispatcher and every worker thread immediately, joins
    /// them, and returns every task that was still queued (in the delay
    /// queue or the worker pool's run queue) and never got to run.
    pub fn shutdown_now(&mut self) -> Vec<ScheduledTask> {
        self.policies.initiate_shutdown();

        if let Some(dispatcher) = self.dispatcher.as_ref() {
            dispatcher.cancel();
        }

        let mut drained = {
            let mut guard = self.delay_queue.lock();
            let all = guard.take_all();
            guard.notify_all();
            all
        };

        if let Some(dispatcher) = self.dispatcher.take() {
            drop(dispatcher);
        }

        drained.extend(self.worker_pool.shutdown_now());
        warn!("scheduler shutdown_now: {} task(s) drained without dispatch", drained.len());
        drained
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.dispatcher.is_some() {
            let _ = self.shutdown_now();
        }
    }
}

fn duration_to_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

fn dispatcher_loop(delay_queue: &Arc<DelayQueue>, worker_pool: &WorkerPoolHandle, clock: &dyn Clock, cancel: &AtomicBool) {
    loop {
        if cancel.load(Ordering::SeqCst) {
            return;
        }

        let mut guard = delay_queue.lock();
        if guard.size() == 0 {
            guard.wait_for(DISPATCH_IDLE_POLL);
            continue;
        }

        let now = clock.now_ns();
        let head_time = guard
            .peek_first()
            .expect("size() > 0 was just checked under the same lock")
            .execution_time_ns();

        if head_time <= now {
            let scheduled = guard
                .pop_first()
                .unwrap_or_else(|_| panic!("size() > 0 was just checked under the same lock"));
            drop(guard);

            trace!("moving task to worker pool, execution_time_ns={}", scheduled.execution_time_ns());
            if let Err(err) = worker_pool.execute(scheduled) {
                warn!("failed to hand a ready task to the worker pool: {err}");
            }

            let guard = delay_queue.lock();
            guard.notify();
        } else {
            let remaining = Duration::from_nanos(head_time - now);
            trace!("dispatcher waiting {remaining:?} for the next deadline");
            guard.wait_for(remaining);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future_task::FutureTask;
    use std::sync::mpsc;

    #[test]
    fn zero_pool_size_is_rejected() {
        assert!(matches!(Scheduler::new(0), Err(SchedulerError::InvalidArgument(_))));
    }

    #[test]
    fn execute_runs_promptly() {
        let scheduler = Scheduler::new(2).unwrap();
        let (tx, rx) = mpsc::channel();
        let task = FutureTask::new(move || tx.send(()).unwrap());
        scheduler.execute(task).unwrap();
        rx.recv_timeout(Duration::from_secs(1)).expect("task did not run");
    }

    #[test]
    fn schedule_runs_after_delay_not_before() {
        let scheduler = Scheduler::new(1).unwrap();
        let (tx, rx) = mpsc::channel();
        let task = FutureTask::new(move || tx.send(()).unwrap());
        scheduler.schedule(task, Timeout::from_millis(60)).unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(20)).is_err());
        rx.recv_timeout(Duration::from_secs(1)).expect("task did not run after its delay");
    }

    #[test]
    fn cancel_before_deadline_prevents_execution() {
        let scheduler = Scheduler::new(1).unwrap();
        let (tx, rx) = mpsc::channel::<()>();
        let task = FutureTask::new(move || tx.send(()).unwrap());
        let handle = scheduler.schedule(task, Timeout::from_millis(80)).unwrap();

        assert!(scheduler.cancel(&handle, false));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(scheduler.queue_snapshot().len(), 0);
    }

    #[test]
    fn submit_after_shutdown_fails() {
        let scheduler = Scheduler::new(1).unwrap();
        scheduler.shutdown();
        let result = scheduler.execute(FutureTask::new(|| ()));
        assert!(matches!(result, Err(SchedulerError::ShutDown)));
    }

    #[test]
    fn shutdown_now_drains_future_work() {
        let mut scheduler = Scheduler::new(1).unwrap();
        let task = FutureTask::new(|| ());
        scheduler.schedule(task, Timeout::from_secs(10)).unwrap();
        let drained = scheduler.shutdown_now();
        assert_eq!(drained.len(), 1);
    }

    #[test]
    fn fixed_rate_task_fires_more_than_once() {
        let scheduler = Scheduler::new(1).unwrap();
        let (tx, rx) = mpsc::channel();
        let task = FutureTask::new(move || tx.send(()).unwrap());
        scheduler
            .schedule_at_fixed_rate(task, Timeout::from_millis(5), Timeout::from_millis(20))
            .unwrap();

        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn cancelling_a_periodic_task_stops_future_occurrences() {
        let scheduler = Scheduler::new(1).unwrap();
        let (tx, rx) = mpsc::channel();
        let task = FutureTask::new(move || tx.send(()).unwrap());
        let handle = scheduler
            .schedule_with_fixed_delay(task, Timeout::from_millis(5), Timeout::from_millis(15))
            .unwrap();

        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(scheduler.cancel(&handle, false));

        let mut extra = 0;
        while rx.recv_timeout(Duration::from_millis(100)).is_ok() {
            extra += 1;
            assert!(extra < 5, "periodic task kept firing after cancellation");
        }
    }
}
