//! A cancellable, observable handle around a single user callable.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::error::SchedulerError;
use crate::thunk::Thunk;
use crate::timeout::Timeout;

/// The lifecycle state of a [`FutureTask`].
///
/// Transitions are monotonic except that `New` and `Scheduled` may both move
/// directly to `Cancelled`, and `reset` moves `Done`/`Cancelled` back to
/// `New` for periodic reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureTaskState {
    /// Constructed, not yet handed to a scheduler.
    New,
    /// Sitting in the delay queue, execution time not yet reached.
    Scheduled,
    /// The callable is currently executing.
    Running,
    /// Execution finished: a value was produced, the body panicked, or the
    /// task was cancelled before it could run.
    Done,
    /// Cancelled while `New` or `Scheduled`; never ran.
    Cancelled,
}

/// A trait-object-safe view of a [`FutureTask`], used by [`crate::scheduled_task::ScheduledTask`]
/// and the worker pool so the delay queue and run queue can hold
/// heterogeneous task result types behind one pointer type.
pub(crate) trait Runnable: Send + Sync {
    fn run(&self);
    fn cancel(&self, may_interrupt_if_running: bool) -> bool;
    fn is_cancelled(&self) -> bool;
    fn is_done(&self) -> bool;
    fn reset(&self) -> bool;
}

#[derive(Clone)]
enum Outcome<T> {
    Value(T),
    Cancelled,
    Panicked(String),
}

struct Shared<T> {
    state: FutureTaskState,
    result: Option<Outcome<T>>,
}

struct Inner<T> {
    shared: Mutex<Shared<T>>,
    done: Condvar,
    cancelled: AtomicBool,
    thunk: Thunk<T>,
}

/// A single user callable plus its execution state, shared between the
/// caller and the scheduler via cheap `Arc` clones.
///
/// `T` must be `Clone` because a fixed-rate or fixed-delay task reuses the
/// same `FutureTask` across occurrences: each run overwrites the result slot
/// rather than moving a value out of it, so [`FutureTask::get`] hands back a
/// clone of whatever the most recent run produced.
pub struct FutureTask<T: Send + Clone + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + Clone + 'static> FutureTask<T> {
    /// Wraps a callable. The callable may be invoked more than once if this
    /// task is later scheduled at a fixed rate or with a fixed delay.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        FutureTask {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    state: FutureTaskState::New,
                    result: None,
                }),
                done: Condvar::new(),
                cancelled: AtomicBool::new(false),
                thunk: Thunk::new(f),
            }),
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> FutureTaskState {
        self.inner.shared.lock().state
    }

    /// True once the task has produced a result, panicked, or been cancelled.
    pub fn is_done(&self) -> bool {
        matches!(self.state(), FutureTaskState::Done)
    }

    /// True if the task was cancelled (whether or not it ever ran).
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Moves `New` to `Scheduled`. A no-op (returns `false`) outside `New`.
    pub(crate) fn mark_scheduled(&self) -> bool {
        let mut shared = self.inner.shared.lock();
        if shared.state == FutureTaskState::New {
            shared.state = FutureTaskState::Scheduled;
            true
        } else {
            false
        }
    }

    /// Requests cancellation. Returns `true` if the task had not yet started
    /// running. If it is already `Running`, `may_interrupt_if_running`
    /// records the request for the next cooperative cancellation point but
    /// does not stop the in-flight call; the result of that call is still
    /// recorded normally.
    pub fn cancel(&self, may_interrupt_if_running: bool) -> bool {
        let mut shared = self.inner.shared.lock();
        match shared.state {
            FutureTaskState::New | FutureTaskState::Scheduled => {
                shared.state = FutureTaskState::Cancelled;
                self.inner.cancelled.store(true, Ordering::SeqCst);
                self.inner.done.notify_all();
                true
            }
            FutureTaskState::Running => {
                if may_interrupt_if_running {
                    self.inner.cancelled.store(true, Ordering::SeqCst);
                }
                false
            }
            FutureTaskState::Done | FutureTaskState::Cancelled => false,
        }
    }

    /// Runs the callable if the task is `New` or `Scheduled`; records a
    /// cancelled outcome without invoking the callable if it was already
    /// `Cancelled`; is a no-op if already `Done` or mid-`Running`.
    pub fn run(&self) {
        {
            let mut shared = self.inner.shared.lock();
            match shared.state {
                FutureTaskState::Cancelled => {
                    shared.state = FutureTaskState::Done;
                    shared.result = Some(Outcome::Cancelled);
                    self.inner.done.notify_all();
                    return;
                }
                FutureTaskState::Done | FutureTaskState::Running => return,
                FutureTaskState::New | FutureTaskState::Scheduled => {
                    shared.state = FutureTaskState::Running;
                }
            }
        }

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.inner.thunk.invoke())) {
            Ok(value) => Outcome::Value(value),
            Err(payload) => Outcome::Panicked(panic_message(&*payload)),
        };

        let mut shared = self.inner.shared.lock();
        shared.result = Some(outcome);
        shared.state = FutureTaskState::Done;
        self.inner.done.notify_all();
    }

    /// Blocks until the task reaches `Done`, or `timeout` elapses.
    ///
    /// Returns the produced value, or [`SchedulerError::Cancelled`] /
    /// [`SchedulerError::ExecutionFailed`] / [`SchedulerError::Timeout`]
    /// depending on how the task finished (or failed to, within the
    /// timeout).
    pub fn get(&self, timeout: Timeout) -> Result<T, SchedulerError> {
        let mut shared = self.inner.shared.lock();

        match timeout {
            Timeout::Never => {
                while !is_terminal(shared.state) {
                    self.inner.done.wait(&mut shared);
                }
            }
            Timeout::Finite(d) if d.is_zero() => {
                // Immediate: fall through to the post-wait check below without blocking.
            }
            Timeout::Finite(d) => {
                let deadline = Instant::now() + d;
                while !is_terminal(shared.state) {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let timed_out = self.inner.done.wait_for(&mut shared, deadline - now).timed_out();
                    if timed_out && !is_terminal(shared.state) {
                        break;
                    }
                }
            }
        }

        // A task cancelled before it ever ran reaches `Cancelled` directly,
        // with no result recorded; `Done` always carries one.
        match shared.state {
            FutureTaskState::Cancelled => Err(SchedulerError::Cancelled),
            FutureTaskState::Done => match shared.result.clone() {
                Some(Outcome::Value(value)) => Ok(value),
                Some(Outcome::Cancelled) => Err(SchedulerError::Cancelled),
                Some(Outcome::Panicked(message)) => Err(SchedulerError::ExecutionFailed(message)),
                None => Err(SchedulerError::Timeout),
            },
            _ => Err(SchedulerError::Timeout),
        }
    }

    /// Moves `Done`/`Cancelled` back to `New`, clearing the result and the
    /// cancelled flag, so a periodic task can be dispatched again. Returns
    /// `false` (no-op) if the task is not yet finished.
    pub fn reset(&self) -> bool {
        let mut shared = self.inner.shared.lock();
        match shared.state {
            FutureTaskState::Done | FutureTaskState::Cancelled => {
                shared.state = FutureTaskState::New;
                shared.result = None;
                self.inner.cancelled.store(false, Ordering::SeqCst);
                true
            }
            FutureTaskState::New | FutureTaskState::Scheduled | FutureTaskState::Running => false,
        }
    }
}

impl<T: Send + Clone + 'static> Clone for FutureTask<T> {
    fn clone(&self) -> Self {
        FutureTask {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Clone + 'static> fmt::Debug for FutureTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureTask").field("state", &self.state()).finish()
    }
}

impl<T: Send + Clone + 'static> Runnable for FutureTask<T> {
    fn run(&self) {
        self.run()
    }

    fn cancel(&self, may_interrupt_if_running: bool) -> bool {
        self.cancel(may_interrupt_if_running)
    }

    fn is_cancelled(&self) -> bool {
        self.is_cancelled()
    }

    fn is_done(&self) -> bool {
        self.is_done()
    }

    fn reset(&self) -> bool {
        self.reset()
    }
}

/// `Done` and `Cancelled` are the two states `get` should stop waiting on;
/// a task cancelled before it ever ran never passes through `Done`.
fn is_terminal(state: FutureTaskState) -> bool {
    matches!(state, FutureTaskState::Done | FutureTaskState::Cancelled)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_and_returns_value() {
        let task = FutureTask::new(|| 7);
        task.run();
        assert!(task.is_done());
        assert_eq!(task.get(Timeout::IMMEDIATE).unwrap(), 7);
    }

    #[test]
    fn cancel_before_run_short_circuits() {
        let task = FutureTask::new(|| 7);
        assert!(task.cancel(false));
        task.run();
        assert!(task.is_cancelled());
        assert!(matches!(task.get(Timeout::IMMEDIATE), Err(SchedulerError::Cancelled)));
    }

    #[test]
    fn cancel_before_run_unblocks_get_without_run_ever_being_called() {
        let task = FutureTask::new(|| 7);
        assert!(task.cancel(false));
        // `run()` is deliberately never called: this is the path a task takes
        // when `remove_on_cancel` scrubs it out of the delay queue before the
        // dispatcher ever sees it.
        assert!(matches!(task.get(Timeout::from_millis(50)), Err(SchedulerError::Cancelled)));
    }

    #[test]
    fn cancel_after_done_is_noop() {
        let task = FutureTask::new(|| 7);
        task.run();
        assert!(!task.cancel(true));
        assert_eq!(task.get(Timeout::IMMEDIATE).unwrap(), 7);
    }

    #[test]
    fn panicking_body_yields_execution_failed() {
        let task: FutureTask<()> = FutureTask::new(|| panic!("boom"));
        task.run();
        match task.get(Timeout::IMMEDIATE) {
            Err(SchedulerError::ExecutionFailed(msg)) => assert!(msg.contains("boom")),
            other => panic!("expected ExecutionFailed, got {other:?}"),
        }
    }

    #[test]
    fn get_times_out_before_run() {
        let task: FutureTask<()> = FutureTask::new(|| ());
        assert!(matches!(task.get(Timeout::from_millis(10)), Err(SchedulerError::Timeout)));
    }

    #[test]
    fn reset_allows_rerun() {
        let task = FutureTask::new(|| 1);
        task.run();
        assert!(task.reset());
        assert_eq!(task.state(), FutureTaskState::New);
        assert!(!task.is_cancelled());
        task.run();
        assert_eq!(task.get(Timeout::IMMEDIATE).unwrap(), 1);
    }

    #[test]
    fn reset_before_done_is_noop() {
        let task: FutureTask<()> = FutureTask::new(|| ());
        assert!(!task.reset());
    }
}
