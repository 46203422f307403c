//! A delayed/periodic task scheduler backed by a bounded worker pool.
//!
//! [`Scheduler`] runs a single dispatcher thread that drains a time-ordered
//! delay queue and hands ready work to a fixed-size pool of worker threads.
//! Submitted work is wrapped in a [`FutureTask`], which the caller can poll,
//! wait on, or cancel independently of however the scheduler later chooses
//! to run it.
//!
//! ```no_run
//! use scheduled_thread_pool::{FutureTask, Scheduler, Timeout};
//!
//! let scheduler = Scheduler::new(4).unwrap();
//! let task = FutureTask::new(|| 2 + 2);
//! scheduler.execute(task.clone()).unwrap();
//! assert_eq!(task.get(Timeout::from_secs(1)).unwrap(), 4);
//! ```

#![warn(missing_docs)]

mod clock;
mod delay_queue;
mod error;
mod future_task;
mod policies;
mod scheduled_task;
mod scheduler;
mod thread_handle;
mod thunk;
mod timeout;
mod worker_pool;

pub use clock::{Clock, SystemClock};
pub use error::SchedulerError;
pub use future_task::{FutureTask, FutureTaskState};
pub use scheduled_task::{PeriodMode, ScheduledTask};
pub use scheduler::{QueuedTaskInfo, Scheduler};
pub use timeout::Timeout;
