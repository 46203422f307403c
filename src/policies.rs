//! Shutdown and cancellation policy flags, shared between the `Scheduler`
//! and the worker pool.
//!
//! A worker finishing a periodic task's occurrence must decide whether to
//! reinsert the next one without reaching back into `Scheduler`, so these
//! flags live behind an `Arc` both sides hold, rather than solely on
//! `Scheduler` as spec.md §4.6 first suggests.

use std::sync::atomic::{AtomicBool, Ordering};

/// The three policy flags from spec.md §4.6, plus whether shutdown has been
/// initiated at all.
pub(crate) struct Policies {
    continue_existing_periodic_tasks_after_shutdown: AtomicBool,
    execute_existing_delayed_tasks_after_shutdown: AtomicBool,
    remove_on_cancel: AtomicBool,
    shutdown_initiated: AtomicBool,
}

impl Policies {
    pub(crate) fn new() -> Self {
        Policies {
            continue_existing_periodic_tasks_after_shutdown: AtomicBool::new(false),
            execute_existing_delayed_tasks_after_shutdown: AtomicBool::new(false),
            remove_on_cancel: AtomicBool::new(true),
            shutdown_initiated: AtomicBool::new(false),
        }
    }

    pub(crate) fn continue_existing_periodic_tasks_after_shutdown(&self) -> bool {
        self.continue_existing_periodic_tasks_after_shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn set_continue_existing_periodic_tasks_after_shutdown(&self, value: bool) {
        self.continue_existing_periodic_tasks_after_shutdown.store(value, Ordering::Release);
    }

    pub(crate) fn execute_existing_delayed_tasks_after_shutdown(&self) -> bool {
        self.execute_existing_delayed_tasks_after_shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn set_execute_existing_delayed_tasks_after_shutdown(&self, value: bool) {
        self.execute_existing_delayed_tasks_after_shutdown.store(value, Ordering::Release);
    }

    pub(crate) fn remove_on_cancel(&self) -> bool {
        self.remove_on_cancel.load(Ordering::Acquire)
    }

    pub(crate) fn set_remove_on_cancel(&self, value: bool) {
        self.remove_on_cancel.store(value, Ordering::Release);
    }

    pub(crate) fn shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Marks shutdown as initiated. Returns `true` the first time this is
    /// called; a second `shutdown()`/`shutdown_now()` call is a no-op.
    pub(crate) fn initiate_shutdown(&self) -> bool {
        !self.shutdown_initiated.swap(true, Ordering::AcqRel)
    }

    /// Whether a periodic task finishing an occurrence right now should be
    /// reinserted for its next one. Always true before shutdown; after
    /// shutdown, only if `continue_existing_periodic_tasks_after_shutdown`
    /// is set. Checked by the worker at the point it would otherwise
    /// reinsert, so a periodic task that was already eligible (and so
    /// retained) at `shutdown()` time still stops after its one retained
    /// occurrence rather than rescheduling itself forever.
    pub(crate) fn should_reinsert_periodic(&self) -> bool {
        !self.shutdown_initiated() || self.continue_existing_periodic_tasks_after_shutdown()
    }
}
