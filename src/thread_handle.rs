//! A joinable OS thread paired with a cooperative cancellation flag.
//!
//! Both the dispatcher and every worker thread are driven through this same
//! primitive, so cancellation and teardown behave identically everywhere a
//! background loop needs to be stopped and joined.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub(crate) struct ThreadHandle {
    join: Option<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
}

impl ThreadHandle {
    /// Spawns `f` on a new named OS thread, passing it the cancel flag it
    /// should poll between iterations of its loop.
    pub fn spawn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_for_thread = cancel.clone();
        let join = thread::Builder::new()
            .name(name.into())
            .spawn(move || f(cancel_for_thread))
            .expect("failed to spawn scheduler thread");
        ThreadHandle {
            join: Some(join),
            cancel,
        }
    }

    /// Sets the cancel flag. Does not by itself wake a thread parked on a
    /// condition variable; callers must also notify whatever monitor the
    /// thread waits on.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Blocks until the thread has exited. Idempotent: a second call is a no-op.
    pub fn join(&mut self) {
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        self.cancel();
        self.join();
    }
}
