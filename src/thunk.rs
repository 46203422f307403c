//! A boxed, repeatable callable.
//!
//! The teacher crate's `Thunk` wraps a single-shot `FnOnce`; ours must be
//! invoked again each time a fixed-rate or fixed-delay task fires, so it is
//! generalized to `Fn` and invoked through `&self` instead of by value.

pub(crate) struct Thunk<T> {
    f: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T> Thunk<T> {
    pub(crate) fn new<F>(f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Thunk { f: Box::new(f) }
    }

    pub(crate) fn invoke(&self) -> T {
        (self.f)()
    }
}
