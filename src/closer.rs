//! Scoped collection of teardown callbacks.
//!
//! Every native allocation made while building a workflow registers a
//! close callback here. On workflow teardown the callbacks run exactly
//! once, in reverse registration order, and their errors are collected
//! rather than propagated as panics.

use crate::error::Error;
use std::sync::Mutex;

type CloseFn = Box<dyn FnOnce() -> Result<(), Error> + Send>;

/// A scoped resource collector.
///
/// Callbacks registered with [`add`](Closer::add) run in reverse order
/// when [`close`](Closer::close) is called. Closing twice is a no-op.
#[derive(Default)]
pub struct Closer {
    fns: Mutex<Vec<CloseFn>>,
}

impl Closer {
    /// Create an empty closer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a close callback.
    ///
    /// Callbacks registered after [`close`](Closer::close) has run are
    /// executed at the next `close` call; resources must therefore be
    /// registered before teardown begins.
    pub fn add(&self, f: impl FnOnce() -> Result<(), Error> + Send + 'static) {
        self.fns.lock().unwrap().push(Box::new(f));
    }

    /// Number of pending callbacks.
    pub fn len(&self) -> usize {
        self.fns.lock().unwrap().len()
    }

    /// Check whether there are no pending callbacks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run all pending callbacks in reverse registration order.
    ///
    /// Returns the errors the callbacks produced, in execution order.
    pub fn close(&self) -> Vec<Error> {
        let fns = std::mem::take(&mut *self.fns.lock().unwrap());
        let mut errors = Vec::new();
        for f in fns.into_iter().rev() {
            if let Err(e) = f() {
                errors.push(e);
            }
        }
        errors
    }
}

impl std::fmt::Debug for Closer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Closer").field("pending", &self.len()).finish()
    }
}
