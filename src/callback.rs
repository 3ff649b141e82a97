// src/callback.rs

use std::sync::{Mutex, PoisonError};

use tokio::runtime::Handle;

/// Invoked once per batch with `true` only if every item succeeded.
pub type BatchCallback = Box<dyn FnOnce(bool) + Send + 'static>;

/// Holds a batch callback until exactly one caller claims it.
pub struct CallbackCell {
    inner: Mutex<Option<BatchCallback>>,
}

impl CallbackCell {
    pub fn new(callback: Option<BatchCallback>) -> Self {
        Self {
            inner: Mutex::new(callback),
        }
    }

    /// Takes the callback. Every call after the first returns `None`.
    pub fn claim(&self) -> Option<BatchCallback> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Delivers callbacks on the runtime's blocking pool, never inline.
#[derive(Clone, Debug)]
pub struct CallbackExecutor {
    handle: Handle,
}

impl CallbackExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    pub(crate) fn dispatch(&self, callback: BatchCallback, success: bool) {
        self.handle.spawn_blocking(move || callback(success));
    }
}
