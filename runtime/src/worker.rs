//! Lazily initialized, explicitly torn down worker resources.
//!
//! Each worker owns its connection handles instead of sharing process-wide
//! globals. A [`LazyResource`] is created empty, initialized on first use,
//! reused afterwards, and cleared with [`LazyResource::teardown`]. A failed
//! initialization leaves it empty so the next call tries again.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A value created on first use and shared until torn down.
pub struct LazyResource<T> {
    name: &'static str,
    slot: Mutex<Option<Arc<T>>>,
}

impl<T> LazyResource<T> {
    /// Create an empty resource; `name` is used in logs.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::new(None),
        }
    }

    /// Name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Return the value, running `init` if there is none yet.
    ///
    /// Concurrent callers wait for a single initialization.
    ///
    /// # Errors
    ///
    /// Returns the error of `init`; nothing is cached in that case.
    pub async fn get_or_try_init<F, Fut, E>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut slot = self.slot.lock().await;
        if let Some(value) = slot.as_ref() {
            return Ok(Arc::clone(value));
        }

        match init().await {
            Ok(value) => {
                let value = Arc::new(value);
                *slot = Some(Arc::clone(&value));
                tracing::debug!(resource = self.name, "Resource initialized");
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(resource = self.name, error = %e, "Resource initialization failed");
                Err(e)
            }
        }
    }

    /// The current value, if initialized.
    pub async fn get(&self) -> Option<Arc<T>> {
        self.slot.lock().await.clone()
    }

    /// Whether a value is currently held.
    pub async fn is_initialized(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Drop the held value; the next use initializes again.
    ///
    /// Returns the value that was held, if any.
    pub async fn teardown(&self) -> Option<Arc<T>> {
        let previous = self.slot.lock().await.take();
        if previous.is_some() {
            tracing::debug!(resource = self.name, "Resource torn down");
        }
        previous
    }
}

impl<T> std::fmt::Debug for LazyResource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyResource").field("name", &self.name).finish_non_exhaustive()
    }
}
