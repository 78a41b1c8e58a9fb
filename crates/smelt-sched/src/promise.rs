//! Single-assignment completion cells.
//!
//! A [`Promise`] is written at most once and read any number of times.
//! The pipelined traversal hands two promises to each compiler
//! invocation: one the compiler fulfils as soon as type signatures are
//! ready, one when compilation fully completes. Readers attach by
//! awaiting [`Promise::wait`]; the value is cloned out to every waiter.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

struct PromiseInner<T> {
    value: Mutex<Option<T>>,
    notify: Notify,
}

/// A single-assignment cell with completion notification.
///
/// Cloning a `Promise` clones the handle, not the cell: all clones
/// observe the same completion.
pub struct Promise<T> {
    inner: Arc<PromiseInner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("completed", &self.inner.value.lock().is_some())
            .finish()
    }
}

impl<T: Clone> Promise<T> {
    /// Creates an empty promise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PromiseInner {
                value: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    /// Completes the promise with `value`.
    ///
    /// Returns `false` (and leaves the cell untouched) if the promise was
    /// already completed.
    pub fn complete(&self, value: T) -> bool {
        {
            let mut slot = self.inner.value.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
        }
        self.inner.notify.notify_waiters();
        true
    }

    /// Returns the value if the promise has been completed.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        self.inner.value.lock().clone()
    }

    /// Returns `true` if the promise has been completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.inner.value.lock().is_some()
    }

    /// Waits for the promise to complete and returns a clone of its value.
    pub async fn wait(&self) -> T {
        loop {
            // Register for notification before checking, so a completion
            // racing this check still wakes us.
            let notified = self.inner.notify.notified();
            if let Some(value) = self.peek() {
                return value;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_value_completed_before() {
        let promise = Promise::new();
        assert!(promise.complete(42));
        assert_eq!(promise.wait().await, 42);
    }

    #[tokio::test]
    async fn wait_returns_value_completed_after() {
        let promise: Promise<&'static str> = Promise::new();
        let waiter = promise.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(promise.complete("ready"));
        assert_eq!(handle.await.unwrap(), "ready");
    }

    #[tokio::test]
    async fn second_completion_is_rejected() {
        let promise = Promise::new();
        assert!(promise.complete(1));
        assert!(!promise.complete(2));
        assert_eq!(promise.peek(), Some(1));
    }

    #[tokio::test]
    async fn all_clones_observe_the_same_value() {
        let promise: Promise<u32> = Promise::new();
        let a = promise.clone();
        let b = promise.clone();
        let ha = tokio::spawn(async move { a.wait().await });
        let hb = tokio::spawn(async move { b.wait().await });

        promise.complete(7);
        assert_eq!(ha.await.unwrap(), 7);
        assert_eq!(hb.await.unwrap(), 7);
    }
}
