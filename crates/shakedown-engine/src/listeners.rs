use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use tracing::error;

/// Identifies one registration in a [`ListenerRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    callbacks: BTreeMap<u64, Callback<T>>,
}

/// Id-keyed set of callbacks. Removal goes through the handle returned by
/// [`subscribe`](ListenerRegistry::subscribe), never through closure identity.
pub struct ListenerRegistry<T> {
    inner: Mutex<Registry<T>>,
}

impl<T> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Registry {
                next_id: 0,
                callbacks: BTreeMap::new(),
            }),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.callbacks.insert(id, Arc::new(callback));
        ListenerHandle(id)
    }

    /// Returns false if the handle was already removed.
    pub fn unsubscribe(&self, handle: ListenerHandle) -> bool {
        self.lock().callbacks.remove(&handle.0).is_some()
    }

    pub fn clear(&self) {
        self.lock().callbacks.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every registered callback in registration order.
    ///
    /// Callbacks run outside the registry lock so they may subscribe or
    /// unsubscribe. A panicking callback is logged and skipped.
    pub fn emit(&self, value: &T) {
        let callbacks: Vec<(u64, Callback<T>)> = self
            .lock()
            .callbacks
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect();

        for (id, callback) in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                error!(listener = id, "Listener panicked during dispatch");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
