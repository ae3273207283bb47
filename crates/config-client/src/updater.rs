use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

type Callback<T> = Arc<dyn Fn(&Arc<T>) + Send + Sync>;

struct Shared<T> {
    last: RwLock<Option<Arc<T>>>,
    subscribers: Mutex<BTreeMap<u64, Callback<T>>>,
    next_id: AtomicU64,
}

/// Observable slot holding the most recent value.
///
/// Values are handed out as `Arc<T>` snapshots. Nothing outside the owner can
/// replace the value; observers that want to change it clone the snapshot and
/// go through whatever owns the updater.
pub struct ValueUpdater<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + Sync + 'static> ValueUpdater<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                last: RwLock::new(None),
                subscribers: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn last(&self) -> Option<Arc<T>> {
        self.shared.last.read().clone()
    }

    /// Replaces the value and notifies every current subscriber, even when the
    /// new value equals the old one.
    pub fn update(&self, value: T) -> Arc<T> {
        let value = Arc::new(value);
        self.update_shared(Arc::clone(&value));
        value
    }

    pub fn update_shared(&self, value: Arc<T>) {
        *self.shared.last.write() = Some(Arc::clone(&value));
        // Callbacks run without any lock held so they may subscribe or
        // unsubscribe re-entrantly.
        let callbacks: Vec<Callback<T>> = self.shared.subscribers.lock().values().cloned().collect();
        for callback in callbacks {
            callback(&value);
        }
    }

    /// Registers `callback` for future updates. Nothing is replayed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Arc<T>) + Send + Sync + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .subscribers
            .lock()
            .insert(id, Arc::new(callback));
        let weak: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.subscribers.lock().remove(&id);
                }
            })),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().len()
    }
}

impl<T: Send + Sync + 'static> Default for ValueUpdater<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a callback registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the callback"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Leaves the callback registered for as long as the updater lives.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
