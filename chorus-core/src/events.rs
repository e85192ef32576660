//! Listener registries composed into players, volumes and documents.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Handle returned by [`Listeners::subscribe`], used to unsubscribe.
///
/// Ids are unique across every registry in the process, so an owner of
/// several registries can unsubscribe by id alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    fn next() -> Self {
        ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Inner<E> {
    callbacks: Vec<(ListenerId, Callback<E>)>,
}

/// A subscribe/unsubscribe/notify registry for one event type.
///
/// Callbacks run on the notifying thread, outside the registry lock, so a
/// callback may subscribe or unsubscribe without deadlocking.
pub struct Listeners<E> {
    inner: Mutex<Inner<E>>,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                callbacks: Vec::new(),
            }),
        }
    }
}

impl<E> std::fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners").field("len", &self.len()).finish()
    }
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.callbacks.push((id, Arc::new(callback)));
        id
    }

    /// Returns `false` if the id was not subscribed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = inner.callbacks.len();
        inner.callbacks.retain(|(existing, _)| *existing != id);
        inner.callbacks.len() != before
    }

    pub fn notify(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = {
            let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.callbacks.iter().map(|(_, cb)| cb.clone()).collect()
        };
        for callback in callbacks {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .callbacks
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
