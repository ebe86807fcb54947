use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use chatgenius_types::events::{
    AuthChange, AuthHandler, ChangeEvent, ChangeHandler, EventFilter, SubscriptionHandle,
};
use chatgenius_types::query::Table;

const CHANNEL_CAPACITY: usize = 1024;

struct Subscription {
    // held for the whole of each handler call
    active: Arc<Mutex<bool>>,
    task: JoinHandle<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Fans out published events to every registered subscription.
///
/// Each subscription owns a broadcast receiver drained by its own task, so a
/// slow handler never blocks publishers. Must be used inside a Tokio runtime.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    changes_tx: broadcast::Sender<ChangeEvent>,
    auth_tx: broadcast::Sender<AuthChange>,
    subscriptions: Mutex<HashMap<SubscriptionHandle, Subscription>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (changes_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (auth_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner {
                changes_tx,
                auth_tx,
                subscriptions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Publish a row change. Having no subscribers is not an error.
    pub fn publish_change(&self, event: ChangeEvent) {
        let _ = self.inner.changes_tx.send(event);
    }

    pub fn publish_auth(&self, change: AuthChange) {
        let _ = self.inner.auth_tx.send(change);
    }

    /// Register `handler` for changes on `table` whose kind passes `filter`.
    /// Events published after this call returns are guaranteed to be seen.
    pub fn subscribe_changes(
        &self,
        table: Table,
        filter: EventFilter,
        handler: ChangeHandler,
    ) -> SubscriptionHandle {
        let rx = self.inner.changes_tx.subscribe();
        self.register(rx, move |event: ChangeEvent| {
            if event.table == table && filter.matches(event.kind) {
                handler(event);
            }
        })
    }

    pub fn subscribe_auth(&self, handler: AuthHandler) -> SubscriptionHandle {
        let rx = self.inner.auth_tx.subscribe();
        self.register(rx, move |change: AuthChange| handler(change))
    }

    /// Stop a subscription. Waits for a handler call already in progress, and
    /// no handler call starts after this returns. A handler must not release
    /// its own subscription.
    /// Returns false if the handle was unknown or already released.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let removed = self.subscriptions().remove(&handle);
        match removed {
            Some(sub) => {
                *lock(&sub.active) = false;
                sub.task.abort();
                debug!("Subscription {} released", handle.id());
                true
            }
            None => false,
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions().len()
    }

    fn subscriptions(&self) -> MutexGuard<'_, HashMap<SubscriptionHandle, Subscription>> {
        lock(&self.inner.subscriptions)
    }

    fn register<T, F>(&self, mut rx: broadcast::Receiver<T>, deliver: F) -> SubscriptionHandle
    where
        T: Clone + Send + 'static,
        F: Fn(T) + Send + 'static,
    {
        let handle = SubscriptionHandle::new();
        let active = Arc::new(Mutex::new(true));
        let flag = active.clone();

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(item) => {
                        let active = lock(&flag);
                        if !*active {
                            break;
                        }
                        deliver(item);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Subscription {} lagged, skipped {} events", handle.id(), skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        self.subscriptions().insert(handle, Subscription { active, task });
        debug!("Subscription {} registered", handle.id());
        handle
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
