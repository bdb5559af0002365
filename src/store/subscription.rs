use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

use crate::error::StoreError;

/// A live feed of store events. Dropping it stops the producer.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<Result<T, StoreError>>,
    producer: Option<JoinHandle<()>>,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<Result<T, StoreError>>, producer: JoinHandle<()>) -> Self {
        Self {
            rx,
            producer: Some(producer),
        }
    }

    /// Next event, or `None` once the feed has ended or been cancelled.
    pub async fn next(&mut self) -> Option<Result<T, StoreError>> {
        self.rx.recv().await
    }

    pub fn cancel(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
        self.rx.close();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Cancel handle for a spawned listener loop.
///
/// Clones share the same listener. `cancel` is idempotent and waits for a
/// callback already in progress, so once it has returned the listener never
/// invokes its callbacks again. Callbacks must not cancel their own listener.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    active: ActiveFlag,
    abort: AbortHandle,
}

impl ListenerHandle {
    /// Spawns `make(flag)`; the listener delivers every callback through
    /// [`ActiveFlag::run`].
    pub fn spawn<F, Fut>(make: F) -> Self
    where
        F: FnOnce(ActiveFlag) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let active = ActiveFlag(Arc::new(Mutex::new(true)));
        let task = tokio::spawn(make(active.clone()));
        Self {
            active,
            abort: task.abort_handle(),
        }
    }

    /// Returns true only for the call that actually stopped the listener.
    pub fn cancel(&self) -> bool {
        let was_active = std::mem::replace(&mut *self.active.lock(), false);
        self.abort.abort();
        was_active
    }

    pub fn is_active(&self) -> bool {
        self.active.is_set() && !self.abort.is_finished()
    }
}

#[derive(Debug, Clone)]
pub struct ActiveFlag(Arc<Mutex<bool>>);

impl ActiveFlag {
    pub fn is_set(&self) -> bool {
        *self.lock()
    }

    /// Runs `deliver` unless the listener was cancelled. The flag stays locked
    /// while it runs, which is what makes `cancel` wait for it.
    pub fn run<R>(&self, deliver: impl FnOnce() -> R) -> Option<R> {
        let active = self.lock();
        if *active { Some(deliver()) } else { None }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drives `subscription` on a background task, handing every event to `on_event`.
pub fn listen<T, F>(mut subscription: Subscription<T>, mut on_event: F) -> ListenerHandle
where
    T: Send + 'static,
    F: FnMut(Result<T, StoreError>) + Send + 'static,
{
    ListenerHandle::spawn(move |active| async move {
        while let Some(event) = subscription.next().await {
            if active.run(|| on_event(event)).is_none() {
                break;
            }
        }
        subscription.cancel();
    })
}
