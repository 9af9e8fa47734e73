//! Shared, replay-latest handle over a derivation stream
//!
//! One background task drains the derivation and fans each view model out to
//! every current subscriber, in order and without skipping. A subscriber
//! arriving late first sees the latest value. Dropping a subscriber never
//! stops the task; only [`Shared::dispose`] does.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use super::DeriveError;

/// Output of a derivation: one item per underlying query emission.
/// An `Err` item is terminal.
pub type DeriveStream<T> = mpsc::UnboundedReceiver<Result<T, DeriveError>>;

type Item<T> = Result<Arc<T>, DeriveError>;

#[derive(Debug)]
enum Emission<T> {
    Pending,
    Next(Arc<T>),
    Failed(DeriveError),
    /// Source ended; keeps the last value for late subscribers
    Complete(Option<Arc<T>>),
}

struct Fanout<T> {
    latest: Emission<T>,
    subscribers: Vec<mpsc::UnboundedSender<Item<T>>>,
}

impl<T> Fanout<T> {
    fn publish(&mut self, value: Arc<T>) {
        self.subscribers.retain(|tx| tx.send(Ok(value.clone())).is_ok());
        self.latest = Emission::Next(value);
    }

    fn fail(&mut self, error: DeriveError) {
        for tx in self.subscribers.drain(..) {
            let _ = tx.send(Err(error.clone()));
        }
        self.latest = Emission::Failed(error);
    }

    /// End every subscriber stream. A no-op once the source has failed or ended.
    fn complete(&mut self) {
        self.subscribers.clear();
        if let Emission::Pending | Emission::Next(_) = self.latest {
            let last = match std::mem::replace(&mut self.latest, Emission::Pending) {
                Emission::Next(v) => Some(v),
                _ => None,
            };
            self.latest = Emission::Complete(last);
        }
    }

    fn is_finished(&self) -> bool {
        matches!(self.latest, Emission::Failed(_) | Emission::Complete(_))
    }
}

struct SharedInner<T> {
    fanout: Arc<Mutex<Fanout<T>>>,
    task: AbortHandle,
}

impl<T> Drop for SharedInner<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Multicast handle to a running derivation
pub struct Shared<T> {
    inner: Arc<SharedInner<T>>,
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Shared<T> {
    /// Start driving `source`. Must be called from within a tokio runtime.
    pub fn spawn(mut source: DeriveStream<T>) -> Self {
        let fanout = Arc::new(Mutex::new(Fanout {
            latest: Emission::Pending,
            subscribers: Vec::new(),
        }));

        let driver = fanout.clone();
        let handle = tokio::spawn(async move {
            while let Some(item) = source.recv().await {
                let mut fanout = driver.lock();
                if fanout.is_finished() {
                    return;
                }
                match item {
                    Ok(value) => fanout.publish(Arc::new(value)),
                    Err(e) => {
                        tracing::warn!("Derivation failed: {}", e);
                        fanout.fail(e);
                        return;
                    }
                }
            }
            driver.lock().complete();
        });

        Self {
            inner: Arc::new(SharedInner {
                fanout,
                task: handle.abort_handle(),
            }),
        }
    }
}

impl<T> Shared<T> {
    pub fn subscribe(&self) -> Subscriber<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = self.inner.fanout.lock();
        let fanout = &mut *guard;
        match &fanout.latest {
            Emission::Pending => fanout.subscribers.push(tx),
            Emission::Next(v) => {
                let _ = tx.send(Ok(v.clone()));
                fanout.subscribers.push(tx);
            }
            Emission::Failed(e) => {
                let _ = tx.send(Err(e.clone()));
            }
            Emission::Complete(last) => {
                if let Some(v) = last {
                    let _ = tx.send(Ok(v.clone()));
                }
            }
        }
        Subscriber { rx }
    }

    /// Latest emission without waiting. `None` until the first value arrives.
    pub fn latest(&self) -> Option<Item<T>> {
        match &self.inner.fanout.lock().latest {
            Emission::Pending => None,
            Emission::Next(v) => Some(Ok(v.clone())),
            Emission::Failed(e) => Some(Err(e.clone())),
            Emission::Complete(v) => v.clone().map(Ok),
        }
    }

    /// Latest value if one exists, otherwise the next one to arrive.
    /// `None` if the stream ends without producing anything.
    pub async fn first(&self) -> Option<Item<T>> {
        self.subscribe().next().await
    }

    /// Tear down the underlying query. Subscribers receive whatever was
    /// already published, then see their streams end.
    pub fn dispose(&self) {
        self.inner.task.abort();
        self.inner.fanout.lock().complete();
    }

    /// Whether both handles share the same underlying subscription
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

/// One consumer of a [`Shared`] derivation
pub struct Subscriber<T> {
    rx: mpsc::UnboundedReceiver<Item<T>>,
}

impl<T> Subscriber<T> {
    /// Next view model, or `None` once the stream has ended.
    /// An error is delivered once and ends the stream.
    pub async fn next(&mut self) -> Option<Item<T>> {
        self.rx.recv().await
    }
}
