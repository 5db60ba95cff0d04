//! FIFO serialization devices with concurrency 1.
//!
//! A [`SerialQueue`] owns an mpsc channel drained by a single worker task:
//! operations run one at a time, in submission order. Submission is
//! synchronous, so an operation enqueued from inside a running operation
//! (e.g. by a bus subscriber) runs before anything submitted afterwards.

use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The queue worker stopped before the operation produced a result.
///
/// Happens when the runtime shuts down or the operation panicked.
#[derive(Debug, Clone, Error)]
#[error("serial queue closed before the operation completed")]
pub struct QueueClosed;

/// A FIFO queue running one operation at a time.
pub struct SerialQueue {
    jobs: mpsc::UnboundedSender<Job>,
    // Worker is spawned lazily, on first submission from inside a runtime
    pending: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
}

impl SerialQueue {
    /// Creates an idle queue.
    pub fn new() -> Self {
        let (jobs, receiver) = mpsc::unbounded_channel();
        Self {
            jobs,
            pending: Mutex::new(Some(receiver)),
        }
    }

    /// Submits an operation and returns a future resolving to its output.
    ///
    /// The operation is enqueued immediately, whether or not the returned
    /// future is polled.
    pub fn submit<F, T>(
        &self,
        operation: F,
    ) -> impl Future<Output = Result<T, QueueClosed>> + use<F, T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, result) = oneshot::channel();
        let sent = self.push(Box::pin(async move {
            // The caller may have gone away; the operation still ran
            let _ = reply.send(operation.await);
        }));

        async move {
            sent?;
            result.await.map_err(|_| QueueClosed)
        }
    }

    /// Enqueues an operation without waiting for it.
    pub fn enqueue<F>(&self, operation: F) -> Result<(), QueueClosed>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.push(Box::pin(operation))
    }

    fn push(&self, job: Job) -> Result<(), QueueClosed> {
        let guarded: Job = Box::pin(async move {
            if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                tracing::error!("queued operation panicked");
            }
        });
        self.jobs.send(guarded).map_err(|_| QueueClosed)?;
        self.ensure_worker();
        Ok(())
    }

    fn ensure_worker(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.is_none() {
            return;
        }
        if let Ok(handle) = Handle::try_current()
            && let Some(mut receiver) = pending.take()
        {
            handle.spawn(async move {
                while let Some(job) = receiver.recv().await {
                    job.await;
                }
            });
        }
    }
}

impl Default for SerialQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// A lazily grown map from key to [`SerialQueue`].
///
/// Queues are created on first use and retained for the lifetime of the map,
/// so memory grows with the number of distinct keys ever seen.
pub struct KeyedQueues<K> {
    queues: DashMap<K, Arc<SerialQueue>>,
}

impl<K> KeyedQueues<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty map.
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
        }
    }

    /// Returns the queue for a key, creating it on first use.
    pub fn queue(&self, key: &K) -> Arc<SerialQueue> {
        if let Some(queue) = self.queues.get(key) {
            return Arc::clone(queue.value());
        }
        Arc::clone(self.queues.entry(key.clone()).or_default().value())
    }

    /// Returns the number of queues created so far.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    /// Returns true if no queue was ever created.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

impl<K> Default for KeyedQueues<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
