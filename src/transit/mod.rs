//! In-process typed message dispatch with optional time+size batching (§4.3).
//!
//! A [`TransitEndpoint`] owns two tasks: one drains the inbound channel into a
//! shared pile and signals the second whenever the pile hits `max_batch_size`;
//! the second wakes on that signal or a fixed delay, whichever comes first,
//! drains the pile, and calls the handler once with the whole batch. This is
//! the same two-task shape the batching endpoint this is adapted from uses —
//! a delay loop and a consumer loop talking through a shared queue — ported
//! from an `asyncio.Queue` consumer to a `tokio::sync::Notify` wakeup.

use crate::error::{HubError, HubResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    pub delay: Duration,
}

impl BatchConfig {
    pub const fn new(max_batch_size: usize, delay: Duration) -> Self {
        Self { max_batch_size, delay }
    }

    /// Dispatches every message on its own, as soon as it arrives.
    pub const fn immediate() -> Self {
        Self {
            max_batch_size: 1,
            delay: Duration::from_millis(50),
        }
    }
}

#[async_trait]
pub trait BatchHandler<T>: Send + Sync + 'static {
    async fn handle_batch(&self, batch: Vec<T>);
}

/// Adapts a plain `async fn(T)` into a [`BatchHandler`] that's still called
/// once per flushed batch, fanning it back out item by item — useful for
/// handlers that don't care about batching but want to share the endpoint's
/// queueing and backpressure behavior.
pub struct FunctionHandler<F> {
    func: F,
}

impl<F> FunctionHandler<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<T, F, Fut> BatchHandler<T> for FunctionHandler<F>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    async fn handle_batch(&self, batch: Vec<T>) {
        for item in batch {
            (self.func)(item).await;
        }
    }
}

/// A running endpoint: messages sent via [`TransitEndpoint::publish`] are
/// queued and eventually handed to the handler in batches.
pub struct TransitEndpoint<T> {
    sender: mpsc::Sender<T>,
}

impl<T: Send + 'static> TransitEndpoint<T> {
    pub fn spawn<H>(config: BatchConfig, handler: Arc<H>) -> Self
    where
        H: BatchHandler<T>,
    {
        let (tx, mut rx) = mpsc::channel::<T>(1024);
        let pile: Arc<Mutex<Vec<T>>> = Arc::new(Mutex::new(Vec::new()));
        let notify = Arc::new(Notify::new());

        {
            let pile = pile.clone();
            let notify = notify.clone();
            let max_batch_size = config.max_batch_size.max(1);
            tokio::spawn(async move {
                while let Some(item) = rx.recv().await {
                    let should_flush = {
                        let mut pile = pile.lock();
                        pile.push(item);
                        pile.len() >= max_batch_size
                    };
                    if should_flush {
                        notify.notify_one();
                    }
                }
            });
        }

        {
            let pile = pile.clone();
            let delay = config.delay;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = notify.notified() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                    let batch: Vec<T> = {
                        let mut pile = pile.lock();
                        std::mem::take(&mut *pile)
                    };
                    if !batch.is_empty() {
                        handler.handle_batch(batch).await;
                    }
                }
            });
        }

        Self { sender: tx }
    }

    pub async fn publish(&self, item: T) -> HubResult<()> {
        self.sender
            .send(item)
            .await
            .map_err(|_| HubError::internal("transit endpoint consumer task has stopped"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex as AsyncMutex;

    struct CollectingHandler {
        seen: Arc<AsyncMutex<Vec<Vec<i32>>>>,
    }

    #[async_trait]
    impl BatchHandler<i32> for CollectingHandler {
        async fn handle_batch(&self, batch: Vec<i32>) {
            self.seen.lock().await.push(batch);
        }
    }

    #[tokio::test]
    async fn flushes_on_max_batch_size_without_waiting_for_delay() {
        let seen = Arc::new(AsyncMutex::new(Vec::new()));
        let handler = Arc::new(CollectingHandler { seen: seen.clone() });
        let endpoint = TransitEndpoint::spawn(BatchConfig::new(3, Duration::from_secs(60)), handler);
        for i in 0..3 {
            endpoint.publish(i).await.unwrap();
        }
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if !seen.lock().await.is_empty() {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        let batches = seen.lock().await;
        assert_eq!(batches[0].len(), 3);
    }

    #[tokio::test]
    async fn flushes_on_delay_even_below_max_batch_size() {
        let seen = Arc::new(AsyncMutex::new(Vec::new()));
        let handler = Arc::new(CollectingHandler { seen: seen.clone() });
        let endpoint = TransitEndpoint::spawn(BatchConfig::new(100, Duration::from_millis(20)), handler);
        endpoint.publish(1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let batches = seen.lock().await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec![1]);
    }
}
