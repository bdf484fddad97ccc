//! Pluggable pub/sub fabric underneath the channel layer (§4.1). The in-memory
//! backend is the default; a distributed backend only has to satisfy the same
//! trait to let a fleet span more than one hub process.

mod memory;

pub use memory::InMemoryBackplane;

use crate::error::HubResult;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

/// A subscription handle. Dropping it unregisters the receiver from its
/// channel — callers don't need an explicit `unsubscribe` call.
pub struct Subscription {
    pub(crate) receiver: mpsc::Receiver<Value>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Value> {
        self.receiver.recv().await
    }
}

/// Bound on a single subscriber's mailbox before publishes to it start being
/// dropped with a warning rather than backing up the publisher (§4.1, §5:
/// "no CPU-bound section may hold a lock across a suspension point" — a full
/// mailbox must never make `publish` block on a slow subscriber).
pub const SUBSCRIBER_MAILBOX_CAPACITY: usize = 256;

/// Ceiling the caller should apply around [`Backplane::ping`] — a backend
/// that can't answer within this window is to be treated as down.
pub const PING_TIMEOUT: Duration = Duration::from_millis(500);

#[async_trait]
pub trait Backplane: Send + Sync + 'static {
    async fn publish(&self, channel: &str, payload: Value) -> HubResult<()>;

    async fn publish_many(&self, items: &[(String, Value)]) -> HubResult<()> {
        for (channel, payload) in items {
            self.publish(channel, payload.clone()).await?;
        }
        Ok(())
    }

    /// Registers a new subscriber for `channel`. Multiple subscriptions on
    /// the same channel are independent — each gets its own copy of every
    /// publish.
    async fn subscribe(&self, channel: &str) -> HubResult<Subscription>;

    /// Liveness probe, expected to resolve well inside [`PING_TIMEOUT`].
    async fn ping(&self) -> HubResult<()>;
}
