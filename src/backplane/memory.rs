use super::{Backplane, Subscription, SUBSCRIBER_MAILBOX_CAPACITY};
use crate::error::HubResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::warn;

/// Single-process pub/sub: a map of channel name to the list of subscriber
/// mailboxes currently registered on it. Good enough for a standalone hub;
/// a distributed deployment swaps this for a backend that fans the same
/// traffic out across processes (§4.1).
#[derive(Default)]
pub struct InMemoryBackplane {
    channels: Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>,
}

impl InMemoryBackplane {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backplane for InMemoryBackplane {
    async fn publish(&self, channel: &str, payload: Value) -> HubResult<()> {
        // Copy the subscriber list out before sending so the lock is never
        // held across an await point.
        let senders: Vec<mpsc::Sender<Value>> = {
            let mut channels = self.channels.lock();
            if let Some(subs) = channels.get_mut(channel) {
                subs.retain(|s| !s.is_closed());
                subs.clone()
            } else {
                Vec::new()
            }
        };
        for sender in senders {
            if sender.try_send(payload.clone()).is_err() {
                warn!(channel, "backplane subscriber mailbox full or closed, dropping message");
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> HubResult<Subscription> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_MAILBOX_CAPACITY);
        self.channels.lock().entry(channel.to_string()).or_default().push(tx);
        Ok(Subscription { receiver: rx })
    }

    async fn ping(&self) -> HubResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_payload() {
        let bp = InMemoryBackplane::new();
        let mut sub = bp.subscribe("a/app1").await.unwrap();
        bp.publish("a/app1", serde_json::json!({"hello": "world"})).await.unwrap();
        let msg = sub.recv().await.unwrap();
        assert_eq!(msg, serde_json::json!({"hello": "world"}));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_a_no_op() {
        let bp = InMemoryBackplane::new();
        bp.publish("nobody/listening", serde_json::json!(1)).await.unwrap();
    }

    #[tokio::test]
    async fn independent_subscriptions_each_get_a_copy() {
        let bp = InMemoryBackplane::new();
        let mut sub_a = bp.subscribe("m/ops").await.unwrap();
        let mut sub_b = bp.subscribe("m/ops").await.unwrap();
        bp.publish("m/ops", serde_json::json!("ping")).await.unwrap();
        assert_eq!(sub_a.recv().await.unwrap(), serde_json::json!("ping"));
        assert_eq!(sub_b.recv().await.unwrap(), serde_json::json!("ping"));
    }

    #[tokio::test]
    async fn ping_resolves() {
        let bp = InMemoryBackplane::new();
        bp.ping().await.unwrap();
    }
}
