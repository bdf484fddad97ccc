use super::message_channel;
use crate::backplane::Backplane;
use crate::error::HubResult;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// A message forwarded to a connection because of a group it belongs to.
/// `topic` becomes the wire frame's optional `"topic"` field (§6).
#[derive(Debug, Clone)]
pub struct GroupMessage {
    pub topic: String,
    pub payload: Value,
}

/// One connection's group memberships and the backplane plumbing that keeps
/// them live. A `Connection` owns one forwarding task per group it has
/// joined; dropping the connection (or leaving a group) stops that task.
pub struct Connection {
    pub id: String,
    outgoing: mpsc::Sender<GroupMessage>,
    backplane: Arc<dyn Backplane>,
    forwarders: Mutex<HashMap<String, JoinHandle<()>>>,
    close: Arc<Notify>,
}

impl Connection {
    pub fn new(id: String, outgoing: mpsc::Sender<GroupMessage>, backplane: Arc<dyn Backplane>) -> Self {
        Self {
            id,
            outgoing,
            backplane,
            forwarders: Mutex::new(HashMap::new()),
            close: Arc::new(Notify::new()),
        }
    }

    /// Asks the hub loop holding this connection to close the socket, used
    /// for both local and cross-instance disconnect signaling (§4.2, §6).
    pub fn request_close(&self) {
        self.close.notify_one();
    }

    /// Resolves once [`Connection::request_close`] has been called. The hub's
    /// dispatcher loop selects on this alongside inbound frames.
    pub async fn closed(&self) {
        self.close.notified().await;
    }

    /// Joins `group`, spawning a forwarder task that relays every message
    /// published to it until the group is left or the connection is dropped.
    pub async fn add_to_group(&self, group: &str) -> HubResult<()> {
        if self.forwarders.lock().contains_key(group) {
            return Ok(());
        }
        let mut subscription = self.backplane.subscribe(&message_channel(group)).await?;
        let outgoing = self.outgoing.clone();
        let topic = group.to_string();
        let handle = tokio::spawn(async move {
            while let Some(payload) = subscription.recv().await {
                if outgoing
                    .send(GroupMessage {
                        topic: topic.clone(),
                        payload,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
        self.forwarders.lock().insert(group.to_string(), handle);
        Ok(())
    }

    pub fn remove_from_group(&self, group: &str) {
        if let Some(handle) = self.forwarders.lock().remove(group) {
            handle.abort();
        }
    }

    pub async fn add_event(&self, event_key: &str) -> HubResult<()> {
        self.add_to_group(&format!("e/key/{event_key}")).await
    }

    /// Detaches the event subscription. The implementation this is adapted
    /// from had this method silently reuse `add_event`'s body, so it never
    /// actually unsubscribed; this one genuinely removes the forwarder.
    pub fn remove_event(&self, event_key: &str) {
        self.remove_from_group(&format!("e/key/{event_key}"));
    }

    pub fn groups(&self) -> Vec<String> {
        self.forwarders.lock().keys().cloned().collect()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for (_, handle) in self.forwarders.lock().drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backplane::InMemoryBackplane;

    #[tokio::test]
    async fn group_membership_forwards_published_messages() {
        let backplane = Arc::new(InMemoryBackplane::new());
        let (tx, mut rx) = mpsc::channel(16);
        let conn = Connection::new("C1".into(), tx, backplane.clone());
        conn.add_to_group("a/app1").await.unwrap();
        backplane
            .publish(&message_channel("a/app1"), serde_json::json!({"hello": 1}))
            .await
            .unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.topic, "a/app1");
        assert_eq!(msg.payload, serde_json::json!({"hello": 1}));
    }

    #[tokio::test]
    async fn remove_event_actually_unsubscribes() {
        let backplane = Arc::new(InMemoryBackplane::new());
        let (tx, mut rx) = mpsc::channel(16);
        let conn = Connection::new("C1".into(), tx, backplane.clone());
        conn.add_event("myapp/mytask/start").await.unwrap();
        conn.remove_event("myapp/mytask/start");
        // Give the forwarder task a moment to actually abort.
        tokio::task::yield_now().await;
        backplane
            .publish(&message_channel("e/key/myapp/mytask/start"), serde_json::json!(1))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }
}
