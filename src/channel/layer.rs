use super::connection::GroupMessage;
use super::{internal_topic, message_channel, Connection, INTERNAL_TOPIC};
use crate::backplane::Backplane;
use crate::error::HubResult;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Routes group traffic to locally-held [`Connection`]s and relays disconnect
/// requests across hub instances, addressed directly to the owning layer's
/// [`internal_topic`] once that ownership is known, and over the shared
/// [`INTERNAL_TOPIC`] otherwise (§4.2).
pub struct ChannelLayer {
    pub id: String,
    backplane: Arc<dyn Backplane>,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
    /// Best-effort cache of which layer owns a connection this process doesn't
    /// hold locally, learned from ownership announcements on [`INTERNAL_TOPIC`].
    remote_owners: Mutex<HashMap<String, String>>,
}

impl ChannelLayer {
    /// Builds a layer and spawns its internal-topic listeners: the shared
    /// [`INTERNAL_TOPIC`] (ownership announcements and the no-known-owner
    /// broadcast fallback) and this layer's own [`internal_topic`] (directed
    /// close requests). The returned `Arc` is what callers hand around; the
    /// listener tasks hold their own weak-free clone and run for the lifetime
    /// of the process.
    pub async fn spawn(backplane: Arc<dyn Backplane>) -> HubResult<Arc<Self>> {
        let id = crate::model::new_id();
        let layer = Arc::new(Self {
            id: id.clone(),
            backplane: backplane.clone(),
            connections: Mutex::new(HashMap::new()),
            remote_owners: Mutex::new(HashMap::new()),
        });

        let mut shared = backplane.subscribe(INTERNAL_TOPIC).await?;
        let weak = Arc::downgrade(&layer);
        tokio::spawn(async move {
            while let Some(payload) = shared.recv().await {
                let Some(layer) = weak.upgrade() else { break };
                layer.handle_internal_message(&payload);
            }
        });

        let mut directed = backplane.subscribe(&internal_topic(&id)).await?;
        let weak = Arc::downgrade(&layer);
        tokio::spawn(async move {
            while let Some(payload) = directed.recv().await {
                let Some(layer) = weak.upgrade() else { break };
                layer.handle_internal_message(&payload);
            }
        });

        Ok(layer)
    }

    fn handle_internal_message(&self, payload: &Value) {
        match payload.get("type").and_then(Value::as_str) {
            Some("connection_registered") => {
                if let (Some(connection_uuid), Some(layer_id)) = (
                    payload.get("connection_uuid").and_then(Value::as_str),
                    payload.get("layer_id").and_then(Value::as_str),
                ) {
                    if layer_id != self.id {
                        self.remote_owners.lock().insert(connection_uuid.to_string(), layer_id.to_string());
                    }
                }
            }
            Some("connection_unregistered") => {
                if let Some(connection_uuid) = payload.get("connection_uuid").and_then(Value::as_str) {
                    self.remote_owners.lock().remove(connection_uuid);
                }
            }
            _ => {
                if let Some(connection_uuid) = payload.get("close_connection_uuid").and_then(Value::as_str) {
                    self.close_local(connection_uuid);
                }
            }
        }
    }

    /// Registers a new local connection and returns both its handle and the
    /// receiver its writer loop should drain. Announces ownership on
    /// [`INTERNAL_TOPIC`] so other layers can address a future
    /// `close_connection` for it directly rather than broadcasting.
    pub fn register(&self, connection_uuid: String) -> (Arc<Connection>, mpsc::Receiver<GroupMessage>) {
        let (tx, rx) = mpsc::channel(crate::backplane::SUBSCRIBER_MAILBOX_CAPACITY);
        let conn = Arc::new(Connection::new(connection_uuid.clone(), tx, self.backplane.clone()));
        self.connections.lock().insert(connection_uuid.clone(), conn.clone());
        self.announce(serde_json::json!({
            "type": "connection_registered",
            "connection_uuid": connection_uuid,
            "layer_id": self.id,
        }));
        (conn, rx)
    }

    pub fn unregister(&self, connection_uuid: &str) {
        self.connections.lock().remove(connection_uuid);
        self.announce(serde_json::json!({
            "type": "connection_unregistered",
            "connection_uuid": connection_uuid,
        }));
    }

    /// Fire-and-forget publish to the shared topic; `register`/`unregister`
    /// are synchronous call sites, so the publish runs on its own task.
    fn announce(&self, payload: Value) {
        let backplane = self.backplane.clone();
        tokio::spawn(async move {
            let _ = backplane.publish(INTERNAL_TOPIC, payload).await;
        });
    }

    pub fn local_connection(&self, connection_uuid: &str) -> Option<Arc<Connection>> {
        self.connections.lock().get(connection_uuid).cloned()
    }

    pub async fn group_send(&self, group: &str, payload: Value) -> HubResult<()> {
        self.backplane.publish(&message_channel(group), payload).await
    }

    pub async fn groups_send(&self, groups: &[String], payload: Value) -> HubResult<()> {
        for group in groups {
            self.group_send(group, payload.clone()).await?;
        }
        Ok(())
    }

    /// Closes `connection_uuid` if it's local; otherwise addresses the close
    /// request to the layer that announced ownership of it, or broadcasts on
    /// the shared topic if no announcement has been seen yet (§4.2, §6,
    /// DESIGN.md on the original `close_connection` addressing bug this
    /// replaces).
    pub async fn close_connection(&self, connection_uuid: &str) -> HubResult<()> {
        if self.close_local(connection_uuid) {
            return Ok(());
        }
        let target = match self.remote_owners.lock().get(connection_uuid).cloned() {
            Some(layer_id) => internal_topic(&layer_id),
            None => INTERNAL_TOPIC.to_string(),
        };
        self.backplane
            .publish(&target, serde_json::json!({ "close_connection_uuid": connection_uuid }))
            .await
    }

    fn close_local(&self, connection_uuid: &str) -> bool {
        if let Some(conn) = self.connections.lock().get(connection_uuid) {
            debug!(connection_uuid, "closing local connection");
            conn.request_close();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backplane::InMemoryBackplane;

    #[tokio::test]
    async fn group_send_reaches_a_joined_local_connection() {
        let backplane = Arc::new(InMemoryBackplane::new());
        let layer = ChannelLayer::spawn(backplane).await.unwrap();
        let (conn, mut rx) = layer.register("C1".into());
        conn.add_to_group("a/app1").await.unwrap();
        layer.group_send("a/app1", serde_json::json!({"n": 1})).await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.topic, "a/app1");
    }

    #[tokio::test]
    async fn close_connection_is_local_when_present() {
        let backplane = Arc::new(InMemoryBackplane::new());
        let layer = ChannelLayer::spawn(backplane).await.unwrap();
        let (conn, _rx) = layer.register("C1".into());
        layer.close_connection("C1").await.unwrap();
        conn.closed().await;
    }

    #[tokio::test]
    async fn close_connection_broadcasts_when_not_local() {
        let backplane = Arc::new(InMemoryBackplane::new());
        let layer_a = ChannelLayer::spawn(backplane.clone()).await.unwrap();
        let layer_b = ChannelLayer::spawn(backplane).await.unwrap();
        let (conn, _rx) = layer_b.register("C1".into());
        layer_a.close_connection("C1").await.unwrap();
        conn.closed().await;
    }

    #[tokio::test]
    async fn ownership_announcement_lets_a_remote_layer_address_the_owner_directly() {
        let backplane = Arc::new(InMemoryBackplane::new());
        let layer_a = ChannelLayer::spawn(backplane.clone()).await.unwrap();
        let layer_b = ChannelLayer::spawn(backplane).await.unwrap();
        let (_conn, _rx) = layer_b.register("C1".into());

        for _ in 0..200 {
            if layer_a.remote_owners.lock().contains_key("C1") {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(layer_a.remote_owners.lock().get("C1").cloned(), Some(layer_b.id.clone()));
    }
}
