use super::SequenceLifecycleMessage;
use crate::channel::ChannelLayer;
use crate::model::Period;
use crate::store::Store;
use crate::transit::BatchHandler;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Fans out sequence lifecycle changes to channel-layer groups and bumps the
/// advisory counters, batched (§4.5) so a burst of updates from one agent
/// doesn't turn into a storm of individual backplane publishes. Adapted from
/// the three per-lifecycle-stage handlers (`on_sequence_created`,
/// `on_sequence_updated`, `on_sequence_finished`) this module generalizes
/// into one handler over a tagged message.
pub struct SequenceEventHandlers {
    store: Arc<dyn Store>,
    channel_layer: Arc<ChannelLayer>,
}

impl SequenceEventHandlers {
    pub fn new(store: Arc<dyn Store>, channel_layer: Arc<ChannelLayer>) -> Self {
        Self { store, channel_layer }
    }

    fn operator_group(app_id: &str) -> String {
        format!("m/app/{app_id}")
    }

    fn sequence_group(sequence_id: &str) -> String {
        format!("m/sequence/{sequence_id}")
    }

    fn bump(&self, subject: &str) {
        for period in Period::ALL {
            let now = chrono::Utc::now();
            let bucket = period.bucket(now);
            if let Err(err) = self.store.increment_counter(subject, period, &bucket, 1) {
                warn!(subject, ?period, error = %err, "failed to increment counter");
            }
        }
    }

    fn bump_with_app_and_task_variants(&self, base: &str, seq: &crate::model::EventSequence) {
        self.bump(base);
        self.bump(&format!("{base}/app/{}", seq.app_id));
        if let Some(task_id) = &seq.task_id {
            self.bump(&format!("{base}/task/{task_id}"));
        }
    }
}

#[async_trait]
impl BatchHandler<SequenceLifecycleMessage> for SequenceEventHandlers {
    async fn handle_batch(&self, batch: Vec<SequenceLifecycleMessage>) {
        for message in batch {
            match message {
                SequenceLifecycleMessage::Created(seq) => {
                    self.bump_with_app_and_task_variants("sequences", &seq);
                    let payload = serde_json::json!({"type": "sequence", "event": "new", "sequence_id": seq.id});
                    let _ = self.channel_layer.group_send(&Self::operator_group(&seq.app_id), payload).await;
                }
                SequenceLifecycleMessage::Updated(seq) => {
                    let payload = serde_json::json!({"type": "sequence", "event": "updated", "sequence_id": seq.id});
                    let _ = self
                        .channel_layer
                        .groups_send(&[Self::sequence_group(&seq.id), Self::operator_group(&seq.app_id)], payload)
                        .await;
                }
                SequenceLifecycleMessage::Finished(seq) => {
                    self.bump("finished_sequences");
                    if seq.error.is_some() {
                        self.bump_with_app_and_task_variants("failed_sequences", &seq);
                    }
                    let payload =
                        serde_json::json!({"type": "sequence", "event": "finished", "sequence_id": seq.id, "error": seq.error});
                    let _ = self.channel_layer.group_send(&Self::operator_group(&seq.app_id), payload).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backplane::InMemoryBackplane;
    use crate::model::{Application, EventSequence};
    use crate::store::SqliteStore;

    #[tokio::test]
    async fn created_message_bumps_counters_and_fans_out() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let app = Application::new("billing", "Billing");
        store.create_application(&app).unwrap();
        let backplane = Arc::new(InMemoryBackplane::new());
        let layer = ChannelLayer::spawn(backplane).await.unwrap();
        let (conn, mut rx) = layer.register("C1".into());
        conn.add_to_group(&SequenceEventHandlers::operator_group(&app.id)).await.unwrap();

        let handlers = SequenceEventHandlers::new(store.clone(), layer);
        let seq = EventSequence::new(&app.id, None, None, "run [1]".into(), None, chrono::Utc::now());
        handlers.handle_batch(vec![SequenceLifecycleMessage::Created(seq.clone())]).await;

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.topic, format!("m/app/{}", app.id));
        assert_eq!(msg.payload["event"], "new");
        let counters = store.list_counters("sequences").unwrap();
        assert!(!counters.is_empty());
    }

    #[tokio::test]
    async fn finished_with_error_bumps_failed_sequences_too() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let app = Application::new("billing", "Billing");
        store.create_application(&app).unwrap();
        let backplane = Arc::new(InMemoryBackplane::new());
        let layer = ChannelLayer::spawn(backplane).await.unwrap();

        let handlers = SequenceEventHandlers::new(store.clone(), layer);
        let mut seq = EventSequence::new(&app.id, None, None, "run [1]".into(), None, chrono::Utc::now());
        seq.error = Some("boom".into());
        handlers.handle_batch(vec![SequenceLifecycleMessage::Finished(seq)]).await;

        assert!(!store.list_counters("finished_sequences").unwrap().is_empty());
        assert!(!store.list_counters("failed_sequences").unwrap().is_empty());
    }

    #[tokio::test]
    async fn updated_message_fans_out_to_the_sequence_and_app_groups_without_bumping_counters() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let app = Application::new("billing", "Billing");
        store.create_application(&app).unwrap();
        let backplane = Arc::new(InMemoryBackplane::new());
        let layer = ChannelLayer::spawn(backplane).await.unwrap();
        let (conn, mut rx) = layer.register("C1".into());
        let seq = EventSequence::new(&app.id, None, None, "run [1]".into(), None, chrono::Utc::now());
        conn.add_to_group(&SequenceEventHandlers::sequence_group(&seq.id)).await.unwrap();

        let handlers = SequenceEventHandlers::new(store.clone(), layer);
        handlers.handle_batch(vec![SequenceLifecycleMessage::Updated(seq.clone())]).await;

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.topic, format!("m/sequence/{}", seq.id));
        assert_eq!(msg.payload["event"], "updated");
    }
}
