use super::SequenceLifecycleMessage;
use crate::clock::Clock;
use crate::error::{HubError, HubResult};
use crate::model::{Application, ApplicationTask, Event, EventSequence};
use crate::store::Store;
use crate::transit::TransitEndpoint;
use serde_json::Value;
use std::sync::Arc;

/// How many times a conditional sequence update retries against a concurrent
/// writer before giving up and reporting a conflict. Sequences are touched by
/// at most a handful of writers (the owning agent, the orphan reaper, an
/// operator's manual abandon) so this is generous headroom, not a real limit.
const MAX_OPTIMISTIC_RETRIES: u32 = 5;

pub struct SequenceService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    transit: Arc<TransitEndpoint<SequenceLifecycleMessage>>,
}

impl SequenceService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, transit: Arc<TransitEndpoint<SequenceLifecycleMessage>>) -> Self {
        Self { store, clock, transit }
    }

    /// `create_sequence_and_start_event` (§4.5 step 1): opens a new sequence
    /// and immediately records its implicit `start` event.
    pub async fn create_sequence_and_start_event(
        &self,
        app: &Application,
        task: Option<&ApplicationTask>,
        connection_id: Option<String>,
        name: String,
        publisher_ip: &str,
    ) -> HubResult<(EventSequence, Event)> {
        let now = self.clock.now();
        let seq = EventSequence::new(
            &app.id,
            task.map(|t| t.id.clone()),
            task.map(|t| t.qualified_name.clone()),
            name,
            connection_id,
            now,
        );
        self.store.create_sequence(&seq)?;

        let event_key = match &seq.task_name {
            Some(task_name) => Event::sequence_key(task_name, "start"),
            None => Event::free_form_key(&app.name, "start"),
        };
        let event = Event {
            id: crate::model::new_id(),
            app_id: app.id.clone(),
            task_name: seq.task_name.clone(),
            task_id: seq.task_id.clone(),
            sequence_id: Some(seq.id.clone()),
            event_type: "start".to_string(),
            event_key,
            data: Value::Null,
            publisher_ip: publisher_ip.to_string(),
            t: now.timestamp_micros(),
        };
        self.store.insert_event(&event)?;
        self.transit.publish(SequenceLifecycleMessage::Created(seq.clone())).await?;
        Ok((seq, event))
    }

    /// `finish_sequence` (§4.5 step 5). Retries the conditional update against
    /// concurrent writers; an already-terminal sequence fails fast with a
    /// conflict rather than retrying (there's nothing a retry could fix).
    pub async fn finish_sequence(
        &self,
        sequence_id: &str,
        error_message: Option<String>,
        is_skipped: bool,
        publisher_ip: &str,
    ) -> HubResult<(EventSequence, Vec<Event>)> {
        let mut seq = self.load_and_finish(sequence_id, error_message, is_skipped).await?;

        let now = self.clock.now();
        let mut events = Vec::new();
        if let Some(specific) = seq.specific_stop_event_type() {
            let event_key = Event::stop_key(specific, seq.task_name.as_deref());
            events.push(self.stop_event(&seq, specific, event_key, now, publisher_ip));
        }
        let generic_key = Event::stop_key("stop", seq.task_name.as_deref());
        events.push(self.stop_event(&seq, "stop", generic_key, now, publisher_ip));
        for event in &events {
            self.store.insert_event(event)?;
        }

        self.transit.publish(SequenceLifecycleMessage::Finished(seq.clone())).await?;
        Ok((seq, events))
    }

    async fn load_and_finish(
        &self,
        sequence_id: &str,
        error_message: Option<String>,
        is_skipped: bool,
    ) -> HubResult<EventSequence> {
        for _ in 0..MAX_OPTIMISTIC_RETRIES {
            let mut seq = self
                .store
                .get_sequence(sequence_id)?
                .ok_or_else(|| HubError::not_found(format!("sequence {sequence_id} not found")))?;
            let expected = seq.state_updated_at;
            let now = self.clock.now();
            seq.finish(error_message.clone(), is_skipped, now)?;
            if self.store.update_sequence_if_unchanged(&seq, expected)? {
                return Ok(seq);
            }
        }
        Err(HubError::conflict(format!(
            "sequence {sequence_id} could not be finished after {MAX_OPTIMISTIC_RETRIES} attempts due to concurrent writers"
        )))
    }

    fn stop_event(
        &self,
        seq: &EventSequence,
        event_type: &str,
        event_key: String,
        now: chrono::DateTime<chrono::Utc>,
        publisher_ip: &str,
    ) -> Event {
        Event {
            id: crate::model::new_id(),
            app_id: seq.app_id.clone(),
            task_name: seq.task_name.clone(),
            task_id: seq.task_id.clone(),
            sequence_id: Some(seq.id.clone()),
            event_type: event_type.to_string(),
            event_key,
            data: Value::Null,
            publisher_ip: publisher_ip.to_string(),
            t: now.timestamp_micros(),
        }
    }

    /// `update_sequence_meta` — replaces the sequence's `meta` object
    /// wholesale with `patch` and fans the change out (§4.5: "Replace `meta`
    /// field (entire object)").
    pub async fn update_sequence_meta(&self, sequence_id: &str, patch: Value) -> HubResult<EventSequence> {
        for _ in 0..MAX_OPTIMISTIC_RETRIES {
            let mut seq = self
                .store
                .get_sequence(sequence_id)?
                .ok_or_else(|| HubError::not_found(format!("sequence {sequence_id} not found")))?;
            if seq.state.is_terminal() {
                return Err(HubError::conflict(format!("sequence {sequence_id} is already finished")));
            }
            let expected = seq.state_updated_at;
            let now = self.clock.now();
            seq.meta = Some(patch.clone());
            seq.state_updated_at = now;
            if self.store.update_sequence_if_unchanged(&seq, expected)? {
                self.transit.publish(SequenceLifecycleMessage::Updated(seq.clone())).await?;
                return Ok(seq);
            }
        }
        Err(HubError::conflict(format!(
            "sequence {sequence_id} meta could not be updated after {MAX_OPTIMISTIC_RETRIES} attempts due to concurrent writers"
        )))
    }

    /// `orphan_if_stale` sweep result for a single sequence, applied with the
    /// same optimistic-concurrency discipline as the write paths above. Used
    /// by the orphan reaper (`reaper.rs`).
    pub fn orphan_if_stale(&self, seq: &EventSequence, now: chrono::DateTime<chrono::Utc>) -> HubResult<bool> {
        let mut updated = seq.clone();
        let expected = updated.state_updated_at;
        if !updated.orphan_if_stale(now) {
            return Ok(false);
        }
        self.store.update_sequence_if_unchanged(&updated, expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backplane::InMemoryBackplane;
    use crate::channel::ChannelLayer;
    use crate::clock::FixedClock;
    use crate::engine::SequenceEventHandlers;
    use crate::model::Application;
    use crate::store::SqliteStore;
    use crate::transit::BatchConfig;
    use std::time::Duration;

    async fn service() -> (SequenceService, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let backplane = Arc::new(InMemoryBackplane::new());
        let layer = ChannelLayer::spawn(backplane).await.unwrap();
        let handlers = Arc::new(SequenceEventHandlers::new(store.clone(), layer));
        let transit = Arc::new(TransitEndpoint::spawn(BatchConfig::new(100, Duration::from_millis(10)), handlers));
        (SequenceService::new(store.clone(), clock, transit), store)
    }

    #[tokio::test]
    async fn create_then_finish_round_trips_through_the_store() {
        let (svc, store) = service().await;
        let app = Application::new("billing", "Billing");
        store.create_application(&app).unwrap();
        let (seq, start_event) = svc
            .create_sequence_and_start_event(&app, None, Some("C1".into()), "run [1]".into(), "1.1.1.1")
            .await
            .unwrap();
        assert_eq!(start_event.event_type, "start");

        let (finished, stop_events) = svc.finish_sequence(&seq.id, None, false, "1.1.1.1").await.unwrap();
        assert_eq!(finished.state, crate::model::EventSequenceState::Succeeded);
        assert_eq!(stop_events.len(), 2);
        assert!(stop_events.iter().any(|e| e.event_type == "succeeded"));
        assert!(stop_events.iter().any(|e| e.event_type == "stop"));
    }

    #[tokio::test]
    async fn finishing_twice_is_a_conflict() {
        let (svc, store) = service().await;
        let app = Application::new("billing", "Billing");
        store.create_application(&app).unwrap();
        let (seq, _) = svc
            .create_sequence_and_start_event(&app, None, None, "run [1]".into(), "1.1.1.1")
            .await
            .unwrap();
        svc.finish_sequence(&seq.id, None, false, "1.1.1.1").await.unwrap();
        let err = svc.finish_sequence(&seq.id, None, false, "1.1.1.1").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn update_meta_replaces_the_whole_object() {
        let (svc, store) = service().await;
        let app = Application::new("billing", "Billing");
        store.create_application(&app).unwrap();
        let (seq, _) = svc
            .create_sequence_and_start_event(&app, None, None, "run [1]".into(), "1.1.1.1")
            .await
            .unwrap();
        svc.update_sequence_meta(&seq.id, serde_json::json!({"progress": 10}))
            .await
            .unwrap();
        let updated = svc
            .update_sequence_meta(&seq.id, serde_json::json!({"stage": "upload"}))
            .await
            .unwrap();
        assert_eq!(updated.meta, Some(serde_json::json!({"stage": "upload"})));
    }
}
