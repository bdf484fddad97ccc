use super::service::SequenceService;
use crate::clock::Clock;
use crate::model::ORPHAN_AFTER;
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Polls for `Frozen` sequences that have been idle past [`ORPHAN_AFTER`] and
/// claims them (§4.5). Same `tokio::time::interval` polling-loop shape as the
/// cron-style scheduler this is adapted from, minus the cron expression
/// parsing this domain doesn't need.
pub fn spawn_orphan_reaper(
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    service: Arc<SequenceService>,
    poll_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            let now = clock.now();
            let cutoff = now - ORPHAN_AFTER;
            match store.list_stale_frozen(cutoff) {
                Ok(stale) => {
                    let mut claimed = 0;
                    for seq in &stale {
                        match service.orphan_if_stale(seq, now) {
                            Ok(true) => claimed += 1,
                            Ok(false) => {}
                            Err(err) => warn!(sequence_id = %seq.id, error = %err, "failed to orphan stale sequence"),
                        }
                    }
                    crate::health::mark_component_ok("orphan_reaper");
                    if claimed > 0 {
                        info!(claimed, "orphan reaper claimed stale frozen sequences");
                    }
                }
                Err(err) => {
                    crate::health::mark_component_error("orphan_reaper", &err);
                    warn!(error = %err, "orphan reaper failed to list stale sequences");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backplane::InMemoryBackplane;
    use crate::channel::ChannelLayer;
    use crate::clock::FixedClock;
    use crate::engine::{SequenceEventHandlers, SequenceLifecycleMessage};
    use crate::model::{Application, EventSequenceState};
    use crate::store::SqliteStore;
    use crate::transit::{BatchConfig, TransitEndpoint};

    #[tokio::test]
    async fn reaper_claims_stale_frozen_sequences() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let app = Application::new("billing", "Billing");
        store.create_application(&app).unwrap();
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let backplane = Arc::new(InMemoryBackplane::new());
        let layer = ChannelLayer::spawn(backplane).await.unwrap();
        let handlers = Arc::new(SequenceEventHandlers::new(store.clone(), layer));
        let transit: Arc<TransitEndpoint<SequenceLifecycleMessage>> =
            Arc::new(TransitEndpoint::spawn(BatchConfig::new(100, Duration::from_millis(10)), handlers));
        let service = Arc::new(SequenceService::new(store.clone(), clock.clone(), transit));

        let (seq, _) = service
            .create_sequence_and_start_event(&app, None, Some("C1".into()), "run [1]".into(), "1.1.1.1")
            .await
            .unwrap();
        let mut frozen = store.get_sequence(&seq.id).unwrap().unwrap();
        frozen.freeze(clock.now());
        store.update_sequence_if_unchanged(&frozen, seq.state_updated_at).unwrap();

        clock.advance(ORPHAN_AFTER + chrono::Duration::seconds(1));
        let handle = spawn_orphan_reaper(store.clone(), clock, service, Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        let reread = store.get_sequence(&seq.id).unwrap().unwrap();
        assert_eq!(reread.state, EventSequenceState::Orphaned);
    }
}
