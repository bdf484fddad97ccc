use crate::clock::Clock;
use crate::config::HangingConnectionPolicy;
use crate::error::HubResult;
use crate::store::Store;
use std::sync::Arc;
use tracing::{info, warn};

/// Process-boot cleanup (§1A): a prior process crash can leave
/// `ConnectionInfo` rows marked `is_connected = true` with no socket on the
/// other end. Called once during startup, before the gateway starts
/// accepting new connections, so a freshly-booted hub never reports a dead
/// agent as live.
///
/// Under `HangingConnectionPolicy::LogOnly` the rows are left exactly as
/// found; an operator reads the log line and decides whether to intervene
/// by hand before the hub ever flips a connection or freezes a sequence.
pub async fn cleanup_hanging_connections(
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    policy: HangingConnectionPolicy,
) -> HubResult<usize> {
    let now = clock.now();
    let hanging = store.list_connected()?;

    if policy == HangingConnectionPolicy::LogOnly {
        if !hanging.is_empty() {
            warn!(count = hanging.len(), "found hanging connections from a previous process (log_only policy, not touching them)");
        }
        return Ok(hanging.len());
    }

    let mut cleaned = 0;
    for mut conn in hanging {
        conn.mark_disconnected(now);
        if let Err(err) = store.upsert_connection(&conn) {
            warn!(connection_uuid = %conn.connection_uuid, error = %err, "failed to mark hanging connection disconnected");
            continue;
        }
        for mut seq in store.list_in_progress_for_connection(&conn.connection_uuid)? {
            let expected = seq.state_updated_at;
            if seq.freeze(now) {
                let _ = store.update_sequence_if_unchanged(&seq, expected);
            }
        }
        cleaned += 1;
    }
    if cleaned > 0 {
        info!(cleaned, "cleaned up hanging connections from a previous process");
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::model::{ApplicationClientInfo, ConnectionInfo, EventSequence, EventSequenceState};
    use crate::store::SqliteStore;

    fn hello(uuid: &str) -> ApplicationClientInfo {
        ApplicationClientInfo {
            connection_uuid: uuid.to_string(),
            name: "agent".into(),
            version: "1.0".into(),
            compatibility_key: "k1".into(),
            os_info: "linux".into(),
            machine_id: "m1".into(),
            instance_id: None,
            subscriptions: vec![],
        }
    }

    #[tokio::test]
    async fn marks_hanging_connections_disconnected_and_freezes_their_sequences() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let now = clock.now();

        let conn = ConnectionInfo::upsert_from_hello(None, &hello("U1"), "A1", "1.1.1.1", now);
        store.upsert_connection(&conn).unwrap();

        let mut seq = EventSequence::new("A1", None, None, "run [1]".into(), Some("U1".into()), now);
        seq.state = EventSequenceState::InProgress;
        store.create_sequence(&seq).unwrap();

        let cleaned = cleanup_hanging_connections(store.clone(), clock, HangingConnectionPolicy::Remove)
            .await
            .unwrap();
        assert_eq!(cleaned, 1);

        let reread_conn = store.get_connection("U1").unwrap().unwrap();
        assert!(!reread_conn.is_connected);

        let reread_seq = store.get_sequence(&seq.id).unwrap().unwrap();
        assert_eq!(reread_seq.state, EventSequenceState::Frozen);
    }

    #[tokio::test]
    async fn leaves_already_disconnected_connections_alone() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let mut conn = ConnectionInfo::upsert_from_hello(None, &hello("U1"), "A1", "1.1.1.1", clock.now());
        conn.mark_disconnected(clock.now());
        store.upsert_connection(&conn).unwrap();

        let cleaned = cleanup_hanging_connections(store, clock, HangingConnectionPolicy::Remove)
            .await
            .unwrap();
        assert_eq!(cleaned, 0);
    }

    #[tokio::test]
    async fn log_only_policy_leaves_hanging_rows_untouched() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let now = clock.now();

        let conn = ConnectionInfo::upsert_from_hello(None, &hello("U1"), "A1", "1.1.1.1", now);
        store.upsert_connection(&conn).unwrap();

        let found = cleanup_hanging_connections(store.clone(), clock, HangingConnectionPolicy::LogOnly)
            .await
            .unwrap();
        assert_eq!(found, 1);

        let reread_conn = store.get_connection("U1").unwrap().unwrap();
        assert!(reread_conn.is_connected);
    }
}
