use crate::error::HubError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSequenceState {
    InProgress,
    Frozen,
    Succeeded,
    Failed,
    Skipped,
    Orphaned,
}

impl EventSequenceState {
    /// Terminal states never transition out (§3 invariant).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EventSequenceState::Succeeded
                | EventSequenceState::Failed
                | EventSequenceState::Skipped
                | EventSequenceState::Orphaned
        )
    }
}

/// `expires_at` default (+3d) used when a sequence is created, matching §3.
pub const DEFAULT_SEQUENCE_TTL: chrono::Duration = chrono::Duration::days(3);

/// 24h frozen-idle window before the orphan reaper claims a sequence. See
/// DESIGN.md for why this differs from `ConnectionInfo::CONNECTION_EXPIRY`.
pub const ORPHAN_AFTER: chrono::Duration = chrono::Duration::hours(24);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventSequence {
    pub id: String,
    pub app_id: String,
    pub task_id: Option<String>,
    pub task_name: Option<String>,
    pub name: String,
    #[serde(default)]
    pub meta: Option<Value>,
    pub state: EventSequenceState,
    pub state_updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub connection_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl EventSequence {
    pub fn new(
        app_id: &str,
        task_id: Option<String>,
        task_name: Option<String>,
        name: String,
        connection_id: Option<String>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            id: super::new_id(),
            app_id: app_id.to_string(),
            task_id,
            task_name,
            name,
            meta: None,
            state: EventSequenceState::InProgress,
            state_updated_at: now,
            connection_id,
            created_at: now,
            finished_at: None,
            error: None,
            expires_at: now + DEFAULT_SEQUENCE_TTL,
        }
    }

    /// Disconnect freezes any `in_progress` sequence owned by the dropped
    /// connection (§4.4, §8 "Disconnect freezes").
    pub fn freeze(&mut self, now: chrono::DateTime<chrono::Utc>) -> bool {
        if self.state == EventSequenceState::InProgress {
            self.state = EventSequenceState::Frozen;
            self.state_updated_at = now;
            true
        } else {
            false
        }
    }

    /// A published event implies the agent is alive again (§4.5 step 5,
    /// §8 "Event publish unfreezes").
    pub fn unfreeze(&mut self, now: chrono::DateTime<chrono::Utc>) -> bool {
        if self.state == EventSequenceState::Frozen {
            self.state = EventSequenceState::InProgress;
            self.state_updated_at = now;
            true
        } else {
            false
        }
    }

    pub fn abandon(&mut self, now: chrono::DateTime<chrono::Utc>) -> Result<(), HubError> {
        if self.state != EventSequenceState::Frozen {
            return Err(HubError::conflict(format!(
                "sequence {} is not frozen, cannot abandon",
                self.id
            )));
        }
        self.state = EventSequenceState::Orphaned;
        self.state_updated_at = now;
        Ok(())
    }

    pub fn orphan_if_stale(&mut self, now: chrono::DateTime<chrono::Utc>) -> bool {
        if self.state == EventSequenceState::Frozen && now - self.state_updated_at >= ORPHAN_AFTER {
            self.state = EventSequenceState::Orphaned;
            self.state_updated_at = now;
            true
        } else {
            false
        }
    }

    /// `finish_sequence` from §4.5. Rejects with 409 if already terminal;
    /// always wipes `meta` (open question in §9, preserved as specified).
    pub fn finish(
        &mut self,
        error_message: Option<String>,
        is_skipped: bool,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), HubError> {
        if self.state.is_terminal() {
            return Err(HubError::conflict(format!(
                "sequence {} is already finished",
                self.id
            )));
        }
        self.finished_at = Some(now);
        self.error = error_message.clone();
        self.state_updated_at = now;
        self.state = if is_skipped {
            EventSequenceState::Skipped
        } else if error_message.is_some() {
            EventSequenceState::Failed
        } else {
            EventSequenceState::Succeeded
        };
        // Deliberate wipe of progress meta on finish — see DESIGN.md.
        self.meta = Some(Value::Object(Default::default()));
        Ok(())
    }

    /// The specific stop event's `event_type` emitted alongside the generic
    /// `stop` event (§4.5 step 5). Only defined for terminal states reachable
    /// through `finish` — the newer stop-event semantics from §9.
    pub fn specific_stop_event_type(&self) -> Option<&'static str> {
        match self.state {
            EventSequenceState::Succeeded => Some("succeeded"),
            EventSequenceState::Failed => Some("failed"),
            EventSequenceState::Skipped => Some("skipped"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq() -> EventSequence {
        EventSequence::new(
            "A1",
            Some("T1".into()),
            Some("myapp/mytask".into()),
            "mytask [123]".into(),
            Some("C1".into()),
            chrono::Utc::now(),
        )
    }

    #[test]
    fn freeze_only_affects_in_progress() {
        let mut s = seq();
        assert!(s.freeze(chrono::Utc::now()));
        assert_eq!(s.state, EventSequenceState::Frozen);
        assert!(!s.freeze(chrono::Utc::now()));
    }

    #[test]
    fn terminal_states_never_transition_out() {
        let mut s = seq();
        s.finish(None, false, chrono::Utc::now()).unwrap();
        assert_eq!(s.state, EventSequenceState::Succeeded);
        assert!(s.finish(None, false, chrono::Utc::now()).is_err());
        assert!(!s.freeze(chrono::Utc::now()));
        assert!(!s.unfreeze(chrono::Utc::now()));
    }

    #[test]
    fn finish_wipes_meta() {
        let mut s = seq();
        s.meta = Some(serde_json::json!({"progress": 50}));
        s.finish(None, false, chrono::Utc::now()).unwrap();
        assert_eq!(s.meta, Some(serde_json::json!({})));
    }

    #[test]
    fn finish_with_error_is_failed() {
        let mut s = seq();
        s.finish(Some("boom".into()), false, chrono::Utc::now()).unwrap();
        assert_eq!(s.state, EventSequenceState::Failed);
        assert_eq!(s.specific_stop_event_type(), Some("failed"));
    }

    #[test]
    fn orphan_reaper_claims_stale_frozen_sequences() {
        let mut s = seq();
        let t0 = chrono::Utc::now();
        s.freeze(t0);
        assert!(!s.orphan_if_stale(t0 + chrono::Duration::hours(1)));
        assert!(s.orphan_if_stale(t0 + ORPHAN_AFTER + chrono::Duration::seconds(1)));
        assert_eq!(s.state, EventSequenceState::Orphaned);
    }

    #[test]
    fn abandon_requires_frozen() {
        let mut s = seq();
        assert!(s.abandon(chrono::Utc::now()).is_err());
        s.freeze(chrono::Utc::now());
        assert!(s.abandon(chrono::Utc::now()).is_ok());
        assert_eq!(s.state, EventSequenceState::Orphaned);
    }
}
