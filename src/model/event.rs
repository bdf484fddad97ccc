use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event types the engine itself emits; agents may never publish these
/// (§3, §6, §8 "Reserved-name rejection").
pub const RESERVED_EVENT_TYPES: &[&str] = &[
    "start",
    "stop",
    "frozen",
    "unfrozen",
    "cancelled",
    "failed",
    "succeeded",
];

pub fn is_reserved_event_type(event_type: &str) -> bool {
    RESERVED_EVENT_TYPES.contains(&event_type)
}

/// An immutable fact. There is no update path — once persisted an `Event`
/// never changes (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    pub app_id: String,
    #[serde(default)]
    pub task_name: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub sequence_id: Option<String>,
    pub event_type: String,
    pub event_key: String,
    #[serde(default)]
    pub data: Value,
    pub publisher_ip: String,
    /// Microsecond timestamp, matching §3's `t` field.
    pub t: i64,
}

impl Event {
    /// `event_key` for a free-form (non-sequence-bound) event: `"<app_name>/_/<event_type>"`.
    pub fn free_form_key(app_name: &str, event_type: &str) -> String {
        format!("{app_name}/_/{event_type}")
    }

    /// `event_key` for a sequence-bound event: `"<task_name>/<event_type>"`.
    pub fn sequence_key(task_name: &str, event_type: &str) -> String {
        format!("{task_name}/{event_type}")
    }

    /// The stop-event key shape used by `finish_sequence` (§4.5 step 5):
    /// `"<stop_type>@<task_name>"` when task-bound, else the bare type.
    pub fn stop_key(stop_type: &str, task_name: Option<&str>) -> String {
        match task_name {
            Some(task_name) => format!("{stop_type}@{task_name}"),
            None => stop_type.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_event_types_are_rejected() {
        for t in RESERVED_EVENT_TYPES {
            assert!(is_reserved_event_type(t));
        }
        assert!(!is_reserved_event_type("progress"));
    }

    #[test]
    fn free_form_key_shape() {
        assert_eq!(Event::free_form_key("myapp", "progress"), "myapp/_/progress");
    }

    #[test]
    fn sequence_key_shape() {
        assert_eq!(Event::sequence_key("myapp/mytask", "start"), "myapp/mytask/start");
    }

    #[test]
    fn stop_key_shapes() {
        assert_eq!(Event::stop_key("succeeded", Some("myapp/mytask")), "succeeded@myapp/mytask");
        assert_eq!(Event::stop_key("stop", None), "stop");
    }
}
