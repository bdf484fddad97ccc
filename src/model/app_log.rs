use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Unknown,
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

/// A log line bound to an app and optionally to a sequence. `app_logs` may be
/// stored in a capped collection (§6) — callers must not rely on arbitrarily
/// long retention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppLog {
    pub id: String,
    pub app_id: String,
    #[serde(default)]
    pub sequence_id: Option<String>,
    pub severity: Severity,
    pub body: String,
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
    pub t: i64,
}

impl AppLog {
    pub fn new(app_id: &str, sequence_id: Option<String>, severity: Severity, body: impl Into<String>, t: i64) -> Self {
        Self {
            id: super::new_id(),
            app_id: app_id.to_string(),
            sequence_id,
            severity,
            body: body.into(),
            extra: HashMap::new(),
            t,
        }
    }
}
