use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tagged union for what a task actually runs. The engine never executes this
/// itself — that's the agent's job — it only stores and serves the definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TaskBody {
    Arbitrary(serde_json::Value),
    Script(String),
    Exec { program: String, args: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskTrigger {
    Cron { expression: String },
    Event { event_key: String },
    FsNotify { path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationTask {
    pub id: String,
    pub app_id: String,
    pub name: String,
    pub qualified_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub body: TaskBody,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub triggers: Vec<TaskTrigger>,
    pub last_updated: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ApplicationTask {
    pub fn new(app_name: &str, app_id: &str, name: impl Into<String>, body: TaskBody) -> Self {
        let name = name.into();
        let qualified_name = format!("{app_name}/{name}");
        Self {
            id: super::new_id(),
            app_id: app_id.to_string(),
            name,
            qualified_name,
            description: None,
            tags: Vec::new(),
            body,
            env: HashMap::new(),
            triggers: Vec::new(),
            last_updated: chrono::Utc::now(),
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Soft-delete by renaming to free the unique `name`, per §3.
    pub fn soft_delete(&mut self, now: chrono::DateTime<chrono::Utc>) {
        self.deleted_at = Some(now);
        self.name = format!("{} (DELETED)", self.name);
        self.last_updated = now;
    }

    /// `display_name`-equivalent update: keep the old value when the patch
    /// field is `None`. The original source has a tautological assignment
    /// here (`update.x if update.x else update.x`); this is the intended
    /// "keep old on null" behavior described in DESIGN.md.
    pub fn apply_description_update(&mut self, update: Option<String>) {
        if let Some(value) = update {
            self.description = Some(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_name_joins_app_and_task() {
        let task = ApplicationTask::new("myapp", "A1", "mytask", TaskBody::Script("echo hi".into()));
        assert_eq!(task.qualified_name, "myapp/mytask");
    }

    #[test]
    fn soft_delete_renames_with_suffix() {
        let mut task = ApplicationTask::new("myapp", "A1", "mytask", TaskBody::Script("x".into()));
        task.soft_delete(chrono::Utc::now());
        assert_eq!(task.name, "mytask (DELETED)");
        assert!(task.is_deleted());
    }

    #[test]
    fn description_update_keeps_old_value_when_none() {
        let mut task = ApplicationTask::new("myapp", "A1", "t", TaskBody::Script("x".into()));
        task.description = Some("original".into());
        task.apply_description_update(None);
        assert_eq!(task.description.as_deref(), Some("original"));
        task.apply_description_update(Some("updated".into()));
        assert_eq!(task.description.as_deref(), Some("updated"));
    }
}
