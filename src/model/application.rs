use serde::{Deserialize, Serialize};

/// A fleet member. `name` is the unique, lowercase identifier applications
/// authenticate and are addressed as; `display_name` is free text for humans.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Application {
    pub id: String,
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub access_key: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Application {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: super::new_id(),
            name: name.into(),
            display_name: display_name.into(),
            tags: Vec::new(),
            access_key: super::new_id(),
            disabled: false,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Soft-delete: rename with a prefix + timestamp so the unique `name`
    /// index frees up immediately, matching the task/application deletion
    /// convention described in the data model.
    pub fn soft_delete(&mut self, now: chrono::DateTime<chrono::Utc>) {
        self.deleted_at = Some(now);
        self.name = format!("deleted_{}_{}", now.timestamp(), self.name);
        self.disabled = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_delete_frees_the_name() {
        let mut app = Application::new("billing", "Billing Service");
        let original_name = app.name.clone();
        app.soft_delete(chrono::Utc::now());
        assert!(app.is_deleted());
        assert_ne!(app.name, original_name);
        assert!(app.disabled);
    }
}
