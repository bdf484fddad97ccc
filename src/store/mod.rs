//! The persistence boundary (§3, §5). Every entity in [`crate::model`] is
//! read and written exclusively through [`Store`] — nothing else is allowed
//! to know whether the backing engine is sqlite, Postgres, or a mock.
//!
//! Methods are plain synchronous calls, matching the teacher's own `Registry`
//! pattern: callers on the async side run them through `tokio::task::spawn_blocking`
//! rather than the trait itself being `async_trait`, since the only real
//! implementation (sqlite) has no async I/O to yield on anyway.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::HubResult;
use crate::model::{
    Application, ApplicationTask, ConnectionInfo, Counter, Event, EventSequence, OneTimeSecurityCode, Period,
    ServerRecord,
};
use chrono::{DateTime, Utc};

/// Result of a conditional update: whether a row actually matched and changed.
/// Mirrors the teacher's `delete_instance_if_migration`-style "return whether
/// anything happened" convention instead of raising on zero rows affected.
pub type Applied = bool;

pub trait Store: Send + Sync + 'static {
    // Applications
    fn create_application(&self, app: &Application) -> HubResult<()>;
    fn get_application(&self, id: &str) -> HubResult<Option<Application>>;
    fn get_application_by_name(&self, name: &str) -> HubResult<Option<Application>>;
    fn update_application(&self, app: &Application) -> HubResult<()>;
    fn list_applications(&self, include_deleted: bool) -> HubResult<Vec<Application>>;

    // Tasks
    fn create_task(&self, task: &ApplicationTask) -> HubResult<()>;
    fn get_task(&self, id: &str) -> HubResult<Option<ApplicationTask>>;
    fn get_task_by_qualified_name(&self, qualified_name: &str) -> HubResult<Option<ApplicationTask>>;
    fn update_task(&self, task: &ApplicationTask) -> HubResult<()>;
    fn list_tasks_for_app(&self, app_id: &str, include_deleted: bool) -> HubResult<Vec<ApplicationTask>>;

    // Connections
    fn upsert_connection(&self, info: &ConnectionInfo) -> HubResult<()>;
    fn get_connection(&self, connection_uuid: &str) -> HubResult<Option<ConnectionInfo>>;
    fn list_connected(&self) -> HubResult<Vec<ConnectionInfo>>;
    fn delete_connection(&self, connection_uuid: &str) -> HubResult<()>;

    // Sequences
    fn create_sequence(&self, seq: &EventSequence) -> HubResult<()>;
    fn get_sequence(&self, id: &str) -> HubResult<Option<EventSequence>>;
    /// Persists `seq` only if the stored row's `state_updated_at` still equals
    /// `expected_state_updated_at` — the optimistic-concurrency guard backing
    /// `finish_sequence`'s "already finished" 409 under concurrent writers.
    fn update_sequence_if_unchanged(
        &self,
        seq: &EventSequence,
        expected_state_updated_at: DateTime<Utc>,
    ) -> HubResult<Applied>;
    fn list_frozen_for_connection(&self, connection_id: &str) -> HubResult<Vec<EventSequence>>;
    /// In-progress sequences owned by `connection_id` — the set a disconnect
    /// handler freezes (§4.4 "Disconnect semantics").
    fn list_in_progress_for_connection(&self, connection_id: &str) -> HubResult<Vec<EventSequence>>;
    fn list_stale_frozen(&self, before: DateTime<Utc>) -> HubResult<Vec<EventSequence>>;

    // Events
    fn insert_event(&self, event: &Event) -> HubResult<()>;
    fn list_events_for_sequence(&self, sequence_id: &str) -> HubResult<Vec<Event>>;

    // App logs
    fn insert_log(&self, log: &crate::model::AppLog) -> HubResult<()>;
    fn list_logs_for_sequence(&self, sequence_id: &str, limit: usize) -> HubResult<Vec<crate::model::AppLog>>;

    // Counters
    fn increment_counter(&self, subject: &str, period: Period, bucket: &str, by: i64) -> HubResult<i64>;
    fn list_counters(&self, subject: &str) -> HubResult<Vec<Counter>>;

    // Security codes
    fn put_security_code(&self, code: &OneTimeSecurityCode) -> HubResult<()>;
    fn get_security_code(&self, code: &str) -> HubResult<Option<OneTimeSecurityCode>>;
    fn delete_security_code(&self, code: &str) -> HubResult<()>;

    // Servers
    fn upsert_server(&self, record: &ServerRecord) -> HubResult<()>;
}
