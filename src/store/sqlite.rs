//! rusqlite-backed [`Store`]. Each entity is kept as a JSON document in a
//! `doc` column alongside a handful of indexed columns used for lookups —
//! the same shape the teacher's `db::Registry` used for its own rows, just
//! generalized to more tables.

use super::{Applied, Store};
use crate::error::{HubError, HubResult};
use crate::model::{
    Application, ApplicationTask, AppLog, ConnectionInfo, Counter, Event, EventSequence, OneTimeSecurityCode, Period,
    ServerRecord,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> HubResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> HubResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// Additive-only migrations, matching the teacher's own policy: new
    /// tables and columns are created if missing, nothing is ever dropped or
    /// altered in place.
    fn migrate(&self) -> HubResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS applications (
                id TEXT PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                doc TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                app_id TEXT NOT NULL,
                qualified_name TEXT UNIQUE NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                doc TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS tasks_app_id ON tasks(app_id);
            CREATE TABLE IF NOT EXISTS connections (
                connection_uuid TEXT PRIMARY KEY,
                app_id TEXT NOT NULL,
                is_connected INTEGER NOT NULL,
                doc TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS sequences (
                id TEXT PRIMARY KEY,
                app_id TEXT NOT NULL,
                connection_id TEXT,
                state TEXT NOT NULL,
                state_updated_at INTEGER NOT NULL,
                doc TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS sequences_connection_id ON sequences(connection_id);
            CREATE INDEX IF NOT EXISTS sequences_state ON sequences(state);
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                app_id TEXT NOT NULL,
                sequence_id TEXT,
                t INTEGER NOT NULL,
                doc TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS events_sequence_id ON events(sequence_id);
            CREATE TABLE IF NOT EXISTS app_logs (
                id TEXT PRIMARY KEY,
                app_id TEXT NOT NULL,
                sequence_id TEXT,
                t INTEGER NOT NULL,
                doc TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS app_logs_sequence_id ON app_logs(sequence_id);
            CREATE TABLE IF NOT EXISTS counters (
                subject TEXT NOT NULL,
                period TEXT NOT NULL,
                bucket TEXT NOT NULL,
                value INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (subject, period, bucket)
            );
            CREATE TABLE IF NOT EXISTS security_codes (
                code TEXT PRIMARY KEY,
                expires_at INTEGER NOT NULL,
                doc TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS servers (
                host_ip TEXT PRIMARY KEY,
                doc TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> HubResult<String> {
    serde_json::to_string(value).map_err(|e| HubError::internal(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> HubResult<T> {
    serde_json::from_str(raw).map_err(|e| HubError::internal(e.to_string()))
}

impl Store for SqliteStore {
    fn create_application(&self, app: &Application) -> HubResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO applications (id, name, deleted, doc) VALUES (?1, ?2, ?3, ?4)",
            params![app.id, app.name, app.is_deleted() as i64, to_json(app)?],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation => {
                HubError::conflict(format!("application name {} already exists", app.name))
            }
            other => other.into(),
        })?;
        Ok(())
    }

    fn get_application(&self, id: &str) -> HubResult<Option<Application>> {
        let conn = self.conn.lock();
        let doc: Option<String> = conn
            .query_row("SELECT doc FROM applications WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        doc.map(|d| from_json(&d)).transpose()
    }

    fn get_application_by_name(&self, name: &str) -> HubResult<Option<Application>> {
        let conn = self.conn.lock();
        let doc: Option<String> = conn
            .query_row("SELECT doc FROM applications WHERE name = ?1", params![name], |row| row.get(0))
            .optional()?;
        doc.map(|d| from_json(&d)).transpose()
    }

    fn update_application(&self, app: &Application) -> HubResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE applications SET name = ?2, deleted = ?3, doc = ?4 WHERE id = ?1",
            params![app.id, app.name, app.is_deleted() as i64, to_json(app)?],
        )?;
        if changed == 0 {
            return Err(HubError::not_found(format!("application {} not found", app.id)));
        }
        Ok(())
    }

    fn list_applications(&self, include_deleted: bool) -> HubResult<Vec<Application>> {
        let conn = self.conn.lock();
        let sql = if include_deleted {
            "SELECT doc FROM applications"
        } else {
            "SELECT doc FROM applications WHERE deleted = 0"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(from_json(&row?)?);
        }
        Ok(out)
    }

    fn create_task(&self, task: &ApplicationTask) -> HubResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO tasks (id, app_id, qualified_name, deleted, doc) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![task.id, task.app_id, task.qualified_name, task.is_deleted() as i64, to_json(task)?],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation => {
                HubError::conflict(format!("task {} already exists", task.qualified_name))
            }
            other => other.into(),
        })?;
        Ok(())
    }

    fn get_task(&self, id: &str) -> HubResult<Option<ApplicationTask>> {
        let conn = self.conn.lock();
        let doc: Option<String> = conn
            .query_row("SELECT doc FROM tasks WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        doc.map(|d| from_json(&d)).transpose()
    }

    fn get_task_by_qualified_name(&self, qualified_name: &str) -> HubResult<Option<ApplicationTask>> {
        let conn = self.conn.lock();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM tasks WHERE qualified_name = ?1",
                params![qualified_name],
                |row| row.get(0),
            )
            .optional()?;
        doc.map(|d| from_json(&d)).transpose()
    }

    fn update_task(&self, task: &ApplicationTask) -> HubResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE tasks SET qualified_name = ?2, deleted = ?3, doc = ?4 WHERE id = ?1",
            params![task.id, task.qualified_name, task.is_deleted() as i64, to_json(task)?],
        )?;
        if changed == 0 {
            return Err(HubError::not_found(format!("task {} not found", task.id)));
        }
        Ok(())
    }

    fn list_tasks_for_app(&self, app_id: &str, include_deleted: bool) -> HubResult<Vec<ApplicationTask>> {
        let conn = self.conn.lock();
        let sql = if include_deleted {
            "SELECT doc FROM tasks WHERE app_id = ?1"
        } else {
            "SELECT doc FROM tasks WHERE app_id = ?1 AND deleted = 0"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![app_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(from_json(&row?)?);
        }
        Ok(out)
    }

    fn upsert_connection(&self, info: &ConnectionInfo) -> HubResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO connections (connection_uuid, app_id, is_connected, doc) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(connection_uuid) DO UPDATE SET app_id = excluded.app_id,
                is_connected = excluded.is_connected, doc = excluded.doc",
            params![info.connection_uuid, info.app_id, info.is_connected as i64, to_json(info)?],
        )?;
        Ok(())
    }

    fn get_connection(&self, connection_uuid: &str) -> HubResult<Option<ConnectionInfo>> {
        let conn = self.conn.lock();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM connections WHERE connection_uuid = ?1",
                params![connection_uuid],
                |row| row.get(0),
            )
            .optional()?;
        doc.map(|d| from_json(&d)).transpose()
    }

    fn list_connected(&self) -> HubResult<Vec<ConnectionInfo>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT doc FROM connections WHERE is_connected = 1")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(from_json(&row?)?);
        }
        Ok(out)
    }

    fn delete_connection(&self, connection_uuid: &str) -> HubResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM connections WHERE connection_uuid = ?1",
            params![connection_uuid],
        )?;
        Ok(())
    }

    fn create_sequence(&self, seq: &EventSequence) -> HubResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sequences (id, app_id, connection_id, state, state_updated_at, doc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                seq.id,
                seq.app_id,
                seq.connection_id,
                format!("{:?}", seq.state),
                seq.state_updated_at.timestamp_micros(),
                to_json(seq)?,
            ],
        )?;
        Ok(())
    }

    fn get_sequence(&self, id: &str) -> HubResult<Option<EventSequence>> {
        let conn = self.conn.lock();
        let doc: Option<String> = conn
            .query_row("SELECT doc FROM sequences WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        doc.map(|d| from_json(&d)).transpose()
    }

    fn update_sequence_if_unchanged(
        &self,
        seq: &EventSequence,
        expected_state_updated_at: DateTime<Utc>,
    ) -> HubResult<Applied> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE sequences SET connection_id = ?2, state = ?3, state_updated_at = ?4, doc = ?5
             WHERE id = ?1 AND state_updated_at = ?6",
            params![
                seq.id,
                seq.connection_id,
                format!("{:?}", seq.state),
                seq.state_updated_at.timestamp_micros(),
                to_json(seq)?,
                expected_state_updated_at.timestamp_micros(),
            ],
        )?;
        Ok(changed == 1)
    }

    fn list_frozen_for_connection(&self, connection_id: &str) -> HubResult<Vec<EventSequence>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT doc FROM sequences WHERE connection_id = ?1 AND state = 'Frozen'",
        )?;
        let rows = stmt.query_map(params![connection_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(from_json(&row?)?);
        }
        Ok(out)
    }

    fn list_in_progress_for_connection(&self, connection_id: &str) -> HubResult<Vec<EventSequence>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT doc FROM sequences WHERE connection_id = ?1 AND state = 'InProgress'",
        )?;
        let rows = stmt.query_map(params![connection_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(from_json(&row?)?);
        }
        Ok(out)
    }

    fn list_stale_frozen(&self, before: DateTime<Utc>) -> HubResult<Vec<EventSequence>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT doc FROM sequences WHERE state = 'Frozen' AND state_updated_at <= ?1",
        )?;
        let rows = stmt.query_map(params![before.timestamp_micros()], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(from_json(&row?)?);
        }
        Ok(out)
    }

    fn insert_event(&self, event: &Event) -> HubResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO events (id, app_id, sequence_id, t, doc) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![event.id, event.app_id, event.sequence_id, event.t, to_json(event)?],
        )?;
        Ok(())
    }

    fn list_events_for_sequence(&self, sequence_id: &str) -> HubResult<Vec<Event>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT doc FROM events WHERE sequence_id = ?1 ORDER BY t ASC")?;
        let rows = stmt.query_map(params![sequence_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(from_json(&row?)?);
        }
        Ok(out)
    }

    fn insert_log(&self, log: &AppLog) -> HubResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO app_logs (id, app_id, sequence_id, t, doc) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![log.id, log.app_id, log.sequence_id, log.t, to_json(log)?],
        )?;
        Ok(())
    }

    fn list_logs_for_sequence(&self, sequence_id: &str, limit: usize) -> HubResult<Vec<AppLog>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT doc FROM app_logs WHERE sequence_id = ?1 ORDER BY t ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![sequence_id, limit as i64], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(from_json(&row?)?);
        }
        Ok(out)
    }

    fn increment_counter(&self, subject: &str, period: Period, bucket: &str, by: i64) -> HubResult<i64> {
        let conn = self.conn.lock();
        let period_str = format!("{period:?}");
        conn.execute(
            "INSERT INTO counters (subject, period, bucket, value) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(subject, period, bucket) DO UPDATE SET value = value + ?4",
            params![subject, period_str, bucket, by],
        )?;
        let value: i64 = conn.query_row(
            "SELECT value FROM counters WHERE subject = ?1 AND period = ?2 AND bucket = ?3",
            params![subject, period_str, bucket],
            |row| row.get(0),
        )?;
        Ok(value)
    }

    fn list_counters(&self, subject: &str) -> HubResult<Vec<Counter>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT period, bucket, value FROM counters WHERE subject = ?1")?;
        let rows = stmt.query_map(params![subject], |row| {
            let period_str: String = row.get(0)?;
            Ok((period_str, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (period_str, bucket, value) = row?;
            let period = match period_str.as_str() {
                "Year" => Period::Year,
                "Month" => Period::Month,
                "Week" => Period::Week,
                _ => Period::Day,
            };
            out.push(Counter {
                subject: subject.to_string(),
                period,
                bucket,
                value,
            });
        }
        Ok(out)
    }

    fn put_security_code(&self, code: &OneTimeSecurityCode) -> HubResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO security_codes (code, expires_at, doc) VALUES (?1, ?2, ?3)
             ON CONFLICT(code) DO UPDATE SET expires_at = excluded.expires_at, doc = excluded.doc",
            params![code.code, code.expires_at.timestamp_micros(), to_json(code)?],
        )?;
        Ok(())
    }

    fn get_security_code(&self, code: &str) -> HubResult<Option<OneTimeSecurityCode>> {
        let conn = self.conn.lock();
        let doc: Option<String> = conn
            .query_row("SELECT doc FROM security_codes WHERE code = ?1", params![code], |row| row.get(0))
            .optional()?;
        doc.map(|d| from_json(&d)).transpose()
    }

    fn delete_security_code(&self, code: &str) -> HubResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM security_codes WHERE code = ?1", params![code])?;
        Ok(())
    }

    fn upsert_server(&self, record: &ServerRecord) -> HubResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO servers (host_ip, doc) VALUES (?1, ?2)
             ON CONFLICT(host_ip) DO UPDATE SET doc = excluded.doc",
            params![record.host_ip, to_json(record)?],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Application;

    #[test]
    fn create_and_fetch_application_round_trips() {
        let store = SqliteStore::open_in_memory().unwrap();
        let app = Application::new("billing", "Billing Service");
        store.create_application(&app).unwrap();
        let fetched = store.get_application(&app.id).unwrap().unwrap();
        assert_eq!(fetched, app);
        let by_name = store.get_application_by_name("billing").unwrap().unwrap();
        assert_eq!(by_name.id, app.id);
    }

    #[test]
    fn duplicate_application_name_is_a_conflict() {
        let store = SqliteStore::open_in_memory().unwrap();
        let app = Application::new("billing", "Billing Service");
        store.create_application(&app).unwrap();
        let dup = Application::new("billing", "Other");
        let err = store.create_application(&dup).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Conflict);
    }

    #[test]
    fn conditional_sequence_update_fails_on_stale_expectation() {
        let store = SqliteStore::open_in_memory().unwrap();
        let app = Application::new("billing", "Billing Service");
        store.create_application(&app).unwrap();
        let now = chrono::Utc::now();
        let mut seq = EventSequence::new(&app.id, None, None, "run [1]".into(), None, now);
        store.create_sequence(&seq).unwrap();
        let stale_expectation = seq.state_updated_at;
        seq.freeze(now + chrono::Duration::seconds(1));
        assert!(store.update_sequence_if_unchanged(&seq, stale_expectation).unwrap());
        // Second attempt against the now-stale `stale_expectation` must not apply.
        seq.unfreeze(now + chrono::Duration::seconds(2));
        assert!(!store.update_sequence_if_unchanged(&seq, stale_expectation).unwrap());
    }

    #[test]
    fn counter_increment_accumulates() {
        let store = SqliteStore::open_in_memory().unwrap();
        let v1 = store.increment_counter("events", Period::Day, "2026-08-01", 1).unwrap();
        let v2 = store.increment_counter("events", Period::Day, "2026-08-01", 4).unwrap();
        assert_eq!(v1, 1);
        assert_eq!(v2, 5);
    }

    #[test]
    fn stale_frozen_lookup_respects_cutoff() {
        let store = SqliteStore::open_in_memory().unwrap();
        let app = Application::new("billing", "Billing Service");
        store.create_application(&app).unwrap();
        let now = chrono::Utc::now();
        let mut seq = EventSequence::new(&app.id, None, None, "run [1]".into(), None, now);
        store.create_sequence(&seq).unwrap();
        let before_freeze = seq.state_updated_at;
        seq.freeze(now);
        store.update_sequence_if_unchanged(&seq, before_freeze).unwrap();
        let stale = store.list_stale_frozen(now + chrono::Duration::hours(25)).unwrap();
        assert_eq!(stale.len(), 1);
        let too_early = store.list_stale_frozen(now - chrono::Duration::hours(1)).unwrap();
        assert!(too_early.is_empty());
    }

    #[test]
    fn in_progress_lookup_excludes_frozen_and_other_connections() {
        let store = SqliteStore::open_in_memory().unwrap();
        let app = Application::new("billing", "Billing Service");
        store.create_application(&app).unwrap();
        let now = chrono::Utc::now();
        let owned = EventSequence::new(&app.id, None, None, "run [1]".into(), Some("C1".into()), now);
        store.create_sequence(&owned).unwrap();
        let other = EventSequence::new(&app.id, None, None, "run [2]".into(), Some("C2".into()), now);
        store.create_sequence(&other).unwrap();
        let mut frozen = EventSequence::new(&app.id, None, None, "run [3]".into(), Some("C1".into()), now);
        frozen.freeze(now);
        store.create_sequence(&frozen).unwrap();

        let active = store.list_in_progress_for_connection("C1").unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, owned.id);
    }
}
