use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// `ApplicationClientInfo` is the payload carried on the `hello` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationClientInfo {
    pub connection_uuid: String,
    pub name: String,
    pub version: String,
    pub compatibility_key: String,
    pub os_info: String,
    pub machine_id: String,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub subscriptions: Vec<String>,
}

/// A live or recently-live agent session, upserted on every `hello`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionInfo {
    pub connection_uuid: String,
    pub app_id: String,
    pub ip: String,
    pub os_info: String,
    pub client_name: String,
    pub client_version: String,
    pub fingerprint: String,
    pub machine_id: String,
    #[serde(default)]
    pub instance_id: Option<String>,
    pub is_connected: bool,
    pub connected_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub disconnected_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub event_subscriptions: Vec<String>,
    /// Optimistic-concurrency revision. Bumped on every write; a conditional
    /// update that doesn't match the expected revision is treated as a
    /// concurrent-writer conflict and retried by re-reading (§5).
    #[serde(default)]
    pub revision: u64,
}

/// `fingerprint = sha256([1, name, compatibility_key])`, stable across process
/// restarts and OSes for the same `(name, compatibility_key)` pair (§8).
pub fn fingerprint(name: &str, compatibility_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"1");
    hasher.update(b"\0");
    hasher.update(name.as_bytes());
    hasher.update(b"\0");
    hasher.update(compatibility_key.as_bytes());
    hex::encode(hasher.finalize())
}

impl ConnectionInfo {
    pub fn upsert_from_hello(
        existing: Option<ConnectionInfo>,
        info: &ApplicationClientInfo,
        app_id: &str,
        ip: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> ConnectionInfo {
        let fp = fingerprint(&info.name, &info.compatibility_key);
        let revision = existing.as_ref().map(|c| c.revision + 1).unwrap_or(0);
        ConnectionInfo {
            connection_uuid: info.connection_uuid.clone(),
            app_id: app_id.to_string(),
            ip: ip.to_string(),
            os_info: info.os_info.clone(),
            client_name: info.name.clone(),
            client_version: info.version.clone(),
            fingerprint: fp,
            machine_id: info.machine_id.clone(),
            instance_id: info.instance_id.clone(),
            is_connected: true,
            connected_at: now,
            disconnected_at: None,
            expires_at: None,
            event_subscriptions: info.subscriptions.clone(),
            revision,
        }
    }

    /// 12h TTL on disconnect (§3). Deliberately a different constant from the
    /// 24h orphan-reaping window on `EventSequence` — see DESIGN.md.
    pub const CONNECTION_EXPIRY: chrono::Duration = chrono::Duration::hours(12);

    pub fn mark_disconnected(&mut self, now: chrono::DateTime<chrono::Utc>) {
        self.is_connected = false;
        self.disconnected_at = Some(now);
        self.expires_at = Some(now + Self::CONNECTION_EXPIRY);
        self.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_for_same_inputs() {
        let a = fingerprint("agent", "k1");
        let b = fingerprint("agent", "k1");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_on_compatibility_key() {
        let a = fingerprint("agent", "k1");
        let b = fingerprint("agent", "k2");
        assert_ne!(a, b);
    }

    #[test]
    fn upsert_from_hello_bumps_revision_on_reconnect() {
        let info = ApplicationClientInfo {
            connection_uuid: "U1".into(),
            name: "agent".into(),
            version: "1.0".into(),
            compatibility_key: "k1".into(),
            os_info: "linux".into(),
            machine_id: "m1".into(),
            instance_id: None,
            subscriptions: vec![],
        };
        let now = chrono::Utc::now();
        let first = ConnectionInfo::upsert_from_hello(None, &info, "A1", "127.0.0.1", now);
        assert_eq!(first.revision, 0);
        let second = ConnectionInfo::upsert_from_hello(Some(first), &info, "A1", "127.0.0.1", now);
        assert_eq!(second.revision, 1);
    }

    #[test]
    fn mark_disconnected_sets_12h_expiry() {
        let info = ApplicationClientInfo {
            connection_uuid: "U1".into(),
            name: "agent".into(),
            version: "1.0".into(),
            compatibility_key: "k1".into(),
            os_info: "linux".into(),
            machine_id: "m1".into(),
            instance_id: None,
            subscriptions: vec![],
        };
        let now = chrono::Utc::now();
        let mut conn = ConnectionInfo::upsert_from_hello(None, &info, "A1", "1.1.1.1", now);
        conn.mark_disconnected(now);
        assert!(!conn.is_connected);
        assert_eq!(conn.expires_at, Some(now + chrono::Duration::hours(12)));
    }
}
