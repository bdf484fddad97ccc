use serde::{Deserialize, Serialize};

/// The tiny `(host_ip, last_seen)` registry the hello handshake updates
/// best-effort (§1A, §4.4 step 2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerRecord {
    pub host_ip: String,
    pub last_seen: chrono::DateTime<chrono::Utc>,
}
