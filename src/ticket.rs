//! Short-lived signed WebSocket upgrade tickets (§6, §9 "Token registry").
//!
//! A ticket is `base64(json_payload).hex(hmac_sha256(json_payload))`, passed
//! as a query parameter on the WS upgrade request (`?ticket=...`) since
//! browsers and many WebSocket clients can't set custom headers on the
//! handshake. The HMAC key never leaves the hub process.

use crate::error::HubError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    Application,
    User,
}

impl TicketKind {
    /// Default lifetime: applications get a slightly longer window since
    /// they may need to read local config/establish a local bridge before
    /// upgrading; operator (`User`) tickets are meant to be used immediately.
    pub fn default_lifetime(self) -> Duration {
        match self {
            TicketKind::Application => Duration::from_secs(120),
            TicketKind::User => Duration::from_secs(300),
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            TicketKind::Application => "ws-ticket:Application",
            TicketKind::User => "ws-ticket:User",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TicketPayload {
    kind: TicketKind,
    subject_id: String,
    issued_at: i64,
    expires_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketClaims {
    pub kind: TicketKind,
    pub subject_id: String,
}

pub struct TicketSigner {
    secret: Vec<u8>,
}

impl TicketSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }

    pub fn issue(&self, kind: TicketKind, subject_id: &str, now: chrono::DateTime<chrono::Utc>) -> String {
        self.issue_with_lifetime(kind, subject_id, kind.default_lifetime(), now)
    }

    pub fn issue_with_lifetime(
        &self,
        kind: TicketKind,
        subject_id: &str,
        lifetime: Duration,
        now: chrono::DateTime<chrono::Utc>,
    ) -> String {
        let payload = TicketPayload {
            kind,
            subject_id: subject_id.to_string(),
            issued_at: now.timestamp(),
            expires_at: now.timestamp() + lifetime.as_secs() as i64,
        };
        let json = serde_json::to_vec(&payload).expect("ticket payload always serializes");
        let encoded = URL_SAFE_NO_PAD.encode(&json);
        let mac = self.mac_for(encoded.as_bytes());
        format!("{encoded}.{}", hex::encode(mac))
    }

    pub fn verify(&self, ticket: &str, now: chrono::DateTime<chrono::Utc>) -> Result<TicketClaims, HubError> {
        let (encoded, mac_hex) = ticket
            .split_once('.')
            .ok_or_else(|| HubError::authentication("malformed ticket"))?;
        let expected_mac = hex::decode(mac_hex).map_err(|_| HubError::authentication("malformed ticket signature"))?;
        let actual_mac = self.mac_for(encoded.as_bytes());
        if actual_mac != expected_mac {
            return Err(HubError::authentication("ticket signature mismatch"));
        }
        let json = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| HubError::authentication("malformed ticket payload"))?;
        let payload: TicketPayload =
            serde_json::from_slice(&json).map_err(|_| HubError::authentication("malformed ticket payload"))?;
        if now.timestamp() > payload.expires_at {
            return Err(HubError::authentication("ticket expired"));
        }
        Ok(TicketClaims {
            kind: payload.kind,
            subject_id: payload.subject_id,
        })
    }

    fn mac_for(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts keys of any length");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}
