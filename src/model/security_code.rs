use rand::RngExt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeType {
    ApplicationRegistration,
}

/// Two-step application registration code (§1A, §3). Starts with a 10 minute
/// TTL; confirming extends it to 10 days so the caller has time to complete
/// the rest of the registration flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OneTimeSecurityCode {
    pub code: String,
    pub code_type: CodeType,
    pub confirmed: bool,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub ip_address: String,
}

pub const INITIAL_TTL: chrono::Duration = chrono::Duration::minutes(10);
pub const CONFIRMED_TTL: chrono::Duration = chrono::Duration::days(10);

impl OneTimeSecurityCode {
    pub fn generate(code_type: CodeType, ip_address: &str, now: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            code: generate_numeric_code(8),
            code_type,
            confirmed: false,
            expires_at: now + INITIAL_TTL,
            ip_address: ip_address.to_string(),
        }
    }

    /// Extends an existing code's digits on collision (§3: "8+ digits,
    /// extended on collision").
    pub fn widen(&mut self) {
        self.code.push_str(&generate_numeric_code(1));
    }

    pub fn confirm(&mut self, now: chrono::DateTime<chrono::Utc>) {
        self.confirmed = true;
        self.expires_at = now + CONFIRMED_TTL;
    }

    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        now >= self.expires_at
    }
}

fn generate_numeric_code(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len).map(|_| rng.random_range(0..10).to_string()).collect()
}
