use crate::error::HubError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Incoming frame shape (§6): `{"t": "<tag>", "d": <payload>}`.
#[derive(Debug, Clone, Deserialize)]
pub struct InFrame {
    pub t: String,
    #[serde(default)]
    pub d: Value,
}

/// Outgoing frame shape (§6). `topic` is set when the frame is a group
/// fan-out rather than a direct reply.
#[derive(Debug, Clone, Serialize)]
pub struct OutFrame {
    pub t: String,
    pub d: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl OutFrame {
    pub fn reply(tag: impl Into<String>, data: Value) -> Self {
        Self {
            t: tag.into(),
            d: data,
            topic: None,
        }
    }

    pub fn topical(tag: impl Into<String>, data: Value, topic: impl Into<String>) -> Self {
        Self {
            t: tag.into(),
            d: data,
            topic: Some(topic.into()),
        }
    }

    pub fn error(err: &HubError) -> Self {
        Self::reply(
            "error",
            serde_json::json!({"kind": err.kind.frame_kind(), "message": err.message}),
        )
    }

    pub fn to_json_text(&self) -> String {
        serde_json::to_string(self).expect("OutFrame always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_frame_defaults_payload_to_null() {
        let frame: InFrame = serde_json::from_str(r#"{"t":"synchronize"}"#).unwrap();
        assert_eq!(frame.t, "synchronize");
        assert!(frame.d.is_null());
    }

    #[test]
    fn error_frame_carries_kind_and_message() {
        let out = OutFrame::error(&HubError::validation("bad event type"));
        let json = out.to_json_text();
        assert!(json.contains("invalid_data"));
        assert!(json.contains("bad event type"));
    }
}
