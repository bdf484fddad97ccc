//! The Hub Protocol (§4.4): one short-lived object per WebSocket, concurrent
//! receive/dispatch loops over a shared [`Connection`](crate::channel::Connection),
//! with agent and operator variants sharing wire framing but not message tags.

mod agent;
mod frame;
mod operator;

pub use agent::run_agent_hub;
pub use frame::{InFrame, OutFrame};
pub use operator::run_operator_hub;

use crate::channel::ChannelLayer;
use crate::clock::Clock;
use crate::engine::SequenceService;
use crate::observability::Observer;
use crate::store::Store;
use crate::ticket::TicketSigner;
use std::sync::Arc;

/// Everything a hub needs to reach the rest of the system. One instance is
/// built at startup and shared (behind `Arc`) across every connection the
/// gateway accepts.
pub struct HubContext {
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub channel_layer: Arc<ChannelLayer>,
    pub sequence_service: Arc<SequenceService>,
    pub ticket_signer: Arc<TicketSigner>,
    pub observer: Arc<dyn Observer>,
}

/// Maps a group-fan-out payload (tagged by its internal `"type"` field, the
/// vocabulary `SequenceEventHandlers` and friends publish) onto one of the
/// reserved outgoing wire tags from §6. Both the agent and operator hub loops
/// use this for the messages arriving over their joined groups.
pub fn tag_for_group_payload(payload: &serde_json::Value) -> &'static str {
    match payload.get("type").and_then(serde_json::Value::as_str) {
        Some("sequence") => "sequence",
        Some("event_published") => "new_event",
        Some(t) if t.starts_with("connection_") => "connection",
        Some("log_appended") => "logs",
        _ => "message",
    }
}
