//! Per-connection mailboxes, group membership, and cross-instance disconnect
//! signaling on top of the [`crate::backplane::Backplane`] (§4.2).
//!
//! Group naming follows the namespaces from §6: `a/<app_id>`, `e/key/<event_key>`,
//! `m/...` for operator monitoring, `u/<user_id>`, `session/<sid>`. Internally
//! the layer prefixes outgoing backplane traffic with `cl/message/<group>` so
//! it never collides with application-level channel names.

mod connection;
mod layer;

pub use connection::{Connection, GroupMessage};
pub use layer::ChannelLayer;

pub fn message_channel(group: &str) -> String {
    format!("cl/message/{group}")
}

/// Shared topic every [`ChannelLayer`] instance subscribes to at startup, used
/// both for connection-ownership announcements and as a broadcast fallback
/// when the owning layer of a remote connection isn't known yet.
pub const INTERNAL_TOPIC: &str = "cl/internal";

/// Per-layer topic (§4.2, §6) a `close_connection` call addresses directly
/// once it knows which layer owns the connection, instead of broadcasting to
/// every instance. The original implementation this is adapted from addressed
/// a single layer by id (`"__internal:" + layer_id`) but subscribed on a
/// different, mismatched name — a real bug (see DESIGN.md).
pub fn internal_topic(layer_id: &str) -> String {
    format!("cl/internal/{layer_id}")
}
