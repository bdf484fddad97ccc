//! The persisted entities the hub reasons about. Each type here is a plain,
//! serde-round-trippable struct; the [`crate::store::Store`] trait is the only
//! thing that knows how they're actually kept on disk.

mod application;
mod app_log;
mod connection_info;
mod counter;
mod event;
mod security_code;
mod sequence;
mod server;
mod task;

pub use application::Application;
pub use app_log::{AppLog, Severity};
pub use connection_info::{ApplicationClientInfo, ConnectionInfo};
pub use counter::{Counter, Period};
pub use event::{Event, RESERVED_EVENT_TYPES};
pub use security_code::{CodeType, OneTimeSecurityCode};
pub use sequence::{EventSequence, EventSequenceState, ORPHAN_AFTER};
pub use server::ServerRecord;
pub use task::{ApplicationTask, TaskBody, TaskTrigger};

/// Generates a lowercase hyphenated UUIDv4 string, used everywhere the original
/// relied on Mongo's `ObjectId` or Python's `nanoid` — see DESIGN.md for why
/// `uuid` replaces `nanoid` in this port.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
