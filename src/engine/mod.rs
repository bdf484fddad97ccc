//! The sequence and event engine (§4.5): sequence lifecycle management,
//! batched fan-out of lifecycle changes, orphan reaping, and boot-time
//! cleanup of connections left marked "connected" by a previous process.

mod boot;
mod handlers;
mod reaper;
mod service;

pub use boot::cleanup_hanging_connections;
pub use handlers::SequenceEventHandlers;
pub use reaper::spawn_orphan_reaper;
pub use service::SequenceService;

use crate::model::EventSequence;

/// What crosses the transit bus when a sequence's lifecycle changes. Batched
/// handlers (see `handlers.rs`) subscribe to this and turn it into counter
/// increments plus backplane fan-out, the same three hooks the original
/// per-lifecycle-stage handlers this is adapted from registered.
#[derive(Debug, Clone)]
pub enum SequenceLifecycleMessage {
    Created(EventSequence),
    Updated(EventSequence),
    Finished(EventSequence),
}
