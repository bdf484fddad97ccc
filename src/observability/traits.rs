use std::time::Duration;

/// Discrete lifecycle events a hub process emits for observability.
///
/// Each variant carries just enough context for tracing and diagnostics
/// without repeating full payload contents (events and sequence meta can
/// hold caller-supplied data that shouldn't be duplicated into logs).
#[derive(Debug, Clone)]
pub enum HubEvent {
    /// A WebSocket upgraded and the hub accepted the connection's `hello`.
    ConnectionEstablished { app_id: String, connection_uuid: String },
    /// A connection dropped, voluntarily or not.
    ConnectionClosed { connection_uuid: String, reason: String },
    /// A ticket failed verification during the WS upgrade.
    TicketRejected { reason: String },
    SequenceCreated { sequence_id: String, app_id: String },
    SequenceFrozen { sequence_id: String },
    SequenceFinished { sequence_id: String, state: String },
    SequenceOrphaned { sequence_id: String },
    EventPublished { event_key: String, app_id: String },
    /// A handler in the hub protocol or engine layer rejected a frame.
    Error { component: String, message: String },
}

/// Numeric metrics a hub process emits.
#[derive(Debug, Clone)]
pub enum HubMetric {
    /// Time to dispatch a single backplane publish to all local subscribers.
    BackplaneFanoutLatency(Duration),
    /// Current number of locally-held connections.
    ActiveConnections(u64),
    /// Current in-progress (non-terminal) sequence count.
    ActiveSequences(u64),
    /// Size of a transit-bus batch handed to a handler.
    TransitBatchSize(u64),
}

/// Implement this trait to integrate with any monitoring backend (structured
/// logging today; a metrics-exporting backend could be added the same way).
/// Implementations must be `Send + Sync + 'static` since the observer is
/// shared across async tasks via `Arc`.
pub trait Observer: Send + Sync + 'static {
    fn record_event(&self, event: &HubEvent);
    fn record_metric(&self, metric: &HubMetric);

    /// Flush any buffered telemetry. Called during graceful shutdown; the
    /// default is a no-op, appropriate for backends that write synchronously.
    fn flush(&self) {}

    fn name(&self) -> &str;
}
