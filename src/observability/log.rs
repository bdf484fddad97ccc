use super::traits::{HubEvent, HubMetric, Observer};
use tracing::info;

/// Structured-logging observer — routes every event/metric through `tracing`,
/// no external monitoring dependency required.
pub struct LogObserver;

impl LogObserver {
    pub fn new() -> Self {
        Self
    }
}

impl Observer for LogObserver {
    fn record_event(&self, event: &HubEvent) {
        match event {
            HubEvent::ConnectionEstablished { app_id, connection_uuid } => {
                info!(app_id = %app_id, connection_uuid = %connection_uuid, "connection.established");
            }
            HubEvent::ConnectionClosed { connection_uuid, reason } => {
                info!(connection_uuid = %connection_uuid, reason = %reason, "connection.closed");
            }
            HubEvent::TicketRejected { reason } => {
                info!(reason = %reason, "ticket.rejected");
            }
            HubEvent::SequenceCreated { sequence_id, app_id } => {
                info!(sequence_id = %sequence_id, app_id = %app_id, "sequence.created");
            }
            HubEvent::SequenceFrozen { sequence_id } => {
                info!(sequence_id = %sequence_id, "sequence.frozen");
            }
            HubEvent::SequenceFinished { sequence_id, state } => {
                info!(sequence_id = %sequence_id, state = %state, "sequence.finished");
            }
            HubEvent::SequenceOrphaned { sequence_id } => {
                info!(sequence_id = %sequence_id, "sequence.orphaned");
            }
            HubEvent::EventPublished { event_key, app_id } => {
                info!(event_key = %event_key, app_id = %app_id, "event.published");
            }
            HubEvent::Error { component, message } => {
                info!(component = %component, error = %message, "error");
            }
        }
    }

    fn record_metric(&self, metric: &HubMetric) {
        match metric {
            HubMetric::BackplaneFanoutLatency(d) => {
                let ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
                info!(latency_ms = ms, "metric.backplane_fanout_latency");
            }
            HubMetric::ActiveConnections(n) => {
                info!(connections = n, "metric.active_connections");
            }
            HubMetric::ActiveSequences(n) => {
                info!(sequences = n, "metric.active_sequences");
            }
            HubMetric::TransitBatchSize(n) => {
                info!(batch_size = n, "metric.transit_batch_size");
            }
        }
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn log_observer_name() {
        assert_eq!(LogObserver::new().name(), "log");
    }

    #[test]
    fn log_observer_all_events_no_panic() {
        let obs = LogObserver::new();
        obs.record_event(&HubEvent::ConnectionEstablished {
            app_id: "A1".into(),
            connection_uuid: "C1".into(),
        });
        obs.record_event(&HubEvent::SequenceFinished {
            sequence_id: "S1".into(),
            state: "succeeded".into(),
        });
        obs.record_event(&HubEvent::TicketRejected {
            reason: "expired".into(),
        });
        obs.record_event(&HubEvent::Error {
            component: "hub".into(),
            message: "boom".into(),
        });
    }

    #[test]
    fn log_observer_all_metrics_no_panic() {
        let obs = LogObserver::new();
        obs.record_metric(&HubMetric::BackplaneFanoutLatency(Duration::from_millis(2)));
        obs.record_metric(&HubMetric::ActiveConnections(5));
        obs.record_metric(&HubMetric::ActiveSequences(12));
        obs.record_metric(&HubMetric::TransitBatchSize(37));
    }
}
