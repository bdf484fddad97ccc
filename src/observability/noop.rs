use super::traits::{HubEvent, HubMetric, Observer};

/// Zero-overhead observer — every method compiles to nothing.
pub struct NoopObserver;

impl Observer for NoopObserver {
    #[inline(always)]
    fn record_event(&self, _event: &HubEvent) {}

    #[inline(always)]
    fn record_metric(&self, _metric: &HubMetric) {}

    fn name(&self) -> &str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_name() {
        assert_eq!(NoopObserver.name(), "noop");
    }

    #[test]
    fn noop_does_not_panic() {
        let obs = NoopObserver;
        obs.record_event(&HubEvent::SequenceOrphaned { sequence_id: "S1".into() });
        obs.record_metric(&HubMetric::ActiveConnections(0));
        obs.flush();
    }
}
