pub mod log;
pub mod multi;
pub mod noop;
pub mod traits;

pub use self::log::LogObserver;
pub use self::multi::MultiObserver;
pub use noop::NoopObserver;
pub use traits::{HubEvent, HubMetric, Observer};

use crate::config::ObservabilityConfig;

/// Builds the default observer for a given config. There's only one real
/// backend today (structured logging via `tracing`); `log_level` of
/// `"off"`/`"none"` gets the zero-cost no-op instead.
pub fn create_observer(config: &ObservabilityConfig) -> Box<dyn Observer> {
    if config.log_level.eq_ignore_ascii_case("off") || config.log_level.eq_ignore_ascii_case("none") {
        Box::new(NoopObserver)
    } else {
        Box::new(LogObserver::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_log_level_yields_noop() {
        let cfg = ObservabilityConfig {
            log_level: "off".into(),
            ..ObservabilityConfig::default()
        };
        assert_eq!(create_observer(&cfg).name(), "noop");
    }

    #[test]
    fn normal_log_level_yields_log_observer() {
        let cfg = ObservabilityConfig::default();
        assert_eq!(create_observer(&cfg).name(), "log");
    }
}
