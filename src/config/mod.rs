pub mod schema;

pub use schema::{
    BackplaneBackend, BackplaneConfig, Config, HangingConnectionPolicy, LogFormat, ObservabilityConfig,
    SequenceEngineConfig, ServerConfig, StoreConfig, TicketConfig,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_binds_localhost() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.server.port > 0);
    }
}
