//! Layered TOML configuration: defaults, then `config.toml` on disk, then
//! `HUB_*` environment overrides (§1A). Adapted from the teacher's own
//! `Config::load_or_init`/`apply_env_overrides`/`save` shape, trimmed down
//! to the handful of knobs a telemetry hub actually needs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8008,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Relative to the config directory unless absolute.
    pub sqlite_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("hub.sqlite3"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackplaneBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackplaneConfig {
    pub backend: BackplaneBackend,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
}

impl Default for BackplaneConfig {
    fn default() -> Self {
        Self {
            backend: BackplaneBackend::Memory,
            redis_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketConfig {
    /// HMAC signing secret. Generated and persisted on first run if absent —
    /// see `Config::load_or_init`.
    pub secret: Option<String>,
    pub application_ticket_ttl_secs: u64,
    pub user_ticket_ttl_secs: u64,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            secret: None,
            application_ticket_ttl_secs: 120,
            user_ticket_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceEngineConfig {
    pub orphan_reaper_interval_secs: u64,
    pub default_sequence_ttl_days: i64,
    pub hanging_connection_policy: HangingConnectionPolicy,
}

impl Default for SequenceEngineConfig {
    fn default() -> Self {
        Self {
            orphan_reaper_interval_secs: 300,
            default_sequence_ttl_days: 3,
            hanging_connection_policy: HangingConnectionPolicy::Remove,
        }
    }
}

/// What boot-time cleanup does with a `ConnectionInfo` left `is_connected = true`
/// by a process that crashed before it could flip the flag itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HangingConnectionPolicy {
    /// Mark the connection disconnected and freeze its in-progress sequences.
    Remove,
    /// Leave the row untouched; only log what was found.
    LogOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    pub config_path: PathBuf,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub backplane: BackplaneConfig,
    #[serde(default)]
    pub ticket: TicketConfig,
    #[serde(default)]
    pub sequence_engine: SequenceEngineConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_config_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("dev", "fleethub", "fleethub")
        .context("could not determine a home directory to place the config in")?;
    Ok(dirs.config_dir().to_path_buf())
}

fn generate_ticket_secret() -> String {
    use rand::RngExt;
    let mut rng = rand::rng();
    (0..32).map(|_| format!("{:02x}", rng.random_range(0..=255u8))).collect()
}

impl Config {
    pub fn load_or_init() -> Result<Self> {
        let config_dir = match std::env::var("HUB_CONFIG_DIR") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => default_config_dir()?,
        };
        fs::create_dir_all(&config_dir).context("failed to create config directory")?;
        let config_path = config_dir.join("config.toml");

        let mut config = if config_path.exists() {
            let contents = fs::read_to_string(&config_path).context("failed to read config file")?;
            let mut config: Config = toml::from_str(&contents).context("failed to parse config file")?;
            config.config_path = config_path.clone();
            config
        } else {
            let mut config = Config::default();
            config.config_path = config_path.clone();
            config
        };

        if config.ticket.secret.is_none() {
            config.ticket.secret = Some(generate_ticket_secret());
        }
        config.save()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600));
        }

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("HUB_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        if let Ok(port_str) = std::env::var("HUB_PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(path) = std::env::var("HUB_SQLITE_PATH") {
            if !path.is_empty() {
                self.store.sqlite_path = PathBuf::from(path);
            }
        }
        if let Ok(url) = std::env::var("HUB_REDIS_URL") {
            if !url.is_empty() {
                self.backplane.backend = BackplaneBackend::Redis;
                self.backplane.redis_url = Some(url);
            }
        }
        if let Ok(secret) = std::env::var("HUB_TICKET_SECRET") {
            if !secret.is_empty() {
                self.ticket.secret = Some(secret);
            }
        }
        if let Ok(level) = std::env::var("HUB_LOG_LEVEL") {
            if !level.is_empty() {
                self.observability.log_level = level;
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        let parent = self.config_path.parent().context("config path must have a parent directory")?;
        fs::create_dir_all(parent)?;
        let toml = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(&self.config_path, toml).context("failed to write config file")?;
        Ok(())
    }

    pub fn sqlite_path(&self) -> PathBuf {
        if self.store.sqlite_path.is_absolute() {
            self.store.sqlite_path.clone()
        } else {
            self.config_path
                .parent()
                .map(|dir| dir.join(&self.store.sqlite_path))
                .unwrap_or_else(|| self.store.sqlite_path.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // `load_or_init` reads process-wide env vars; serialize the tests that
    // touch them so they don't stomp on each other under `cargo test`'s
    // default parallelism.
    static ENV_GUARD: Mutex<()> = Mutex::new(());

    #[test]
    fn load_or_init_creates_config_file_and_persists_a_ticket_secret() {
        let _guard = ENV_GUARD.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        unsafe { std::env::set_var("HUB_CONFIG_DIR", dir.path()) };
        let config = Config::load_or_init().unwrap();
        assert!(config.config_path.exists());
        assert!(config.ticket.secret.is_some());

        let reloaded = Config::load_or_init().unwrap();
        assert_eq!(reloaded.ticket.secret, config.ticket.secret);
        unsafe { std::env::remove_var("HUB_CONFIG_DIR") };
    }

    #[test]
    fn env_override_wins_over_file_value() {
        let _guard = ENV_GUARD.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        unsafe { std::env::set_var("HUB_CONFIG_DIR", dir.path()) };
        unsafe { std::env::set_var("HUB_PORT", "9999") };
        let config = Config::load_or_init().unwrap();
        assert_eq!(config.server.port, 9999);
        unsafe { std::env::remove_var("HUB_PORT") };
        unsafe { std::env::remove_var("HUB_CONFIG_DIR") };
    }
}
