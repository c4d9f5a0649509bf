//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Network settings for the two listeners.
    #[serde(default)]
    pub server: ServerConfig,

    /// Agent service settings.
    #[serde(default)]
    pub agent: AgentSettings,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration. The telephony media stream and the companion
/// clients listen on separate ports.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind both listeners to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port for the telephony media-stream listener.
    #[serde(default = "default_telephony_port")]
    pub telephony_port: u16,

    /// Port for the companion-client listener.
    #[serde(default = "default_client_port")]
    pub client_port: u16,
}

/// Agent service connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    /// WebSocket endpoint of the agent service. Required.
    #[serde(default)]
    pub url: String,

    /// Agent service credential. Required; the server refuses to start
    /// without it.
    #[serde(default)]
    pub api_key: String,

    /// Path to the JSON session-settings payload sent to the agent on
    /// every connect.
    #[serde(default = "default_agent_settings_path")]
    pub settings_path: String,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Busy timeout for SQLite connections, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "voicebridge_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_telephony_port() -> u16 {
    5000
}

fn default_client_port() -> u16 {
    8080
}

fn default_agent_settings_path() -> String {
    "agent_settings.json".to_string()
}

fn default_db_path() -> String {
    "voicebridge.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            telephony_port: default_telephony_port(),
            client_port: default_client_port(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            settings_path: default_agent_settings_path(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file and applies environment
/// overrides. A missing file is not an error — defaults carry a fully
/// usable configuration except for the agent credential, which `main`
/// insists on.
///
/// Environment variable overrides:
/// - `VOICEBRIDGE_HOST` overrides `server.host`
/// - `VOICEBRIDGE_TELEPHONY_PORT` overrides `server.telephony_port`
/// - `VOICEBRIDGE_CLIENT_PORT` overrides `server.client_port`
/// - `VOICEBRIDGE_AGENT_URL` overrides `agent.url`
/// - `VOICEBRIDGE_AGENT_API_KEY` overrides `agent.api_key`
/// - `VOICEBRIDGE_AGENT_SETTINGS_PATH` overrides `agent.settings_path`
/// - `VOICEBRIDGE_DB_PATH` overrides `database.path`
/// - `VOICEBRIDGE_LOG_LEVEL` overrides `logging.level`
/// - `VOICEBRIDGE_LOG_JSON` overrides `logging.json` (set to "true")
///
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = Config::default();
    if let Some(p) = path {
        match std::fs::read_to_string(p) {
            Ok(contents) => config = toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults")
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        }
    }

    if let Some(host) = env_parsed("VOICEBRIDGE_HOST") {
        config.server.host = host;
    }
    if let Some(port) = env_parsed("VOICEBRIDGE_TELEPHONY_PORT") {
        config.server.telephony_port = port;
    }
    if let Some(port) = env_parsed("VOICEBRIDGE_CLIENT_PORT") {
        config.server.client_port = port;
    }
    if let Some(url) = env_string("VOICEBRIDGE_AGENT_URL") {
        config.agent.url = url;
    }
    if let Some(key) = env_string("VOICEBRIDGE_AGENT_API_KEY") {
        config.agent.api_key = key;
    }
    if let Some(path) = env_string("VOICEBRIDGE_AGENT_SETTINGS_PATH") {
        config.agent.settings_path = path;
    }
    if let Some(db_path) = env_string("VOICEBRIDGE_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = env_string("VOICEBRIDGE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env_string("VOICEBRIDGE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    Ok(config)
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.server.telephony_port, 5000);
        assert_eq!(config.server.client_port, 8080);
        assert_eq!(config.database.path, "voicebridge.db");
        assert_eq!(config.agent.settings_path, "agent_settings.json");
        assert!(config.agent.api_key.is_empty());
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            client_port = 9001

            [agent]
            url = "wss://agent.example/v1/converse"
            api_key = "key-123"
            "#,
        )
        .expect("should parse");

        assert_eq!(config.server.client_port, 9001);
        assert_eq!(config.server.telephony_port, 5000, "default preserved");
        assert_eq!(config.agent.url, "wss://agent.example/v1/converse");
        assert_eq!(config.database.pool_max_size, 8);
    }
}
