use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::ingest::{DEFAULT_NAMESPACE, DEFAULT_SENTINEL};

/// Server configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub mqtt: MqttConfig,
}

/// HTTP listener
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Which document store backs the engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Couchdb,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "couchdb" | "couch" => Ok(StoreBackend::Couchdb),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(ConfigError::InvalidValue("store backend", s.to_string())),
        }
    }
}

/// Document store connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// CouchDB server URL
    pub url: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Couchdb,
            url: "http://localhost:5984".to_string(),
            database: "childmonitoring".to_string(),
            username: None,
            password: None,
        }
    }
}

/// Sensor ingestion over MQTT
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// First topic segment of `<namespace>/sensors/<owner>/<entity>`
    pub namespace: String,
    /// Owner segment meaning "no owner"
    pub owner_sentinel: String,
    /// Also accept `sensors/<entity>`
    pub legacy_topics: bool,
    pub keep_alive_secs: u64,
    /// Wait before polling again after a connection error
    pub reconnect_delay_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 1883,
            client_id: "childmon-backend".to_string(),
            username: None,
            password: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            owner_sentinel: DEFAULT_SENTINEL.to_string(),
            legacy_topics: true,
            keep_alive_secs: 30,
            reconnect_delay_secs: 5,
        }
    }
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let path = config_path
            .or_else(|| std::env::var("CHILDMON_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            config = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;
        }

        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(port) = env_parse("CHILDMON_PORT")? {
            self.server.port = port;
        }
        if let Ok(backend) = std::env::var("CHILDMON_STORE_BACKEND") {
            self.store.backend = backend.parse()?;
        }
        if let Ok(url) = std::env::var("CHILDMON_COUCHDB_URL") {
            self.store.url = url;
        }
        if let Ok(database) = std::env::var("CHILDMON_COUCHDB_DATABASE") {
            self.store.database = database;
        }
        if let Ok(username) = std::env::var("CHILDMON_COUCHDB_USERNAME") {
            self.store.username = Some(username);
        }
        if let Ok(password) = std::env::var("CHILDMON_COUCHDB_PASSWORD") {
            self.store.password = Some(password);
        }
        if let Some(enabled) = env_parse("CHILDMON_MQTT_ENABLED")? {
            self.mqtt.enabled = enabled;
        }
        if let Ok(host) = std::env::var("CHILDMON_MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = env_parse("CHILDMON_MQTT_PORT")? {
            self.mqtt.port = port;
        }
        if let Ok(namespace) = std::env::var("CHILDMON_MQTT_NAMESPACE") {
            self.mqtt.namespace = namespace;
        }
        Ok(())
    }

    /// Default config file path: ~/.config/childmon/config.yaml
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("childmon")
            .join("config.yaml")
    }
}

fn env_parse<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        Err(_) => Ok(None),
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    ReadError(PathBuf, std::io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    ParseError(PathBuf, serde_yaml::Error),

    #[error("Invalid {0}: '{1}'")]
    InvalidValue(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.store.backend, StoreBackend::Couchdb);
        assert_eq!(config.store.database, "childmonitoring");
        assert!(!config.mqtt.enabled);
        assert_eq!(config.mqtt.namespace, "childmon");
        assert_eq!(config.mqtt.owner_sentinel, "-");
    }

    #[test]
    fn test_load_no_file_uses_defaults() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.store.url, "http://localhost:5984");
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "store:").unwrap();
        writeln!(file, "  backend: memory").unwrap();
        writeln!(file, "  database: nursery").unwrap();
        writeln!(file, "mqtt:").unwrap();
        writeln!(file, "  host: broker.local").unwrap();
        writeln!(file, "  legacy_topics: false").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.database, "nursery");
        assert_eq!(config.store.url, "http://localhost:5984");
        assert_eq!(config.mqtt.host, "broker.local");
        assert!(!config.mqtt.legacy_topics);
        assert_eq!(config.mqtt.port, 1883);
    }

    #[test]
    fn test_env_var_overrides_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "mqtt:").unwrap();
        writeln!(file, "  namespace: fromfile").unwrap();

        std::env::set_var("CHILDMON_MQTT_NAMESPACE", "fromenv");

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.mqtt.namespace, "fromenv");

        std::env::remove_var("CHILDMON_MQTT_NAMESPACE");
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(Some(config_path));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_store_backend_parse() {
        assert_eq!("CouchDB".parse::<StoreBackend>().unwrap(), StoreBackend::Couchdb);
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("sqlite".parse::<StoreBackend>().is_err());
    }
}
