use crate::controller::InputSettings;
use crate::drive::settings::DriveSettings;
use crate::mqtt::config::BrokerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn, Level};

const CONFIG_DIR: &str = "wheelchair-teleop";
const CONFIG_FILE: &str = "config.toml";
const CONFIG_ENV: &str = "TELEOP_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TeleopConfig {
    /// One of trace, debug, info, warn, error
    pub log_level: String,
    pub broker: BrokerConfig,
    pub drive: DriveSettings,
    pub input: InputSettings,
}

impl Default for TeleopConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            broker: BrokerConfig::default(),
            drive: DriveSettings::default(),
            input: InputSettings::default(),
        }
    }
}

impl TeleopConfig {
    pub fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reads the config at `path`, writing the defaults there first if it does not exist.
    pub async fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if !tokio::fs::try_exists(path).await.map_err(io_error)? {
            info!("Creating default configuration at {}", path.display());
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
            }
            let config = Self::default();
            tokio::fs::write(path, config.to_toml()?)
                .await
                .map_err(io_error)?;
            return Ok(config);
        }

        let content = tokio::fs::read_to_string(path).await.map_err(io_error)?;
        let config = Self::from_toml(&content, path)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn log_level(&self) -> Level {
        Level::from_str(self.log_level.trim()).unwrap_or_else(|_| {
            warn!("Unknown log level '{}', using info", self.log_level);
            Level::INFO
        })
    }
}

/// `$TELEOP_CONFIG`, else `<config dir>/wheelchair-teleop/config.toml`.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    let mut path = get_config_dir();
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    path
}

fn get_config_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .unwrap_or_else(|| {
            warn!("Could not determine home directory, using current directory");
            PathBuf::from(".")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = TeleopConfig::from_toml(
            r#"
            log_level = "debug"

            [broker]
            host = "10.0.0.5"
            topic_prefix = "chair2"

            [drive]
            max_speed = 60
            "#,
            Path::new("inline"),
        )
        .unwrap();

        assert_eq!(config.log_level(), Level::DEBUG);
        assert_eq!(config.broker.host, "10.0.0.5");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.topics().motor, "chair2/command/motor");
        assert_eq!(config.drive.max_speed, 60);
        assert_eq!(config.drive.sample_interval_ms, 30);
        assert_eq!(config.input, InputSettings::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let result = TeleopConfig::from_toml("[drive]\nmax_speed = \"fast\"", Path::new("bad"));
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn unknown_log_level_falls_back_to_info() {
        let config = TeleopConfig {
            log_level: "chatty".to_string(),
            ..TeleopConfig::default()
        };
        assert_eq!(config.log_level(), Level::INFO);
    }

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_DIR).join(CONFIG_FILE);

        let created = TeleopConfig::load_or_create(&path).await.unwrap();
        assert_eq!(created, TeleopConfig::default());
        assert!(path.exists());

        let reloaded = TeleopConfig::load_or_create(&path).await.unwrap();
        assert_eq!(reloaded, created);
    }

    #[tokio::test]
    async fn malformed_file_on_disk_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "[broker\nhost = ").await.unwrap();

        let result = TeleopConfig::load_or_create(&path).await;
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
        assert_eq!(
            tokio::fs::read_to_string(&path).await.unwrap(),
            "[broker\nhost = "
        );
    }
}
