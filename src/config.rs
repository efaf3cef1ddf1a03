use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::audio::AudioConfig;
use crate::camera::StreamConfig;
use crate::mqtt::config::BrokerConfig;

const CONFIG_DIR: &str = ".config/doorbell-remote";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub stream: StreamConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Home directory could not be determined")]
    NoHomeDir,

    #[error("Config file {path} could not be accessed: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Config file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config could not be serialized: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// `~/.config/doorbell-remote/config.toml`
pub fn default_path() -> Result<PathBuf, ConfigError> {
    let mut path = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    Ok(path)
}

impl AppConfig {
    /// Writes the default config to `path` unless a file already exists there
    pub async fn ensure_default(path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if tokio::fs::try_exists(path).await.map_err(io_err)? {
            debug!("Config file {} present", path.display());
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let content = toml::to_string_pretty(&AppConfig::default())?;
        tokio::fs::write(path, content).await.map_err(io_err)?;
        info!("Wrote default config to {}", path.display());
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let config: AppConfig = toml::from_str(&content)?;
        info!(
            "Loaded config from {} (broker {}, secure: {})",
            path.display(),
            config.broker.host,
            config.broker.secure
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::config::TransportKind;

    #[test]
    fn defaults_round_trip_through_toml() {
        let text = toml::to_string_pretty(&AppConfig::default()).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, AppConfig::default());
    }

    #[test]
    fn partial_file_is_filled_with_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [broker]
            host = "doorbell.local"
            secure = true
            transport = "tcp"

            [audio]
            play_when_not_listening = true
            "#,
        )
        .unwrap();

        assert_eq!(parsed.broker.host, "doorbell.local");
        assert_eq!(parsed.broker.transport, TransportKind::Tcp);
        assert_eq!(parsed.broker.secure_port, 9002);
        assert_eq!(parsed.stream.max_retries, 3);
        assert!(parsed.audio.play_when_not_listening);
        assert_eq!(parsed.audio.record_sample_rate, 44_100);
    }

    #[tokio::test]
    async fn ensure_default_writes_once() {
        let dir = std::env::temp_dir().join(format!(
            "doorbell-remote-test-{}",
            std::process::id()
        ));
        let path = dir.join("nested").join(CONFIG_FILE);

        AppConfig::ensure_default(&path).await.unwrap();
        assert_eq!(AppConfig::load(&path).await.unwrap(), AppConfig::default());

        tokio::fs::write(&path, "[stream]\nmax_retries = 5\n")
            .await
            .unwrap();
        AppConfig::ensure_default(&path).await.unwrap();
        assert_eq!(AppConfig::load(&path).await.unwrap().stream.max_retries, 5);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[test]
    fn default_path_lives_under_home() {
        if let Ok(path) = default_path() {
            assert!(path.ends_with(".config/doorbell-remote/config.toml"));
        }
    }
}
