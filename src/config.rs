use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::service::spotify::SpotifyApiConfig;

const CONFIG_FILE_NAME: &str = "config.toml";
const DB_FILE_NAME: &str = "tributary.redb";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub spotify: SpotifyConfig,
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spotify: SpotifyConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

/// Spotify app credentials and endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    /// Client id of the registered Spotify application
    pub client_id: String,
    /// Client secret of the registered Spotify application
    pub client_secret: String,
    /// Web API base url
    pub api_base_url: String,
    /// Accounts service base url (token refresh)
    pub accounts_base_url: String,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            api_base_url: "https://api.spotify.com/v1".to_string(),
            accounts_base_url: "https://accounts.spotify.com".to_string(),
        }
    }
}

impl SpotifyConfig {
    pub fn api_config(&self) -> SpotifyApiConfig {
        SpotifyApiConfig {
            api_base_url: self.api_base_url.clone(),
            accounts_base_url: self.accounts_base_url.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
        }
    }
}

/// Local store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file path (empty = default data dir)
    pub db_path: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { db_path: None }
    }
}

impl StoreConfig {
    /// Resolve the redb file path. An explicit `db_path` is used verbatim;
    /// otherwise the platform data dir is used and created if missing.
    pub fn db_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.db_path {
            return Ok(PathBuf::from(path));
        }
        let data_dir = dirs::data_dir()
            .context("no data directory on this platform")?
            .join("tributary");
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("could not create {}", data_dir.display()))?;
        Ok(data_dir.join(DB_FILE_NAME))
    }
}

impl Config {
    /// Path of the config file under the platform config directory,
    /// creating the directory if needed.
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("no config directory on this platform")?
            .join("tributary");
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("could not create {}", config_dir.display()))?;
        Ok(config_dir.join(CONFIG_FILE_NAME))
    }

    /// Read the config file, writing a default one on first run.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            let config = Config::default();
            config.save()?;
            return Ok(config);
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("could not read {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("invalid TOML in {}", path.display()))?;
        Ok(config)
    }

    /// Write the current settings back to the config file.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        let contents =
            toml::to_string_pretty(self).context("could not serialize settings")?;
        fs::write(&path, contents)
            .with_context(|| format!("could not write {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.spotify.client_id.is_empty());
        assert_eq!(config.spotify.api_base_url, "https://api.spotify.com/v1");
        assert_eq!(
            config.spotify.accounts_base_url,
            "https://accounts.spotify.com"
        );
        assert_eq!(config.store.db_path, None);
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();

        assert_eq!(config.spotify.api_base_url, deserialized.spotify.api_base_url);
        assert_eq!(config.store.db_path, deserialized.store.db_path);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial_toml = r#"
[spotify]
client_id = "abc123"
client_secret = "shh"
"#;

        let config: Config = toml::from_str(partial_toml).unwrap();

        // Custom values
        assert_eq!(config.spotify.client_id, "abc123");
        assert_eq!(config.spotify.client_secret, "shh");
        // Default values
        assert_eq!(config.spotify.api_base_url, "https://api.spotify.com/v1");
        assert_eq!(config.store.db_path, None);
    }

    #[test]
    fn test_full_config_parsing() {
        let full_toml = r#"
[spotify]
client_id = "abc123"
client_secret = "shh"
api_base_url = "http://localhost:8080/v1"
accounts_base_url = "http://localhost:8080"

[store]
db_path = "/custom/path/sync.redb"
"#;

        let config: Config = toml::from_str(full_toml).unwrap();

        assert_eq!(config.spotify.client_id, "abc123");
        assert_eq!(config.spotify.api_base_url, "http://localhost:8080/v1");
        assert_eq!(config.spotify.accounts_base_url, "http://localhost:8080");
        assert_eq!(
            config.store.db_path,
            Some("/custom/path/sync.redb".to_string())
        );
    }

    #[test]
    fn test_explicit_db_path_is_used_verbatim() {
        let store = StoreConfig {
            db_path: Some("/tmp/custom.redb".to_string()),
        };
        assert_eq!(store.db_path().unwrap(), PathBuf::from("/tmp/custom.redb"));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let invalid_toml = "this is not valid [[ toml";
        let result: Result<Config, _> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }
}
