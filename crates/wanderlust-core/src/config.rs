use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result, anyhow};

use crate::assistant::openai::DEFAULT_API_BASE;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const ASSISTANT_ID_ENV: &str = "WANDERLUST_ASSISTANT_ID";
pub const DEFAULT_MODEL: &str = "gpt-4-1106-preview";

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_run_wait_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_transport_retries: Option<u32>,
}

/// Timing knobs for the run poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub poll_interval: Duration,
    pub max_run_wait: Duration,
    pub max_transport_retries: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            max_run_wait: Duration::from_secs(120),
            max_transport_retries: 5,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, config_content)?;
        Ok(())
    }

    pub fn save_assistant_id(assistant_id: &str) -> Result<()> {
        Self::save_assistant_id_to(&Self::get_config_path()?, assistant_id)
    }

    /// Record the assistant id, keeping every other field. An unreadable file
    /// is left alone rather than overwritten with defaults.
    pub fn save_assistant_id_to(config_path: &Path, assistant_id: &str) -> Result<()> {
        let mut config = Self::load_from(config_path)
            .with_context(|| format!("Not saving assistant id: {} is unreadable", config_path.display()))?;
        config.assistant_id = Some(assistant_id.to_string());
        config.save_to(config_path)
    }

    /// API key from the environment, falling back to the config file.
    /// A missing key is fatal: nothing works without it.
    pub fn resolve_api_key(&self, env_value: Option<String>) -> Result<String> {
        env_value
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.openai_api_key.clone().filter(|k| !k.trim().is_empty()))
            .ok_or_else(|| {
                anyhow!(
                    "No API key found. Set {API_KEY_ENV} or add \"openai_api_key\" to {}",
                    Self::get_config_path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|_| "config.json".to_string())
                )
            })
    }

    pub fn resolve_assistant_id(&self, env_value: Option<String>) -> Option<String> {
        env_value
            .filter(|id| !id.trim().is_empty())
            .or_else(|| self.assistant_id.clone())
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn api_base(&self) -> &str {
        self.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    }

    pub fn poll_settings(&self) -> PollSettings {
        let defaults = PollSettings::default();
        PollSettings {
            poll_interval: self
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            max_run_wait: self
                .max_run_wait_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_run_wait),
            max_transport_retries: self
                .max_transport_retries
                .unwrap_or(defaults.max_transport_retries),
        }
    }

    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("wanderlust"))
    }

    fn get_config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert!(config.assistant_id.is_none());
        assert_eq!(config.model(), DEFAULT_MODEL);
        assert_eq!(config.api_base(), "https://api.openai.com/v1");
        assert_eq!(config.poll_settings(), PollSettings::default());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = Config {
            assistant_id: Some("asst_123".to_string()),
            model: Some("gpt-4o".to_string()),
            poll_interval_ms: Some(250),
            max_run_wait_secs: Some(30),
            max_transport_retries: Some(2),
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.assistant_id.as_deref(), Some("asst_123"));
        assert_eq!(loaded.model(), "gpt-4o");
        let settings = loaded.poll_settings();
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.max_run_wait, Duration::from_secs(30));
        assert_eq!(settings.max_transport_retries, 2);
    }

    #[test]
    fn test_save_assistant_id_keeps_other_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        Config {
            openai_api_key: Some("sk-file".to_string()),
            ..Config::default()
        }
        .save_to(&path)
        .unwrap();

        Config::save_assistant_id_to(&path, "asst_new").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.assistant_id.as_deref(), Some("asst_new"));
        assert_eq!(loaded.openai_api_key.as_deref(), Some("sk-file"));
    }

    #[test]
    fn test_save_assistant_id_leaves_unreadable_file_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ \"openai_api_key\": \"sk-file\",").unwrap();

        assert!(Config::save_assistant_id_to(&path, "asst_new").is_err());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "{ \"openai_api_key\": \"sk-file\","
        );
    }

    #[test]
    fn test_unset_fields_are_not_written() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        Config::new().save_to(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), "{}");
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_api_key_prefers_environment() {
        let config = Config {
            openai_api_key: Some("sk-file".to_string()),
            ..Config::default()
        };
        assert_eq!(config.resolve_api_key(Some("sk-env".to_string())).unwrap(), "sk-env");
        assert_eq!(config.resolve_api_key(None).unwrap(), "sk-file");
        assert_eq!(config.resolve_api_key(Some("  ".to_string())).unwrap(), "sk-file");
    }

    #[test]
    fn test_missing_api_key_is_fatal() {
        let err = Config::new().resolve_api_key(None).unwrap_err();
        assert!(err.to_string().contains(API_KEY_ENV));
    }

    #[test]
    fn test_assistant_id_override() {
        let config = Config {
            assistant_id: Some("asst_file".to_string()),
            ..Config::default()
        };
        assert_eq!(config.resolve_assistant_id(Some("asst_env".to_string())).as_deref(), Some("asst_env"));
        assert_eq!(config.resolve_assistant_id(None).as_deref(), Some("asst_file"));
        assert_eq!(Config::new().resolve_assistant_id(None), None);
    }
}
