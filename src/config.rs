use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use anyhow::{Result, anyhow};

use crate::gemini::{GeminiConfig, DEFAULT_TIMEOUT};

/// Environment variables checked for the API key, in order
const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "VITE_API_KEY"];

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub data_dir: Option<PathBuf>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;

        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(&config_path, config_content)?;
        Ok(())
    }

    /// Environment first, then the config file
    pub fn resolve_api_key(&self) -> Option<String> {
        API_KEY_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
            .or_else(|| self.api_key.clone())
    }

    pub fn gemini_config(&self) -> GeminiConfig {
        let mut gemini = GeminiConfig::default();
        if let Some(model) = &self.model {
            gemini.model = model.clone();
        }
        gemini.timeout = self
            .request_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);
        gemini
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("gemini-chat").join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_parses() {
        let config: Config = serde_json::from_str(r#"{"model": "gemini-1.5-pro"}"#).unwrap();
        assert_eq!(config.model.as_deref(), Some("gemini-1.5-pro"));
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_gemini_config_applies_overrides() {
        let config = Config {
            model: Some("gemini-1.5-pro".to_string()),
            request_timeout_secs: Some(5),
            ..Default::default()
        };
        let gemini = config.gemini_config();
        assert_eq!(gemini.model, "gemini-1.5-pro");
        assert_eq!(gemini.timeout, Duration::from_secs(5));

        let gemini = Config::new().gemini_config();
        assert_eq!(gemini.model, crate::gemini::DEFAULT_MODEL);
        assert_eq!(gemini.timeout, DEFAULT_TIMEOUT);
    }
}
