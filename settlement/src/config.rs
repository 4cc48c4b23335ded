//! Settlement engine configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settlement engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Settlement store directory
    pub data_dir: PathBuf,

    /// Service name for logging
    pub service_name: String,

    /// Settlement model for created settlements
    pub model: SettlementModelConfig,
}

/// Settlement model parameters applied at settlement creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementModelConfig {
    /// Model name
    pub name: String,

    /// Reset participant positions by the net amount when obligations commit
    pub auto_position_reset: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/settlement"),
            service_name: "clearhub-settlement".to_string(),
            model: SettlementModelConfig::default(),
        }
    }
}

impl Default for SettlementModelConfig {
    fn default() -> Self {
        Self {
            name: "DEFERREDNET".to_string(),
            auto_position_reset: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load configuration from environment variables over the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        if let Ok(data_dir) = std::env::var("SETTLEMENT_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Ok(reset) = std::env::var("SETTLEMENT_AUTO_POSITION_RESET") {
            config.model.auto_position_reset = reset == "1" || reset.eq_ignore_ascii_case("true");
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.model.name, "DEFERREDNET");
        assert!(config.model.auto_position_reset);
    }

    #[test]
    fn test_from_toml() {
        let toml_str = r#"
            data_dir = "/tmp/settlement"
            service_name = "clearhub-settlement"

            [model]
            name = "DEFERREDNET"
            auto_position_reset = false
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(!config.model.auto_position_reset);
    }
}
