//! Strategy configuration utilities

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;

/// Load configuration from a TOML file, or JSON when the extension is `.json`
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config = if is_json(path) {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON config {}", path.display()))?
    } else {
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config {}", path.display()))?
    };
    Ok(config)
}

/// Write configuration back out in the format implied by the extension
pub fn save_config<T: Serialize>(config: &T, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let content = if is_json(path) {
        serde_json::to_string_pretty(config)?
    } else {
        toml::to_string_pretty(config)?
    };
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file {}", path.display()))?;
    Ok(())
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("json")
}

/// Common strategy configuration fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseStrategyConfig {
    pub name: String,
    pub enabled: bool,
    pub log_level: Option<String>,
}

impl Default for BaseStrategyConfig {
    fn default() -> Self {
        Self {
            name: "unnamed_strategy".to_string(),
            enabled: true,
            log_level: Some("info".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_toml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let config = BaseStrategyConfig {
            name: "multipath".to_string(),
            enabled: false,
            log_level: Some("debug".to_string()),
        };

        for file in ["strategy.toml", "strategy.json"] {
            let path = dir.path().join(file);
            save_config(&config, &path).unwrap();
            let loaded: BaseStrategyConfig = load_config(&path).unwrap();
            assert_eq!(loaded, config);
        }
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "name = \"partial\"\n").unwrap();

        let loaded: BaseStrategyConfig = load_config(&path).unwrap();
        assert_eq!(loaded.name, "partial");
        assert!(loaded.enabled);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_config::<BaseStrategyConfig>("/nonexistent/strategy.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/strategy.toml"));
    }
}
