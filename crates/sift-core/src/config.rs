//! Engine configuration
//!
//! Loading order (later wins):
//! 1. Built-in defaults (`config/engine.toml`, embedded at compile time)
//! 2. Override file (`~/.local/share/sift/config/engine.toml` or an explicit path)
//! 3. Environment variables

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::rules::ChainStores;

/// Default configuration (embedded at compile time)
const DEFAULT_CONFIG: &str = include_str!("../../../config/engine.toml");

pub const AUTO_THRESHOLD_ENV: &str = "SIFT_AUTO_THRESHOLD";
pub const MIN_TRAINING_SAMPLES_ENV: &str = "SIFT_MIN_TRAINING_SAMPLES";
pub const EXTERNAL_TIMEOUT_ENV: &str = "SIFT_EXTERNAL_TIMEOUT_SECS";
pub const RETRAIN_AFTER_ENV: &str = "SIFT_RETRAIN_AFTER";

/// Runtime configuration for the categorization engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Auto-categorize only above this confidence (strictly greater)
    pub auto_apply_threshold: f64,
    pub min_training_samples: usize,
    pub external_timeout: Duration,
    /// Retrain once this many confirmations accumulate past the current model
    pub retrain_after: Option<usize>,
    pub chain_stores: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_apply_threshold: 0.7,
            min_training_samples: 20,
            external_timeout: Duration::from_secs(10),
            retrain_after: None,
            chain_stores: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load from the default override location plus environment
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load with an explicit override file
    pub fn load_from(override_path: Option<&Path>) -> Result<Self> {
        let mut config = load_config(override_path)?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Built-in defaults only (no file or environment lookups)
    pub fn builtin() -> Result<Self> {
        let mut config = Self::default();
        overlay_config(&mut config, DEFAULT_CONFIG)?;
        Ok(config)
    }

    /// Compile the chain-store list
    pub fn chain_stores(&self) -> Result<ChainStores> {
        ChainStores::new(&self.chain_stores)
    }

    /// Apply environment overrides; unparseable values are ignored with a warning
    fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env_value::<f64>(&get, AUTO_THRESHOLD_ENV) {
            self.auto_apply_threshold = v;
        }
        if let Some(v) = env_value::<usize>(&get, MIN_TRAINING_SAMPLES_ENV) {
            self.min_training_samples = v;
        }
        if let Some(v) = env_value::<u64>(&get, EXTERNAL_TIMEOUT_ENV) {
            self.external_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_value::<usize>(&get, RETRAIN_AFTER_ENV) {
            self.retrain_after = (v > 0).then_some(v);
        }
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.auto_apply_threshold) {
            return Err(Error::InvalidData(format!(
                "auto_apply_threshold must be within [0, 1], got {}",
                self.auto_apply_threshold
            )));
        }
        if self.external_timeout.is_zero() {
            return Err(Error::InvalidData(
                "external timeout must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_value<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = get(name)?;
    match raw.trim().parse() {
        Ok(v) => {
            debug!(var = name, value = %raw, "Config override from environment");
            Some(v)
        }
        Err(_) => {
            warn!(var = name, value = %raw, "Ignoring unparseable config override");
            None
        }
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("sift").join("config").join("engine.toml"))
}

/// Load configuration: built-in defaults, then the override file's keys on top
fn load_config(override_path: Option<&Path>) -> Result<EngineConfig> {
    let mut config = EngineConfig::builtin()?;

    let path = match override_path {
        Some(path) => Some(path.to_path_buf()),
        None => default_config_path(),
    };

    if let Some(path) = path.filter(|p| p.exists()) {
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::InvalidData(format!("Failed to read config: {}", e)))?;
        overlay_config(&mut config, &content)?;
        debug!(path = %path.display(), "Applied config override file");
    }

    Ok(config)
}

/// Raw TOML structure (every key optional so overrides can be partial)
#[derive(Debug, Deserialize)]
struct RawConfig {
    categorization: Option<RawCategorization>,
    classifier: Option<RawClassifier>,
    external: Option<RawExternal>,
    rules: Option<RawRules>,
}

#[derive(Debug, Deserialize)]
struct RawCategorization {
    auto_apply_threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawClassifier {
    min_training_samples: Option<usize>,
    retrain_after: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawExternal {
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawRules {
    chain_stores: Option<Vec<String>>,
}

/// Parse TOML content and overwrite only the keys it sets
fn overlay_config(config: &mut EngineConfig, content: &str) -> Result<()> {
    let raw: RawConfig = toml::from_str(content)
        .map_err(|e| Error::InvalidData(format!("Invalid config TOML: {}", e)))?;

    if let Some(cat) = raw.categorization {
        if let Some(threshold) = cat.auto_apply_threshold {
            config.auto_apply_threshold = threshold;
        }
    }

    if let Some(classifier) = raw.classifier {
        if let Some(min) = classifier.min_training_samples {
            config.min_training_samples = min;
        }
        if let Some(after) = classifier.retrain_after {
            config.retrain_after = (after > 0).then_some(after);
        }
    }

    if let Some(external) = raw.external {
        if let Some(secs) = external.timeout_secs {
            config.external_timeout = Duration::from_secs(secs);
        }
    }

    if let Some(rules) = raw.rules {
        if let Some(chains) = rules.chain_stores {
            config.chain_stores = chains;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_parse_default_config() {
        let config = EngineConfig::builtin().unwrap();
        assert_eq!(config.auto_apply_threshold, 0.7);
        assert_eq!(config.min_training_samples, 20);
        assert_eq!(config.external_timeout, Duration::from_secs(10));
        assert_eq!(config.retrain_after, None);
        assert!(config.chain_stores.contains(&"countdown".to_string()));
        assert!(config.chain_stores().is_ok());
    }

    #[test]
    fn test_partial_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[classifier]\nretrain_after = 10\n").unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.retrain_after, Some(10));
        // Unspecified keys keep their built-in values
        assert_eq!(config.auto_apply_threshold, 0.7);
        assert_eq!(config.chain_stores, EngineConfig::builtin().unwrap().chain_stores);
    }

    #[test]
    fn test_threshold_only_override_keeps_chain_stores() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[categorization]\nauto_apply_threshold = 0.8\n").unwrap();

        let config = EngineConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.auto_apply_threshold, 0.8);
        assert!(config.chain_stores.contains(&"countdown".to_string()));
        let pattern = config
            .chain_stores()
            .unwrap()
            .derive_pattern("COUNTDOWN PONSONBY")
            .unwrap();
        assert_eq!(pattern.pattern, "countdown");
        assert_eq!(pattern.match_type, crate::models::MatchType::Contains);
    }

    #[test]
    fn test_override_can_replace_chain_stores() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[rules]\nchain_stores = [\"four square\"]\n").unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.chain_stores, vec!["four square".to_string()]);
        assert_eq!(config.min_training_samples, 20);
    }

    #[test]
    fn test_missing_override_falls_back_to_default() {
        let config = load_config(Some(Path::new("/nonexistent/engine.toml"))).unwrap();
        assert_eq!(config.min_training_samples, 20);
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        let mut config = EngineConfig::default();
        assert!(overlay_config(&mut config, "[categorization\nauto_apply_threshold = ").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (AUTO_THRESHOLD_ENV, "0.85"),
            (MIN_TRAINING_SAMPLES_ENV, "5"),
            (EXTERNAL_TIMEOUT_ENV, "not-a-number"),
            (RETRAIN_AFTER_ENV, "25"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::builtin().unwrap();
        config.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.auto_apply_threshold, 0.85);
        assert_eq!(config.min_training_samples, 5);
        assert_eq!(config.external_timeout, Duration::from_secs(10));
        assert_eq!(config.retrain_after, Some(25));
    }

    #[test]
    fn test_validate_threshold_range() {
        let config = EngineConfig {
            auto_apply_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(EngineConfig::default().validate().is_ok());
    }
}
