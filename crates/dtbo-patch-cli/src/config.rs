//! Configuration management.

use anyhow::{Context, Result};
use dtbo_patch_engine::{DeviceProfile, ProfileRegistry, DEFAULT_IDENTITY_PROPERTY};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the decompiled overlay sources
    #[serde(default = "default_dts_dir")]
    pub dts_dir: String,

    /// File extension of sources to patch, without the dot
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Property carrying each file's target identifier
    #[serde(default = "default_identity_property")]
    pub identity_property: String,

    /// Substrings marking engineering panels (replaces the built-in list)
    #[serde(default)]
    pub engineering_markers: Option<Vec<String>>,

    /// Device facts
    #[serde(default)]
    pub facts: FactsConfig,

    /// Extra device profiles; an id matching a built-in replaces it
    #[serde(default)]
    pub profiles: Vec<DeviceProfile>,
}

/// Where the device model and target identifier come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactsConfig {
    /// Fixed device model, skipping the property lookup
    #[serde(default)]
    pub model: Option<String>,

    /// Fixed target identifier, skipping the property lookup
    #[serde(default)]
    pub target_id: Option<String>,

    /// System property holding the device model
    #[serde(default = "default_model_prop")]
    pub model_prop: String,

    /// System property holding the target identifier
    #[serde(default = "default_target_prop")]
    pub target_prop: String,

    /// Property reader command
    #[serde(default = "default_getprop")]
    pub getprop: String,
}

impl Default for FactsConfig {
    fn default() -> Self {
        Self {
            model: None,
            target_id: None,
            model_prop: default_model_prop(),
            target_prop: default_target_prop(),
            getprop: default_getprop(),
        }
    }
}

// Default value functions
fn default_dts_dir() -> String {
    "dtbo_dts".to_string()
}

fn default_extension() -> String {
    "dts".to_string()
}

fn default_identity_property() -> String {
    DEFAULT_IDENTITY_PROPERTY.to_string()
}

fn default_model_prop() -> String {
    "ro.product.vendor.model".to_string()
}

fn default_target_prop() -> String {
    "ro.boot.prjname".to_string()
}

fn default_getprop() -> String {
    "getprop".to_string()
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read configuration file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse configuration")?;
        Ok(config)
    }

    /// Built-in profiles with the configured ones merged in, validated.
    pub fn registry(&self) -> Result<ProfileRegistry> {
        let mut registry = ProfileRegistry::builtin();
        registry.merge(self.profiles.iter().cloned());
        if let Some(markers) = &self.engineering_markers {
            registry.set_engineering_markers(markers.clone());
        }
        registry.validate().context("Invalid device profile")?;
        Ok(registry)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dts_dir: default_dts_dir(),
            extension: default_extension(),
            identity_property: default_identity_property(),
            engineering_markers: None,
            facts: FactsConfig::default(),
            profiles: Vec::new(),
        }
    }
}
