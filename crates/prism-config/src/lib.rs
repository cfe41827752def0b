//! Prism configuration management
//!
//! Handles loading and saving configuration from ~/.prism/config.toml and
//! watching the effects directory for hot-reload. The depth-related keys are
//! passed through unopinionated to the runtime's depth source selector.

pub mod watcher;

pub use watcher::{EffectEvent, EffectWatcher};

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

/// Default configuration directory name
const CONFIG_DIR_NAME: &str = ".prism";
/// Default configuration file name
const CONFIG_FILE_NAME: &str = "config.toml";
/// Default effects directory name
const EFFECTS_DIR_NAME: &str = "effects";

/// General configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory searched for effect files, absolute or relative to ~/.prism/
    #[serde(default = "default_effects_dir")]
    pub effects_dir: String,

    /// Reload effects automatically when files in the effects directory change
    #[serde(default = "default_true")]
    pub hot_reload: bool,
}

fn default_effects_dir() -> String {
    EFFECTS_DIR_NAME.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            effects_dir: default_effects_dir(),
            hot_reload: true,
        }
    }
}

/// Depth buffer detection settings, consumed by the depth source selector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthConfig {
    /// Copy depth buffers before clear operations instead of using the final one
    #[serde(default)]
    pub preserve_depth_buffers: bool,

    /// Which clear operation to preserve the depth buffer contents before.
    /// Zero disables preservation and is normalized to `u32::MAX` on load,
    /// since zero cannot mean "disabled" and "first clear" at the same time.
    #[serde(default)]
    pub clear_index_override: u32,

    /// Reject depth buffer candidates whose aspect ratio does not match the output
    #[serde(default = "default_true")]
    pub use_aspect_ratio_heuristics: bool,
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            preserve_depth_buffers: false,
            clear_index_override: 0,
            use_aspect_ratio_heuristics: true,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Depth detection settings
    #[serde(default)]
    pub depth: DepthConfig,
}

impl Config {
    /// Load configuration from file, creating a default one if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_file_path()?;

        if !config_path.exists() {
            log::info!("Config file not found, creating default at {config_path:?}");
            Self::create_default_config()?;
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::Read(config_path.clone(), e))?;

        let mut config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(config_path.clone(), e))?;
        config.normalize();

        log::info!("Loaded configuration from {config_path:?}");
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read(path.clone(), e))?;

        let mut config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(path.clone(), e))?;
        config.normalize();

        Ok(config)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_file_path()?;
        self.save_to(&config_path)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &PathBuf) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(path, content).map_err(|e| ConfigError::Write(path.clone(), e))?;
        Ok(())
    }

    /// Apply value normalization that cannot be expressed in serde defaults
    fn normalize(&mut self) {
        // Zero is not a valid clear index, since it disables depth buffer
        // preservation
        if self.depth.clear_index_override == 0 {
            self.depth.clear_index_override = u32::MAX;
        }
    }

    /// Get the configuration directory path (~/.prism/)
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDirectory)?;
        Ok(home.join(CONFIG_DIR_NAME))
    }

    /// Get the configuration file path (~/.prism/config.toml)
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join(CONFIG_FILE_NAME))
    }

    /// Resolve the effects directory to an absolute path
    pub fn effects_dir(&self) -> Result<PathBuf, ConfigError> {
        let dir = PathBuf::from(&self.general.effects_dir);
        if dir.is_absolute() {
            Ok(dir)
        } else {
            Ok(Self::config_dir()?.join(dir))
        }
    }

    /// Create the default configuration file and directory structure
    pub fn create_default_config() -> Result<(), ConfigError> {
        let config_dir = Self::config_dir()?;
        let config_path = Self::config_file_path()?;

        fs::create_dir_all(&config_dir)
            .map_err(|e| ConfigError::CreateDir(config_dir.clone(), e))?;

        let default_config = Config::default();
        let effects_dir = default_config.effects_dir()?;
        fs::create_dir_all(&effects_dir)
            .map_err(|e| ConfigError::CreateDir(effects_dir.clone(), e))?;

        let toml_content =
            toml::to_string_pretty(&default_config).map_err(ConfigError::Serialize)?;

        let content = format!(
            "# Prism Configuration\n\
             #\n\
             # Effect files are loaded from the effects directory below.\n\
             # Depth settings are forwarded to the depth buffer detection.\n\
             \n\
             {toml_content}"
        );

        fs::write(&config_path, content).map_err(|e| ConfigError::Write(config_path.clone(), e))?;

        log::info!("Created default configuration at {config_path:?}");
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("home directory not found")]
    NoHomeDirectory,
    #[error("failed to read {0:?}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse {0:?}: {1}")]
    Parse(PathBuf, toml::de::Error),
    #[error("failed to write {0:?}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error("failed to create directory {0:?}: {1}")]
    CreateDir(PathBuf, std::io::Error),
    #[error("failed to serialize configuration: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to watch {0}")]
    Watch(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.depth.preserve_depth_buffers);
        assert!(config.depth.use_aspect_ratio_heuristics);
        assert_eq!(config.depth.clear_index_override, 0);
        assert!(config.general.hot_reload);
    }

    #[test]
    fn test_clear_index_zero_normalized_to_disabled() {
        let mut config = Config::default();
        config.normalize();
        assert_eq!(config.depth.clear_index_override, u32::MAX);
    }

    #[test]
    fn test_nonzero_clear_index_preserved() {
        let mut config = Config::default();
        config.depth.clear_index_override = 3;
        config.normalize();
        assert_eq!(config.depth.clear_index_override, 3);
    }

    #[test]
    fn test_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.depth.preserve_depth_buffers = true;
        config.depth.clear_index_override = 2;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert!(loaded.depth.preserve_depth_buffers);
        assert_eq!(loaded.depth.clear_index_override, 2);
    }

    #[test]
    fn test_load_normalizes_zero_clear_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        Config::default().save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.depth.clear_index_override, u32::MAX);
    }

    #[test]
    fn test_parse_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[depth]\npreserve_depth_buffers = true\n").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert!(loaded.depth.preserve_depth_buffers);
        assert_eq!(loaded.general.effects_dir, "effects");
    }
}
