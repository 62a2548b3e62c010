//! Configuration management for scrollback

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::errors::ConfigError;
use crate::core::types::Direction;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FeedConfig {
    pub pagination: PaginationConfig,
    pub trigger: TriggerConfig,
}

/// Page sizes used by the pagination controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub older_page_size: usize,
    pub newer_page_size: usize,
    /// Size of the page that seeds a freshly opened window
    pub initial_page_size: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            older_page_size: 50,
            newer_page_size: 50,
            initial_page_size: 50,
        }
    }
}

impl PaginationConfig {
    pub fn page_size(&self, direction: Direction) -> usize {
        match direction {
            Direction::Older => self.older_page_size,
            Direction::Newer => self.newer_page_size,
        }
    }
}

/// How early, in items from an edge, a prefetch is triggered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Shared threshold for both directions
    pub proximity_item_count: usize,
    /// Override for the older (top) edge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub older_item_count: Option<usize>,
    /// Override for the newer (bottom) edge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newer_item_count: Option<usize>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            proximity_item_count: 10,
            older_item_count: None,
            newer_item_count: None,
        }
    }
}

impl TriggerConfig {
    pub fn threshold(&self, direction: Direction) -> usize {
        let specific = match direction {
            Direction::Older => self.older_item_count,
            Direction::Newer => self.newer_item_count,
        };
        specific.unwrap_or(self.proximity_item_count)
    }
}

impl FeedConfig {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(FeedConfig::default())
        }
    }

    /// Load and validate configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: FeedConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "scrollback") {
            let config_dir = proj_dirs.config_dir();
            std::fs::create_dir_all(config_dir)?;
            Ok(config_dir.join("config.toml"))
        } else {
            Ok(PathBuf::from("config.toml"))
        }
    }

    /// Save configuration to default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the controller cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("pagination.older_page_size", self.pagination.older_page_size),
            ("pagination.newer_page_size", self.pagination.newer_page_size),
            (
                "pagination.initial_page_size",
                self.pagination.initial_page_size,
            ),
        ];
        for (field, value) in sizes {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "page size must be at least 1".to_string(),
                });
            }
        }
        Ok(())
    }
}
