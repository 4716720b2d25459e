// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for Arquivista

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::categories::{default_rules, CategoryRules};
use crate::organizer::CollisionPolicy;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Root of the per-owner storage tree
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Extension → category table
    #[serde(default = "default_categories")]
    pub categories: BTreeMap<String, String>,

    /// Organize defaults
    #[serde(default)]
    pub organize: OrganizeConfig,

    /// Watch mode settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// Web API settings
    #[serde(default)]
    pub web: WebConfig,

    /// Database settings
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Default)]
pub struct OrganizeConfig {
    /// Collision policy used when the caller does not pick one
    #[serde(default)]
    pub on_conflict: CollisionPolicy,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// Directory watched when none is given on the command line
    #[serde(default = "default_inbox")]
    pub inbox: PathBuf,
    /// Owner used by watch mode when none is given on the command line
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default = "default_stability_timeout")]
    pub stability_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct WebConfig {
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

// Default value functions
fn default_storage_root() -> PathBuf { PathBuf::from("storage") }
fn default_inbox() -> PathBuf { PathBuf::from("inbox") }
fn default_stability_timeout() -> u64 { 10 }
fn default_poll_interval() -> u64 { 2 }
fn default_web_host() -> String { "127.0.0.1".to_string() }
fn default_web_port() -> u16 { 8080 }
fn default_db_path() -> PathBuf { PathBuf::from("arquivista.db") }

fn default_categories() -> BTreeMap<String, String> {
    default_rules()
        .into_iter()
        .map(|(ext, category)| (ext.to_string(), category.to_string()))
        .collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            categories: default_categories(),
            organize: OrganizeConfig::default(),
            watch: WatchConfig::default(),
            web: WebConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            inbox: default_inbox(),
            owner: None,
            stability_timeout_secs: default_stability_timeout(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::ArquivistaError::Config(format!("Failed to parse config: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Build the category table
    pub fn category_rules(&self) -> crate::Result<CategoryRules> {
        CategoryRules::new(&self.categories)
    }

    /// Check everything that can be checked without touching the filesystem
    pub fn validate(&self) -> crate::Result<()> {
        self.category_rules()?;
        if self.storage_root.as_os_str().is_empty() {
            return Err(crate::ArquivistaError::Config(
                "storage_root cannot be empty".to_string(),
            ));
        }
        if let Some(owner) = &self.watch.owner {
            crate::Owner::new(owner.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        let rules = config.category_rules().unwrap();
        assert_eq!(rules.resolve("png"), "images/png");
        assert_eq!(config.organize.on_conflict, CollisionPolicy::Reject);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{ "storage_root": "/srv/arquivo", "organize": { "on_conflict": "rename" } }"#,
        )
        .unwrap();
        assert_eq!(config.storage_root, PathBuf::from("/srv/arquivo"));
        assert_eq!(config.organize.on_conflict, CollisionPolicy::Rename);
        assert_eq!(config.database.path, PathBuf::from("arquivista.db"));
        assert_eq!(config.categories, default_categories());
        assert_eq!(config.web.port, 8080);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = AppConfig::default();
        config.categories.insert("rs".to_string(), "code/rust".to_string());
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.category_rules().unwrap().resolve("RS"), "code/rust");
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = AppConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, AppConfig::default());
    }

    #[test]
    fn test_load_rejects_bad_categories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "categories": { "png": "../../etc" } }"#).unwrap();
        assert!(matches!(
            AppConfig::load(&path),
            Err(crate::ArquivistaError::Config(_))
        ));
    }
}
