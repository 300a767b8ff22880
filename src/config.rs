//! Configuration management with YAML support

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::views::ViewSettings;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub sources: HashMap<String, SourceConfig>,

    #[serde(default)]
    pub ranking: RankingConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub metadata: MetadataConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

/// Individual source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub status: Option<String>, // 'active', 'frozen', 'deprecated'

    #[serde(default)]
    pub base_path: Option<String>,

    /// File name glob for directory sources
    #[serde(default)]
    pub pattern: Option<String>,
}

/// Leaderboard and view limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    #[serde(default = "default_limit")]
    pub top_n: usize,

    #[serde(default = "default_limit")]
    pub recent_limit: usize,
}

/// Ingest behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Only normalize batches collected since the newest ingested play
    #[serde(default = "default_enabled")]
    pub incremental: bool,
}

/// Artist metadata input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// JSON file of artist rows loaded before each recompute
    #[serde(default)]
    pub path: Option<String>,
}

// Default value functions
fn default_database_path() -> String {
    "~/.local/share/playlog/playlog.db".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_limit() -> usize {
    50
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_n: default_limit(),
            recent_limit: default_limit(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { incremental: true }
    }
}

impl Config {
    /// Load configuration from a YAML file
    /// Searches in order:
    /// 1. Provided path
    /// 2. ./playlog.yaml (current directory)
    /// 3. ~/.config/playlog/playlog.yaml
    pub fn load(path: &str) -> Result<Self> {
        let search_paths = vec![
            shellexpand::tilde(path).to_string(),
            "playlog.yaml".to_string(),
            shellexpand::tilde("~/.config/playlog/playlog.yaml").to_string(),
        ];

        for search_path in &search_paths {
            if std::path::Path::new(search_path).exists() {
                let content = std::fs::read_to_string(search_path)?;
                let config: Config = serde_yaml::from_str(&content)?;
                return Ok(config);
            }
        }

        // No config file found, use defaults
        Ok(Config::default())
    }

    /// Get the database path, expanding ~ to home directory
    pub fn database_path(&self) -> PathBuf {
        let expanded = shellexpand::tilde(&self.database.path).to_string();
        PathBuf::from(expanded)
    }

    /// Check if a source is enabled
    /// Returns false if:
    /// - Source is explicitly disabled
    /// - Source status is 'frozen' or 'deprecated'
    pub fn is_source_enabled(&self, source_id: &str) -> bool {
        self.sources.get(source_id).map_or(true, |s| {
            if !s.enabled {
                return false;
            }
            !matches!(s.status.as_deref(), Some("frozen") | Some("deprecated"))
        })
    }

    /// Get the base path for a source, if configured
    pub fn source_path(&self, source_id: &str) -> Option<PathBuf> {
        self.sources
            .get(source_id)
            .and_then(|s| s.base_path.as_ref())
            .map(|p| PathBuf::from(shellexpand::tilde(p).to_string()))
    }

    pub fn source_pattern(&self, source_id: &str) -> Option<String> {
        self.sources.get(source_id).and_then(|s| s.pattern.clone())
    }

    /// Get source status
    pub fn source_status(&self, source_id: &str) -> &str {
        self.sources
            .get(source_id)
            .and_then(|s| s.status.as_deref())
            .unwrap_or("active")
    }

    pub fn metadata_path(&self) -> Option<PathBuf> {
        self.metadata
            .path
            .as_ref()
            .map(|p| PathBuf::from(shellexpand::tilde(p).to_string()))
    }

    pub fn view_settings(&self) -> ViewSettings {
        ViewSettings {
            top_n: self.ranking.top_n.max(1),
            recent_limit: self.ranking.recent_limit.max(1),
        }
    }
}
