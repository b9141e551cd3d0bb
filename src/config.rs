// Configuration management for CodeScout

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub project: ProjectConfig,
    pub indexing: IndexingConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    pub root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    pub exclude: Vec<String>,
    pub include: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding backend. Only the deterministic local "hashing" provider
    /// ships built in.
    pub model: String,
    pub dims: usize,
    /// Extra attempts after a transient embedding failure.
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Vector weight in hybrid fusion; keyword weight is `1 - alpha`.
    pub alpha: f32,
    /// Minimum per-store candidate pool regardless of the requested result
    /// count.
    pub floor_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project: ProjectConfig {
                name: "unnamed-project".to_string(),
                root: ".".to_string(),
            },
            indexing: IndexingConfig {
                exclude: vec![
                    "target/".to_string(),
                    "node_modules/".to_string(),
                    "*.test.*".to_string(),
                    "**/__tests__/**".to_string(),
                    ".git/".to_string(),
                    ".codescout/".to_string(),
                ],
                include: vec![],
            },
            embedding: EmbeddingConfig {
                model: "hashing".to_string(),
                dims: 256,
                max_retries: 2,
            },
            search: SearchConfig {
                alpha: 0.7,
                floor_k: 10,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from project directory
    /// Looks for .codescout.toml in the project root
    pub fn from_project_dir<P: AsRef<Path>>(project_dir: P) -> Self {
        let config_path = project_dir.as_ref().join(".codescout.toml");

        match Self::from_file(&config_path) {
            Ok(config) => {
                tracing::info!("Loaded configuration from {}", config_path.display());
                config
            }
            Err(e) => {
                tracing::debug!("Could not load config from {}: {}", config_path.display(), e);
                tracing::info!("Using default configuration");
                Self::default()
            }
        }
    }

    /// Where the index artifacts live for a project root.
    pub fn data_dir(root: &Path) -> PathBuf {
        root.join(".codescout")
    }

    /// Check if a file path should be indexed based on include/exclude patterns
    pub fn should_index_file(&self, file_path: &str) -> bool {
        // Check exclude patterns first
        for pattern in &self.indexing.exclude {
            if self.matches_pattern(file_path, pattern) {
                return false;
            }
        }

        // If include patterns are specified, file must match at least one
        if !self.indexing.include.is_empty() {
            for pattern in &self.indexing.include {
                if self.matches_pattern(file_path, pattern) {
                    return true;
                }
            }
            return false; // Include patterns specified but none matched
        }

        // No include patterns, and not excluded, so index it
        true
    }

    /// Simple pattern matching (supports glob-style patterns)
    fn matches_pattern(&self, file_path: &str, pattern: &str) -> bool {
        if pattern.ends_with('/') {
            // Directory pattern
            file_path.starts_with(pattern)
                || file_path.contains(&format!("/{}", pattern.trim_end_matches('/')))
        } else if pattern.starts_with("*.") {
            // File pattern like *.test.*
            let pattern_part = &pattern[2..]; // Remove *.
            file_path.contains(pattern_part)
        } else if pattern.contains("**") {
            // Recursive pattern - simplified for **/<dir>/**
            let dir = pattern.trim_start_matches("**/").trim_end_matches("/**");
            file_path.contains(&format!("/{dir}/")) || file_path.starts_with(&format!("{dir}/"))
        } else {
            // Exact match or prefix
            file_path.contains(pattern)
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.project.name.is_empty() {
            return Err(anyhow::anyhow!("Project name cannot be empty"));
        }

        if self.embedding.model != "hashing" {
            return Err(anyhow::anyhow!(
                "Unsupported embedding model: {}",
                self.embedding.model
            ));
        }
        if self.embedding.dims == 0 {
            return Err(anyhow::anyhow!("Embedding dims must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.search.alpha) {
            return Err(anyhow::anyhow!(
                "Search alpha must be between 0.0 and 1.0, got {}",
                self.search.alpha
            ));
        }
        if self.search.floor_k == 0 {
            return Err(anyhow::anyhow!("Search floor_k must be greater than 0"));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!("Invalid log level: {}", self.logging.level));
        }
        let valid_formats = ["compact", "pretty", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!("Invalid log format: {}", self.logging.format));
        }

        Ok(())
    }
}

/// Load configuration for a project
pub fn load_config(project_dir: &str) -> Config {
    Config::from_project_dir(project_dir)
}
