//! Configuration loading for sift.
//!
//! Layered: defaults -> user config file -> explicit config file -> SIFT_* env.
//! CLI flags are applied by the caller on top.

use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::SiftError;
use crate::fields::TypeDefinition;

/// Which engine backs the index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Embedded tantivy index on local disk
    #[default]
    Local,
    /// Remote Elasticsearch-compatible engine over HTTP
    Elastic,
}

/// Engine connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub kind: EngineKind,

    /// Directory of the local index
    #[serde(default = "default_index_path")]
    pub index_path: String,

    /// Writer heap for the local index in megabytes
    #[serde(default = "default_writer_memory_mb")]
    pub writer_memory_mb: usize,

    /// Base URL of the remote engine
    #[serde(default = "default_url")]
    pub url: String,

    /// Remote index name
    #[serde(default = "default_index_name")]
    pub index_name: String,

    /// Request-level timeout for searches
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_index_path() -> String {
    ProjectDirs::from("", "", "sift")
        .map(|p| p.data_local_dir().join("index"))
        .unwrap_or_else(|| PathBuf::from("./sift-index"))
        .to_string_lossy()
        .to_string()
}

fn default_writer_memory_mb() -> usize {
    50
}

fn default_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_index_name() -> String {
    "sift".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            kind: EngineKind::default(),
            index_path: default_index_path(),
            writer_memory_mb: default_writer_memory_mb(),
            url: default_url(),
            index_name: default_index_name(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Defaults applied to every search built from settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default = "default_results_per_page")]
    pub results_per_page: usize,

    #[serde(default)]
    pub fuzziness: u32,

    /// Boost on the exact keyword match strategy
    #[serde(default = "default_content_boost")]
    pub content_boost: f32,

    /// Run filter-only searches when the query text is empty
    #[serde(default)]
    pub allow_empty: bool,

    /// Fields searched when a request does not name any
    #[serde(default = "default_fields")]
    pub fields: Vec<String>,
}

fn default_results_per_page() -> usize {
    10
}

fn default_content_boost() -> f32 {
    3.0
}

fn default_fields() -> Vec<String> {
    vec!["Title".to_string(), "Content".to_string()]
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            results_per_page: default_results_per_page(),
            fuzziness: 0,
            content_boost: default_content_boost(),
            allow_empty: false,
            fields: default_fields(),
        }
    }
}

/// Stale document pruning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruneSettings {
    /// Optional `field:value` restriction
    #[serde(default)]
    pub filter: Option<String>,

    #[serde(default = "default_older_than_days")]
    pub older_than_days: u32,

    /// Seconds between runs once the backlog is drained; 0 runs once
    #[serde(default)]
    pub repeat_secs: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Delay before the next batch while a full batch was just deleted
    #[serde(default = "default_backlog_backoff_secs")]
    pub backlog_backoff_secs: u64,
}

fn default_older_than_days() -> u32 {
    30
}

fn default_batch_size() -> usize {
    500
}

fn default_backlog_backoff_secs() -> u64 {
    3600
}

impl Default for PruneSettings {
    fn default() -> Self {
        Self {
            filter: None,
            older_than_days: default_older_than_days(),
            repeat_secs: 0,
            batch_size: default_batch_size(),
            backlog_backoff_secs: default_backlog_backoff_secs(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub search: SearchSettings,

    #[serde(default)]
    pub prune: PruneSettings,

    /// Content types known to the index
    #[serde(default)]
    pub types: Vec<TypeDefinition>,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            search: SearchSettings::default(),
            prune: PruneSettings::default(),
            types: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

fn config_err(e: config::ConfigError) -> SiftError {
    SiftError::Config(e.to_string())
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. User config file (~/.config/sift/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (SIFT_ENGINE__URL, SIFT_LOG_LEVEL, ...)
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, SiftError> {
        let config_dir = ProjectDirs::from("", "", "sift")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("log_level", default_log_level())
            .map_err(config_err)?
            .set_default("engine.index_path", default_index_path())
            .map_err(config_err)?
            .set_default("engine.url", default_url())
            .map_err(config_err)?
            .set_default("engine.index_name", default_index_name())
            .map_err(config_err)?
            .set_default("engine.timeout_ms", default_timeout_ms() as i64)
            .map_err(config_err)?
            .set_default("search.results_per_page", default_results_per_page() as i64)
            .map_err(config_err)?
            .set_default("prune.batch_size", default_batch_size() as i64)
            .map_err(config_err)?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("SIFT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .map_err(config_err)?
            .try_deserialize()
            .map_err(config_err)
    }

    pub fn index_path(&self) -> PathBuf {
        PathBuf::from(&self.engine.index_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldType;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.engine.kind, EngineKind::Local);
        assert_eq!(settings.search.results_per_page, 10);
        assert_eq!(settings.prune.batch_size, 500);
        assert_eq!(settings.prune.backlog_backoff_secs, 3600);
        assert!((settings.search.content_boost - 3.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_load_with_defaults() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.engine.index_name, "sift");
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sift.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[engine]
kind = "elastic"
url = "http://search:9200"

[prune]
filter = "ClassName:Event"
older_than_days = 90

[[types]]
name = "Article"
fields = {{ Title = {{ type = "text" }}, Category = {{ type = "keyword" }} }}
"#
        )
        .unwrap();

        let settings = Settings::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.engine.kind, EngineKind::Elastic);
        assert_eq!(settings.engine.url, "http://search:9200");
        assert_eq!(settings.prune.filter.as_deref(), Some("ClassName:Event"));
        assert_eq!(settings.prune.older_than_days, 90);
        assert_eq!(settings.types.len(), 1);
        assert_eq!(
            settings.types[0].fields["Category"].field_type,
            FieldType::Keyword
        );
    }

    #[test]
    fn test_missing_cli_file_is_error() {
        assert!(Settings::load(Some("/nonexistent/sift-config.toml")).is_err());
    }
}
