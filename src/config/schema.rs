//! Configuration schema types for `site.toml` and `assets.toml`
//!
//! Defines the structure and validation rules for kiln site configuration.

use crate::filters::FilterSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Compression of emitted files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressConfig {
    /// Compression methods (`gzip`, `br`)
    #[serde(default)]
    pub methods: Vec<String>,
    /// File extensions to compress, without the leading dot
    #[serde(default)]
    pub extensions: Vec<String>,
}

/// Placement of materialized assets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticConfig {
    /// Subdirectory of the output directory receiving assets
    #[serde(default)]
    pub path: String,
    /// URL prefix for assets in production builds
    #[serde(default)]
    pub url: String,
    /// URL prefix for assets in dev builds (defaults to `/<path>`)
    #[serde(default)]
    pub dev_url: String,
    /// Whether assets are written below `path`
    #[serde(default)]
    pub assets: bool,
}

/// Markup conversion options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkupConfig {
    /// Convert straight quotes and dashes to typographic ones
    #[serde(default = "default_true")]
    pub smart_punctuation: bool,
}

impl Default for MarkupConfig {
    fn default() -> Self {
        Self { smart_punctuation: true }
    }
}

/// Per-tag index pages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagIndexConfig {
    /// Permalink template with `:tag` or `:lctag`
    #[serde(default = "default_tag_permalink")]
    pub permalink: String,
    /// Layout used for tag pages
    #[serde(default = "default_tag_layout")]
    pub layout: String,
}

impl Default for TagIndexConfig {
    fn default() -> Self {
        Self { permalink: default_tag_permalink(), layout: default_tag_layout() }
    }
}

fn default_tag_permalink() -> String {
    "tags/:lctag/".to_string()
}

fn default_tag_layout() -> String {
    "tag".to_string()
}

/// Watch mode settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Poll interval right after a change, in milliseconds (0 = default)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Poll interval once the site has been quiet, in milliseconds
    /// (0 = five times the active interval)
    #[serde(default)]
    pub idle_interval_ms: u64,
    /// Quiet period before switching to the idle interval, in seconds
    #[serde(default = "default_idle_after_secs")]
    pub idle_after_secs: u64,
    /// Extra exclusion globs, matched against full paths and basenames
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_idle_after_secs() -> u64 {
    300
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            idle_interval_ms: 0,
            idle_after_secs: default_idle_after_secs(),
            exclude: Vec::new(),
        }
    }
}

impl WatchConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn idle_after(&self) -> Duration {
        Duration::from_secs(self.idle_after_secs)
    }
}

/// Complete site.toml configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Site title
    #[serde(default)]
    pub name: String,
    /// Default author
    #[serde(default)]
    pub author: String,
    /// Absolute base URL, used by the sitemap
    #[serde(default)]
    pub url: String,
    /// Permalink template for posts
    #[serde(default = "default_permalink")]
    pub permalink: String,
    /// Sitemap file name, relative to the output directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sitemap: Option<String>,
    /// Remove the output directory before each build
    #[serde(default)]
    pub clean_before_building: bool,
    /// Free-form values exposed to templates as `site.<key>`
    #[serde(default)]
    pub properties: toml::Table,
    /// Page filters keyed by output extension (e.g. `".html"`)
    #[serde(default)]
    pub filters: HashMap<String, FilterSpec>,
    #[serde(default)]
    pub markup: MarkupConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compress: Option<CompressConfig>,
    #[serde(default, rename = "static", skip_serializing_if = "Option::is_none")]
    pub static_files: Option<StaticConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_index: Option<TagIndexConfig>,
    #[serde(default)]
    pub watch: WatchConfig,
}

fn default_permalink() -> String {
    "blog/:year/:month/:day/:name/".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            author: String::new(),
            url: String::new(),
            permalink: default_permalink(),
            sitemap: None,
            clean_before_building: false,
            properties: toml::Table::new(),
            filters: HashMap::new(),
            markup: MarkupConfig::default(),
            compress: None,
            static_files: None,
            tag_index: None,
            watch: WatchConfig::default(),
        }
    }
}

/// One `[[asset]]` entry of assets.toml
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSpec {
    /// Unique asset name, referenced by other assets as `$name`
    pub name: String,
    /// Sources in order: file paths or `$name` back-references
    #[serde(default)]
    pub files: Vec<String>,
    /// Inserted between consecutive sources
    #[serde(default)]
    pub separator: String,
    /// Output name template with `:hash`, or `$` to keep in memory
    pub outname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterSpec>,
}

/// Top level of assets.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetsFile {
    #[serde(default, rename = "asset")]
    pub assets: Vec<AssetSpec>,
}

/// Validation error for config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValidationError {
    /// Path to the invalid field (e.g., "tag_index.permalink")
    pub field: String,
    /// Error message
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "site.toml: '{}' {}", self.field, self.message)
    }
}

impl SiteConfig {
    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();

        if self.permalink.trim().is_empty() {
            errors.push(ConfigValidationError {
                field: "permalink".to_string(),
                message: "must be a non-empty template".to_string(),
            });
        }

        if let Some(tags) = &self.tag_index {
            if !tags.permalink.contains(":tag") && !tags.permalink.contains(":lctag") {
                errors.push(ConfigValidationError {
                    field: "tag_index.permalink".to_string(),
                    message: "must contain :tag or :lctag".to_string(),
                });
            }
        }

        for key in self.filters.keys() {
            if !key.starts_with('.') {
                errors.push(ConfigValidationError {
                    field: format!("filters.{}", key),
                    message: "must be a file extension starting with '.'".to_string(),
                });
            }
        }

        errors
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }

    /// Values exposed to templates under `site`.
    pub fn template_vars(&self) -> serde_yaml::Mapping {
        let mut vars = serde_yaml::Mapping::new();
        for (key, value) in &self.properties {
            if let Ok(value) = serde_yaml::to_value(value) {
                vars.insert(key.as_str().into(), value);
            }
        }
        vars.insert("name".into(), self.name.as_str().into());
        vars.insert("author".into(), self.author.as_str().into());
        vars.insert("url".into(), self.url.as_str().into());
        vars
    }
}
